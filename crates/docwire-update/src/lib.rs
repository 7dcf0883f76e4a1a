//! Applies the update AST parsed by `docwire_query::update` to a
//! document (spec §4.5): ordering, conflict detection, array-filter
//! binding, and upsert composition.

mod apply;
mod array_filter;
mod upsert;

pub use apply::{apply_update, ApplyOutcome};
pub use array_filter::{parse_array_filters, ArrayFilter};
pub use upsert::compose_upsert_document;
