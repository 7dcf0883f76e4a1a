//! Projection and aggregation pipeline (spec §4.6).

mod pipeline;
mod projection;

pub use pipeline::{
    parse_pipeline, parse_stage, run_pipeline, Accumulator, DocStream, LookupSource, MergeSpec, OutputSink, Stage,
    SortDirection, WhenMatched, WhenNotMatched,
};
pub use projection::Projection;
