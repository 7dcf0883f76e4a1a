//! Value model and dotted-path engine (spec §3, §4.1, §4.2).

mod path;
mod value;

pub use path::{can_fully_traverse_for_rename, copy, get, get_collection_aware, has, remove, set, Fragment, Path};
pub use value::{Document, ObjectId, Value};
