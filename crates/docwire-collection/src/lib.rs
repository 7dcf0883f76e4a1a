//! Collection and cursor manager (spec §4.7): ties the value model,
//! path engine, expression evaluator, matcher, update engine, and
//! pipeline together over a pluggable storage backend, with the
//! concurrency and cursor discipline spec §5 requires.

mod catalog;
mod config;
mod cursor;
mod database;
mod encoding;
mod error;
mod oplog;
mod result;

pub use catalog::IndexSpec;
pub use config::{Config, WriteConcern};
pub use cursor::CursorRegistry;
pub use database::{CollectionLookup, Database, DatabaseTransaction, FindAndModifyOp, UpdateOptions};
pub use error::CollectionError;
pub use oplog::{NoOpSink, OpKind, OplogEntry, OplogSink};
pub use result::{DeleteResult, FindAndModifyResult, InsertManyResult, InsertResult, UpdateResult, UpsertResult, WriteError};
