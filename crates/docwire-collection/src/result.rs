//! Operation results returned across the collection boundary (spec
//! §4.7). Grounded in the teacher's `slate_db::result` types,
//! generalized from a bare `{id: String}` to carry `_id` as a `Value`
//! and to report per-document errors for unordered write batches.

use docwire_value::Value;

#[derive(Debug, Clone)]
pub struct InsertResult {
    pub id: Value,
}

#[derive(Debug, Clone)]
pub struct WriteError {
    pub index: usize,
    pub error: crate::error::CollectionError,
}

#[derive(Debug, Default)]
pub struct InsertManyResult {
    pub inserted: Vec<InsertResult>,
    pub write_errors: Vec<WriteError>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
}

#[derive(Debug, Clone, Default)]
pub struct UpsertResult {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteResult {
    pub deleted: u64,
}

#[derive(Debug, Clone)]
pub struct FindAndModifyResult {
    pub value: Option<Value>,
}
