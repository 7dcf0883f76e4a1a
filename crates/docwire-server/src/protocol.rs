//! Wire protocol (spec §6 "wire boundary"): the core accepts and
//! returns Documents; numeric error codes surface verbatim. Framing
//! and the request/response shapes are grounded in the teacher's
//! `slate_server::protocol`, generalized from its bson/`Query` surface
//! to this engine's filter/update/pipeline documents.

use serde::{Deserialize, Serialize};

use docwire_collection::IndexSpec;
use docwire_value::{Document, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    InsertOne { collection: String, document: Document },
    InsertMany { collection: String, documents: Vec<Document>, ordered: bool },
    Find { collection: String, filter: Option<Document>, batch_size: Option<usize> },
    FindById { collection: String, id: Value },
    Count { collection: String, filter: Option<Document> },
    Aggregate { collection: String, pipeline: Vec<Document>, batch_size: Option<usize> },
    UpdateOne { collection: String, filter: Document, update: Document, upsert: bool, array_filters: Vec<Document> },
    UpdateMany { collection: String, filter: Document, update: Document, upsert: bool, array_filters: Vec<Document> },
    ReplaceOne { collection: String, filter: Document, replacement: Document },
    DeleteOne { collection: String, filter: Document },
    DeleteMany { collection: String, filter: Document },
    FindAndModify { collection: String, filter: Document, update: Option<Document>, remove: bool, upsert: bool, return_new: bool, array_filters: Vec<Document> },
    GetMore { cursor_id: u64, batch_size: usize },
    KillCursors { cursor_ids: Vec<u64> },
    CreateIndex { collection: String, field: String, unique: bool },
    DropIndex { collection: String, field: String },
    ListIndexes { collection: String },
    ListCollections,
    DropCollection { collection: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteErrorWire {
    pub index: usize,
    pub code: i32,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWire {
    pub code: i32,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Inserted { id: Value },
    InsertedMany { ids: Vec<Value>, write_errors: Vec<WriteErrorWire> },
    Batch { cursor_id: u64, documents: Vec<Document> },
    Document(Option<Document>),
    Updated { matched: u64, modified: u64, upserted_id: Option<Value> },
    Deleted { deleted: u64 },
    Count(u64),
    Indexes(Vec<IndexSpec>),
    Collections(Vec<String>),
    Error(ErrorWire),
}

impl From<docwire_errors::Error> for Response {
    fn from(e: docwire_errors::Error) -> Self {
        Response::Error(ErrorWire { code: e.numeric_code(), name: e.code_name().to_string(), message: e.message.clone() })
    }
}
