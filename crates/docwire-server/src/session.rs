//! Request dispatch for one connection (spec §4.7, §5). Grounded in
//! the teacher's `slate_server::session::Session`: a thin read/write
//! wrapper around a transaction, committing on success and rolling
//! back on any error before mapping it to a wire response.

use std::sync::Arc;

use docwire_collection::{Database, DatabaseTransaction, FindAndModifyOp, UpdateOptions};
use docwire_errors::Error;
use docwire_pipeline::parse_pipeline;
use docwire_query::{parse_filter, parse_update, Predicate};
use docwire_store::Store;
use docwire_value::Document;

use crate::protocol::{Request, Response};

pub struct Session<S: Store> {
    db: Arc<Database<S>>,
}

impl<S: Store> Session<S> {
    pub fn new(db: Arc<Database<S>>) -> Self {
        Self { db }
    }

    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::InsertOne { collection, document } => self.write(|txn| {
                let result = txn.insert_one(&collection, document)?;
                Ok(Response::Inserted { id: result.id })
            }),
            Request::InsertMany { collection, documents, ordered } => self.write(|txn| {
                let result = txn.insert_many(&collection, documents, ordered)?;
                let ids = result.inserted.into_iter().map(|r| r.id).collect();
                let write_errors = result
                    .write_errors
                    .into_iter()
                    .map(|e| {
                        let err: Error = e.error.into();
                        crate::protocol::WriteErrorWire { index: e.index, code: err.numeric_code(), name: err.code_name().to_string(), message: err.message }
                    })
                    .collect();
                Ok(Response::InsertedMany { ids, write_errors })
            }),
            Request::Find { collection, filter, batch_size } => self.read(|txn| {
                let predicate = filter_from(filter.as_ref())?;
                let docs = txn.find(&collection, predicate.as_ref())?;
                Ok(self.open_cursor(&collection, docs, batch_size))
            }),
            Request::FindById { collection, id } => self.read(|txn| {
                let doc = txn.find_by_id(&collection, &id)?;
                Ok(Response::Document(doc.and_then(|v| v.as_document().cloned())))
            }),
            Request::Count { collection, filter } => self.read(|txn| {
                let predicate = filter_from(filter.as_ref())?;
                let count = txn.count(&collection, predicate.as_ref())?;
                Ok(Response::Count(count))
            }),
            Request::Aggregate { collection, pipeline, batch_size } => self.write(|txn| {
                let stages = parse_pipeline(&pipeline).map_err(docwire_collection::CollectionError::from)?;
                let docs = txn.aggregate(&collection, &stages)?;
                Ok(self.open_cursor(&collection, docs, batch_size))
            }),
            Request::UpdateOne { collection, filter, update, upsert, array_filters } => self.write(|txn| {
                let predicate = parse_filter(&filter).map_err(docwire_collection::CollectionError::from)?;
                let update_doc = parse_update(&update).map_err(docwire_collection::CollectionError::from)?;
                let opts = UpdateOptions { upsert, array_filters };
                let result = txn.update_one(&collection, &predicate, &update_doc, &opts)?;
                Ok(Response::Updated { matched: result.matched, modified: result.modified, upserted_id: result.upserted_id })
            }),
            Request::UpdateMany { collection, filter, update, upsert, array_filters } => self.write(|txn| {
                let predicate = parse_filter(&filter).map_err(docwire_collection::CollectionError::from)?;
                let update_doc = parse_update(&update).map_err(docwire_collection::CollectionError::from)?;
                let opts = UpdateOptions { upsert, array_filters };
                let result = txn.update_many(&collection, &predicate, &update_doc, &opts)?;
                Ok(Response::Updated { matched: result.matched, modified: result.modified, upserted_id: result.upserted_id })
            }),
            Request::ReplaceOne { collection, filter, replacement } => self.write(|txn| {
                let predicate = parse_filter(&filter).map_err(docwire_collection::CollectionError::from)?;
                let result = txn.replace_one(&collection, &predicate, replacement)?;
                Ok(Response::Updated { matched: result.matched, modified: result.modified, upserted_id: None })
            }),
            Request::DeleteOne { collection, filter } => self.write(|txn| {
                let predicate = parse_filter(&filter).map_err(docwire_collection::CollectionError::from)?;
                let result = txn.delete_one(&collection, &predicate)?;
                Ok(Response::Deleted { deleted: result.deleted })
            }),
            Request::DeleteMany { collection, filter } => self.write(|txn| {
                let predicate = parse_filter(&filter).map_err(docwire_collection::CollectionError::from)?;
                let result = txn.delete_many(&collection, &predicate)?;
                Ok(Response::Deleted { deleted: result.deleted })
            }),
            Request::FindAndModify { collection, filter, update, remove, upsert, return_new, array_filters } => self.write(|txn| {
                let predicate = parse_filter(&filter).map_err(docwire_collection::CollectionError::from)?;
                let op = if remove {
                    FindAndModifyOp::Remove
                } else {
                    let update_doc = update
                        .as_ref()
                        .ok_or_else(|| docwire_collection::CollectionError::from(Error::bad_value("findAndModify requires update unless remove is set")))
                        .and_then(|u| parse_update(u).map_err(docwire_collection::CollectionError::from))?;
                    FindAndModifyOp::Update { update: update_doc, array_filters, upsert, return_new }
                };
                let result = txn.find_and_modify(&collection, &predicate, op)?;
                Ok(Response::Document(result.value.and_then(|v| v.as_document().cloned())))
            }),
            Request::GetMore { cursor_id, batch_size } => match self.db.cursors().get_more(cursor_id, batch_size) {
                Ok((batch, exhausted)) => {
                    let documents = batch.into_iter().filter_map(|v| v.as_document().cloned()).collect();
                    Response::Batch { cursor_id: if exhausted { 0 } else { cursor_id }, documents }
                }
                Err(e) => Response::from(Error::from(e)),
            },
            Request::KillCursors { cursor_ids } => {
                for id in cursor_ids {
                    self.db.cursors().kill(id);
                }
                Response::Ok
            }
            Request::CreateIndex { collection, field, unique } => self.write(|txn| {
                txn.create_index(&collection, &field, unique)?;
                Ok(Response::Ok)
            }),
            Request::DropIndex { collection, field } => self.write(|txn| {
                txn.drop_index(&collection, &field)?;
                Ok(Response::Ok)
            }),
            Request::ListIndexes { collection } => self.read(|txn| Ok(Response::Indexes(txn.list_indexes(&collection)?))),
            Request::ListCollections => self.read(|txn| Ok(Response::Collections(txn.list_collections()?))),
            Request::DropCollection { collection } => self.write(|txn| {
                txn.drop_collection(&collection)?;
                Ok(Response::Ok)
            }),
        }
    }

    fn open_cursor(&self, ns: &str, docs: Vec<docwire_value::Value>, batch_size: Option<usize>) -> Response {
        let batch_size = batch_size.unwrap_or(self.db.config().max_batch_size).max(1);
        let cursor_id = self.db.cursors().open(ns, docs);
        match self.db.cursors().get_more(cursor_id, batch_size) {
            Ok((batch, exhausted)) => {
                let documents = batch.into_iter().filter_map(|v| v.as_document().cloned()).collect();
                Response::Batch { cursor_id: if exhausted { 0 } else { cursor_id }, documents }
            }
            Err(_) => Response::Batch { cursor_id: 0, documents: Vec::new() },
        }
    }

    fn read<F>(&self, f: F) -> Response
    where
        F: FnOnce(&DatabaseTransaction<'_, S>) -> Result<Response, docwire_collection::CollectionError>,
    {
        let txn = match self.db.begin(true) {
            Ok(txn) => txn,
            Err(e) => return Response::from(Error::from(e)),
        };
        match f(&txn) {
            Ok(response) => {
                let _ = txn.rollback();
                response
            }
            Err(e) => {
                let _ = txn.rollback();
                Response::from(Error::from(e))
            }
        }
    }

    fn write<F>(&self, f: F) -> Response
    where
        F: FnOnce(&mut DatabaseTransaction<'_, S>) -> Result<Response, docwire_collection::CollectionError>,
    {
        let mut txn = match self.db.begin(false) {
            Ok(txn) => txn,
            Err(e) => return Response::from(Error::from(e)),
        };
        match f(&mut txn) {
            Ok(response) => match txn.commit() {
                Ok(()) => response,
                Err(e) => Response::from(Error::from(e)),
            },
            Err(e) => {
                let _ = txn.rollback();
                Response::from(Error::from(e))
            }
        }
    }
}

fn filter_from(filter: Option<&Document>) -> Result<Option<Predicate>, docwire_collection::CollectionError> {
    match filter {
        Some(doc) => Ok(Some(parse_filter(doc).map_err(docwire_collection::CollectionError::from)?)),
        None => Ok(None),
    }
}
