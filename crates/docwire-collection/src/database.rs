//! Top-level collection manager (spec §4.7): insert/update/delete/
//! findAndModify, index maintenance, oplog emission, and the
//! per-collection locking discipline from spec §5. Grounded in the
//! teacher's `slate_db::database::{Database, DatabaseTransaction}`,
//! generalized from its bson-and-UUID model to `docwire_value::Value`
//! documents with ObjectId `_id`s and the fuller operator/pipeline
//! machinery this engine implements.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use docwire_errors::{Error, ErrorCode};
use docwire_pipeline::{run_pipeline, LookupSource, MergeSpec, OutputSink, Stage};
use docwire_query::{matches as query_matches, Predicate, UpdateDocument};
use docwire_store::{Store, Transaction};
use docwire_update::{apply_update, compose_upsert_document, parse_array_filters};
use docwire_value::{Document, ObjectId, Value};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::cursor::{CursorRegistry, TtlReaper};
use crate::encoding;
use crate::error::CollectionError;
use crate::oplog::{OpKind, OplogEntry, OplogSink};
use crate::result::{DeleteResult, FindAndModifyResult, InsertManyResult, InsertResult, UpdateResult, UpsertResult, WriteError};

const ID_FIELD: &str = "_id";

/// Options for an `update_one`/`update_many` call.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub upsert: bool,
    pub array_filters: Vec<Document>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self { upsert: false, array_filters: Vec::new() }
    }
}

/// What `findAndModify` should do once it has located the document.
pub enum FindAndModifyOp {
    Update { update: UpdateDocument, array_filters: Vec<Document>, upsert: bool, return_new: bool },
    Remove,
}

pub struct Database<S: Store> {
    store: S,
    catalog: Catalog,
    config: Config,
    oplog: Arc<dyn OplogSink>,
    collection_locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    cursors: Arc<CursorRegistry>,
    reaper: Option<TtlReaper>,
    id_counter: AtomicU64,
    id_random: [u8; 5],
}

impl<S: Store> Database<S> {
    pub fn new(store: S, config: Config, oplog: Arc<dyn OplogSink>) -> Self {
        let cursors = Arc::new(CursorRegistry::new());
        let reaper = if config.cursor_ttl_ms == 0 { None } else { Some(TtlReaper::spawn(Arc::clone(&cursors), config.cursor_ttl_ms)) };
        let seed = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0);
        let id_random = [(seed >> 8) as u8, (seed >> 16) as u8, (seed >> 24) as u8, (seed >> 32) as u8, (seed >> 40) as u8];
        Self {
            store,
            catalog: Catalog,
            config,
            oplog,
            collection_locks: Mutex::new(HashMap::new()),
            cursors,
            reaper,
            id_counter: AtomicU64::new(1),
            id_random,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cursors(&self) -> &Arc<CursorRegistry> {
        &self.cursors
    }

    pub fn begin(&self, read_only: bool) -> Result<DatabaseTransaction<'_, S>, CollectionError> {
        let mut txn = self.store.begin(read_only)?;
        self.catalog.ensure_sys_cf(&mut txn)?;
        Ok(DatabaseTransaction { db: self, txn })
    }

    fn lock_for(&self, collection: &str) -> Arc<RwLock<()>> {
        let mut locks = self.collection_locks.lock().unwrap();
        Arc::clone(locks.entry(collection.to_string()).or_insert_with(|| Arc::new(RwLock::new(()))))
    }

    fn generate_id(&self) -> Value {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0);
        let counter = self.id_counter.fetch_add(1, AtomicOrdering::Relaxed);
        Value::ObjectId(ObjectId::from_parts(ts, counter, self.id_random))
    }
}

pub struct DatabaseTransaction<'db, S: Store + 'db> {
    db: &'db Database<S>,
    txn: S::Txn<'db>,
}

impl<'db, S: Store + 'db> DatabaseTransaction<'db, S> {
    // ── Insert ───────────────────────────────────────────────────

    pub fn insert_one(&mut self, collection: &str, doc: Document) -> Result<InsertResult, CollectionError> {
        let lock = self.db.lock_for(collection);
        let _guard = lock.write().unwrap();
        self.insert_one_locked(collection, doc)
    }

    fn insert_one_locked(&mut self, collection: &str, mut doc: Document) -> Result<InsertResult, CollectionError> {
        self.db.catalog.create_collection(&mut self.txn, collection)?;

        let id = match doc.get(ID_FIELD) {
            Some(existing) => existing.clone(),
            None => {
                let id = self.db.generate_id();
                doc.insert(ID_FIELD, id.clone());
                id
            }
        };
        let id_bytes = encoding::encode_id(&id)?;
        let key = encoding::data_key(&id_bytes);
        let cf = self.txn.cf(collection)?;

        if self.txn.get(&cf, &key)?.is_some() {
            return Err(Error::new(ErrorCode::DuplicateKey, format!("duplicate key error collection: {collection}")).into());
        }

        let indexes = self.db.catalog.list_indexes(&self.txn, collection)?;
        for index in &indexes {
            if let Some(value) = doc.get(&index.field) {
                let value_bytes = encoding::encode_document(value)?;
                let idx_key = encoding::index_key(&index.field, &value_bytes, &id_bytes);
                if index.unique && self.txn.get(&cf, &idx_key)?.is_some() {
                    return Err(Error::new(ErrorCode::DuplicateKey, format!("duplicate key error collection: {collection} index: {}", index.field)).into());
                }
            }
        }

        let value = Value::Document(doc.clone());
        self.txn.put(&cf, &key, &encoding::encode_document(&value)?)?;
        for index in &indexes {
            if let Some(value) = doc.get(&index.field) {
                let value_bytes = encoding::encode_document(value)?;
                let idx_key = encoding::index_key(&index.field, &value_bytes, &id_bytes);
                self.txn.put(&cf, &idx_key, &[])?;
            }
        }

        self.emit_oplog(collection, OpKind::Insert, doc, None);
        Ok(InsertResult { id })
    }

    pub fn insert_many(&mut self, collection: &str, docs: Vec<Document>, ordered: bool) -> Result<InsertManyResult, CollectionError> {
        let lock = self.db.lock_for(collection);
        let _guard = lock.write().unwrap();

        let mut result = InsertManyResult::default();
        for (index, doc) in docs.into_iter().enumerate() {
            match self.insert_one_locked(collection, doc) {
                Ok(inserted) => result.inserted.push(inserted),
                Err(error) => {
                    result.write_errors.push(WriteError { index, error });
                    if ordered {
                        break;
                    }
                }
            }
        }
        Ok(result)
    }

    // ── Query ────────────────────────────────────────────────────

    pub fn find(&self, collection: &str, predicate: Option<&Predicate>) -> Result<Vec<Value>, CollectionError> {
        let lock = self.db.lock_for(collection);
        let _guard = lock.read().unwrap();
        self.scan_matching(collection, predicate)
    }

    fn scan_matching(&self, collection: &str, predicate: Option<&Predicate>) -> Result<Vec<Value>, CollectionError> {
        let cf = match self.txn.cf(collection) {
            Ok(cf) => cf,
            Err(_) => return Ok(Vec::new()),
        };
        let prefix = encoding::data_scan_prefix();
        let mut out = Vec::new();
        for entry in self.txn.scan_prefix(&cf, &prefix)? {
            let (_, bytes) = entry?;
            let doc = encoding::decode_document(&bytes)?;
            let keep = match predicate {
                Some(pred) => query_matches(pred, &doc).map_err(CollectionError::from)?.matched,
                None => true,
            };
            if keep {
                out.push(doc);
            }
        }
        Ok(out)
    }

    pub fn find_by_id(&self, collection: &str, id: &Value) -> Result<Option<Value>, CollectionError> {
        let lock = self.db.lock_for(collection);
        let _guard = lock.read().unwrap();
        let cf = match self.txn.cf(collection) {
            Ok(cf) => cf,
            Err(_) => return Ok(None),
        };
        let id_bytes = encoding::encode_id(id)?;
        let key = encoding::data_key(&id_bytes);
        match self.txn.get(&cf, &key)? {
            Some(bytes) => Ok(Some(encoding::decode_document(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn find_one(&self, collection: &str, predicate: Option<&Predicate>) -> Result<Option<Value>, CollectionError> {
        Ok(self.find(collection, predicate)?.into_iter().next())
    }

    pub fn count(&self, collection: &str, predicate: Option<&Predicate>) -> Result<u64, CollectionError> {
        Ok(self.find(collection, predicate)?.len() as u64)
    }

    // ── Aggregation ──────────────────────────────────────────────

    /// Runs a pipeline against `collection`. `$lookup` reads other
    /// collections directly through `self`; `$out`/`$merge` only
    /// record their intended write (the `OutputSink` trait takes
    /// `&self`, not `&mut self`) and are applied afterwards, once the
    /// pipeline itself is done borrowing `self` immutably.
    pub fn aggregate(&mut self, collection: &str, stages: &[Stage]) -> Result<Vec<Value>, CollectionError> {
        let pending = CollectionOutput::default();
        let result = {
            let lookup = CollectionLookup { txn: &*self };
            let docs = self.find(collection, None)?;
            let source: docwire_pipeline::DocStream = Box::new(docs.into_iter().map(Ok));
            let stream = run_pipeline(source, stages, Some(&lookup), Some(&pending)).map_err(CollectionError::from)?;
            stream.collect::<Result<Vec<Value>, Error>>().map_err(CollectionError::from)?
        };

        for op in pending.take() {
            match op {
                PendingOutput::Replace { name, docs } => self.apply_replace_collection(&name, docs)?,
                PendingOutput::Merge { name, docs, spec } => self.apply_merge_documents(&name, docs, &spec)?,
            }
        }

        Ok(result)
    }

    fn apply_replace_collection(&mut self, name: &str, docs: Vec<Value>) -> Result<(), CollectionError> {
        self.drop_collection(name).ok();
        for doc in docs {
            if let Some(fields) = doc.as_document() {
                self.insert_one(name, fields.clone())?;
            }
        }
        Ok(())
    }

    fn apply_merge_documents(&mut self, name: &str, docs: Vec<Value>, spec: &MergeSpec) -> Result<(), CollectionError> {
        for doc in docs {
            let fields = match doc.as_document() {
                Some(f) => f.clone(),
                None => continue,
            };
            let on_value = spec.on.iter().map(|field| fields.get(field).cloned()).collect::<Vec<_>>();
            let mut predicate_clauses = Vec::new();
            for (field, value) in spec.on.iter().zip(on_value.iter()) {
                if let Some(value) = value {
                    predicate_clauses.push((field.clone(), value.clone()));
                }
            }
            let existing = if predicate_clauses.len() == spec.on.len() && !spec.on.is_empty() {
                self.find_merge_candidate(name, &predicate_clauses)?
            } else {
                None
            };

            match existing {
                Some((key, existing_doc)) => self.merge_existing(name, &key, existing_doc, fields, spec)?,
                None => {
                    use docwire_pipeline::WhenNotMatched;
                    match spec.when_not_matched {
                        WhenNotMatched::Insert => {
                            self.insert_one(name, fields)?;
                        }
                        WhenNotMatched::Discard => {}
                        WhenNotMatched::Fail => {
                            return Err(Error::new(ErrorCode::BadValue, "$merge: no matching document and whenNotMatched is fail").into());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn find_merge_candidate(&self, collection: &str, clauses: &[(String, Value)]) -> Result<Option<(Vec<u8>, Document)>, CollectionError> {
        let cf = match self.txn.cf(collection) {
            Ok(cf) => cf,
            Err(_) => return Ok(None),
        };
        let prefix = encoding::data_scan_prefix();
        for entry in self.txn.scan_prefix(&cf, &prefix)? {
            let (key, bytes) = entry?;
            let doc = encoding::decode_document(&bytes)?;
            let fields = doc.as_document().cloned().unwrap_or_default();
            if clauses.iter().all(|(field, value)| fields.get(field).map(|v| v.deep_eq(value)).unwrap_or(false)) {
                return Ok(Some((key.to_vec(), fields)));
            }
        }
        Ok(None)
    }

    fn merge_existing(&mut self, collection: &str, key: &[u8], existing: Document, incoming: Document, spec: &MergeSpec) -> Result<(), CollectionError> {
        use docwire_pipeline::WhenMatched;
        let merged = match spec.when_matched {
            WhenMatched::Replace => incoming,
            WhenMatched::KeepExisting => existing,
            WhenMatched::Merge => {
                let mut merged = existing;
                for (field, value) in incoming.iter() {
                    merged.insert(field.clone(), value.clone());
                }
                merged
            }
            WhenMatched::Fail => {
                return Err(Error::new(ErrorCode::BadValue, "$merge: matching document found and whenMatched is fail").into());
            }
        };
        let cf = self.txn.cf(collection)?;
        self.txn.put(&cf, key, &encoding::encode_document(&Value::Document(merged))?)?;
        Ok(())
    }

    // ── Update ───────────────────────────────────────────────────

    pub fn update_one(&mut self, collection: &str, predicate: &Predicate, update: &UpdateDocument, opts: &UpdateOptions) -> Result<UpsertResult, CollectionError> {
        self.run_update(collection, predicate, update, opts, false)
    }

    pub fn update_many(&mut self, collection: &str, predicate: &Predicate, update: &UpdateDocument, opts: &UpdateOptions) -> Result<UpsertResult, CollectionError> {
        self.run_update(collection, predicate, update, opts, true)
    }

    fn run_update(&mut self, collection: &str, predicate: &Predicate, update: &UpdateDocument, opts: &UpdateOptions, multi: bool) -> Result<UpsertResult, CollectionError> {
        let lock = self.db.lock_for(collection);
        let _guard = lock.write().unwrap();

        let array_filters = parse_array_filters(&opts.array_filters).map_err(CollectionError::from)?;
        let cf = match self.txn.cf(collection) {
            Ok(cf) => cf,
            Err(_) if opts.upsert => {
                self.db.catalog.create_collection(&mut self.txn, collection)?;
                self.txn.cf(collection)?
            }
            Err(e) => return Err(e.into()),
        };

        let prefix = encoding::data_scan_prefix();
        let mut matched_keys: Vec<(Vec<u8>, Value, Option<usize>)> = Vec::new();
        for entry in self.txn.scan_prefix(&cf, &prefix)? {
            let (key, bytes) = entry?;
            let doc = encoding::decode_document(&bytes)?;
            let outcome = query_matches(predicate, &doc).map_err(CollectionError::from)?;
            if outcome.matched {
                matched_keys.push((key.to_vec(), doc, outcome.position));
                if !multi {
                    break;
                }
            }
        }

        if matched_keys.is_empty() {
            if opts.upsert {
                let upsert_doc = compose_upsert_document(predicate, update, &array_filters).map_err(CollectionError::from)?;
                let doc = upsert_doc.as_document().cloned().unwrap_or_default();
                let inserted = self.insert_one_locked(collection, doc)?;
                return Ok(UpsertResult { matched: 0, modified: 0, upserted_id: Some(inserted.id) });
            }
            return Ok(UpsertResult { matched: 0, modified: 0, upserted_id: None });
        }

        let mut modified = 0u64;
        let matched = matched_keys.len() as u64;
        for (key, mut doc_value, position) in matched_keys {
            let indexes = self.db.catalog.list_indexes(&self.txn, collection)?;
            let old_doc = doc_value.as_document().cloned().unwrap_or_default();

            let outcome = apply_update(&mut doc_value, update, &array_filters, position, false).map_err(CollectionError::from)?;
            if !outcome.modified {
                continue;
            }

            let new_doc = doc_value.as_document().cloned().unwrap_or_default();
            let id_bytes = new_doc.get(ID_FIELD).map(encoding::encode_id).transpose()?.unwrap_or_default();

            self.reindex(collection, &indexes, &old_doc, &new_doc, &id_bytes)?;

            let cf = self.txn.cf(collection)?;
            self.txn.put(&cf, &key, &encoding::encode_document(&doc_value)?)?;
            self.emit_oplog(collection, OpKind::Update, new_doc, Some(old_doc));
            modified += 1;
        }

        Ok(UpsertResult { matched, modified, upserted_id: None })
    }

    pub fn replace_one(&mut self, collection: &str, predicate: &Predicate, replacement: Document) -> Result<UpdateResult, CollectionError> {
        let update = UpdateDocument::Replacement(replacement);
        let result = self.run_update(collection, predicate, &update, &UpdateOptions::default(), false)?;
        Ok(UpdateResult { matched: result.matched, modified: result.modified })
    }

    fn reindex(&mut self, collection: &str, indexes: &[crate::catalog::IndexSpec], old_doc: &Document, new_doc: &Document, id_bytes: &[u8]) -> Result<(), CollectionError> {
        let cf = self.txn.cf(collection)?;
        for index in indexes {
            let old_value = old_doc.get(&index.field);
            let new_value = new_doc.get(&index.field);
            let unchanged = match (old_value, new_value) {
                (Some(a), Some(b)) => a.deep_eq(b),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                continue;
            }
            if let Some(value) = old_value {
                let value_bytes = encoding::encode_document(value)?;
                self.txn.delete(&cf, &encoding::index_key(&index.field, &value_bytes, id_bytes))?;
            }
            if let Some(value) = new_value {
                let value_bytes = encoding::encode_document(value)?;
                self.txn.put(&cf, &encoding::index_key(&index.field, &value_bytes, id_bytes), &[])?;
            }
        }
        Ok(())
    }

    // ── Delete ───────────────────────────────────────────────────

    pub fn delete_one(&mut self, collection: &str, predicate: &Predicate) -> Result<DeleteResult, CollectionError> {
        self.run_delete(collection, predicate, 1)
    }

    pub fn delete_many(&mut self, collection: &str, predicate: &Predicate) -> Result<DeleteResult, CollectionError> {
        self.run_delete(collection, predicate, 0)
    }

    /// `limit`: 0 means "all matching", 1 means "first match only" (spec §4.7).
    fn run_delete(&mut self, collection: &str, predicate: &Predicate, limit: u64) -> Result<DeleteResult, CollectionError> {
        let lock = self.db.lock_for(collection);
        let _guard = lock.write().unwrap();

        let cf = match self.txn.cf(collection) {
            Ok(cf) => cf,
            Err(_) => return Ok(DeleteResult { deleted: 0 }),
        };

        let prefix = encoding::data_scan_prefix();
        let mut to_delete: Vec<(Vec<u8>, Value)> = Vec::new();
        for entry in self.txn.scan_prefix(&cf, &prefix)? {
            let (key, bytes) = entry?;
            let doc = encoding::decode_document(&bytes)?;
            if query_matches(predicate, &doc).map_err(CollectionError::from)?.matched {
                to_delete.push((key.to_vec(), doc));
                if limit == 1 {
                    break;
                }
            }
        }

        let indexes = self.db.catalog.list_indexes(&self.txn, collection)?;
        let deleted = to_delete.len() as u64;
        for (key, doc) in to_delete {
            let doc_fields = doc.as_document().cloned().unwrap_or_default();
            let id_bytes = doc_fields.get(ID_FIELD).map(encoding::encode_id).transpose()?.unwrap_or_default();
            for index in &indexes {
                if let Some(value) = doc_fields.get(&index.field) {
                    let value_bytes = encoding::encode_document(value)?;
                    let cf = self.txn.cf(collection)?;
                    self.txn.delete(&cf, &encoding::index_key(&index.field, &value_bytes, &id_bytes))?;
                }
            }
            let cf = self.txn.cf(collection)?;
            self.txn.delete(&cf, &key)?;
            self.emit_oplog(collection, OpKind::Delete, doc_fields, None);
        }

        Ok(DeleteResult { deleted })
    }

    // ── findAndModify ────────────────────────────────────────────

    pub fn find_and_modify(&mut self, collection: &str, predicate: &Predicate, op: FindAndModifyOp) -> Result<FindAndModifyResult, CollectionError> {
        let lock = self.db.lock_for(collection);
        let _guard = lock.write().unwrap();

        let pre_image = self.scan_matching(collection, Some(predicate))?.into_iter().next();

        match op {
            FindAndModifyOp::Remove => {
                if pre_image.is_some() {
                    drop(_guard);
                    self.run_delete(collection, predicate, 1)?;
                }
                Ok(FindAndModifyResult { value: pre_image })
            }
            FindAndModifyOp::Update { update, array_filters, upsert, return_new } => {
                drop(_guard);
                let opts = UpdateOptions { upsert, array_filters };
                let result = self.run_update(collection, predicate, &update, &opts, false)?;
                if return_new {
                    if let Some(id) = result.upserted_id {
                        return Ok(FindAndModifyResult { value: self.find_by_id(collection, &id)? });
                    }
                    let post_image = self.scan_matching(collection, Some(predicate))?.into_iter().next();
                    Ok(FindAndModifyResult { value: post_image })
                } else {
                    Ok(FindAndModifyResult { value: pre_image })
                }
            }
        }
    }

    // ── Index & collection administration ───────────────────────

    pub fn create_index(&mut self, collection: &str, field: &str, unique: bool) -> Result<(), CollectionError> {
        self.db.catalog.create_collection(&mut self.txn, collection)?;
        self.db.catalog.create_index(&mut self.txn, collection, field, unique)?;

        let cf = self.txn.cf(collection)?;
        let prefix = encoding::data_scan_prefix();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self.txn.scan_prefix(&cf, &prefix)?.filter_map(|r| r.ok().map(|(k, v)| (k.to_vec(), v.to_vec()))).collect();
        for (_, bytes) in entries {
            let doc = encoding::decode_document(&bytes)?;
            let fields = doc.as_document().cloned().unwrap_or_default();
            if let (Some(value), Some(id)) = (fields.get(field), fields.get(ID_FIELD)) {
                let id_bytes = encoding::encode_id(id)?;
                let value_bytes = encoding::encode_document(value)?;
                let cf = self.txn.cf(collection)?;
                self.txn.put(&cf, &encoding::index_key(field, &value_bytes, &id_bytes), &[])?;
            }
        }
        Ok(())
    }

    pub fn drop_index(&mut self, collection: &str, field: &str) -> Result<(), CollectionError> {
        let cf = self.txn.cf(collection)?;
        let prefix = encoding::index_field_prefix(field);
        let keys: Vec<Vec<u8>> = self.txn.scan_prefix(&cf, &prefix)?.filter_map(|r| r.ok().map(|(k, _)| k.to_vec())).collect();
        for key in keys {
            let cf = self.txn.cf(collection)?;
            self.txn.delete(&cf, &key)?;
        }
        self.db.catalog.drop_index(&mut self.txn, collection, field)?;
        Ok(())
    }

    pub fn list_indexes(&self, collection: &str) -> Result<Vec<crate::catalog::IndexSpec>, CollectionError> {
        self.db.catalog.list_indexes(&self.txn, collection)
    }

    pub fn list_collections(&self) -> Result<Vec<String>, CollectionError> {
        self.db.catalog.list_collections(&self.txn)
    }

    pub fn drop_collection(&mut self, collection: &str) -> Result<(), CollectionError> {
        let lock = self.db.lock_for(collection);
        let _guard = lock.write().unwrap();
        self.db.catalog.drop_collection(&mut self.txn, collection)?;
        self.db.cursors.kill_all_for_namespace(collection);
        Ok(())
    }

    fn emit_oplog(&self, ns: &str, op: OpKind, o: Document, o2: Option<Document>) {
        if !self.db.config.oplog_enabled {
            return;
        }
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
        self.db.oplog.append(OplogEntry { ts, ns: ns.to_string(), op, o, o2 });
    }

    // ── Lifecycle ────────────────────────────────────────────────

    pub fn commit(self) -> Result<(), CollectionError> {
        self.txn.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<(), CollectionError> {
        self.txn.rollback()?;
        Ok(())
    }
}

/// Adapts one transaction as the cross-collection seam the pipeline's
/// `$lookup`/`$out`/`$merge` stages need (spec §5: canonical cross-
/// collection lock order by full name, here simply "the collection
/// being looked up, not the collection being aggregated").
pub struct CollectionLookup<'a, 'db, S: Store + 'db> {
    pub txn: &'a DatabaseTransaction<'db, S>,
}

impl<'a, 'db, S: Store + 'db> LookupSource for CollectionLookup<'a, 'db, S> {
    fn documents(&self, from: &str) -> Result<Vec<Value>, Error> {
        self.txn.find(from, None).map_err(Error::from)
    }
}

enum PendingOutput {
    Replace { name: String, docs: Vec<Value> },
    Merge { name: String, docs: Vec<Value>, spec: MergeSpec },
}

/// `$out`/`$merge` only get `&self` through the `OutputSink` trait, so
/// they can't write through to storage directly; they record the
/// intended write here, and `DatabaseTransaction::aggregate` applies
/// it afterwards, once the pipeline is done borrowing the transaction.
#[derive(Default)]
struct CollectionOutput {
    pending: std::cell::RefCell<Vec<PendingOutput>>,
}

impl CollectionOutput {
    fn take(&self) -> Vec<PendingOutput> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }
}

impl OutputSink for CollectionOutput {
    fn replace_collection(&self, name: &str, docs: Vec<Value>) -> Result<(), Error> {
        self.pending.borrow_mut().push(PendingOutput::Replace { name: name.to_string(), docs });
        Ok(())
    }

    fn merge_documents(&self, name: &str, docs: Vec<Value>, spec: &MergeSpec) -> Result<(), Error> {
        self.pending.borrow_mut().push(PendingOutput::Merge { name: name.to_string(), docs, spec: spec.clone() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use docwire_pipeline::parse_stage;
    use docwire_query::{parse_filter, parse_update};
    use docwire_store::MemoryStore;

    use super::*;
    use crate::oplog::NoOpSink;

    fn test_db() -> Database<MemoryStore> {
        Database::new(MemoryStore::new(), Config::default(), Arc::new(NoOpSink))
    }

    fn doc(pairs: &[(&str, Value)]) -> Document {
        let mut d = Document::new();
        for (k, v) in pairs {
            d.insert(*k, v.clone());
        }
        d
    }

    #[test]
    fn insert_assigns_object_id_and_is_findable() {
        let db = test_db();
        let mut txn = db.begin(false).unwrap();
        let result = txn.insert_one("widgets", doc(&[("name", Value::String("a".into()))])).unwrap();
        assert!(matches!(result.id, Value::ObjectId(_)));

        let found = txn.find_by_id("widgets", &result.id).unwrap().unwrap();
        let fields = found.as_document().unwrap();
        assert!(fields.get("name").unwrap().deep_eq(&Value::String("a".into())));
        txn.commit().unwrap();
    }

    #[test]
    fn insert_with_explicit_duplicate_id_is_rejected() {
        let db = test_db();
        let mut txn = db.begin(false).unwrap();
        let id = Value::Int32(1);
        txn.insert_one("widgets", doc(&[("_id", id.clone())])).unwrap();
        let err = txn.insert_one("widgets", doc(&[("_id", id)])).unwrap_err();
        let err: Error = err.into();
        assert_eq!(err.code, ErrorCode::DuplicateKey);
    }

    #[test]
    fn unique_index_rejects_duplicate_value() {
        let db = test_db();
        let mut txn = db.begin(false).unwrap();
        txn.create_index("users", "email", true).unwrap();
        txn.insert_one("users", doc(&[("email", Value::String("a@example.com".into()))])).unwrap();
        let err = txn.insert_one("users", doc(&[("email", Value::String("a@example.com".into()))])).unwrap_err();
        let err: Error = err.into();
        assert_eq!(err.code, ErrorCode::DuplicateKey);
    }

    #[test]
    fn update_many_sets_matching_documents() {
        let db = test_db();
        let mut txn = db.begin(false).unwrap();
        txn.insert_one("widgets", doc(&[("kind", Value::String("a".into()))])).unwrap();
        txn.insert_one("widgets", doc(&[("kind", Value::String("a".into()))])).unwrap();
        txn.insert_one("widgets", doc(&[("kind", Value::String("b".into()))])).unwrap();

        let mut filter_doc = Document::new();
        filter_doc.insert("kind", Value::String("a".into()));
        let predicate = parse_filter(&filter_doc).unwrap();

        let mut set_doc = Document::new();
        set_doc.insert("seen", Value::Bool(true));
        let mut update_doc = Document::new();
        update_doc.insert("$set", Value::Document(set_doc));
        let update = parse_update(&update_doc).unwrap();

        let result = txn.update_many("widgets", &predicate, &update, &UpdateOptions::default()).unwrap();
        assert_eq!(result.matched, 2);
        assert_eq!(result.modified, 2);

        let remaining = txn.find("widgets", Some(&predicate)).unwrap();
        for v in remaining {
            assert!(v.as_document().unwrap().get("seen").unwrap().deep_eq(&Value::Bool(true)));
        }
    }

    #[test]
    fn update_one_with_upsert_inserts_when_nothing_matches() {
        let db = test_db();
        let mut txn = db.begin(false).unwrap();

        let mut filter_doc = Document::new();
        filter_doc.insert("sku", Value::String("xyz".into()));
        let predicate = parse_filter(&filter_doc).unwrap();

        let mut set_doc = Document::new();
        set_doc.insert("qty", Value::Int32(3));
        let mut update_doc = Document::new();
        update_doc.insert("$set", Value::Document(set_doc));
        let update = parse_update(&update_doc).unwrap();

        let opts = UpdateOptions { upsert: true, array_filters: Vec::new() };
        let result = txn.update_one("stock", &predicate, &update, &opts).unwrap();
        assert_eq!(result.matched, 0);
        assert!(result.upserted_id.is_some());

        let found = txn.find_by_id("stock", &result.upserted_id.unwrap()).unwrap().unwrap();
        let fields = found.as_document().unwrap();
        assert!(fields.get("sku").unwrap().deep_eq(&Value::String("xyz".into())));
        assert!(fields.get("qty").unwrap().deep_eq(&Value::Int32(3)));
    }

    #[test]
    fn delete_one_removes_a_single_match() {
        let db = test_db();
        let mut txn = db.begin(false).unwrap();
        txn.insert_one("widgets", doc(&[("kind", Value::String("a".into()))])).unwrap();
        txn.insert_one("widgets", doc(&[("kind", Value::String("a".into()))])).unwrap();

        let mut filter_doc = Document::new();
        filter_doc.insert("kind", Value::String("a".into()));
        let predicate = parse_filter(&filter_doc).unwrap();

        let result = txn.delete_one("widgets", &predicate).unwrap();
        assert_eq!(result.deleted, 1);
        assert_eq!(txn.count("widgets", None).unwrap(), 1);
    }

    #[test]
    fn find_and_modify_remove_returns_pre_image() {
        let db = test_db();
        let mut txn = db.begin(false).unwrap();
        let inserted = txn.insert_one("widgets", doc(&[("kind", Value::String("a".into()))])).unwrap();

        let mut filter_doc = Document::new();
        filter_doc.insert("_id", inserted.id.clone());
        let predicate = parse_filter(&filter_doc).unwrap();

        let result = txn.find_and_modify("widgets", &predicate, FindAndModifyOp::Remove).unwrap();
        let value = result.value.unwrap();
        assert!(value.as_document().unwrap().get("kind").unwrap().deep_eq(&Value::String("a".into())));
        assert_eq!(txn.count("widgets", None).unwrap(), 0);
    }

    #[test]
    fn aggregate_runs_match_and_group() {
        let db = test_db();
        let mut txn = db.begin(false).unwrap();
        txn.insert_one("orders", doc(&[("status", Value::String("open".into())), ("amount", Value::Int32(10))])).unwrap();
        txn.insert_one("orders", doc(&[("status", Value::String("open".into())), ("amount", Value::Int32(5))])).unwrap();
        txn.insert_one("orders", doc(&[("status", Value::String("closed".into())), ("amount", Value::Int32(99))])).unwrap();

        let mut match_doc = Document::new();
        match_doc.insert("status", Value::String("open".into()));
        let mut match_stage = Document::new();
        match_stage.insert("$match", Value::Document(match_doc));

        let mut group_inner = Document::new();
        group_inner.insert("_id", Value::Null);
        let mut sum_doc = Document::new();
        sum_doc.insert("$sum", Value::String("$amount".into()));
        group_inner.insert("total", Value::Document(sum_doc));
        let mut group_stage = Document::new();
        group_stage.insert("$group", Value::Document(group_inner));

        let stages = vec![parse_stage(&match_stage).unwrap(), parse_stage(&group_stage).unwrap()];
        let result = txn.aggregate("orders", &stages).unwrap();
        assert_eq!(result.len(), 1);
        let total = result[0].as_document().unwrap().get("total").unwrap();
        assert!(total.deep_eq(&Value::Int64(15)));
    }

    #[test]
    fn create_index_backfills_existing_documents() {
        let db = test_db();
        let mut txn = db.begin(false).unwrap();
        txn.insert_one("users", doc(&[("email", Value::String("a@example.com".into()))])).unwrap();
        txn.create_index("users", "email", true).unwrap();

        let err = txn.insert_one("users", doc(&[("email", Value::String("a@example.com".into()))])).unwrap_err();
        let err: Error = err.into();
        assert_eq!(err.code, ErrorCode::DuplicateKey);
    }

    #[test]
    fn drop_collection_empties_subsequent_finds() {
        let db = test_db();
        let mut txn = db.begin(false).unwrap();
        txn.insert_one("widgets", doc(&[("a", Value::Int32(1))])).unwrap();
        txn.drop_collection("widgets").unwrap();
        assert_eq!(txn.count("widgets", None).unwrap(), 0);
    }
}
