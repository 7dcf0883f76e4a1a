//! In-memory backend (spec §6). Grounded directly on the teacher's
//! `slate-store::memory` module: copy-on-write column families
//! (`imbl::OrdMap` behind `arc_swap::ArcSwap`), snapshot-on-first-access
//! reads, and a single process-wide write lock so only one write
//! transaction runs at a time.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use arc_swap::ArcSwap;
use imbl::OrdMap;

use crate::error::StoreError;
use crate::store::{Store, Transaction};

pub(crate) type ColumnFamily = OrdMap<Vec<u8>, Vec<u8>>;

pub struct MemoryStore {
    cfs: RwLock<HashMap<String, Arc<ArcSwap<ColumnFamily>>>>,
    write_lock: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self { cfs: RwLock::new(HashMap::new()), write_lock: Mutex::new(()) }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire_write_lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_lock.lock().map_err(|e| StoreError::Storage(format!("write lock poisoned: {e}")))
    }

    fn snapshot_cf(&self, name: &str) -> Option<Arc<ColumnFamily>> {
        let cfs = self.cfs.read().unwrap();
        let arc_swap = cfs.get(name)?;
        Some(arc_swap.load_full())
    }

    fn create_cf_inner(&self, name: &str) {
        let mut cfs = self.cfs.write().unwrap();
        cfs.entry(name.to_string()).or_insert_with(|| Arc::new(ArcSwap::new(Arc::new(OrdMap::new()))));
    }

    fn drop_cf_inner(&self, name: &str) {
        let mut cfs = self.cfs.write().unwrap();
        cfs.remove(name);
    }

    fn commit(&self, dirty: HashMap<String, Arc<ColumnFamily>>) {
        let cfs = self.cfs.read().unwrap();
        for (name, data) in dirty {
            if let Some(arc_swap) = cfs.get(&name) {
                arc_swap.store(data);
            }
        }
    }
}

impl Store for MemoryStore {
    type Txn<'a> = MemoryTransaction<'a>;

    fn begin(&self, read_only: bool) -> Result<Self::Txn<'_>, StoreError> {
        if read_only {
            Ok(MemoryTransaction::new_read_only(self))
        } else {
            let guard = self.acquire_write_lock()?;
            Ok(MemoryTransaction::new_writable(self, guard))
        }
    }
}

#[derive(Clone)]
pub struct MemoryCf {
    name: String,
    data: Arc<ColumnFamily>,
}

struct Snapshot {
    data: HashMap<String, Arc<ColumnFamily>>,
}

impl Snapshot {
    fn new() -> Self {
        Self { data: HashMap::new() }
    }

    fn ensure(&mut self, store: &MemoryStore, cf: &str) -> Result<(), StoreError> {
        if !self.data.contains_key(cf) {
            match store.snapshot_cf(cf) {
                Some(data) => {
                    self.data.insert(cf.to_string(), data);
                }
                None => return Err(StoreError::ColumnFamilyNotFound(cf.to_string())),
            }
        }
        Ok(())
    }

    fn get_cf(&self, cf: &str) -> Result<&Arc<ColumnFamily>, StoreError> {
        self.data.get(cf).ok_or_else(|| StoreError::ColumnFamilyNotFound(cf.to_string()))
    }

    fn get_cf_mut(&mut self, cf: &str) -> Result<&mut ColumnFamily, StoreError> {
        let arc = self.data.get_mut(cf).ok_or_else(|| StoreError::ColumnFamilyNotFound(cf.to_string()))?;
        Ok(Arc::make_mut(arc))
    }
}

pub struct MemoryTransaction<'a> {
    snapshot: RefCell<Option<Snapshot>>,
    dirty: RefCell<HashSet<String>>,
    store: &'a MemoryStore,
    read_only: bool,
    _write_guard: Option<MutexGuard<'a, ()>>,
}

impl<'a> MemoryTransaction<'a> {
    fn new_read_only(store: &'a MemoryStore) -> Self {
        Self { snapshot: RefCell::new(Some(Snapshot::new())), dirty: RefCell::new(HashSet::new()), store, read_only: true, _write_guard: None }
    }

    fn new_writable(store: &'a MemoryStore, guard: MutexGuard<'a, ()>) -> Self {
        Self {
            snapshot: RefCell::new(Some(Snapshot::new())),
            dirty: RefCell::new(HashSet::new()),
            store,
            read_only: false,
            _write_guard: Some(guard),
        }
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }
}

impl<'a> Transaction for MemoryTransaction<'a> {
    type Cf = MemoryCf;

    fn cf(&self, name: &str) -> Result<Self::Cf, StoreError> {
        let mut snap = self.snapshot.borrow_mut();
        let snap = snap.as_mut().ok_or(StoreError::TransactionConsumed)?;
        snap.ensure(self.store, name)?;
        let data = Arc::clone(snap.get_cf(name)?);
        Ok(MemoryCf { name: name.to_string(), data })
    }

    fn create_cf(&mut self, name: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.store.create_cf_inner(name);
        let snap = self.snapshot.get_mut().as_mut().ok_or(StoreError::TransactionConsumed)?;
        snap.data.entry(name.to_string()).or_insert_with(|| Arc::new(ColumnFamily::new()));
        self.dirty.get_mut().insert(name.to_string());
        Ok(())
    }

    fn drop_cf(&mut self, name: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.store.drop_cf_inner(name);
        let snap = self.snapshot.get_mut().as_mut().ok_or(StoreError::TransactionConsumed)?;
        snap.data.remove(name);
        self.dirty.get_mut().remove(name);
        Ok(())
    }

    fn get<'c>(&self, cf: &'c Self::Cf, key: &[u8]) -> Result<Option<Cow<'c, [u8]>>, StoreError> {
        Ok(cf.data.get(key).map(|v| Cow::Borrowed(v.as_slice())))
    }

    fn multi_get<'c>(&self, cf: &'c Self::Cf, keys: &[&[u8]]) -> Result<Vec<Option<Cow<'c, [u8]>>>, StoreError> {
        Ok(keys.iter().map(|k| cf.data.get(*k).map(|v| Cow::Borrowed(v.as_slice()))).collect())
    }

    fn scan_prefix<'c>(
        &'c self,
        cf: &'c Self::Cf,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = Result<(Cow<'c, [u8]>, Cow<'c, [u8]>), StoreError>> + 'c>, StoreError> {
        let prefix_vec = prefix.to_vec();
        Ok(Box::new(
            cf.data
                .range((Bound::Included(prefix_vec.clone()), Bound::Unbounded))
                .take_while(move |(k, _)| k.starts_with(&prefix_vec))
                .map(|(k, v)| Ok((Cow::Borrowed(k.as_slice()), Cow::Borrowed(v.as_slice())))),
        ))
    }

    fn put(&self, cf: &Self::Cf, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.dirty.borrow_mut().insert(cf.name.clone());
        let mut snap = self.snapshot.borrow_mut();
        let snap = snap.as_mut().ok_or(StoreError::TransactionConsumed)?;
        let data = snap.get_cf_mut(&cf.name)?;
        data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn put_batch(&self, cf: &Self::Cf, entries: &[(&[u8], &[u8])]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.dirty.borrow_mut().insert(cf.name.clone());
        let mut snap = self.snapshot.borrow_mut();
        let snap = snap.as_mut().ok_or(StoreError::TransactionConsumed)?;
        let data = snap.get_cf_mut(&cf.name)?;
        for (key, value) in entries {
            data.insert(key.to_vec(), value.to_vec());
        }
        Ok(())
    }

    fn delete(&self, cf: &Self::Cf, key: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.dirty.borrow_mut().insert(cf.name.clone());
        let mut snap = self.snapshot.borrow_mut();
        let snap = snap.as_mut().ok_or(StoreError::TransactionConsumed)?;
        let data = snap.get_cf_mut(&cf.name)?;
        data.remove(key);
        Ok(())
    }

    fn commit(self) -> Result<(), StoreError> {
        let snapshot = self.snapshot.into_inner().ok_or(StoreError::TransactionConsumed)?;
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let dirty_set = self.dirty.into_inner();
        let dirty: HashMap<String, Arc<ColumnFamily>> = snapshot.data.into_iter().filter(|(name, _)| dirty_set.contains(name)).collect();
        if dirty.is_empty() {
            return Ok(());
        }
        self.store.commit(dirty);
        Ok(())
    }

    fn rollback(self) -> Result<(), StoreError> {
        if self.snapshot.into_inner().is_none() {
            return Err(StoreError::TransactionConsumed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips_inside_one_transaction() {
        let store = MemoryStore::new();
        let mut txn = store.begin(false).unwrap();
        txn.create_cf("widgets").unwrap();
        let cf = txn.cf("widgets").unwrap();
        txn.put(&cf, b"a", b"1").unwrap();
        assert_eq!(txn.get(&cf, b"a").unwrap().as_deref(), Some(b"1".as_slice()));
        txn.commit().unwrap();
    }

    #[test]
    fn writes_are_invisible_until_commit() {
        let store = MemoryStore::new();
        let mut setup = store.begin(false).unwrap();
        setup.create_cf("widgets").unwrap();
        setup.commit().unwrap();

        let mut writer = store.begin(false).unwrap();
        let cf = writer.cf("widgets").unwrap();
        writer.put(&cf, b"a", b"1").unwrap();

        let reader = store.begin(true).unwrap();
        let reader_cf = reader.cf("widgets").unwrap();
        assert_eq!(reader.get(&reader_cf, b"a").unwrap(), None);

        writer.commit().unwrap();
        let reader2 = store.begin(true).unwrap();
        let reader_cf2 = reader2.cf("widgets").unwrap();
        assert_eq!(reader_cf2.name, "widgets");
        assert_eq!(reader2.get(&reader_cf2, b"a").unwrap().as_deref(), Some(b"1".as_slice()));
    }

    #[test]
    fn scan_prefix_only_returns_matching_keys() {
        let store = MemoryStore::new();
        let mut txn = store.begin(false).unwrap();
        txn.create_cf("c").unwrap();
        let cf = txn.cf("c").unwrap();
        txn.put(&cf, b"a:1", b"x").unwrap();
        txn.put(&cf, b"a:2", b"y").unwrap();
        txn.put(&cf, b"b:1", b"z").unwrap();
        txn.commit().unwrap();

        let reader = store.begin(true).unwrap();
        let cf = reader.cf("c").unwrap();
        let keys: Vec<Vec<u8>> = reader.scan_prefix(&cf, b"a:").unwrap().map(|r| r.unwrap().0.into_owned()).collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn rollback_discards_uncommitted_writes() {
        let store = MemoryStore::new();
        let mut setup = store.begin(false).unwrap();
        setup.create_cf("c").unwrap();
        setup.commit().unwrap();

        let mut txn = store.begin(false).unwrap();
        let cf = txn.cf("c").unwrap();
        txn.put(&cf, b"a", b"1").unwrap();
        txn.rollback().unwrap();

        let reader = store.begin(true).unwrap();
        let cf = reader.cf("c").unwrap();
        assert_eq!(reader.get(&cf, b"a").unwrap(), None);
    }
}
