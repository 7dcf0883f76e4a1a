//! Collection and index metadata (spec §4.7 "update indexes").
//!
//! Grounded directly on the teacher's `slate_db::catalog::Catalog`:
//! metadata lives in a reserved `_sys` column family under `__col__:`
//! and `__idx__:<collection>:<field>` key prefixes, scanned with
//! `Transaction::scan_prefix`.

use serde::{Deserialize, Serialize};

use docwire_store::Transaction;

use crate::error::CollectionError;

const SYS_CF: &str = "_sys";
const COL_PREFIX: &[u8] = b"__col__:";
const IDX_PREFIX: &[u8] = b"__idx__:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
    pub unique: bool,
}

fn col_key(name: &str) -> Vec<u8> {
    let mut key = COL_PREFIX.to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}

fn idx_key(collection: &str, field: &str) -> Vec<u8> {
    let mut key = IDX_PREFIX.to_vec();
    key.extend_from_slice(collection.as_bytes());
    key.push(b':');
    key.extend_from_slice(field.as_bytes());
    key
}

fn idx_collection_prefix(collection: &str) -> Vec<u8> {
    let mut key = IDX_PREFIX.to_vec();
    key.extend_from_slice(collection.as_bytes());
    key.push(b':');
    key
}

pub struct Catalog;

impl Catalog {
    pub fn create_collection<T: Transaction>(&self, txn: &mut T, name: &str) -> Result<(), CollectionError> {
        let sys = txn.cf(SYS_CF)?;
        let key = col_key(name);
        if txn.get(&sys, &key)?.is_none() {
            txn.create_cf(name)?;
            txn.put(&sys, &key, &[])?;
        }
        Ok(())
    }

    pub fn ensure_sys_cf<T: Transaction>(&self, txn: &mut T) -> Result<(), CollectionError> {
        txn.create_cf(SYS_CF)?;
        Ok(())
    }

    pub fn list_collections<T: Transaction>(&self, txn: &T) -> Result<Vec<String>, CollectionError> {
        let sys = txn.cf(SYS_CF)?;
        let iter = txn.scan_prefix(&sys, COL_PREFIX)?;
        let mut names = Vec::new();
        for result in iter {
            let (key, _) = result?;
            if let Some(name) = key.strip_prefix(COL_PREFIX) {
                if let Ok(s) = std::str::from_utf8(name) {
                    names.push(s.to_string());
                }
            }
        }
        Ok(names)
    }

    pub fn drop_collection<T: Transaction>(&self, txn: &mut T, name: &str) -> Result<(), CollectionError> {
        let sys = txn.cf(SYS_CF)?;
        txn.delete(&sys, &col_key(name))?;

        let prefix = idx_collection_prefix(name);
        let keys: Vec<Vec<u8>> = txn.scan_prefix(&sys, &prefix)?.map(|r| r.map(|(k, _)| k.to_vec())).collect::<Result<_, _>>()?;
        for key in keys {
            txn.delete(&sys, &key)?;
        }

        txn.drop_cf(name)?;
        Ok(())
    }

    pub fn create_index<T: Transaction>(&self, txn: &mut T, collection: &str, field: &str, unique: bool) -> Result<(), CollectionError> {
        let sys = txn.cf(SYS_CF)?;
        let key = idx_key(collection, field);
        let spec = IndexSpec { field: field.to_string(), unique };
        let value = rmp_serde::to_vec(&spec).map_err(|e| CollectionError::Encoding(e.to_string()))?;
        txn.put(&sys, &key, &value)?;
        Ok(())
    }

    pub fn drop_index<T: Transaction>(&self, txn: &mut T, collection: &str, field: &str) -> Result<(), CollectionError> {
        let sys = txn.cf(SYS_CF)?;
        txn.delete(&sys, &idx_key(collection, field))?;
        Ok(())
    }

    pub fn list_indexes<T: Transaction>(&self, txn: &T, collection: &str) -> Result<Vec<IndexSpec>, CollectionError> {
        let sys = txn.cf(SYS_CF)?;
        let prefix = idx_collection_prefix(collection);
        let iter = txn.scan_prefix(&sys, &prefix)?;
        let mut specs = Vec::new();
        for result in iter {
            let (_, value) = result?;
            let spec: IndexSpec = rmp_serde::from_slice(&value).map_err(|e| CollectionError::Encoding(e.to_string()))?;
            specs.push(spec);
        }
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwire_store::{MemoryStore, Store};

    #[test]
    fn create_collection_is_idempotent() {
        let store = MemoryStore::new();
        let mut txn = store.begin(false).unwrap();
        let catalog = Catalog;
        catalog.ensure_sys_cf(&mut txn).unwrap();
        catalog.create_collection(&mut txn, "widgets").unwrap();
        catalog.create_collection(&mut txn, "widgets").unwrap();
        assert_eq!(catalog.list_collections(&txn).unwrap(), vec!["widgets".to_string()]);
    }

    #[test]
    fn drop_collection_removes_its_indexes() {
        let store = MemoryStore::new();
        let mut txn = store.begin(false).unwrap();
        let catalog = Catalog;
        catalog.ensure_sys_cf(&mut txn).unwrap();
        catalog.create_collection(&mut txn, "widgets").unwrap();
        catalog.create_index(&mut txn, "widgets", "sku", true).unwrap();
        catalog.drop_collection(&mut txn, "widgets").unwrap();
        assert!(catalog.list_indexes(&txn, "widgets").unwrap().is_empty());
        assert!(catalog.list_collections(&txn).unwrap().is_empty());
    }
}
