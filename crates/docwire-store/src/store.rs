use std::borrow::Cow;

use crate::error::StoreError;

/// A transactional, column-family-keyed byte store (spec §6, storage
/// backend contract). `docwire-collection` layers document encoding,
/// indexes, and the catalog on top of this.
pub trait Store {
    type Txn<'a>: Transaction
    where
        Self: 'a;

    fn begin(&self, read_only: bool) -> Result<Self::Txn<'_>, StoreError>;
}

pub trait Transaction {
    type Cf: Clone;

    fn cf(&self, name: &str) -> Result<Self::Cf, StoreError>;
    fn create_cf(&mut self, name: &str) -> Result<(), StoreError>;
    fn drop_cf(&mut self, name: &str) -> Result<(), StoreError>;

    fn get<'c>(&self, cf: &'c Self::Cf, key: &[u8]) -> Result<Option<Cow<'c, [u8]>>, StoreError>;
    fn multi_get<'c>(&self, cf: &'c Self::Cf, keys: &[&[u8]]) -> Result<Vec<Option<Cow<'c, [u8]>>>, StoreError>;

    #[allow(clippy::type_complexity)]
    fn scan_prefix<'c>(
        &'c self,
        cf: &'c Self::Cf,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = Result<(Cow<'c, [u8]>, Cow<'c, [u8]>), StoreError>> + 'c>, StoreError>;

    fn put(&self, cf: &Self::Cf, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn put_batch(&self, cf: &Self::Cf, entries: &[(&[u8], &[u8])]) -> Result<(), StoreError>;
    fn delete(&self, cf: &Self::Cf, key: &[u8]) -> Result<(), StoreError>;

    fn commit(self) -> Result<(), StoreError>;
    fn rollback(self) -> Result<(), StoreError>;
}
