use std::fmt;

use docwire_errors::{Error, ErrorCode};

#[derive(Debug)]
pub enum StoreError {
    TransactionConsumed,
    ReadOnly,
    ColumnFamilyNotFound(String),
    Storage(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::TransactionConsumed => write!(f, "transaction already consumed"),
            StoreError::ReadOnly => write!(f, "cannot write in a read-only transaction"),
            StoreError::ColumnFamilyNotFound(name) => write!(f, "column family not found: {name}"),
            StoreError::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::new(ErrorCode::InternalError, e.to_string())
    }
}
