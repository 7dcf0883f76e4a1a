use std::fmt;

use docwire_errors::{Error, ErrorCode};
use docwire_store::StoreError;

#[derive(Debug)]
pub enum CollectionError {
    Core(Error),
    Store(StoreError),
    Encoding(String),
    CollectionNotFound(String),
    CursorNotFound,
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionError::Core(e) => write!(f, "{e}"),
            CollectionError::Store(e) => write!(f, "store error: {e}"),
            CollectionError::Encoding(msg) => write!(f, "encoding error: {msg}"),
            CollectionError::CollectionNotFound(name) => write!(f, "collection not found: {name}"),
            CollectionError::CursorNotFound => write!(f, "cursor not found"),
        }
    }
}

impl std::error::Error for CollectionError {}

impl From<Error> for CollectionError {
    fn from(e: Error) -> Self {
        CollectionError::Core(e)
    }
}

impl From<StoreError> for CollectionError {
    fn from(e: StoreError) -> Self {
        CollectionError::Store(e)
    }
}

impl From<CollectionError> for Error {
    fn from(e: CollectionError) -> Self {
        match e {
            CollectionError::Core(err) => err,
            CollectionError::Store(err) => Error::new(ErrorCode::InternalError, err.to_string()),
            CollectionError::Encoding(msg) => Error::new(ErrorCode::InternalError, msg),
            CollectionError::CollectionNotFound(name) => {
                Error::new(ErrorCode::NamespaceNotFound, format!("namespace not found: {name}"))
            }
            CollectionError::CursorNotFound => Error::new(ErrorCode::CursorNotFound, "cursor not found"),
        }
    }
}
