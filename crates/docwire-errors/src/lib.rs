//! Stable numeric error codes and message templates shared by every layer
//! of the engine.
//!
//! Every crate-local error type in this workspace (`ValueError`,
//! `PathError`, `MatchError`, `UpdateError`, `PipelineError`, `StoreError`,
//! `DbError`) carries one of these codes and converts into `Error` at its
//! boundary, the same way the teacher's per-crate error enums convert into
//! each other via `From` impls.

use std::fmt;

/// A stable, numeric error code. Values mirror the well-known MongoDB
/// error code space so that a client speaking the wire protocol sees
/// familiar numbers; this is not a claim of full code-for-code parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    InternalError,
    BadValue,
    FailedToParse,
    TypeMismatch,
    PathNotViable,
    ImmutableField,
    ConflictingUpdateOperators,
    NamespaceNotFound,
    DuplicateKey,
    DollarPrefixedFieldName,
    FieldPathTrailingDot,
    FieldPathInvalidElement,
    TooManyPositionalElements,
    EmptyProjectionSpec,
    CursorNotFound,
    QueryCanceled,
    MaxTimeMsExpired,
    UnsupportedOperator,
}

impl ErrorCode {
    /// The numeric code surfaced verbatim to the wire boundary (§6).
    pub const fn code(self) -> i32 {
        match self {
            ErrorCode::InternalError => 1,
            ErrorCode::BadValue => 2,
            ErrorCode::FailedToParse => 9,
            ErrorCode::TypeMismatch => 14,
            ErrorCode::PathNotViable => 28,
            ErrorCode::ImmutableField => 66,
            ErrorCode::ConflictingUpdateOperators => 40,
            ErrorCode::NamespaceNotFound => 26,
            ErrorCode::DuplicateKey => 11000,
            ErrorCode::DollarPrefixedFieldName => 52,
            ErrorCode::FieldPathTrailingDot => 40353,
            ErrorCode::FieldPathInvalidElement => 15998,
            ErrorCode::TooManyPositionalElements => 16410,
            ErrorCode::EmptyProjectionSpec => 40177,
            ErrorCode::CursorNotFound => 43,
            ErrorCode::QueryCanceled => 11601,
            ErrorCode::MaxTimeMsExpired => 50,
            ErrorCode::UnsupportedOperator => 9,
        }
    }

    /// The short, stable name used in logs and error payloads.
    pub const fn name(self) -> &'static str {
        match self {
            ErrorCode::InternalError => "InternalError",
            ErrorCode::BadValue => "BadValue",
            ErrorCode::FailedToParse => "FailedToParse",
            ErrorCode::TypeMismatch => "TypeMismatch",
            ErrorCode::PathNotViable => "PathNotViable",
            ErrorCode::ImmutableField => "ImmutableField",
            ErrorCode::ConflictingUpdateOperators => "ConflictingUpdateOperators",
            ErrorCode::NamespaceNotFound => "NamespaceNotFound",
            ErrorCode::DuplicateKey => "DuplicateKey",
            ErrorCode::DollarPrefixedFieldName => "DollarPrefixedFieldName",
            ErrorCode::FieldPathTrailingDot => "Location40353",
            ErrorCode::FieldPathInvalidElement => "Location15998",
            ErrorCode::TooManyPositionalElements => "Location16410",
            ErrorCode::EmptyProjectionSpec => "Location40177",
            ErrorCode::CursorNotFound => "CursorNotFound",
            ErrorCode::QueryCanceled => "QueryCanceled",
            ErrorCode::MaxTimeMsExpired => "MaxTimeMSExpired",
            ErrorCode::UnsupportedOperator => "FailedToParse",
        }
    }
}

/// A coded error value. Propagated by value, never by panic, per §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_value(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadValue, message)
    }

    pub fn path_not_viable(field: &str) -> Self {
        Self::new(
            ErrorCode::PathNotViable,
            format!("cannot create field '{field}' in element that is not a document"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The numeric code, surfaced verbatim at the wire boundary (§6, §7).
    pub fn numeric_code(&self) -> i32 {
        self.code.code()
    }

    pub fn code_name(&self) -> &'static str {
        self.code.name()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.code.name(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_empty_matches_spec_scenario_4() {
        let e = Error::new(
            ErrorCode::EmptyProjectionSpec,
            "specification must have at least one field",
        );
        assert_eq!(e.numeric_code(), 40177);
        assert_eq!(e.to_string(), "Location40177 (40177): specification must have at least one field");
    }

    #[test]
    fn conflicting_update_operators_code() {
        assert_eq!(ErrorCode::ConflictingUpdateOperators.code(), 40);
    }

    #[test]
    fn path_not_viable_helper_sets_code() {
        let e = Error::path_not_viable("a.b");
        assert_eq!(e.code, ErrorCode::PathNotViable);
    }
}
