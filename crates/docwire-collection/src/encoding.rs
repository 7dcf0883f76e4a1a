//! Document/key encoding for the storage backend contract (spec §6).
//!
//! The core storage trait only understands bytes; this module converts
//! between `docwire_value::Value` documents and the `rmp-serde` byte
//! encoding used for both storage records and the wire boundary, the
//! same codec the teacher uses for its request/response framing.

use docwire_value::Value;

use crate::error::CollectionError;

pub fn encode_document(value: &Value) -> Result<Vec<u8>, CollectionError> {
    rmp_serde::to_vec(value).map_err(|e| CollectionError::Encoding(e.to_string()))
}

pub fn decode_document(bytes: &[u8]) -> Result<Value, CollectionError> {
    rmp_serde::from_slice(bytes).map_err(|e| CollectionError::Encoding(e.to_string()))
}

/// Keys only need to be stable and unique per `_id`, not ordered to
/// match `Value`'s own canonical ordering (result sets are sorted, if
/// at all, by the pipeline's `$sort` stage over the decoded documents).
pub fn encode_id(id: &Value) -> Result<Vec<u8>, CollectionError> {
    encode_document(id)
}

const DATA_PREFIX: &[u8] = b"d:";
const INDEX_PREFIX: &[u8] = b"i:";

/// Storage key for a document record, keyed by its encoded `_id`.
pub fn data_key(id_bytes: &[u8]) -> Vec<u8> {
    let mut key = DATA_PREFIX.to_vec();
    key.extend_from_slice(id_bytes);
    key
}

pub fn data_scan_prefix() -> Vec<u8> {
    DATA_PREFIX.to_vec()
}

/// Storage key for one index entry: `i:<field>\0<value bytes>\0<id bytes>`.
/// Membership only (existence for uniqueness checks and backfill), not
/// a sorted range index.
pub fn index_key(field: &str, value_bytes: &[u8], id_bytes: &[u8]) -> Vec<u8> {
    let mut key = INDEX_PREFIX.to_vec();
    key.extend_from_slice(field.as_bytes());
    key.push(0);
    key.extend_from_slice(value_bytes);
    key.push(0);
    key.extend_from_slice(id_bytes);
    key
}

pub fn index_field_prefix(field: &str) -> Vec<u8> {
    let mut key = INDEX_PREFIX.to_vec();
    key.extend_from_slice(field.as_bytes());
    key.push(0);
    key
}

pub fn index_value_prefix(field: &str, value_bytes: &[u8]) -> Vec<u8> {
    let mut key = index_field_prefix(field);
    key.extend_from_slice(value_bytes);
    key.push(0);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwire_value::Document;

    #[test]
    fn document_round_trips_through_encoding() {
        let mut doc = Document::new();
        doc.insert("a", Value::Int32(1));
        doc.insert("b", Value::String("x".into()));
        let value = Value::Document(doc);

        let bytes = encode_document(&value).unwrap();
        let decoded = decode_document(&bytes).unwrap();
        assert!(decoded.deep_eq(&value));
    }
}
