//! Update-operator AST and parser (spec §4.5). Parsing lives here,
//! alongside the matcher it shares a query-document grammar with
//! (`$pull`'s sub-query argument reuses `matcher::parse_filter`);
//! applying the AST to a document is `docwire-update`'s job.
//!
//! Grounded in `slate_db::mutation::{Mutation, FieldMutation, MutationOp,
//! parse_mutation}`, generalized from that crate's smaller operator set
//! to the full set spec.md names.

use docwire_errors::{Error, ErrorCode};
use docwire_value::{Document, Path, Value};

use crate::matcher::{self, Predicate};

#[derive(Debug, Clone)]
pub enum CurrentDateKind {
    Date,
    Timestamp,
}

#[derive(Debug, Clone)]
pub struct PushSpec {
    pub each: Vec<Value>,
    pub slice: Option<i64>,
    pub sort: Option<Vec<(String, i32)>>,
    pub position: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum PullSpec {
    Equals(Value),
    Query(Box<Predicate>),
}

#[derive(Debug, Clone)]
pub enum BitOp {
    And(i64),
    Or(i64),
    Xor(i64),
}

#[derive(Debug, Clone)]
pub enum UpdateOp {
    Set(Value),
    Unset,
    Inc(Value),
    Mul(Value),
    Min(Value),
    Max(Value),
    Rename(Path),
    CurrentDate(CurrentDateKind),
    SetOnInsert(Value),
    Push(PushSpec),
    AddToSet(Vec<Value>),
    Pop(i32),
    Pull(PullSpec),
    PullAll(Vec<Value>),
    Bit(BitOp),
}

#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub path: Path,
    pub op: UpdateOp,
}

/// A fully parsed update argument: either a whole-document replacement
/// or a flattened list of per-path operator applications.
#[derive(Debug, Clone)]
pub enum UpdateDocument {
    Replacement(Document),
    Operators(Vec<FieldUpdate>),
}

/// Dotted-key reference fields that a replacement document is allowed to
/// carry unchanged even though they begin with `$` (spec §6).
const RESERVED_REFERENCE_KEYS: [&str; 3] = ["$ref", "$id", "$db"];

pub fn parse_update(doc: &Document) -> Result<UpdateDocument, Error> {
    let dollar_keys: Vec<&str> = doc
        .keys()
        .filter(|k| k.starts_with('$') && !RESERVED_REFERENCE_KEYS.contains(k))
        .collect();

    if dollar_keys.is_empty() {
        return Ok(UpdateDocument::Replacement(doc.clone()));
    }
    if dollar_keys.len() != doc.len() {
        return Err(Error::new(
            ErrorCode::FailedToParse,
            "update document must either be all operator expressions or all field-value pairs, not a mix",
        ));
    }

    let mut updates = Vec::new();
    for (op_name, arg) in doc.iter() {
        let fields = arg
            .as_document()
            .ok_or_else(|| Error::bad_value(format!("{op_name} requires an object argument")))?;
        parse_operator_fields(op_name, fields, &mut updates)?;
    }
    Ok(UpdateDocument::Operators(updates))
}

fn parse_operator_fields(
    op_name: &str,
    fields: &Document,
    out: &mut Vec<FieldUpdate>,
) -> Result<(), Error> {
    for (field, value) in fields.iter() {
        if field.starts_with('$') {
            return Err(Error::new(
                ErrorCode::DollarPrefixedFieldName,
                format!("update field names must not start with '$': {field}"),
            ));
        }
        let path = Path::parse(field)?;
        let op = parse_one_op(op_name, value)?;
        out.push(FieldUpdate { path, op });
    }
    Ok(())
}

fn parse_one_op(op_name: &str, value: &Value) -> Result<UpdateOp, Error> {
    match op_name {
        "$set" => Ok(UpdateOp::Set(value.clone())),
        "$unset" => Ok(UpdateOp::Unset),
        "$inc" => Ok(UpdateOp::Inc(value.clone())),
        "$mul" => Ok(UpdateOp::Mul(value.clone())),
        "$min" => Ok(UpdateOp::Min(value.clone())),
        "$max" => Ok(UpdateOp::Max(value.clone())),
        "$rename" => {
            let target = value
                .as_str()
                .ok_or_else(|| Error::bad_value("$rename target must be a string"))?;
            Ok(UpdateOp::Rename(Path::parse(target)?))
        }
        "$currentDate" => match value {
            Value::Bool(true) => Ok(UpdateOp::CurrentDate(CurrentDateKind::Date)),
            Value::Document(d) => match d.get("$type").and_then(Value::as_str) {
                Some("timestamp") => Ok(UpdateOp::CurrentDate(CurrentDateKind::Timestamp)),
                Some("date") | None => Ok(UpdateOp::CurrentDate(CurrentDateKind::Date)),
                Some(other) => Err(Error::bad_value(format!("unsupported $currentDate type '{other}'"))),
            },
            _ => Err(Error::bad_value("$currentDate requires true or {$type: ...}")),
        },
        "$setOnInsert" => Ok(UpdateOp::SetOnInsert(value.clone())),
        "$push" => parse_push(value),
        "$addToSet" => parse_add_to_set(value),
        "$pop" => {
            let n = value.as_f64().ok_or_else(|| Error::bad_value("$pop requires 1 or -1"))?;
            if n == 1.0 {
                Ok(UpdateOp::Pop(1))
            } else if n == -1.0 {
                Ok(UpdateOp::Pop(-1))
            } else {
                Err(Error::bad_value("$pop requires 1 or -1"))
            }
        }
        "$pull" => parse_pull(value),
        "$pullAll" => {
            let arr = value
                .as_array()
                .ok_or_else(|| Error::bad_value("$pullAll requires an array"))?;
            Ok(UpdateOp::PullAll(arr.to_vec()))
        }
        "$bit" => parse_bit(value),
        other => Err(Error::new(
            ErrorCode::UnsupportedOperator,
            format!("unrecognized update operator '{other}'"),
        )),
    }
}

fn parse_push(value: &Value) -> Result<UpdateOp, Error> {
    if let Some(doc) = value.as_document() {
        if doc.contains_key("$each") {
            let each = doc
                .get("$each")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::bad_value("$each requires an array"))?
                .to_vec();
            let slice = doc.get("$slice").and_then(Value::as_f64).map(|f| f as i64);
            let position = doc.get("$position").and_then(Value::as_f64).map(|f| f as i64);
            let sort = match doc.get("$sort") {
                Some(Value::Int32(1)) | Some(Value::Int64(1)) => Some(vec![]),
                Some(Value::Document(sort_doc)) => Some(
                    sort_doc
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.as_f64().unwrap_or(1.0) as i32))
                        .collect(),
                ),
                Some(Value::Int32(-1)) | Some(Value::Int64(-1)) => Some(vec![("".to_string(), -1)]),
                None => None,
                _ => return Err(Error::bad_value("unsupported $sort modifier shape")),
            };
            return Ok(UpdateOp::Push(PushSpec { each, slice, sort, position }));
        }
    }
    Ok(UpdateOp::Push(PushSpec {
        each: vec![value.clone()],
        slice: None,
        sort: None,
        position: None,
    }))
}

fn parse_add_to_set(value: &Value) -> Result<UpdateOp, Error> {
    if let Some(doc) = value.as_document() {
        if let Some(each) = doc.get("$each") {
            let arr = each
                .as_array()
                .ok_or_else(|| Error::bad_value("$each requires an array"))?
                .to_vec();
            return Ok(UpdateOp::AddToSet(arr));
        }
    }
    Ok(UpdateOp::AddToSet(vec![value.clone()]))
}

fn parse_pull(value: &Value) -> Result<UpdateOp, Error> {
    if let Some(doc) = value.as_document() {
        let looks_like_query = doc.keys().all(|k| {
            k.starts_with('$')
                || doc
                    .get(k)
                    .map(|v| matches!(v, Value::Document(inner) if inner.keys().next().is_some_and(|k| k.starts_with('$'))))
                    .unwrap_or(false)
        }) && !doc.is_empty();
        if looks_like_query {
            let pred = matcher::parse_filter(doc)?;
            return Ok(UpdateOp::Pull(PullSpec::Query(Box::new(pred))));
        }
    }
    Ok(UpdateOp::Pull(PullSpec::Equals(value.clone())))
}

fn parse_bit(value: &Value) -> Result<UpdateOp, Error> {
    let doc = value
        .as_document()
        .ok_or_else(|| Error::bad_value("$bit requires an object"))?;
    let (key, v) = doc
        .iter()
        .next()
        .ok_or_else(|| Error::bad_value("$bit requires one of and/or/xor"))?;
    let n = v.as_f64().ok_or_else(|| Error::bad_value("$bit operand must be numeric"))? as i64;
    match key {
        "and" => Ok(UpdateOp::Bit(BitOp::And(n))),
        "or" => Ok(UpdateOp::Bit(BitOp::Or(n))),
        "xor" => Ok(UpdateOp::Bit(BitOp::Xor(n))),
        other => Err(Error::bad_value(format!("unsupported $bit operand '{other}'"))),
    }
}

impl UpdateDocument {
    /// Every path this update touches, used by the conflict-detection
    /// pass in `docwire-update` (spec §4.5).
    pub fn touched_paths(&self) -> Vec<&Path> {
        match self {
            UpdateDocument::Replacement(_) => Vec::new(),
            UpdateDocument::Operators(ops) => ops.iter().map(|u| &u.path).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        let mut d = Document::new();
        for (k, v) in pairs {
            d.insert(*k, v.clone());
        }
        d
    }

    #[test]
    fn replacement_document_has_no_dollar_keys() {
        let d = doc(&[("a", Value::Int32(1))]);
        match parse_update(&d).unwrap() {
            UpdateDocument::Replacement(_) => {}
            _ => panic!("expected replacement"),
        }
    }

    #[test]
    fn mixed_replacement_and_operator_keys_rejected() {
        let mut d = Document::new();
        d.insert("a", Value::Int32(1));
        let mut set_doc = Document::new();
        set_doc.insert("b", Value::Int32(2));
        d.insert("$set", Value::Document(set_doc));
        let err = parse_update(&d).unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedToParse);
    }

    #[test]
    fn set_and_unset_on_overlapping_paths_both_parse() {
        let mut d = Document::new();
        let mut set_doc = Document::new();
        set_doc.insert("a.b", Value::Int32(1));
        d.insert("$set", Value::Document(set_doc));
        let mut unset_doc = Document::new();
        unset_doc.insert("a", Value::Int32(1));
        d.insert("$unset", Value::Document(unset_doc));
        let parsed = parse_update(&d).unwrap();
        assert_eq!(parsed.touched_paths().len(), 2);
    }

    #[test]
    fn push_with_each_slice_and_sort() {
        let mut push_arg = Document::new();
        push_arg.insert("$each", Value::Array(vec![Value::Int32(1), Value::Int32(2)]));
        push_arg.insert("$slice", Value::Int32(-5));
        let mut d = Document::new();
        let mut field = Document::new();
        field.insert("scores", Value::Document(push_arg));
        d.insert("$push", Value::Document(field));
        let parsed = parse_update(&d).unwrap();
        match parsed {
            UpdateDocument::Operators(ops) => {
                assert_eq!(ops.len(), 1);
                match &ops[0].op {
                    UpdateOp::Push(spec) => {
                        assert_eq!(spec.each.len(), 2);
                        assert_eq!(spec.slice, Some(-5));
                    }
                    _ => panic!("expected push"),
                }
            }
            _ => panic!("expected operators"),
        }
    }

    #[test]
    fn pull_with_query_subdocument() {
        let mut cond = Document::new();
        let mut gt = Document::new();
        gt.insert("$gt", Value::Int32(5));
        cond.insert("x", Value::Document(gt));
        let mut d = Document::new();
        let mut field = Document::new();
        field.insert("items", Value::Document(cond));
        d.insert("$pull", Value::Document(field));
        let parsed = parse_update(&d).unwrap();
        match parsed {
            UpdateDocument::Operators(ops) => match &ops[0].op {
                UpdateOp::Pull(PullSpec::Query(_)) => {}
                _ => panic!("expected query-shaped pull"),
            },
            _ => panic!("expected operators"),
        }
    }

    #[test]
    fn dollar_prefixed_field_name_rejected() {
        let mut d = Document::new();
        let mut field = Document::new();
        field.insert("$bad", Value::Int32(1));
        d.insert("$set", Value::Document(field));
        let err = parse_update(&d).unwrap_err();
        assert_eq!(err.code, ErrorCode::DollarPrefixedFieldName);
    }
}
