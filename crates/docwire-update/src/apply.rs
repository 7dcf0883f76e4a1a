//! Applying a parsed update AST to a document (spec §4.5). Grounded in
//! `slate_db::mutation::Mutation::apply`, generalized from its `$set`/
//! `$inc`/`$push`/`$pull` subset to the full operator list and the
//! ordering/conflict/array-filter rules spec.md adds.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use docwire_errors::{Error, ErrorCode};
use docwire_query::{matches as query_matches, BitOp, CurrentDateKind, FieldUpdate, PullSpec, PushSpec, UpdateDocument, UpdateOp};
use docwire_value::{can_fully_traverse_for_rename, get, remove, set, Document, Fragment, Path, Value};

use crate::array_filter::{wrap, ArrayFilter};

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOutcome {
    pub modified: bool,
}

/// Apply a parsed update document to `doc`.
///
/// `match_position` is the array index the query matcher recorded for
/// the positional `$` operator; `array_filters` bind `$[identifier]`
/// placeholders; `is_insert` gates `$setOnInsert` (spec §4.5).
pub fn apply_update(
    doc: &mut Value,
    update: &UpdateDocument,
    array_filters: &[ArrayFilter],
    match_position: Option<usize>,
    is_insert: bool,
) -> Result<ApplyOutcome, Error> {
    match update {
        UpdateDocument::Replacement(repl) => apply_replacement(doc, repl),
        UpdateDocument::Operators(ops) => apply_operators(doc, ops, array_filters, match_position, is_insert),
    }
}

fn apply_replacement(doc: &mut Value, repl: &Document) -> Result<ApplyOutcome, Error> {
    let existing_id = doc.as_document().and_then(|d| d.get("_id")).cloned();
    let mut new_doc = repl.clone();
    if let Some(old_id) = &existing_id {
        match new_doc.get("_id") {
            Some(new_id) if !old_id.deep_eq(new_id) => {
                return Err(Error::new(
                    ErrorCode::ImmutableField,
                    "Performing an update on the path '_id' would modify the immutable field '_id'",
                ));
            }
            None => {
                new_doc.insert("_id", old_id.clone());
            }
            _ => {}
        }
    }
    let replacement_value = Value::Document(new_doc);
    let modified = !replacement_value.deep_eq(doc);
    *doc = replacement_value;
    Ok(ApplyOutcome { modified })
}

pub(crate) fn apply_operators(
    doc: &mut Value,
    ops: &[FieldUpdate],
    array_filters: &[ArrayFilter],
    match_position: Option<usize>,
    is_insert: bool,
) -> Result<ApplyOutcome, Error> {
    check_conflicts(ops)?;

    let mut active: Vec<&FieldUpdate> = ops
        .iter()
        .filter(|u| is_insert || !matches!(u.op, UpdateOp::SetOnInsert(_)))
        .collect();
    // Stable sort: parent paths (fewer fragments) apply before children.
    active.sort_by_key(|u| u.path.fragments().len());

    let mut modified = false;
    for update in active {
        let concrete = resolve_concrete_path(doc, &update.path, match_position, array_filters)?;
        let changed = apply_one(doc, &concrete, &update.op)?;
        modified |= changed;
    }
    Ok(ApplyOutcome { modified })
}

fn check_conflicts(ops: &[FieldUpdate]) -> Result<(), Error> {
    for i in 0..ops.len() {
        for j in (i + 1)..ops.len() {
            if Path::overlaps(&ops[i].path, &ops[j].path) {
                return Err(Error::new(
                    ErrorCode::ConflictingUpdateOperators,
                    format!(
                        "Updating the path '{}' would create a conflict at '{}'",
                        ops[i].path.to_string(),
                        ops[j].path.to_string()
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Resolve `$` and `$[identifier]` fragments against the document being
/// mutated, producing a path of only `Name`/`Index` fragments.
fn resolve_concrete_path(
    doc: &Value,
    path: &Path,
    match_position: Option<usize>,
    array_filters: &[ArrayFilter],
) -> Result<Path, Error> {
    let mut resolved: Vec<Fragment> = Vec::new();
    for frag in path.fragments() {
        let resolved_frag = match frag {
            Fragment::Positional => {
                let idx = match_position.ok_or_else(|| {
                    Error::bad_value("The positional operator did not find the match needed from the query")
                })?;
                Fragment::Index(idx)
            }
            Fragment::FilteredPositional(id) => {
                let filter = array_filters
                    .iter()
                    .find(|f| &f.identifier == id)
                    .ok_or_else(|| Error::bad_value(format!("no array filter found for identifier '{id}' in path")))?;
                let current = get(doc, &Path::from_fragments(resolved.clone()));
                let arr = current.as_array().ok_or_else(|| {
                    Error::new(ErrorCode::PathNotViable, "array filter path segment does not reference an array")
                })?;
                let mut found = None;
                for (i, elem) in arr.iter().enumerate() {
                    if filter.matches(elem)? {
                        found = Some(i);
                        break;
                    }
                }
                Fragment::Index(found.ok_or_else(|| {
                    Error::bad_value(format!("no array element matched array filter for '{id}'"))
                })?)
            }
            other => other.clone(),
        };
        resolved.push(resolved_frag);
    }
    Ok(Path::from_fragments(resolved))
}

fn apply_one(doc: &mut Value, path: &Path, op: &UpdateOp) -> Result<bool, Error> {
    match op {
        UpdateOp::Set(v) => {
            let changed = !get(doc, path).deep_eq(v);
            if changed {
                set(doc, path, v.clone())?;
            }
            Ok(changed)
        }
        UpdateOp::Unset => Ok(!remove(doc, path).is_missing()),
        UpdateOp::Inc(delta) => apply_inc(doc, path, delta),
        UpdateOp::Mul(factor) => apply_mul(doc, path, factor),
        UpdateOp::Min(v) => apply_extremum(doc, path, v, Ordering::Less),
        UpdateOp::Max(v) => apply_extremum(doc, path, v, Ordering::Greater),
        UpdateOp::Rename(target) => apply_rename(doc, path, target),
        UpdateOp::CurrentDate(kind) => apply_current_date(doc, path, kind),
        UpdateOp::SetOnInsert(v) => {
            set(doc, path, v.clone())?;
            Ok(true)
        }
        UpdateOp::Push(spec) => apply_push(doc, path, spec),
        UpdateOp::AddToSet(items) => apply_add_to_set(doc, path, items),
        UpdateOp::Pop(dir) => apply_pop(doc, path, *dir),
        UpdateOp::Pull(spec) => apply_pull(doc, path, spec),
        UpdateOp::PullAll(items) => apply_pull_all(doc, path, items),
        UpdateOp::Bit(bitop) => apply_bit(doc, path, bitop),
    }
}

fn numeric_value(v: &Value, op_name: &str) -> Result<f64, Error> {
    v.as_f64()
        .ok_or_else(|| Error::new(ErrorCode::TypeMismatch, format!("Cannot apply {op_name} to a value of non-numeric type")))
}

fn promote_type(a: &Value, b: &Value, n: f64) -> Value {
    if matches!(a, Value::Double(_)) || matches!(b, Value::Double(_)) {
        Value::Double(n)
    } else if matches!(a, Value::Int64(_)) || matches!(b, Value::Int64(_)) {
        Value::Int64(n as i64)
    } else {
        Value::Int32(n as i32)
    }
}

fn apply_inc(doc: &mut Value, path: &Path, delta: &Value) -> Result<bool, Error> {
    let current = get(doc, path).clone();
    if !current.is_missing() && !current.is_numeric() {
        return Err(Error::new(ErrorCode::TypeMismatch, "Cannot apply $inc to a value of non-numeric type"));
    }
    let delta_n = numeric_value(delta, "$inc")?;
    let base_n = if current.is_missing() { 0.0 } else { numeric_value(&current, "$inc")? };
    let type_ref = if current.is_missing() { delta } else { &current };
    let result = promote_type(type_ref, delta, base_n + delta_n);
    set(doc, path, result)?;
    Ok(true)
}

fn apply_mul(doc: &mut Value, path: &Path, factor: &Value) -> Result<bool, Error> {
    let current = get(doc, path).clone();
    if !current.is_missing() && !current.is_numeric() {
        return Err(Error::new(ErrorCode::TypeMismatch, "Cannot apply $mul to a value of non-numeric type"));
    }
    let factor_n = numeric_value(factor, "$mul")?;
    let base_n = if current.is_missing() { 0.0 } else { numeric_value(&current, "$mul")? };
    let type_ref = if current.is_missing() { factor } else { &current };
    let result = promote_type(type_ref, factor, base_n * factor_n);
    set(doc, path, result)?;
    Ok(true)
}

fn apply_extremum(doc: &mut Value, path: &Path, candidate: &Value, accept: Ordering) -> Result<bool, Error> {
    let current = get(doc, path);
    if current.is_missing() || candidate.cmp_canonical(current) == accept {
        let changed = !current.deep_eq(candidate);
        if changed {
            set(doc, path, candidate.clone())?;
        }
        Ok(changed)
    } else {
        Ok(false)
    }
}

fn apply_rename(doc: &mut Value, path: &Path, target: &Path) -> Result<bool, Error> {
    if !can_fully_traverse_for_rename(doc, path) {
        return Err(Error::new(
            ErrorCode::PathNotViable,
            "cannot rename field whose path traverses a non-document element",
        ));
    }
    let value = get(doc, path).clone();
    if value.is_missing() {
        return Ok(false);
    }
    remove(doc, path);
    set(doc, target, value)?;
    Ok(true)
}

static TIMESTAMP_ORDINAL: AtomicU32 = AtomicU32::new(1);

fn apply_current_date(doc: &mut Value, path: &Path, kind: &CurrentDateKind) -> Result<bool, Error> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let value = match kind {
        CurrentDateKind::Date => Value::Date(now.as_millis() as i64),
        CurrentDateKind::Timestamp => Value::Timestamp {
            seconds: now.as_secs() as u32,
            ordinal: TIMESTAMP_ORDINAL.fetch_add(1, AtomicOrdering::Relaxed),
        },
    };
    set(doc, path, value)?;
    Ok(true)
}

fn current_array(doc: &Value, path: &Path, op_name: &str) -> Result<Vec<Value>, Error> {
    match get(doc, path) {
        Value::Missing | Value::Null => Ok(Vec::new()),
        Value::Array(a) => Ok(a.clone()),
        _ => Err(Error::new(ErrorCode::TypeMismatch, format!("{op_name} requires the field to be an array"))),
    }
}

fn apply_push(doc: &mut Value, path: &Path, spec: &PushSpec) -> Result<bool, Error> {
    let mut arr = current_array(doc, path, "$push")?;
    let position = spec
        .position
        .map(|p| {
            if p < 0 {
                (arr.len() as i64 + p).max(0) as usize
            } else {
                (p as usize).min(arr.len())
            }
        })
        .unwrap_or(arr.len());
    for (offset, item) in spec.each.iter().enumerate() {
        arr.insert((position + offset).min(arr.len()), item.clone());
    }
    if let Some(sort_spec) = &spec.sort {
        sort_array(&mut arr, sort_spec);
    }
    if let Some(slice) = spec.slice {
        apply_slice(&mut arr, slice);
    }
    set(doc, path, Value::Array(arr))?;
    Ok(true)
}

fn sort_array(arr: &mut [Value], spec: &[(String, i32)]) {
    if spec.iter().all(|(k, _)| k.is_empty()) {
        let dir = spec.first().map(|(_, d)| *d).unwrap_or(1);
        arr.sort_by(|a, b| {
            let o = a.cmp_canonical(b);
            if dir < 0 { o.reverse() } else { o }
        });
    } else {
        arr.sort_by(|a, b| {
            for (key, dir) in spec {
                let av = a.as_document().and_then(|d| d.get(key)).cloned().unwrap_or(Value::Missing);
                let bv = b.as_document().and_then(|d| d.get(key)).cloned().unwrap_or(Value::Missing);
                let mut o = av.cmp_canonical(&bv);
                if *dir < 0 {
                    o = o.reverse();
                }
                if o != Ordering::Equal {
                    return o;
                }
            }
            Ordering::Equal
        });
    }
}

fn apply_slice(arr: &mut Vec<Value>, slice: i64) {
    let len = arr.len() as i64;
    if slice >= 0 {
        arr.truncate(slice as usize);
    } else {
        let keep_from = (len + slice).max(0) as usize;
        arr.drain(0..keep_from);
    }
}

fn apply_add_to_set(doc: &mut Value, path: &Path, items: &[Value]) -> Result<bool, Error> {
    let mut arr = current_array(doc, path, "$addToSet")?;
    let mut changed = false;
    for item in items {
        if !arr.iter().any(|e| e.deep_eq(item)) {
            arr.push(item.clone());
            changed = true;
        }
    }
    if changed {
        set(doc, path, Value::Array(arr))?;
    }
    Ok(changed)
}

fn apply_pop(doc: &mut Value, path: &Path, dir: i32) -> Result<bool, Error> {
    let mut arr = current_array(doc, path, "$pop")?;
    if arr.is_empty() {
        return Ok(false);
    }
    if dir < 0 {
        arr.remove(0);
    } else {
        arr.pop();
    }
    set(doc, path, Value::Array(arr))?;
    Ok(true)
}

fn apply_pull(doc: &mut Value, path: &Path, spec: &PullSpec) -> Result<bool, Error> {
    let arr = current_array(doc, path, "$pull")?;
    let mut kept = Vec::with_capacity(arr.len());
    let mut removed_any = false;
    for elem in arr {
        let should_remove = match spec {
            PullSpec::Equals(v) => elem.deep_eq(v),
            PullSpec::Query(pred) => query_matches(pred, &wrap(&elem))?.matched,
        };
        if should_remove {
            removed_any = true;
        } else {
            kept.push(elem);
        }
    }
    if removed_any {
        set(doc, path, Value::Array(kept))?;
    }
    Ok(removed_any)
}

fn apply_pull_all(doc: &mut Value, path: &Path, items: &[Value]) -> Result<bool, Error> {
    let arr = current_array(doc, path, "$pullAll")?;
    let before_len = arr.len();
    let kept: Vec<Value> = arr.into_iter().filter(|e| !items.iter().any(|i| e.deep_eq(i))).collect();
    let changed = kept.len() != before_len;
    if changed {
        set(doc, path, Value::Array(kept))?;
    }
    Ok(changed)
}

fn apply_bit(doc: &mut Value, path: &Path, op: &BitOp) -> Result<bool, Error> {
    let current = get(doc, path).clone();
    let base: i64 = match &current {
        Value::Missing | Value::Null => 0,
        Value::Int32(i) => *i as i64,
        Value::Int64(i) => *i,
        _ => return Err(Error::new(ErrorCode::TypeMismatch, "$bit requires an integer field")),
    };
    let is_64 = matches!(current, Value::Int64(_));
    let (result, operand_64) = match op {
        BitOp::And(n) => (base & n, *n),
        BitOp::Or(n) => (base | n, *n),
        BitOp::Xor(n) => (base ^ n, *n),
    };
    let widen = is_64 || operand_64 > i32::MAX as i64 || operand_64 < i32::MIN as i64;
    let value = if widen { Value::Int64(result) } else { Value::Int32(result as i32) };
    set(doc, path, value)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwire_query::parse_update;

    fn doc(pairs: &[(&str, Value)]) -> Value {
        let mut d = Document::new();
        for (k, v) in pairs {
            d.insert(*k, v.clone());
        }
        Value::Document(d)
    }

    #[test]
    fn set_and_unset_apply_in_parent_first_order() {
        let mut root = doc(&[]);
        let mut set_doc = Document::new();
        set_doc.insert("a.b", Value::Int32(1));
        let mut update_doc = Document::new();
        update_doc.insert("$set", Value::Document(set_doc));
        let parsed = parse_update(&update_doc).unwrap();
        let outcome = apply_update(&mut root, &parsed, &[], None, false).unwrap();
        assert!(outcome.modified);
        assert!(get(&root, &Path::parse("a.b").unwrap()).deep_eq(&Value::Int32(1)));
    }

    #[test]
    fn conflicting_set_and_unset_are_rejected() {
        let mut root = doc(&[("a", Value::Document(Document::new()))]);
        let mut set_doc = Document::new();
        set_doc.insert("a.b", Value::Int32(1));
        let mut unset_doc = Document::new();
        unset_doc.insert("a", Value::Int32(1));
        let mut update_doc = Document::new();
        update_doc.insert("$set", Value::Document(set_doc));
        update_doc.insert("$unset", Value::Document(unset_doc));
        let parsed = parse_update(&update_doc).unwrap();
        let err = apply_update(&mut root, &parsed, &[], None, false).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConflictingUpdateOperators);
    }

    #[test]
    fn positional_set_targets_matched_array_index() {
        let arr = Value::Array(vec![
            doc(&[("x", Value::Int32(0))]),
            doc(&[("x", Value::Int32(1))]),
            doc(&[("x", Value::Int32(1))]),
        ]);
        let mut root = doc(&[("arr", arr)]);
        let mut set_doc = Document::new();
        set_doc.insert("arr.$.y", Value::Int32(9));
        let mut update_doc = Document::new();
        update_doc.insert("$set", Value::Document(set_doc));
        let parsed = parse_update(&update_doc).unwrap();
        apply_update(&mut root, &parsed, &[], Some(1), false).unwrap();
        let arr = get(&root, &Path::parse("arr").unwrap()).as_array().unwrap();
        assert!(arr[1].as_document().unwrap().get("y").unwrap().deep_eq(&Value::Int32(9)));
        assert!(arr[0].as_document().unwrap().get("y").is_none());
    }

    #[test]
    fn inc_on_missing_field_starts_from_zero() {
        let mut root = doc(&[]);
        let mut inc_doc = Document::new();
        inc_doc.insert("counter", Value::Int32(5));
        let mut update_doc = Document::new();
        update_doc.insert("$inc", Value::Document(inc_doc));
        let parsed = parse_update(&update_doc).unwrap();
        apply_update(&mut root, &parsed, &[], None, false).unwrap();
        assert!(get(&root, &Path::parse("counter").unwrap()).deep_eq(&Value::Int32(5)));
    }

    #[test]
    fn push_with_each_and_negative_slice_keeps_last_n() {
        let mut root = doc(&[("scores", Value::Array(vec![Value::Int32(1), Value::Int32(2)]))]);
        let mut push_arg = Document::new();
        push_arg.insert("$each", Value::Array(vec![Value::Int32(3), Value::Int32(4)]));
        push_arg.insert("$slice", Value::Int32(-2));
        let mut push_doc = Document::new();
        push_doc.insert("scores", Value::Document(push_arg));
        let mut update_doc = Document::new();
        update_doc.insert("$push", Value::Document(push_doc));
        let parsed = parse_update(&update_doc).unwrap();
        apply_update(&mut root, &parsed, &[], None, false).unwrap();
        let arr = get(&root, &Path::parse("scores").unwrap()).as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert!(arr[0].deep_eq(&Value::Int32(3)));
        assert!(arr[1].deep_eq(&Value::Int32(4)));
    }

    #[test]
    fn rename_moves_value_and_no_ops_when_source_absent() {
        let mut root = doc(&[("old", Value::Int32(7))]);
        let mut rename_doc = Document::new();
        rename_doc.insert("old", Value::String("new".into()));
        let mut update_doc = Document::new();
        update_doc.insert("$rename", Value::Document(rename_doc));
        let parsed = parse_update(&update_doc).unwrap();
        let outcome = apply_update(&mut root, &parsed, &[], None, false).unwrap();
        assert!(outcome.modified);
        assert!(get(&root, &Path::parse("new").unwrap()).deep_eq(&Value::Int32(7)));
        assert!(get(&root, &Path::parse("old").unwrap()).is_missing());
    }
}
