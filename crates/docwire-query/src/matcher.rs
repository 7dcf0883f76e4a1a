//! Query matcher (spec §4.4): a query Document compiled once into a
//! `Predicate` tree, then evaluated against many candidate documents —
//! grounded in `slate_db::expression::{Expression, eval::matches}`, which
//! does the same parse-once/eval-many split for a narrower operator set.

use std::cmp::Ordering;

use docwire_errors::{Error, ErrorCode};
use docwire_value::{get_collection_aware, Document, Path, Value};
use regex::{Regex, RegexBuilder};

use crate::expression::{eval, parse_expr, Expr, Scope};

/// Result of matching a `Predicate` against a candidate document: whether
/// it matched, and if the match touched an array field, the index of the
/// first element that satisfied it (for `$` positional updates).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
    pub position: Option<usize>,
}

impl MatchResult {
    fn no() -> Self {
        MatchResult { matched: false, position: None }
    }
    fn yes(position: Option<usize>) -> Self {
        MatchResult { matched: true, position }
    }
}

#[derive(Debug, Clone)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Nor(Vec<Predicate>),
    Expr(Expr),
    /// `$where` and `$text` are accepted at parse time (so a query
    /// document containing them doesn't fail to parse) but have no
    /// evaluation support without a script engine or text index; using
    /// them raises `UnsupportedOperator` at match time.
    Where(String),
    Text(String),
    Comment,
    Field(Path, FieldPredicate),
}

#[derive(Debug, Clone)]
pub enum FieldPredicate {
    Eq(Value),
    Ops(Vec<FieldOp>),
}

#[derive(Debug, Clone)]
pub enum FieldOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Type(String),
    Regex(Regex, String),
    Mod(i64, i64),
    Size(i64),
    All(Vec<Value>),
    ElemMatch(Document),
    Not(Box<FieldOp>),
}

/// Parse a query Document into a compiled predicate tree (spec §4.4).
pub fn parse_filter(doc: &Document) -> Result<Predicate, Error> {
    let clauses: Result<Vec<Predicate>, Error> = doc.iter().map(|(k, v)| parse_top_level(k, v)).collect();
    let clauses = clauses?;
    if clauses.len() == 1 {
        Ok(clauses.into_iter().next().unwrap())
    } else {
        Ok(Predicate::And(clauses))
    }
}

fn parse_top_level(key: &str, value: &Value) -> Result<Predicate, Error> {
    match key {
        "$and" => Ok(Predicate::And(parse_predicate_array(value)?)),
        "$or" => Ok(Predicate::Or(parse_predicate_array(value)?)),
        "$nor" => Ok(Predicate::Nor(parse_predicate_array(value)?)),
        "$not" => Ok(Predicate::Nor(vec![parse_inner_doc(value)?])),
        "$expr" => Ok(Predicate::Expr(parse_expr(value)?)),
        "$where" => Ok(Predicate::Where(
            value.as_str().unwrap_or_default().to_string(),
        )),
        "$text" => Ok(Predicate::Text(
            value
                .as_document()
                .and_then(|d| d.get("$search"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        )),
        "$comment" => Ok(Predicate::Comment),
        field if field.starts_with('$') => Err(Error::new(
            ErrorCode::BadValue,
            format!("unknown top-level operator: {field}"),
        )),
        field => {
            let path = Path::parse(field)?;
            let pred = parse_field_value(value)?;
            Ok(Predicate::Field(path, pred))
        }
    }
}

fn parse_inner_doc(value: &Value) -> Result<Predicate, Error> {
    let doc = value
        .as_document()
        .ok_or_else(|| Error::bad_value("expected a query document"))?;
    parse_filter(doc)
}

fn parse_predicate_array(value: &Value) -> Result<Vec<Predicate>, Error> {
    let arr = value
        .as_array()
        .ok_or_else(|| Error::bad_value("expected an array of query documents"))?;
    arr.iter().map(parse_inner_doc).collect()
}

fn parse_field_value(value: &Value) -> Result<FieldPredicate, Error> {
    if let Some(doc) = value.as_document() {
        let is_operator_doc = doc.keys().next().map(|k| k.starts_with('$')).unwrap_or(false);
        if is_operator_doc {
            return Ok(FieldPredicate::Ops(parse_operator_doc(doc)?));
        }
    }
    Ok(FieldPredicate::Eq(value.clone()))
}

fn parse_operator_doc(doc: &Document) -> Result<Vec<FieldOp>, Error> {
    doc.iter().map(|(k, v)| parse_field_op(k, v)).collect()
}

fn parse_field_op(key: &str, value: &Value) -> Result<FieldOp, Error> {
    match key {
        "$eq" => Ok(FieldOp::Eq(value.clone())),
        "$ne" => Ok(FieldOp::Ne(value.clone())),
        "$gt" => Ok(FieldOp::Gt(value.clone())),
        "$gte" => Ok(FieldOp::Gte(value.clone())),
        "$lt" => Ok(FieldOp::Lt(value.clone())),
        "$lte" => Ok(FieldOp::Lte(value.clone())),
        "$in" => Ok(FieldOp::In(array_arg(value, "$in")?)),
        "$nin" => Ok(FieldOp::Nin(array_arg(value, "$nin")?)),
        "$exists" => Ok(FieldOp::Exists(value.is_truthy())),
        "$type" => Ok(FieldOp::Type(
            value.as_str().ok_or_else(|| Error::bad_value("$type requires a string"))?.to_string(),
        )),
        "$regex" => {
            let (pattern, flags) = regex_operand(value, "")?;
            Ok(FieldOp::Regex(compile_regex(&pattern, &flags)?, flags))
        }
        "$options" => {
            // Handled together with a sibling $regex key; a lone
            // $options with no $regex is meaningless and rejected by
            // the caller that validates the whole operator document.
            Err(Error::bad_value("$options must accompany $regex"))
        }
        "$mod" => {
            let arr = array_arg(value, "$mod")?;
            if arr.len() != 2 {
                return Err(Error::bad_value("$mod requires an array of [divisor, remainder]"));
            }
            let divisor = arr[0].as_f64().ok_or_else(|| Error::bad_value("$mod divisor must be numeric"))? as i64;
            let remainder = arr[1].as_f64().ok_or_else(|| Error::bad_value("$mod remainder must be numeric"))? as i64;
            Ok(FieldOp::Mod(divisor, remainder))
        }
        "$size" => {
            let n = value.as_f64().ok_or_else(|| Error::bad_value("$size requires a numeric argument"))?;
            Ok(FieldOp::Size(n as i64))
        }
        "$all" => Ok(FieldOp::All(array_arg(value, "$all")?)),
        "$elemMatch" => {
            let doc = value
                .as_document()
                .ok_or_else(|| Error::bad_value("$elemMatch requires an object"))?;
            Ok(FieldOp::ElemMatch(doc.clone()))
        }
        "$not" => {
            let doc = value
                .as_document()
                .ok_or_else(|| Error::bad_value("$not requires an operator document"))?;
            let mut ops = parse_operator_doc(doc)?;
            if ops.len() != 1 {
                return Err(Error::bad_value("$not requires exactly one operator"));
            }
            Ok(FieldOp::Not(Box::new(ops.remove(0))))
        }
        other => Err(Error::new(
            ErrorCode::UnsupportedOperator,
            format!("unrecognized query operator '{other}'"),
        )),
    }
}

fn array_arg(value: &Value, op_name: &str) -> Result<Vec<Value>, Error> {
    value
        .as_array()
        .map(|a| a.to_vec())
        .ok_or_else(|| Error::bad_value(format!("{op_name} requires an array argument")))
}

fn regex_operand(value: &Value, default_flags: &str) -> Result<(String, String), Error> {
    match value {
        Value::Regex { pattern, flags } => Ok((pattern.clone(), flags.clone())),
        Value::String(s) => Ok((s.clone(), default_flags.to_string())),
        _ => Err(Error::bad_value("$regex requires a string or regex value")),
    }
}

fn compile_regex(pattern: &str, flags: &str) -> Result<Regex, Error> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            other => {
                return Err(Error::bad_value(format!("unsupported regex flag '{other}'")));
            }
        }
    }
    builder
        .build()
        .map_err(|e| Error::new(ErrorCode::BadValue, format!("invalid regex: {e}")))
}

/// Match a compiled predicate against a candidate document.
pub fn matches(pred: &Predicate, candidate: &Value) -> Result<MatchResult, Error> {
    match pred {
        Predicate::And(clauses) => {
            let mut position = None;
            for c in clauses {
                let r = matches(c, candidate)?;
                if !r.matched {
                    return Ok(MatchResult::no());
                }
                position = position.or(r.position);
            }
            Ok(MatchResult::yes(position))
        }
        Predicate::Or(clauses) => {
            for c in clauses {
                let r = matches(c, candidate)?;
                if r.matched {
                    return Ok(r);
                }
            }
            Ok(MatchResult::no())
        }
        Predicate::Nor(clauses) => {
            for c in clauses {
                if matches(c, candidate)?.matched {
                    return Ok(MatchResult::no());
                }
            }
            Ok(MatchResult::yes(None))
        }
        Predicate::Expr(expr) => {
            let scope = Scope::new(candidate);
            let result = eval(expr, &scope)?;
            Ok(if result.is_truthy() { MatchResult::yes(None) } else { MatchResult::no() })
        }
        Predicate::Where(_) | Predicate::Text(_) => Err(Error::new(
            ErrorCode::UnsupportedOperator,
            "this engine does not evaluate $where scripts or $text indexes",
        )),
        Predicate::Comment => Ok(MatchResult::yes(None)),
        Predicate::Field(path, pred) => {
            let value = get_collection_aware(candidate, path);
            field_matches(&value, pred)
        }
    }
}

fn field_matches(value: &Value, pred: &FieldPredicate) -> Result<MatchResult, Error> {
    match pred {
        FieldPredicate::Eq(literal) => Ok(match_eq(value, literal)),
        FieldPredicate::Ops(ops) => {
            let mut position = None;
            for op in ops {
                let r = op_matches(value, op)?;
                if !r.matched {
                    return Ok(MatchResult::no());
                }
                position = position.or(r.position);
            }
            Ok(MatchResult::yes(position))
        }
    }
}

fn match_eq(value: &Value, literal: &Value) -> MatchResult {
    if value.deep_eq(literal) {
        return MatchResult::yes(None);
    }
    if let Value::Array(arr) = value {
        if !matches!(literal, Value::Array(_)) {
            for (i, elem) in arr.iter().enumerate() {
                if elem.deep_eq(literal) {
                    return MatchResult::yes(Some(i));
                }
            }
        }
    }
    MatchResult::no()
}

/// Apply one comparison/array operator to a field's value, with array
/// fan-out: when the stored value is an array and the operator isn't
/// itself array-shaped (`$size`, `$all`, `$elemMatch`), any satisfying
/// element matches and its index becomes the positional match (spec
/// §4.4).
fn op_matches(value: &Value, op: &FieldOp) -> Result<MatchResult, Error> {
    match op {
        FieldOp::Eq(literal) => Ok(match_eq(value, literal)),
        FieldOp::Ne(literal) => Ok(MatchResult::yes(None).filter(!match_eq(value, literal).matched)),
        FieldOp::Gt(literal) => cmp_fanout(value, literal, |o| o == Ordering::Greater),
        FieldOp::Gte(literal) => cmp_fanout(value, literal, |o| o != Ordering::Less),
        FieldOp::Lt(literal) => cmp_fanout(value, literal, |o| o == Ordering::Less),
        FieldOp::Lte(literal) => cmp_fanout(value, literal, |o| o != Ordering::Greater),
        FieldOp::In(options) => {
            for opt in options {
                let r = match_eq(value, opt);
                if r.matched {
                    return Ok(r);
                }
            }
            Ok(MatchResult::no())
        }
        FieldOp::Nin(options) => {
            for opt in options {
                if match_eq(value, opt).matched {
                    return Ok(MatchResult::no());
                }
            }
            Ok(MatchResult::yes(None))
        }
        FieldOp::Exists(want) => Ok(MatchResult::yes(None).filter(!value.is_missing() == *want)),
        FieldOp::Type(type_name) => Ok(MatchResult::yes(None).filter(value.type_name() == type_name)),
        FieldOp::Regex(re, _flags) => regex_fanout(value, re),
        FieldOp::Mod(divisor, remainder) => {
            let n = value.as_f64().map(|f| f as i64);
            Ok(MatchResult::yes(None).filter(n.map(|n| n % divisor == *remainder).unwrap_or(false)))
        }
        FieldOp::Size(n) => {
            let len = value.as_array().map(|a| a.len() as i64);
            Ok(MatchResult::yes(None).filter(len == Some(*n)))
        }
        FieldOp::All(items) => {
            let arr = match value.as_array() {
                Some(a) => a,
                None => return Ok(MatchResult::no()),
            };
            let all_present = items.iter().all(|item| arr.iter().any(|e| e.deep_eq(item)));
            Ok(MatchResult::yes(None).filter(all_present))
        }
        FieldOp::ElemMatch(sub_doc) => elem_match(value, sub_doc),
        FieldOp::Not(inner) => {
            let r = op_matches(value, inner)?;
            Ok(MatchResult::yes(None).filter(!r.matched))
        }
    }
}

fn cmp_fanout(value: &Value, literal: &Value, accept: impl Fn(Ordering) -> bool) -> Result<MatchResult, Error> {
    if accept(value.cmp_canonical(literal)) {
        return Ok(MatchResult::yes(None));
    }
    if let Value::Array(arr) = value {
        for (i, elem) in arr.iter().enumerate() {
            if accept(elem.cmp_canonical(literal)) {
                return Ok(MatchResult::yes(Some(i)));
            }
        }
    }
    Ok(MatchResult::no())
}

fn regex_fanout(value: &Value, re: &Regex) -> Result<MatchResult, Error> {
    if let Some(s) = value.as_str() {
        if re.is_match(s) {
            return Ok(MatchResult::yes(None));
        }
    }
    if let Value::Array(arr) = value {
        for (i, elem) in arr.iter().enumerate() {
            if let Some(s) = elem.as_str() {
                if re.is_match(s) {
                    return Ok(MatchResult::yes(Some(i)));
                }
            }
        }
    }
    Ok(MatchResult::no())
}

/// `$elemMatch`: the array field's value must have at least one element
/// satisfying the sub-spec, either as a nested query document (against
/// Document elements) or an operator document (against scalar elements).
fn elem_match(value: &Value, sub_doc: &Document) -> Result<MatchResult, Error> {
    let arr = match value.as_array() {
        Some(a) => a,
        None => return Ok(MatchResult::no()),
    };
    let is_operator_doc = sub_doc.keys().next().map(|k| k.starts_with('$')).unwrap_or(false);
    for (i, elem) in arr.iter().enumerate() {
        let satisfied = if is_operator_doc {
            let ops = parse_operator_doc(sub_doc)?;
            let mut ok = true;
            for op in &ops {
                if !op_matches(elem, op)?.matched {
                    ok = false;
                    break;
                }
            }
            ok
        } else {
            let pred = parse_filter(sub_doc)?;
            matches(&pred, elem)?.matched
        };
        if satisfied {
            return Ok(MatchResult::yes(Some(i)));
        }
    }
    Ok(MatchResult::no())
}

impl MatchResult {
    fn filter(self, keep: bool) -> MatchResult {
        if keep { self } else { MatchResult::no() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwire_value::Document;

    fn doc(pairs: &[(&str, Value)]) -> Value {
        let mut d = Document::new();
        for (k, v) in pairs {
            d.insert(*k, v.clone());
        }
        Value::Document(d)
    }

    #[test]
    fn simple_equality_matches() {
        let query = doc(&[("a", Value::Int32(1))]);
        let candidate = doc(&[("a", Value::Int32(1))]);
        let pred = parse_filter(query.as_document().unwrap()).unwrap();
        assert!(matches(&pred, &candidate).unwrap().matched);
    }

    #[test]
    fn elem_match_records_positional_index() {
        let mut elem_spec = Document::new();
        elem_spec.insert("x", Value::Int32(1));
        let mut q = Document::new();
        let mut em = Document::new();
        em.insert("$elemMatch", Value::Document(elem_spec));
        q.insert("arr", Value::Document(em));

        let arr = Value::Array(vec![
            doc(&[("x", Value::Int32(0))]),
            doc(&[("x", Value::Int32(1))]),
            doc(&[("x", Value::Int32(1))]),
        ]);
        let candidate = doc(&[("arr", arr)]);

        let pred = parse_filter(&q).unwrap();
        let result = matches(&pred, &candidate).unwrap();
        assert!(result.matched);
        assert_eq!(result.position, Some(1));
    }

    #[test]
    fn gt_fans_out_over_array_elements() {
        let mut q = Document::new();
        let mut gt = Document::new();
        gt.insert("$gt", Value::Int32(5));
        q.insert("arr", Value::Document(gt));
        let candidate = doc(&[("arr", Value::Array(vec![Value::Int32(1), Value::Int32(9)]))]);
        let pred = parse_filter(&q).unwrap();
        let result = matches(&pred, &candidate).unwrap();
        assert!(result.matched);
        assert_eq!(result.position, Some(1));
    }

    #[test]
    fn dotted_path_fans_out_across_array_of_documents() {
        let mut q = Document::new();
        q.insert("items.sku", Value::String("x".into()));
        let items = Value::Array(vec![
            doc(&[("sku", Value::String("y".into()))]),
            doc(&[("sku", Value::String("x".into()))]),
        ]);
        let candidate = doc(&[("items", items)]);
        let pred = parse_filter(&q).unwrap();
        let result = matches(&pred, &candidate).unwrap();
        assert!(result.matched);
        assert_eq!(result.position, Some(1));
    }

    #[test]
    fn and_combinator_requires_every_clause() {
        let mut a = Document::new();
        a.insert("a", Value::Int32(1));
        let mut b = Document::new();
        b.insert("b", Value::Int32(2));
        let mut q = Document::new();
        q.insert("$and", Value::Array(vec![Value::Document(a), Value::Document(b)]));
        let candidate = doc(&[("a", Value::Int32(1)), ("b", Value::Int32(3))]);
        let pred = parse_filter(&q).unwrap();
        assert!(!matches(&pred, &candidate).unwrap().matched);
    }

    #[test]
    fn exists_false_matches_missing_field() {
        let mut exists = Document::new();
        exists.insert("$exists", Value::Bool(false));
        let mut q = Document::new();
        q.insert("missing_field", Value::Document(exists));
        let candidate = doc(&[("a", Value::Int32(1))]);
        let pred = parse_filter(&q).unwrap();
        assert!(matches(&pred, &candidate).unwrap().matched);
    }

    #[test]
    fn where_is_parsed_but_unsupported_at_match_time() {
        let mut q = Document::new();
        q.insert("$where", Value::String("this.a == 1".into()));
        let candidate = doc(&[("a", Value::Int32(1))]);
        let pred = parse_filter(&q).unwrap();
        let err = matches(&pred, &candidate).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedOperator);
    }
}
