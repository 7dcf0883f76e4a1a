//! Aggregation expression AST, parser, and evaluator (spec §4.3).
//!
//! Expressions are parsed once into a tagged tree, then evaluated against
//! many candidate documents — the same "parse once, evaluate many" shape
//! as the teacher's `slate_db::expression::Expression`, generalized from a
//! boolean predicate tree into a value-producing one.

use std::collections::HashMap;

use docwire_errors::{Error, ErrorCode};
use docwire_value::{get_collection_aware, Document, Path, Value};

/// A parsed aggregation expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    FieldPath(Path),
    Variable(String),
    Array(Vec<Expr>),
    /// A literal document whose values are themselves expressions.
    Document(Vec<(String, Expr)>),
    Op(Box<Op>),
}

#[derive(Debug, Clone)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone)]
pub enum Op {
    Abs(Expr),
    Add(Vec<Expr>),
    Multiply(Vec<Expr>),
    ArrayElemAt(Expr, Expr),
    Cond { if_: Expr, then: Expr, else_: Expr },
    IfNull(Vec<Expr>),
    Size(Expr),
    Concat(Vec<Expr>),
    Substr(Expr, Expr, Expr),
    ToLower(Expr),
    ToUpper(Expr),
    Let { vars: Vec<(String, Expr)>, inside: Expr },
    Map { input: Expr, as_: String, inside: Expr },
    Filter { input: Expr, as_: String, cond: Expr },
    Reduce { input: Expr, initial: Expr, inside: Expr },
    Switch { branches: Vec<(Expr, Expr)>, default: Option<Expr> },
    Cmp(CmpOp, Expr, Expr),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Expr),
    Year(Expr),
    Month(Expr),
    DayOfMonth(Expr),
    Type(Expr),
}

/// Parse a raw `Value` (as found in a pipeline stage or projection spec)
/// into an expression tree.
pub fn parse_expr(value: &Value) -> Result<Expr, Error> {
    match value {
        Value::String(s) if s.starts_with("$$") => Ok(Expr::Variable(s[2..].to_string())),
        Value::String(s) if s.starts_with('$') => {
            Ok(Expr::FieldPath(Path::parse(&s[1..])?))
        }
        Value::Array(items) => {
            let parsed: Result<Vec<Expr>, Error> = items.iter().map(parse_expr).collect();
            Ok(Expr::Array(parsed?))
        }
        Value::Document(doc) => parse_document(doc),
        scalar => Ok(Expr::Literal(scalar.clone())),
    }
}

fn parse_document(doc: &Document) -> Result<Expr, Error> {
    let operator_keys: Vec<&str> = doc.keys().filter(|k| k.starts_with('$')).collect();
    if operator_keys.is_empty() {
        let fields: Result<Vec<(String, Expr)>, Error> = doc
            .iter()
            .map(|(k, v)| Ok((k.to_string(), parse_expr(v)?)))
            .collect();
        return Ok(Expr::Document(fields?));
    }
    if operator_keys.len() != 1 || doc.len() != 1 {
        return Err(Error::new(
            ErrorCode::FailedToParse,
            "an object representing an expression must have exactly one field",
        ));
    }
    let op_name = operator_keys[0];
    let arg = doc.get(op_name).expect("key came from this document");
    parse_operator(op_name, arg)
}

fn args_array(arg: &Value, op_name: &str, expected: usize) -> Result<Vec<Value>, Error> {
    let arr = match arg {
        Value::Array(a) => a.clone(),
        other => vec![other.clone()],
    };
    if arr.len() != expected {
        return Err(Error::new(
            ErrorCode::BadValue,
            format!("{op_name} requires exactly {expected} argument(s), got {}", arr.len()),
        ));
    }
    Ok(arr)
}

fn parse_operator(name: &str, arg: &Value) -> Result<Expr, Error> {
    let op = match name {
        "$abs" => Op::Abs(parse_expr(arg)?),
        "$add" => Op::Add(parse_variadic(arg)?),
        "$multiply" => Op::Multiply(parse_variadic(arg)?),
        "$arrayElemAt" => {
            let a = args_array(arg, name, 2)?;
            Op::ArrayElemAt(parse_expr(&a[0])?, parse_expr(&a[1])?)
        }
        "$cond" => return parse_cond(arg),
        "$ifNull" => Op::IfNull(parse_variadic(arg)?),
        "$size" => Op::Size(parse_expr(arg)?),
        "$concat" => Op::Concat(parse_variadic(arg)?),
        "$substr" | "$substrBytes" => {
            let a = args_array(arg, name, 3)?;
            Op::Substr(parse_expr(&a[0])?, parse_expr(&a[1])?, parse_expr(&a[2])?)
        }
        "$toLower" => Op::ToLower(parse_expr(arg)?),
        "$toUpper" => Op::ToUpper(parse_expr(arg)?),
        "$literal" => return Ok(Expr::Literal(arg.clone())),
        "$let" => return parse_let(arg),
        "$map" => return parse_map(arg),
        "$filter" => return parse_filter_expr(arg),
        "$reduce" => return parse_reduce(arg),
        "$switch" => return parse_switch(arg),
        "$eq" => return parse_cmp(CmpOp::Eq, arg),
        "$ne" => return parse_cmp(CmpOp::Ne, arg),
        "$gt" => return parse_cmp(CmpOp::Gt, arg),
        "$gte" => return parse_cmp(CmpOp::Gte, arg),
        "$lt" => return parse_cmp(CmpOp::Lt, arg),
        "$lte" => return parse_cmp(CmpOp::Lte, arg),
        "$and" => Op::And(parse_variadic(arg)?),
        "$or" => Op::Or(parse_variadic(arg)?),
        "$not" => Op::Not(parse_expr(single_arg(arg))?),
        "$year" => Op::Year(parse_expr(arg)?),
        "$month" => Op::Month(parse_expr(arg)?),
        "$dayOfMonth" => Op::DayOfMonth(parse_expr(arg)?),
        "$type" => Op::Type(parse_expr(arg)?),
        other => {
            return Err(Error::new(
                ErrorCode::UnsupportedOperator,
                format!("unrecognized expression operator '{other}'"),
            ))
        }
    };
    Ok(Expr::Op(Box::new(op)))
}

fn single_arg(arg: &Value) -> &Value {
    match arg {
        Value::Array(a) if a.len() == 1 => &a[0],
        other => other,
    }
}

fn parse_variadic(arg: &Value) -> Result<Vec<Expr>, Error> {
    match arg {
        Value::Array(items) => items.iter().map(parse_expr).collect(),
        other => Ok(vec![parse_expr(other)?]),
    }
}

fn parse_cmp(op: CmpOp, arg: &Value) -> Result<Expr, Error> {
    let a = args_array(arg, "comparison operator", 2)?;
    Ok(Expr::Op(Box::new(Op::Cmp(op, parse_expr(&a[0])?, parse_expr(&a[1])?))))
}

fn parse_cond(arg: &Value) -> Result<Expr, Error> {
    let (if_, then, else_) = match arg {
        Value::Array(a) if a.len() == 3 => (a[0].clone(), a[1].clone(), a[2].clone()),
        Value::Document(d) => {
            let get = |k: &str| {
                d.get(k)
                    .cloned()
                    .ok_or_else(|| Error::bad_value(format!("$cond is missing '{k}'")))
            };
            (get("if")?, get("then")?, get("else")?)
        }
        _ => return Err(Error::bad_value("$cond requires 3 arguments or an {if,then,else} object")),
    };
    Ok(Expr::Op(Box::new(Op::Cond {
        if_: parse_expr(&if_)?,
        then: parse_expr(&then)?,
        else_: parse_expr(&else_)?,
    })))
}

fn parse_let(arg: &Value) -> Result<Expr, Error> {
    let doc = as_document(arg, "$let")?;
    let vars_doc = doc
        .get("vars")
        .and_then(Value::as_document)
        .ok_or_else(|| Error::bad_value("$let requires a 'vars' document"))?;
    let in_expr = doc.get("in").ok_or_else(|| Error::bad_value("$let requires an 'in' expression"))?;
    let vars: Result<Vec<(String, Expr)>, Error> = vars_doc
        .iter()
        .map(|(k, v)| Ok((k.to_string(), parse_expr(v)?)))
        .collect();
    Ok(Expr::Op(Box::new(Op::Let {
        vars: vars?,
        inside: parse_expr(in_expr)?,
    })))
}

fn parse_map(arg: &Value) -> Result<Expr, Error> {
    let doc = as_document(arg, "$map")?;
    let input = doc.get("input").ok_or_else(|| Error::bad_value("$map requires 'input'"))?;
    let as_ = doc
        .get("as")
        .and_then(Value::as_str)
        .unwrap_or("this")
        .to_string();
    let in_expr = doc.get("in").ok_or_else(|| Error::bad_value("$map requires 'in'"))?;
    Ok(Expr::Op(Box::new(Op::Map {
        input: parse_expr(input)?,
        as_,
        inside: parse_expr(in_expr)?,
    })))
}

fn parse_filter_expr(arg: &Value) -> Result<Expr, Error> {
    let doc = as_document(arg, "$filter")?;
    let input = doc.get("input").ok_or_else(|| Error::bad_value("$filter requires 'input'"))?;
    let as_ = doc
        .get("as")
        .and_then(Value::as_str)
        .unwrap_or("this")
        .to_string();
    let cond = doc.get("cond").ok_or_else(|| Error::bad_value("$filter requires 'cond'"))?;
    Ok(Expr::Op(Box::new(Op::Filter {
        input: parse_expr(input)?,
        as_,
        cond: parse_expr(cond)?,
    })))
}

fn parse_reduce(arg: &Value) -> Result<Expr, Error> {
    let doc = as_document(arg, "$reduce")?;
    let input = doc.get("input").ok_or_else(|| Error::bad_value("$reduce requires 'input'"))?;
    let initial = doc
        .get("initialValue")
        .ok_or_else(|| Error::bad_value("$reduce requires 'initialValue'"))?;
    let in_expr = doc.get("in").ok_or_else(|| Error::bad_value("$reduce requires 'in'"))?;
    Ok(Expr::Op(Box::new(Op::Reduce {
        input: parse_expr(input)?,
        initial: parse_expr(initial)?,
        inside: parse_expr(in_expr)?,
    })))
}

fn parse_switch(arg: &Value) -> Result<Expr, Error> {
    let doc = as_document(arg, "$switch")?;
    let branches_val = doc
        .get("branches")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::bad_value("$switch requires a 'branches' array"))?;
    let mut branches = Vec::with_capacity(branches_val.len());
    for branch in branches_val {
        let b = as_document(branch, "$switch branch")?;
        let case = b.get("case").ok_or_else(|| Error::bad_value("$switch branch requires 'case'"))?;
        let then = b.get("then").ok_or_else(|| Error::bad_value("$switch branch requires 'then'"))?;
        branches.push((parse_expr(case)?, parse_expr(then)?));
    }
    let default = doc.get("default").map(parse_expr).transpose()?;
    Ok(Expr::Op(Box::new(Op::Switch { branches, default })))
}

fn as_document<'a>(value: &'a Value, op_name: &str) -> Result<&'a Document, Error> {
    value
        .as_document()
        .ok_or_else(|| Error::bad_value(format!("{op_name} requires an object argument")))
}

/// The variable-scope stack the evaluator threads through `$let`/`$map`/
/// `$filter`/`$reduce` (spec §9 "the evaluator then runs against a
/// variable-scope stack").
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    root: &'a Value,
    vars: HashMap<String, Value>,
}

impl<'a> Scope<'a> {
    pub fn new(root: &'a Value) -> Self {
        Scope { root, vars: HashMap::new() }
    }

    fn bind(&self, name: &str, value: Value) -> Scope<'a> {
        let mut vars = self.vars.clone();
        vars.insert(name.to_string(), value);
        Scope { root: self.root, vars }
    }

    fn lookup_variable(&self, name: &str) -> Result<Value, Error> {
        match name {
            "ROOT" | "CURRENT" => Ok(self.root.clone()),
            other => self.vars.get(other).cloned().ok_or_else(|| {
                Error::bad_value(format!("Use of undefined variable: {other}"))
            }),
        }
    }
}

/// Evaluate a parsed expression against a scope (spec §4.3).
pub fn eval(expr: &Expr, scope: &Scope) -> Result<Value, Error> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::FieldPath(p) => Ok(get_collection_aware(scope.root, p)),
        Expr::Variable(name) => scope.lookup_variable(name),
        Expr::Array(items) => {
            let values: Result<Vec<Value>, Error> = items.iter().map(|e| eval(e, scope)).collect();
            Ok(Value::Array(values?))
        }
        Expr::Document(fields) => {
            let mut doc = Document::new();
            for (k, e) in fields {
                doc.insert(k.clone(), eval(e, scope)?);
            }
            Ok(Value::Document(doc))
        }
        Expr::Op(op) => eval_op(op, scope),
    }
}

fn numeric(v: &Value, op_name: &str) -> Result<f64, Error> {
    v.as_f64()
        .ok_or_else(|| Error::new(ErrorCode::TypeMismatch, format!("{op_name} only supports numeric types")))
}

fn eval_op(op: &Op, scope: &Scope) -> Result<Value, Error> {
    match op {
        Op::Abs(e) => {
            let v = eval(e, scope)?;
            if v.is_null() || v.is_missing() {
                return Ok(v);
            }
            let n = numeric(&v, "$abs")?;
            Ok(widen_like(&v, n.abs()))
        }
        Op::Add(items) => {
            let mut acc = 0.0f64;
            let mut any_double = false;
            for e in items {
                let v = eval(e, scope)?;
                if v.is_null() || v.is_missing() {
                    return Ok(Value::Null);
                }
                if matches!(v, Value::Double(_)) {
                    any_double = true;
                }
                acc += numeric(&v, "$add")?;
            }
            Ok(if any_double { Value::Double(acc) } else { Value::Int64(acc as i64) })
        }
        Op::Multiply(items) => {
            let mut acc = 1.0f64;
            let mut any_double = false;
            for e in items {
                let v = eval(e, scope)?;
                if v.is_null() || v.is_missing() {
                    return Ok(Value::Null);
                }
                if matches!(v, Value::Double(_)) {
                    any_double = true;
                }
                acc *= numeric(&v, "$multiply")?;
            }
            Ok(if any_double { Value::Double(acc) } else { Value::Int64(acc as i64) })
        }
        Op::ArrayElemAt(arr_e, idx_e) => {
            let arr = eval(arr_e, scope)?;
            let idx = eval(idx_e, scope)?;
            let arr = match arr.as_array() {
                Some(a) => a,
                None => return Ok(Value::Missing),
            };
            let i = idx.as_f64().ok_or_else(|| Error::bad_value("$arrayElemAt index must be numeric"))? as i64;
            let resolved = if i < 0 { arr.len() as i64 + i } else { i };
            if resolved < 0 || resolved as usize >= arr.len() {
                Ok(Value::Missing)
            } else {
                Ok(arr[resolved as usize].clone())
            }
        }
        Op::Cond { if_, then, else_ } => {
            if eval(if_, scope)?.is_truthy() {
                eval(then, scope)
            } else {
                eval(else_, scope)
            }
        }
        Op::IfNull(items) => {
            for (i, e) in items.iter().enumerate() {
                let v = eval(e, scope)?;
                if !v.is_null() && !v.is_missing() || i == items.len() - 1 {
                    return Ok(v);
                }
            }
            Ok(Value::Null)
        }
        Op::Size(e) => {
            let v = eval(e, scope)?;
            match v.as_array() {
                Some(a) => Ok(Value::Int64(a.len() as i64)),
                None => Err(Error::new(ErrorCode::TypeMismatch, "$size requires an array")),
            }
        }
        Op::Concat(items) => {
            let mut out = String::new();
            for e in items {
                let v = eval(e, scope)?;
                if v.is_null() || v.is_missing() {
                    return Ok(Value::Null);
                }
                match v.as_str() {
                    Some(s) => out.push_str(s),
                    None => return Err(Error::new(ErrorCode::TypeMismatch, "$concat only supports strings")),
                }
            }
            Ok(Value::String(out))
        }
        Op::Substr(s_e, start_e, len_e) => {
            let s = eval(s_e, scope)?;
            let s = s.as_str().ok_or_else(|| Error::new(ErrorCode::TypeMismatch, "$substr requires a string"))?;
            let start = numeric(&eval(start_e, scope)?, "$substr")? as usize;
            let len = numeric(&eval(len_e, scope)?, "$substr")? as usize;
            let chars: Vec<char> = s.chars().collect();
            let end = (start + len).min(chars.len());
            if start >= chars.len() {
                Ok(Value::String(String::new()))
            } else {
                Ok(Value::String(chars[start..end].iter().collect()))
            }
        }
        Op::ToLower(e) => Ok(Value::String(string_arg(e, scope, "$toLower")?.to_lowercase())),
        Op::ToUpper(e) => Ok(Value::String(string_arg(e, scope, "$toUpper")?.to_uppercase())),
        Op::Let { vars, inside } => {
            let mut inner = scope.clone();
            for (name, e) in vars {
                let v = eval(e, &inner)?;
                inner = inner.bind(name, v);
            }
            eval(inside, &inner)
        }
        Op::Map { input, as_, inside } => {
            let arr = eval(input, scope)?;
            let arr = match arr.as_array() {
                Some(a) => a.to_vec(),
                None if arr.is_null() || arr.is_missing() => return Ok(Value::Null),
                None => return Err(Error::new(ErrorCode::TypeMismatch, "$map requires an array input")),
            };
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                let inner = scope.bind(as_, item);
                out.push(eval(inside, &inner)?);
            }
            Ok(Value::Array(out))
        }
        Op::Filter { input, as_, cond } => {
            let arr = eval(input, scope)?;
            let arr = match arr.as_array() {
                Some(a) => a.to_vec(),
                None if arr.is_null() || arr.is_missing() => return Ok(Value::Null),
                None => return Err(Error::new(ErrorCode::TypeMismatch, "$filter requires an array input")),
            };
            let mut out = Vec::new();
            for item in arr {
                let inner = scope.bind(as_, item.clone());
                if eval(cond, &inner)?.is_truthy() {
                    out.push(item);
                }
            }
            Ok(Value::Array(out))
        }
        Op::Reduce { input, initial, inside } => {
            let arr = eval(input, scope)?;
            let arr = match arr.as_array() {
                Some(a) => a.to_vec(),
                None if arr.is_null() || arr.is_missing() => return Ok(Value::Null),
                None => return Err(Error::new(ErrorCode::TypeMismatch, "$reduce requires an array input")),
            };
            let mut acc = eval(initial, scope)?;
            for item in arr {
                let inner = scope.bind("this", item).bind("value", acc);
                acc = eval(inside, &inner)?;
            }
            Ok(acc)
        }
        Op::Switch { branches, default } => {
            for (case, then) in branches {
                if eval(case, scope)?.is_truthy() {
                    return eval(then, scope);
                }
            }
            match default {
                Some(d) => eval(d, scope),
                None => Err(Error::bad_value("$switch has no default and no branch matched")),
            }
        }
        Op::Cmp(cmp_op, a_e, b_e) => {
            let a = eval(a_e, scope)?;
            let b = eval(b_e, scope)?;
            let ord = a.cmp_canonical(&b);
            use std::cmp::Ordering::*;
            let result = match cmp_op {
                CmpOp::Eq => a.deep_eq(&b),
                CmpOp::Ne => !a.deep_eq(&b),
                CmpOp::Gt => ord == Greater,
                CmpOp::Gte => ord != Less,
                CmpOp::Lt => ord == Less,
                CmpOp::Lte => ord != Greater,
            };
            Ok(Value::Bool(result))
        }
        Op::And(items) => {
            for e in items {
                if !eval(e, scope)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Op::Or(items) => {
            for e in items {
                if eval(e, scope)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Op::Not(e) => Ok(Value::Bool(!eval(e, scope)?.is_truthy())),
        Op::Year(e) => date_part(e, scope, |days| civil_from_days(days).0),
        Op::Month(e) => date_part(e, scope, |days| civil_from_days(days).1 as i64),
        Op::DayOfMonth(e) => date_part(e, scope, |days| civil_from_days(days).2 as i64),
        Op::Type(e) => Ok(Value::String(eval(e, scope)?.type_name().to_string())),
    }
}

fn string_arg(e: &Expr, scope: &Scope, op_name: &str) -> Result<String, Error> {
    let v = eval(e, scope)?;
    v.as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| Error::new(ErrorCode::TypeMismatch, format!("{op_name} requires a string")))
}

fn widen_like(original: &Value, n: f64) -> Value {
    match original {
        Value::Int32(_) | Value::Int64(_) if n.fract() == 0.0 => Value::Int64(n as i64),
        _ => Value::Double(n),
    }
}

fn date_part(e: &Expr, scope: &Scope, f: impl Fn(i64) -> i64) -> Result<Value, Error> {
    let v = eval(e, scope)?;
    match v {
        Value::Date(millis) => Ok(Value::Int32(f(millis.div_euclid(86_400_000)) as i32)),
        _ => Err(Error::new(ErrorCode::TypeMismatch, "date operator requires a Date value")),
    }
}

/// Civil (year, month, day) from a days-since-epoch count, Howard
/// Hinnant's well-known algorithm; avoids pulling in a calendar crate
/// for three read-only accessors.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwire_value::Document;

    fn eval_str(expr_json: Value, root: &Value) -> Result<Value, Error> {
        let expr = parse_expr(&expr_json)?;
        eval(&expr, &Scope::new(root))
    }

    #[test]
    fn abs_of_field_reference() {
        let mut root = Document::new();
        root.insert("c", Value::Int32(-30));
        let root = Value::Document(root);
        let mut spec = Document::new();
        spec.insert("$abs", Value::String("$c".into()));
        let result = eval_str(Value::Document(spec), &root).unwrap();
        assert!(result.deep_eq(&Value::Int64(30)));
    }

    #[test]
    fn array_elem_at_with_negative_index() {
        let root = Value::Document(Document::new());
        let mut spec = Document::new();
        spec.insert(
            "$arrayElemAt",
            Value::Array(vec![
                Value::Array(vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]),
                Value::Int32(-1),
            ]),
        );
        let result = eval_str(Value::Document(spec), &root).unwrap();
        assert!(result.deep_eq(&Value::Int32(3)));
    }

    #[test]
    fn map_binds_as_variable_per_element() {
        let root = Value::Document(Document::new());
        let mut spec = Document::new();
        let mut map_doc = Document::new();
        map_doc.insert("input", Value::Array(vec![Value::Int32(1), Value::Int32(2)]));
        map_doc.insert("as", Value::String("x".into()));
        let mut add_doc = Document::new();
        add_doc.insert("$add", Value::Array(vec![Value::String("$$x".into()), Value::Int32(10)]));
        map_doc.insert("in", Value::Document(add_doc));
        spec.insert("$map", Value::Document(map_doc));
        let result = eval_str(Value::Document(spec), &root).unwrap();
        assert!(result.deep_eq(&Value::Array(vec![Value::Int64(11), Value::Int64(12)])));
    }

    #[test]
    fn switch_falls_through_to_default() {
        let root = Value::Document(Document::new());
        let mut spec = Document::new();
        let mut switch_doc = Document::new();
        let mut branch = Document::new();
        branch.insert("case", Value::Bool(false));
        branch.insert("then", Value::Int32(1));
        switch_doc.insert("branches", Value::Array(vec![Value::Document(branch)]));
        switch_doc.insert("default", Value::Int32(99));
        spec.insert("$switch", Value::Document(switch_doc));
        let result = eval_str(Value::Document(spec), &root).unwrap();
        assert!(result.deep_eq(&Value::Int32(99)));
    }

    #[test]
    fn unrecognized_operator_is_rejected() {
        let mut spec = Document::new();
        spec.insert("$bogus", Value::Int32(1));
        let err = parse_expr(&Value::Document(spec)).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedOperator);
    }
}
