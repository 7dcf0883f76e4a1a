//! Aggregation pipeline (spec §4.6 "Pipeline").
//!
//! A pipeline is a sequence of stage documents compiled once into
//! [`Stage`] and then run as a chain of iterator adapters. Stages that
//! can preserve laziness (`$match`, `$project`, `$addFields`, `$unwind`,
//! `$limit`, `$skip`) are implemented as iterator adapters with no
//! internal buffering; `$sort` and `$group` are blocking and collect
//! their upstream into a `Vec` before continuing, exactly as spec §4.6
//! requires.

use std::collections::HashMap;

use docwire_errors::{Error, ErrorCode};
use docwire_query::{eval, matches, parse_expr, parse_filter, Expr, Predicate, Scope};
use docwire_value::{get, set, Document, Path, Value};
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::projection::Projection;

pub type DocStream = Box<dyn Iterator<Item = Result<Value, Error>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(Expr),
    Avg(Expr),
    Min(Expr),
    Max(Expr),
    Push(Expr),
    AddToSet(Expr),
    First(Expr),
    Last(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenMatched {
    Replace,
    KeepExisting,
    Merge,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenNotMatched {
    Insert,
    Discard,
    Fail,
}

#[derive(Debug, Clone)]
pub struct MergeSpec {
    pub into: String,
    pub on: Vec<String>,
    pub when_matched: WhenMatched,
    pub when_not_matched: WhenNotMatched,
}

#[derive(Debug, Clone)]
pub enum Stage {
    Match(Predicate),
    Project(Projection),
    AddFields(Vec<(Path, Expr)>),
    Unwind {
        path: Path,
        preserve_null_and_empty_arrays: bool,
        include_array_index: Option<String>,
    },
    Group {
        key: Expr,
        accumulators: Vec<(String, Accumulator)>,
    },
    Sort(Vec<(Path, SortDirection)>),
    Limit(u64),
    Skip(u64),
    Count(String),
    Lookup {
        from: String,
        local_field: Path,
        foreign_field: Path,
        as_field: String,
    },
    Sample(u64),
    ReplaceRoot(Expr),
    ReplaceWith(Expr),
    Out(String),
    Merge(MergeSpec),
}

/// Cross-collection document source for `$lookup`. One call per stage
/// invocation; the returned documents are joined in memory.
pub trait LookupSource {
    fn documents(&self, from: &str) -> Result<Vec<Value>, Error>;
}

/// Cross-collection output for `$out`/`$merge`.
pub trait OutputSink {
    fn replace_collection(&self, name: &str, docs: Vec<Value>) -> Result<(), Error>;
    fn merge_documents(&self, name: &str, docs: Vec<Value>, spec: &MergeSpec) -> Result<(), Error>;
}

pub fn parse_pipeline(stages: &[Document]) -> Result<Vec<Stage>, Error> {
    stages.iter().map(parse_stage).collect()
}

fn only_entry(doc: &Document) -> Result<(&str, &Value), Error> {
    if doc.len() != 1 {
        return Err(Error::new(ErrorCode::FailedToParse, "a pipeline stage must have exactly one field"));
    }
    Ok(doc.iter().next().unwrap())
}

fn as_document<'a>(value: &'a Value, context: &str) -> Result<&'a Document, Error> {
    value
        .as_document()
        .ok_or_else(|| Error::new(ErrorCode::TypeMismatch, format!("{context} must be a document")))
}

fn as_str<'a>(value: &'a Value, context: &str) -> Result<&'a str, Error> {
    value
        .as_str()
        .ok_or_else(|| Error::new(ErrorCode::TypeMismatch, format!("{context} must be a string")))
}

fn as_u64(value: &Value, context: &str) -> Result<u64, Error> {
    match value.as_f64() {
        Some(n) if n >= 0.0 => Ok(n as u64),
        _ => Err(Error::new(ErrorCode::TypeMismatch, format!("{context} must be a non-negative number"))),
    }
}

pub fn parse_stage(doc: &Document) -> Result<Stage, Error> {
    let (name, value) = only_entry(doc)?;
    match name {
        "$match" => Ok(Stage::Match(parse_filter(as_document(value, "$match")?)?)),
        "$project" => Ok(Stage::Project(Projection::parse(as_document(value, "$project")?)?)),
        "$addFields" | "$set" => {
            let doc = as_document(value, name)?;
            let mut fields = Vec::with_capacity(doc.len());
            for (k, v) in doc.iter() {
                fields.push((Path::parse(k)?, parse_expr(v)?));
            }
            Ok(Stage::AddFields(fields))
        }
        "$unwind" => parse_unwind(value),
        "$group" => parse_group(as_document(value, "$group")?),
        "$sort" => parse_sort(as_document(value, "$sort")?),
        "$limit" => Ok(Stage::Limit(as_u64(value, "$limit")?)),
        "$skip" => Ok(Stage::Skip(as_u64(value, "$skip")?)),
        "$count" => Ok(Stage::Count(as_str(value, "$count")?.to_string())),
        "$lookup" => parse_lookup(as_document(value, "$lookup")?),
        "$sample" => {
            let doc = as_document(value, "$sample")?;
            let size = doc
                .get("size")
                .ok_or_else(|| Error::new(ErrorCode::FailedToParse, "$sample requires a size field"))?;
            Ok(Stage::Sample(as_u64(size, "$sample.size")?))
        }
        "$replaceRoot" => {
            let doc = as_document(value, "$replaceRoot")?;
            let new_root = doc
                .get("newRoot")
                .ok_or_else(|| Error::new(ErrorCode::FailedToParse, "$replaceRoot requires newRoot"))?;
            Ok(Stage::ReplaceRoot(parse_expr(new_root)?))
        }
        "$replaceWith" => Ok(Stage::ReplaceWith(parse_expr(value)?)),
        "$out" => Ok(Stage::Out(as_str(value, "$out")?.to_string())),
        "$merge" => parse_merge(value),
        other => Err(Error::new(ErrorCode::UnsupportedOperator, format!("unrecognized pipeline stage '{other}'"))),
    }
}

fn parse_unwind(value: &Value) -> Result<Stage, Error> {
    if let Some(s) = value.as_str() {
        let path = Path::parse(s.trim_start_matches('$'))?;
        return Ok(Stage::Unwind { path, preserve_null_and_empty_arrays: false, include_array_index: None });
    }
    let doc = as_document(value, "$unwind")?;
    let path_value = doc.get("path").ok_or_else(|| Error::new(ErrorCode::FailedToParse, "$unwind requires a path"))?;
    let path_str = as_str(path_value, "$unwind.path")?;
    let path = Path::parse(path_str.trim_start_matches('$'))?;
    let preserve = doc.get("preserveNullAndEmptyArrays").map(|v| v.is_truthy()).unwrap_or(false);
    let include_index = match doc.get("includeArrayIndex") {
        Some(v) => Some(as_str(v, "$unwind.includeArrayIndex")?.to_string()),
        None => None,
    };
    Ok(Stage::Unwind { path, preserve_null_and_empty_arrays: preserve, include_array_index: include_index })
}

fn parse_group(doc: &Document) -> Result<Stage, Error> {
    let id_value = doc.get("_id").ok_or_else(|| Error::new(ErrorCode::FailedToParse, "$group requires an _id expression"))?;
    let key = parse_expr(id_value)?;
    let mut accumulators = Vec::new();
    for (field, spec) in doc.iter() {
        if field == "_id" {
            continue;
        }
        let spec_doc = as_document(spec, &format!("$group.{field}"))?;
        let (acc_name, acc_value) = only_entry(spec_doc)?;
        let acc = match acc_name {
            "$sum" => Accumulator::Sum(parse_expr(acc_value)?),
            "$avg" => Accumulator::Avg(parse_expr(acc_value)?),
            "$min" => Accumulator::Min(parse_expr(acc_value)?),
            "$max" => Accumulator::Max(parse_expr(acc_value)?),
            "$push" => Accumulator::Push(parse_expr(acc_value)?),
            "$addToSet" => Accumulator::AddToSet(parse_expr(acc_value)?),
            "$first" => Accumulator::First(parse_expr(acc_value)?),
            "$last" => Accumulator::Last(parse_expr(acc_value)?),
            other => return Err(Error::new(ErrorCode::UnsupportedOperator, format!("unrecognized accumulator '{other}'"))),
        };
        accumulators.push((field.to_string(), acc));
    }
    Ok(Stage::Group { key, accumulators })
}

fn parse_sort(doc: &Document) -> Result<Stage, Error> {
    let mut keys = Vec::with_capacity(doc.len());
    for (field, dir) in doc.iter() {
        let n = dir.as_f64().ok_or_else(|| Error::new(ErrorCode::TypeMismatch, "$sort direction must be 1 or -1"))?;
        let direction = if n < 0.0 { SortDirection::Descending } else { SortDirection::Ascending };
        keys.push((Path::parse(field)?, direction));
    }
    Ok(Stage::Sort(keys))
}

fn parse_lookup(doc: &Document) -> Result<Stage, Error> {
    let from = as_str(doc.get("from").ok_or_else(|| missing("$lookup", "from"))?, "$lookup.from")?.to_string();
    let local_field = Path::parse(as_str(doc.get("localField").ok_or_else(|| missing("$lookup", "localField"))?, "$lookup.localField")?)?;
    let foreign_field =
        Path::parse(as_str(doc.get("foreignField").ok_or_else(|| missing("$lookup", "foreignField"))?, "$lookup.foreignField")?)?;
    let as_field = as_str(doc.get("as").ok_or_else(|| missing("$lookup", "as"))?, "$lookup.as")?.to_string();
    Ok(Stage::Lookup { from, local_field, foreign_field, as_field })
}

fn missing(stage: &str, field: &str) -> Error {
    Error::new(ErrorCode::FailedToParse, format!("{stage} requires a '{field}' field"))
}

fn parse_merge(value: &Value) -> Result<Stage, Error> {
    let (into, on, when_matched, when_not_matched) = if let Some(s) = value.as_str() {
        (s.to_string(), Vec::new(), WhenMatched::Merge, WhenNotMatched::Insert)
    } else {
        let doc = as_document(value, "$merge")?;
        let into = as_str(doc.get("into").ok_or_else(|| missing("$merge", "into"))?, "$merge.into")?.to_string();
        let on = match doc.get("on") {
            Some(Value::Array(items)) => items.iter().map(|v| v.as_str().unwrap_or_default().to_string()).collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        };
        let when_matched = match doc.get("whenMatched").and_then(|v| v.as_str()) {
            Some("replace") | None => WhenMatched::Replace,
            Some("keepExisting") => WhenMatched::KeepExisting,
            Some("merge") => WhenMatched::Merge,
            Some("fail") => WhenMatched::Fail,
            Some(other) => return Err(Error::new(ErrorCode::BadValue, format!("unrecognized whenMatched mode '{other}'"))),
        };
        let when_not_matched = match doc.get("whenNotMatched").and_then(|v| v.as_str()) {
            Some("insert") | None => WhenNotMatched::Insert,
            Some("discard") => WhenNotMatched::Discard,
            Some("fail") => WhenNotMatched::Fail,
            Some(other) => return Err(Error::new(ErrorCode::BadValue, format!("unrecognized whenNotMatched mode '{other}'"))),
        };
        (into, on, when_matched, when_not_matched)
    };
    Ok(Stage::Merge(MergeSpec { into, on, when_matched, when_not_matched }))
}

/// Run a pipeline over a source stream. Non-blocking stages chain as
/// plain iterator adapters; `$sort`, `$group`, `$count`, `$sample` drain
/// their upstream into a `Vec` first. `$out`/`$merge` are terminal: they
/// drain the stream, hand it to `sink`, and yield nothing further.
pub fn run_pipeline(
    source: DocStream,
    stages: &[Stage],
    lookup: Option<&dyn LookupSource>,
    sink: Option<&dyn OutputSink>,
) -> Result<DocStream, Error> {
    let mut stream = source;
    for stage in stages {
        stream = apply_stage(stream, stage, lookup, sink)?;
    }
    Ok(stream)
}

fn apply_stage(
    stream: DocStream,
    stage: &Stage,
    lookup: Option<&dyn LookupSource>,
    sink: Option<&dyn OutputSink>,
) -> Result<DocStream, Error> {
    match stage {
        Stage::Match(pred) => {
            let pred = pred.clone();
            Ok(Box::new(stream.filter_map(move |item| match item {
                Ok(doc) => match matches(&pred, &doc) {
                    Ok(res) if res.matched => Some(Ok(doc)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                },
                Err(e) => Some(Err(e)),
            })))
        }
        Stage::Project(projection) => {
            let projection = projection.clone();
            Ok(Box::new(stream.map(move |item| item.and_then(|doc| projection.apply(&doc)))))
        }
        Stage::AddFields(fields) => {
            let fields = fields.clone();
            Ok(Box::new(stream.map(move |item| {
                item.and_then(|doc| {
                    let mut out = doc.clone();
                    for (path, expr) in &fields {
                        let v = eval(expr, &Scope::new(&doc))?;
                        set(&mut out, path, v)?;
                    }
                    Ok(out)
                })
            })))
        }
        Stage::Unwind { path, preserve_null_and_empty_arrays, include_array_index } => {
            let path = path.clone();
            let preserve = *preserve_null_and_empty_arrays;
            let index_field = include_array_index.clone();
            Ok(Box::new(stream.flat_map(move |item| unwind_one(item, &path, preserve, &index_field))))
        }
        Stage::Sort(keys) => {
            let mut buffered: Vec<Value> = drain(stream)?;
            sort_documents(&mut buffered, keys)?;
            Ok(Box::new(buffered.into_iter().map(Ok)))
        }
        Stage::Limit(n) => {
            let n = *n;
            Ok(Box::new(stream.take(n as usize)))
        }
        Stage::Skip(n) => {
            let n = *n;
            Ok(Box::new(stream.skip(n as usize)))
        }
        Stage::Count(field_name) => {
            let count = drain(stream)?.len() as i64;
            let mut out = Document::new();
            out.insert(field_name.clone(), Value::Int64(count));
            Ok(Box::new(std::iter::once(Ok(Value::Document(out)))))
        }
        Stage::Group { key, accumulators } => {
            let buffered = drain(stream)?;
            let grouped = run_group(&buffered, key, accumulators)?;
            Ok(Box::new(grouped.into_iter().map(Ok)))
        }
        Stage::Lookup { from, local_field, foreign_field, as_field } => {
            let source = lookup.ok_or_else(|| Error::internal("$lookup requires a lookup source"))?;
            let foreign_docs = source.documents(from)?;
            let local_field = local_field.clone();
            let foreign_field = foreign_field.clone();
            let as_field = as_field.clone();
            Ok(Box::new(stream.map(move |item| {
                item.and_then(|doc| {
                    let local_value = get(&doc, &local_field);
                    let matches: Vec<Value> = foreign_docs
                        .iter()
                        .filter(|fdoc: &&Value| get(*fdoc, &foreign_field) == local_value)
                        .cloned()
                        .collect();
                    let mut out = doc;
                    set(&mut out, &Path::parse(&as_field)?, Value::Array(matches))?;
                    Ok(out)
                })
            })))
        }
        Stage::Sample(size) => {
            let mut buffered = drain(stream)?;
            buffered.shuffle(&mut thread_rng());
            buffered.truncate(*size as usize);
            Ok(Box::new(buffered.into_iter().map(Ok)))
        }
        Stage::ReplaceRoot(expr) | Stage::ReplaceWith(expr) => {
            let expr = expr.clone();
            Ok(Box::new(stream.map(move |item| {
                item.and_then(|doc| {
                    let new_root = eval(&expr, &Scope::new(&doc))?;
                    if new_root.as_document().is_none() {
                        return Err(Error::new(ErrorCode::TypeMismatch, "replacement document must be a document"));
                    }
                    Ok(new_root)
                })
            })))
        }
        Stage::Out(name) => {
            let sink = sink.ok_or_else(|| Error::internal("$out requires an output sink"))?;
            let docs = drain(stream)?;
            sink.replace_collection(name, docs)?;
            Ok(Box::new(std::iter::empty()))
        }
        Stage::Merge(spec) => {
            let sink = sink.ok_or_else(|| Error::internal("$merge requires an output sink"))?;
            let docs = drain(stream)?;
            sink.merge_documents(&spec.into, docs, spec)?;
            Ok(Box::new(std::iter::empty()))
        }
    }
}

fn drain(stream: DocStream) -> Result<Vec<Value>, Error> {
    stream.collect()
}

fn unwind_one(item: Result<Value, Error>, path: &Path, preserve: bool, index_field: &Option<String>) -> Vec<Result<Value, Error>> {
    let doc = match item {
        Ok(doc) => doc,
        Err(e) => return vec![Err(e)],
    };
    let value = get(&doc, path);
    match value {
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .enumerate()
            .map(|(i, elem)| {
                let mut out = doc.clone();
                let result = set(&mut out, path, elem.clone()).and_then(|_| {
                    if let Some(field) = index_field {
                        set(&mut out, &Path::parse(field)?, Value::Int64(i as i64))?;
                    }
                    Ok(out.clone())
                });
                result
            })
            .collect(),
        Value::Missing | Value::Null if preserve => vec![Ok(doc)],
        Value::Array(_) if preserve => vec![Ok(doc)],
        Value::Missing | Value::Null | Value::Array(_) => Vec::new(),
        _ => vec![Ok(doc)],
    }
}

fn sort_documents(docs: &mut [Value], keys: &[(Path, SortDirection)]) -> Result<(), Error> {
    docs.sort_by(|a, b| {
        for (path, direction) in keys {
            let va = get(a, path);
            let vb = get(b, path);
            let ordering = va.cmp_canonical(vb);
            let ordering = match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(())
}

fn run_group(docs: &[Value], key_expr: &Expr, accumulators: &[(String, Accumulator)]) -> Result<Vec<Value>, Error> {
    let mut order: Vec<Value> = Vec::new();
    let mut groups: HashMap<String, (Value, Vec<&Value>)> = HashMap::new();

    for doc in docs {
        let key = eval(key_expr, &Scope::new(doc))?;
        let marker = canonical_key(&key);
        let entry = groups.entry(marker.clone()).or_insert_with(|| {
            order.push(key.clone());
            (key.clone(), Vec::new())
        });
        entry.1.push(doc);
    }

    let mut output = Vec::with_capacity(order.len());
    for key in order {
        let marker = canonical_key(&key);
        let (_, members) = groups.remove(&marker).expect("group key was just inserted");
        let mut out = Document::new();
        out.insert("_id", key);
        for (field, acc) in accumulators {
            out.insert(field.clone(), run_accumulator(acc, &members)?);
        }
        output.push(Value::Document(out));
    }
    Ok(output)
}

fn canonical_key(v: &Value) -> String {
    format!("{v:?}")
}

fn run_accumulator(acc: &Accumulator, members: &[&Value]) -> Result<Value, Error> {
    match acc {
        Accumulator::Sum(expr) => {
            let mut total = 0.0_f64;
            let mut all_int = true;
            for doc in members {
                let v = eval(expr, &Scope::new(doc))?;
                if let Some(n) = v.as_f64() {
                    if !matches!(v, Value::Int32(_) | Value::Int64(_)) {
                        all_int = false;
                    }
                    total += n;
                }
            }
            Ok(if all_int { Value::Int64(total as i64) } else { Value::Double(total) })
        }
        Accumulator::Avg(expr) => {
            let mut total = 0.0_f64;
            let mut count = 0usize;
            for doc in members {
                let v = eval(expr, &Scope::new(doc))?;
                if let Some(n) = v.as_f64() {
                    total += n;
                    count += 1;
                }
            }
            Ok(if count == 0 { Value::Null } else { Value::Double(total / count as f64) })
        }
        Accumulator::Min(expr) => reduce_extremum(expr, members, std::cmp::Ordering::Less),
        Accumulator::Max(expr) => reduce_extremum(expr, members, std::cmp::Ordering::Greater),
        Accumulator::Push(expr) => {
            let mut out = Vec::with_capacity(members.len());
            for doc in members {
                out.push(eval(expr, &Scope::new(doc))?);
            }
            Ok(Value::Array(out))
        }
        Accumulator::AddToSet(expr) => {
            let mut out: Vec<Value> = Vec::new();
            for doc in members {
                let v = eval(expr, &Scope::new(doc))?;
                if !out.iter().any(|existing| existing == &v) {
                    out.push(v);
                }
            }
            Ok(Value::Array(out))
        }
        Accumulator::First(expr) => match members.first() {
            Some(doc) => eval(expr, &Scope::new(doc)),
            None => Ok(Value::Null),
        },
        Accumulator::Last(expr) => match members.last() {
            Some(doc) => eval(expr, &Scope::new(doc)),
            None => Ok(Value::Null),
        },
    }
}

fn reduce_extremum(expr: &Expr, members: &[&Value], want: std::cmp::Ordering) -> Result<Value, Error> {
    let mut best: Option<Value> = None;
    for doc in members {
        let v = eval(expr, &Scope::new(doc))?;
        best = match best {
            None => Some(v),
            Some(current) => {
                if v.cmp_canonical(&current) == want {
                    Some(v)
                } else {
                    Some(current)
                }
            }
        };
    }
    Ok(best.unwrap_or(Value::Null))
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

    fn stream(values: Vec<Value>) -> DocStream {
        Box::new(values.into_iter().map(Ok))
    }

    #[test]
    fn match_then_limit_is_lazy_and_short_circuits() {
        let mut match_spec = Document::new();
        match_spec.insert("a", Value::Int32(1));
        let stages = vec![Stage::Match(parse_filter(&match_spec).unwrap()), Stage::Limit(1)];
        let docs = vec![doc(&[("a", Value::Int32(1))]), doc(&[("a", Value::Int32(1))]), doc(&[("a", Value::Int32(2))])];
        let result: Vec<Value> = run_pipeline(stream(docs), &stages, None, None).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn unwind_emits_one_document_per_element() {
        let stages = vec![Stage::Unwind {
            path: Path::parse("tags").unwrap(),
            preserve_null_and_empty_arrays: false,
            include_array_index: None,
        }];
        let docs = vec![doc(&[("tags", Value::Array(vec![Value::Int32(1), Value::Int32(2)]))])];
        let result: Vec<Value> = run_pipeline(stream(docs), &stages, None, None).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(result.len(), 2);
        assert!(get(&result[0], &Path::parse("tags").unwrap()).deep_eq(&Value::Int32(1)));
        assert!(get(&result[1], &Path::parse("tags").unwrap()).deep_eq(&Value::Int32(2)));
    }

    #[test]
    fn unwind_drops_missing_unless_preserved() {
        let stages = vec![Stage::Unwind { path: Path::parse("tags").unwrap(), preserve_null_and_empty_arrays: false, include_array_index: None }];
        let docs = vec![doc(&[("a", Value::Int32(1))])];
        let result: Vec<Value> = run_pipeline(stream(docs), &stages, None, None).unwrap().map(|r| r.unwrap()).collect();
        assert!(result.is_empty());
    }

    #[test]
    fn group_sums_and_preserves_first_key_order() {
        let stages = vec![Stage::Group {
            key: parse_expr(&Value::String("$cat".into())).unwrap(),
            accumulators: vec![("total".to_string(), Accumulator::Sum(parse_expr(&Value::String("$n".into())).unwrap()))],
        }];
        let docs = vec![
            doc(&[("cat", Value::String("b".into())), ("n", Value::Int32(1))]),
            doc(&[("cat", Value::String("a".into())), ("n", Value::Int32(2))]),
            doc(&[("cat", Value::String("b".into())), ("n", Value::Int32(3))]),
        ];
        let result: Vec<Value> = run_pipeline(stream(docs), &stages, None, None).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(result.len(), 2);
        assert!(get(&result[0], &Path::parse("_id").unwrap()).deep_eq(&Value::String("b".into())));
        assert!(get(&result[0], &Path::parse("total").unwrap()).deep_eq(&Value::Int64(4)));
    }

    #[test]
    fn sort_is_stable_and_multi_key() {
        let stages = vec![Stage::Sort(vec![(Path::parse("a").unwrap(), SortDirection::Ascending)])];
        let docs = vec![
            doc(&[("a", Value::Int32(2)), ("tag", Value::String("x".into()))]),
            doc(&[("a", Value::Int32(1)), ("tag", Value::String("y".into()))]),
            doc(&[("a", Value::Int32(1)), ("tag", Value::String("z".into()))]),
        ];
        let result: Vec<Value> = run_pipeline(stream(docs), &stages, None, None).unwrap().map(|r| r.unwrap()).collect();
        assert!(get(&result[0], &Path::parse("tag").unwrap()).deep_eq(&Value::String("y".into())));
        assert!(get(&result[1], &Path::parse("tag").unwrap()).deep_eq(&Value::String("z".into())));
        assert!(get(&result[2], &Path::parse("tag").unwrap()).deep_eq(&Value::String("x".into())));
    }

    #[test]
    fn lookup_joins_on_equal_field() {
        struct FakeSource(Vec<Value>);
        impl LookupSource for FakeSource {
            fn documents(&self, _from: &str) -> Result<Vec<Value>, Error> {
                Ok(self.0.clone())
            }
        }
        let source = FakeSource(vec![doc(&[("ownerId", Value::Int32(1)), ("name", Value::String("widget".into()))])]);
        let stages = vec![Stage::Lookup {
            from: "items".to_string(),
            local_field: Path::parse("id").unwrap(),
            foreign_field: Path::parse("ownerId").unwrap(),
            as_field: "items".to_string(),
        }];
        let docs = vec![doc(&[("id", Value::Int32(1))])];
        let result: Vec<Value> = run_pipeline(stream(docs), &stages, Some(&source), None).unwrap().map(|r| r.unwrap()).collect();
        let items = get(&result[0], &Path::parse("items").unwrap());
        assert_eq!(items.as_array().map(|a| a.len()), Some(1));
    }

    #[test]
    fn count_stage_reports_total_seen() {
        let stages = vec![Stage::Count("n".to_string())];
        let docs = vec![doc(&[("a", Value::Int32(1))]), doc(&[("a", Value::Int32(2))])];
        let result: Vec<Value> = run_pipeline(stream(docs), &stages, None, None).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(result.len(), 1);
        assert!(get(&result[0], &Path::parse("n").unwrap()).deep_eq(&Value::Int64(2)));
    }
}
