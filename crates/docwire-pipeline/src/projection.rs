//! Projection (spec §4.6 "Projection").
//!
//! A projection spec compiles once into a field-spec tree keyed by
//! dotted path fragment, then applies to many candidate documents — the
//! same parse-once shape as the matcher and expression evaluator (spec
//! §9).

use docwire_errors::{Error, ErrorCode};
use docwire_query::{eval, parse_expr, Expr, Scope};
use docwire_value::{Document, Fragment, Path, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Inclusion,
    Exclusion,
}

#[derive(Debug, Clone)]
enum FieldSpecKind {
    Toggle(bool),
    Computed(Expr),
}

#[derive(Debug, Clone, Default)]
struct SpecNode {
    kind: Option<FieldSpecKind>,
    children: Vec<(String, SpecNode)>,
}

impl SpecNode {
    fn child_mut(&mut self, name: &str) -> &mut SpecNode {
        if let Some(idx) = self.children.iter().position(|(k, _)| k == name) {
            &mut self.children[idx].1
        } else {
            self.children.push((name.to_string(), SpecNode::default()));
            &mut self.children.last_mut().unwrap().1
        }
    }
}

#[derive(Debug, Clone)]
pub struct Projection {
    mode: Mode,
    tree: SpecNode,
}

impl Projection {
    pub fn parse(spec: &Document) -> Result<Projection, Error> {
        if spec.is_empty() {
            return Err(Error::new(
                ErrorCode::EmptyProjectionSpec,
                "specification must have at least one field",
            ));
        }

        let mut entries: Vec<(Path, FieldSpecKind)> = Vec::with_capacity(spec.len());
        for (key, value) in spec.iter() {
            let path = Path::parse(key)?;
            let kind = match toggle_value(value) {
                Some(b) => FieldSpecKind::Toggle(b),
                None => FieldSpecKind::Computed(parse_expr(value)?),
            };
            entries.push((path, kind));
        }

        let is_bare_id = |path: &Path| {
            path.fragments().len() == 1 && matches!(&path.fragments()[0], Fragment::Name(n) if n == "_id")
        };

        let has_inclusion_or_computed = entries.iter().any(|(path, kind)| {
            !is_bare_id(path) && matches!(kind, FieldSpecKind::Toggle(true) | FieldSpecKind::Computed(_))
        });
        let has_exclusion = entries
            .iter()
            .any(|(path, kind)| !is_bare_id(path) && matches!(kind, FieldSpecKind::Toggle(false)));

        if has_inclusion_or_computed && has_exclusion {
            return Err(Error::new(
                ErrorCode::BadValue,
                "projection cannot mix inclusion and exclusion, except for excluding _id",
            ));
        }

        let mode = if has_inclusion_or_computed { Mode::Inclusion } else { Mode::Exclusion };

        let explicit_id = entries.iter().any(|(path, _)| is_bare_id(path));
        if !explicit_id && mode == Mode::Inclusion {
            entries.push((Path::parse("_id")?, FieldSpecKind::Toggle(true)));
        }

        let mut tree = SpecNode::default();
        for (path, kind) in entries {
            insert_path(&mut tree, path.fragments(), kind);
        }

        Ok(Projection { mode, tree })
    }

    pub fn apply(&self, doc: &Value) -> Result<Value, Error> {
        match self.mode {
            Mode::Inclusion => include_value(doc, &self.tree, doc),
            Mode::Exclusion => Ok(exclude_value(doc, &self.tree)),
        }
    }
}

fn insert_path(node: &mut SpecNode, fragments: &[Fragment], kind: FieldSpecKind) {
    match fragments.split_first() {
        None => node.kind = Some(kind),
        Some((Fragment::Name(name), rest)) => insert_path(node.child_mut(name), rest, kind),
        Some((Fragment::Index(i), rest)) => insert_path(node.child_mut(&i.to_string()), rest, kind),
        Some(_) => {}
    }
}

fn toggle_value(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Int32(0) => Some(false),
        Value::Int32(_) => Some(true),
        Value::Int64(0) => Some(false),
        Value::Int64(_) => Some(true),
        Value::Double(d) if *d == 0.0 => Some(false),
        Value::Double(_) => Some(true),
        _ => None,
    }
}

fn include_value(value: &Value, node: &SpecNode, root: &Value) -> Result<Value, Error> {
    if let Some(kind) = &node.kind {
        if node.children.is_empty() {
            return match kind {
                FieldSpecKind::Toggle(true) => Ok(value.clone()),
                FieldSpecKind::Toggle(false) => Ok(Value::Missing),
                FieldSpecKind::Computed(expr) => eval(expr, &Scope::new(root)),
            };
        }
    }
    match value {
        Value::Document(d) => {
            let mut out = Document::new();
            for (key, child) in &node.children {
                let sub = d.get(key).cloned().unwrap_or(Value::Missing);
                if sub.is_missing() && !matches!(child.kind, Some(FieldSpecKind::Computed(_))) && child.children.is_empty() {
                    continue;
                }
                let projected = include_value(&sub, child, root)?;
                if !projected.is_missing() {
                    out.insert(key.clone(), projected);
                }
            }
            Ok(Value::Document(out))
        }
        Value::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for elem in arr {
                out.push(include_value(elem, node, root)?);
            }
            Ok(Value::Array(out))
        }
        Value::Missing => Ok(Value::Missing),
        _ => Ok(Value::Missing),
    }
}

fn exclude_value(value: &Value, node: &SpecNode) -> Value {
    if let Some(FieldSpecKind::Toggle(false)) = &node.kind {
        if node.children.is_empty() {
            return Value::Missing;
        }
    }
    match value {
        Value::Document(d) => {
            let mut out = Document::new();
            for (k, v) in d.iter() {
                match node.children.iter().find(|(ck, _)| ck == k) {
                    Some((_, child)) => {
                        let projected = exclude_value(v, child);
                        if !projected.is_missing() {
                            out.insert(k.to_string(), projected);
                        }
                    }
                    None => out.insert(k.to_string(), v.clone()),
                };
            }
            Value::Document(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(|e| exclude_value(e, node)).collect()),
        other => other.clone(),
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
    fn inclusion_with_computed_field_excludes_id() {
        let mut spec = Document::new();
        spec.insert("_id", Value::Int32(0));
        let mut abs_doc = Document::new();
        abs_doc.insert("$abs", Value::String("$c".into()));
        spec.insert("x", Value::Document(abs_doc));
        spec.insert("b", Value::Int32(1));

        let candidate = Value::Document(doc(&[
            ("_id", Value::Int32(1)),
            ("a", Value::Int32(10)),
            ("b", Value::Int32(20)),
            ("c", Value::Int32(-30)),
        ]));

        let projection = Projection::parse(&spec).unwrap();
        let result = projection.apply(&candidate).unwrap();
        let expected = Value::Document(doc(&[("x", Value::Int64(30)), ("b", Value::Int32(20))]));
        assert!(result.deep_eq(&expected));
    }

    #[test]
    fn nested_exclusion_fans_out_over_array() {
        let mut spec = Document::new();
        spec.insert("x.b", Value::Int32(0));

        let arr = Value::Array(vec![
            Value::Document(doc(&[("a", Value::Int32(1)), ("b", Value::Int32(2)), ("c", Value::Int32(3))])),
            Value::Document(doc(&[("a", Value::Int32(2))])),
        ]);
        let candidate = Value::Document(doc(&[("_id", Value::Int32(1)), ("x", arr)]));

        let projection = Projection::parse(&spec).unwrap();
        let result = projection.apply(&candidate).unwrap();

        let expected_arr = Value::Array(vec![
            Value::Document(doc(&[("a", Value::Int32(1)), ("c", Value::Int32(3))])),
            Value::Document(doc(&[("a", Value::Int32(2))])),
        ]);
        let expected = Value::Document(doc(&[("_id", Value::Int32(1)), ("x", expected_arr)]));
        assert!(result.deep_eq(&expected));
    }

    #[test]
    fn empty_spec_is_rejected() {
        let spec = Document::new();
        let err = Projection::parse(&spec).unwrap_err();
        assert_eq!(err.code, ErrorCode::EmptyProjectionSpec);
    }

    #[test]
    fn mixing_inclusion_and_exclusion_rejected() {
        let mut spec = Document::new();
        spec.insert("a", Value::Int32(1));
        spec.insert("b", Value::Int32(0));
        let err = Projection::parse(&spec).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadValue);
    }

    #[test]
    fn exclusion_only_keeps_id_by_default() {
        let mut spec = Document::new();
        spec.insert("a", Value::Int32(0));
        let candidate = Value::Document(doc(&[("_id", Value::Int32(1)), ("a", Value::Int32(1)), ("b", Value::Int32(2))]));
        let projection = Projection::parse(&spec).unwrap();
        let result = projection.apply(&candidate).unwrap();
        assert!(result.deep_eq(&Value::Document(doc(&[("_id", Value::Int32(1)), ("b", Value::Int32(2))]))));
    }

    #[test]
    fn projection_is_idempotent() {
        let mut spec = Document::new();
        spec.insert("a", Value::Int32(1));
        let candidate = Value::Document(doc(&[("_id", Value::Int32(1)), ("a", Value::Int32(5)), ("b", Value::Int32(9))]));
        let projection = Projection::parse(&spec).unwrap();
        let once = projection.apply(&candidate).unwrap();
        let twice = projection.apply(&once).unwrap();
        assert!(once.deep_eq(&twice));
    }
}
