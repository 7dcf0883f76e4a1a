//! Dotted-path traversal, mutation, and deletion (spec §4.2).
//!
//! Fragments are classified once, at parse time, rather than re-split on
//! every traversal — the same "parse the language once" idiom the
//! teacher's expression tree uses (`slate_db::expression::Expression` is
//! parsed once from a query document and then evaluated against many
//! rows).

use docwire_errors::{Error, ErrorCode};

use crate::value::{Document, Value};

/// One fragment of a dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Name(String),
    Index(usize),
    /// The positional placeholder `$`, resolved against the matcher's
    /// recorded match index.
    Positional,
    /// An array-filter placeholder `$[identifier]`, bound by the update
    /// engine's array filters (spec §4.5).
    FilteredPositional(String),
}

impl Fragment {
    fn parse(raw: &str) -> Fragment {
        if raw == "$" {
            return Fragment::Positional;
        }
        if let Some(inner) = raw.strip_prefix("$[").and_then(|s| s.strip_suffix(']')) {
            return Fragment::FilteredPositional(inner.to_string());
        }
        if let Ok(i) = raw.parse::<usize>() {
            // Only a non-negative integer literal counts as an index
            // fragment; leading zeros like "01" are field names.
            if raw == i.to_string() {
                return Fragment::Index(i);
            }
        }
        Fragment::Name(raw.to_string())
    }
}

/// A parsed, validated dotted path (spec §4.2 "Path arithmetic").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    fragments: Vec<Fragment>,
}

impl Path {
    pub fn parse(raw: &str) -> Result<Path, Error> {
        if raw.is_empty() {
            return Err(Error::new(ErrorCode::FieldPathInvalidElement, "path must not be empty"));
        }
        if raw.starts_with('.') || raw.ends_with('.') {
            return Err(Error::new(
                ErrorCode::FieldPathTrailingDot,
                format!("FieldPath must not end (or start) with a '.': {raw}"),
            ));
        }
        if raw.contains("..") {
            return Err(Error::new(
                ErrorCode::FieldPathInvalidElement,
                format!("FieldPath must not contain consecutive '.': {raw}"),
            ));
        }

        let fragments: Vec<Fragment> = raw.split('.').map(Fragment::parse).collect();

        let positional_count = fragments
            .iter()
            .filter(|f| matches!(f, Fragment::Positional))
            .count();
        if positional_count > 1 {
            return Err(Error::new(
                ErrorCode::TooManyPositionalElements,
                "Too many positional (i.e. '$') elements found in path",
            ));
        }

        Ok(Path { fragments })
    }

    pub fn from_fragments(fragments: Vec<Fragment>) -> Path {
        Path { fragments }
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn first(&self) -> Option<&Fragment> {
        self.fragments.first()
    }

    pub fn last(&self) -> Option<&Fragment> {
        self.fragments.last()
    }

    /// The path without its first fragment.
    pub fn tail(&self) -> Path {
        Path {
            fragments: self.fragments.iter().skip(1).cloned().collect(),
        }
    }

    /// The path without its last fragment (the parent path).
    pub fn parent(&self) -> Path {
        let n = self.fragments.len().saturating_sub(1);
        Path {
            fragments: self.fragments[..n].to_vec(),
        }
    }

    pub fn to_string(&self) -> String {
        self.fragments
            .iter()
            .map(|f| match f {
                Fragment::Name(n) => n.clone(),
                Fragment::Index(i) => i.to_string(),
                Fragment::Positional => "$".to_string(),
                Fragment::FilteredPositional(id) => format!("$[{id}]"),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Number of fragments the two paths share as a common prefix.
    pub fn common_prefix_len(&self, other: &Path) -> usize {
        self.fragments
            .iter()
            .zip(other.fragments.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// `true` if `self` is a prefix of (or equal to) `other`.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.fragments.len() <= other.fragments.len()
            && self.common_prefix_len(other) == self.fragments.len()
    }

    /// Two update paths "overlap" (spec §4.5 conflict detection) when
    /// one is a prefix of (or equal to) the other.
    pub fn overlaps(a: &Path, b: &Path) -> bool {
        a.is_prefix_of(b) || b.is_prefix_of(a)
    }

    /// Replace every bare `$` with the matcher-recorded index, and every
    /// `$[id]` with the index the update engine's array filters bound
    /// for `id`. Mutation entry points call this before traversing.
    pub fn resolve_positional(
        &self,
        match_position: Option<usize>,
        filter_bindings: &std::collections::HashMap<String, usize>,
    ) -> Result<Path, Error> {
        let mut resolved = Vec::with_capacity(self.fragments.len());
        for frag in &self.fragments {
            match frag {
                Fragment::Positional => {
                    let idx = match_position.ok_or_else(|| {
                        Error::bad_value(
                            "The positional operator did not find the match needed from the query",
                        )
                    })?;
                    resolved.push(Fragment::Index(idx));
                }
                Fragment::FilteredPositional(id) => {
                    let idx = filter_bindings.get(id).copied().ok_or_else(|| {
                        Error::bad_value(format!(
                            "no array filter found for identifier '{id}' in path"
                        ))
                    })?;
                    resolved.push(Fragment::Index(idx));
                }
                other => resolved.push(other.clone()),
            }
        }
        Ok(Path { fragments: resolved })
    }
}

/// `get(doc, path)` — strict traversal, no array fan-out (spec §4.2).
pub fn get<'a>(doc: &'a Value, path: &Path) -> &'a Value {
    get_fragments(doc, path.fragments())
}

fn get_fragments<'a>(value: &'a Value, fragments: &[Fragment]) -> &'a Value {
    static MISSING: Value = Value::Missing;
    let Some((head, rest)) = fragments.split_first() else {
        return value;
    };
    match (value, head) {
        (Value::Document(d), Fragment::Name(n)) => match d.get(n) {
            Some(v) => get_fragments(v, rest),
            None => &MISSING,
        },
        (Value::Document(d), Fragment::Index(i)) => match d.get(&i.to_string()) {
            Some(v) => get_fragments(v, rest),
            None => &MISSING,
        },
        (Value::Array(arr), Fragment::Index(i)) => match arr.get(*i) {
            Some(v) => get_fragments(v, rest),
            None => &MISSING,
        },
        _ => &MISSING,
    }
}

/// `get_collection_aware(doc, path)` — traversal with array fan-out
/// (spec §4.2, §9 "Array fan-out during path get").
pub fn get_collection_aware(doc: &Value, path: &Path) -> Value {
    get_collection_aware_fragments(doc, path.fragments())
}

fn get_collection_aware_fragments(value: &Value, fragments: &[Fragment]) -> Value {
    let Some((head, rest)) = fragments.split_first() else {
        return value.clone();
    };
    match (value, head) {
        (Value::Document(d), Fragment::Name(n)) => match d.get(n) {
            Some(v) => get_collection_aware_fragments(v, rest),
            None => Value::Missing,
        },
        (Value::Document(d), Fragment::Index(i)) => match d.get(&i.to_string()) {
            Some(v) => get_collection_aware_fragments(v, rest),
            None => Value::Missing,
        },
        (Value::Array(arr), Fragment::Index(i)) => match arr.get(*i) {
            Some(v) => get_collection_aware_fragments(v, rest),
            None => Value::Missing,
        },
        (Value::Array(arr), Fragment::Name(_)) => {
            let mut out = Vec::new();
            for elem in arr {
                let projected = get_collection_aware_fragments(elem, fragments);
                if !projected.is_missing() {
                    out.push(projected);
                }
            }
            Value::Array(out)
        }
        _ => Value::Missing,
    }
}

/// `has(doc, path)` — defined in terms of the strict `get`, matching the
/// testable invariant in spec §8 ("has(d, p) ⇔ get(d, p) ≠ Missing").
pub fn has(doc: &Value, path: &Path) -> bool {
    !get(doc, path).is_missing()
}

/// `set(doc, path, value)` (spec §4.2 "Mutation semantics").
pub fn set(doc: &mut Value, path: &Path, value: Value) -> Result<(), Error> {
    set_fragments(doc, path.fragments(), value)
}

fn set_fragments(target: &mut Value, fragments: &[Fragment], value: Value) -> Result<(), Error> {
    let Some((head, rest)) = fragments.split_first() else {
        *target = value;
        return Ok(());
    };

    if matches!(target, Value::Missing | Value::Null) && !rest.is_empty() {
        // Auto-vivify a missing intermediate as a document, unless the
        // next step is a numeric index into an array.
        if matches!(head, Fragment::Index(_)) {
            *target = Value::Array(Vec::new());
        } else {
            *target = Value::Document(Document::new());
        }
    } else if matches!(target, Value::Missing | Value::Null) {
        *target = Value::Document(Document::new());
    }

    match (target, head) {
        (Value::Document(d), Fragment::Name(n)) => {
            if rest.is_empty() {
                d.insert(n.clone(), value);
                Ok(())
            } else {
                if !d.contains_key(n) {
                    d.insert(n.clone(), Value::Missing);
                }
                set_fragments(d.get_mut(n).unwrap(), rest, value)
            }
        }
        (Value::Document(d), Fragment::Index(i)) => {
            // A numeric fragment against a document is treated as a
            // literal (stringified) key, matching MongoDB's handling of
            // numeric field names inside embedded documents.
            let key = i.to_string();
            if rest.is_empty() {
                d.insert(key, value);
                Ok(())
            } else {
                if !d.contains_key(&key) {
                    d.insert(key.clone(), Value::Missing);
                }
                set_fragments(d.get_mut(&key).unwrap(), rest, value)
            }
        }
        (Value::Array(arr), Fragment::Index(i)) => {
            if arr.len() <= *i {
                arr.resize(*i + 1, Value::Null);
            }
            if rest.is_empty() {
                arr[*i] = value;
                Ok(())
            } else {
                set_fragments(&mut arr[*i], rest, value)
            }
        }
        (Value::Array(_), Fragment::Name(n)) => Err(Error::new(
            ErrorCode::PathNotViable,
            format!(
                "cannot use the field name '{n}' in an array because the element is not a document"
            ),
        )),
        (other, frag) => Err(Error::new(
            ErrorCode::PathNotViable,
            format!(
                "cannot traverse into a '{}' element with fragment '{:?}'",
                other.type_name(),
                frag
            ),
        )),
    }
}

/// `remove(doc, path)` — returns the removed value, or `Missing` if the
/// path didn't resolve (spec §4.2).
pub fn remove(doc: &mut Value, path: &Path) -> Value {
    remove_fragments(doc, path.fragments())
}

fn remove_fragments(target: &mut Value, fragments: &[Fragment]) -> Value {
    let Some((head, rest)) = fragments.split_first() else {
        return Value::Missing;
    };
    match (target, head) {
        (Value::Document(d), Fragment::Name(n)) => {
            if rest.is_empty() {
                d.remove(n).unwrap_or(Value::Missing)
            } else {
                match d.get_mut(n) {
                    Some(v) => remove_fragments(v, rest),
                    None => Value::Missing,
                }
            }
        }
        (Value::Document(d), Fragment::Index(i)) => {
            let key = i.to_string();
            if rest.is_empty() {
                d.remove(&key).unwrap_or(Value::Missing)
            } else {
                match d.get_mut(&key) {
                    Some(v) => remove_fragments(v, rest),
                    None => Value::Missing,
                }
            }
        }
        (Value::Array(arr), Fragment::Index(i)) => {
            if rest.is_empty() {
                if *i < arr.len() {
                    // MongoDB's $unset on an array index sets it to
                    // null rather than shifting the remaining elements.
                    std::mem::replace(&mut arr[*i], Value::Null)
                } else {
                    Value::Missing
                }
            } else {
                match arr.get_mut(*i) {
                    Some(v) => remove_fragments(v, rest),
                    None => Value::Missing,
                }
            }
        }
        _ => Value::Missing,
    }
}

/// `can_fully_traverse_for_rename(doc, path)`: true if every fragment
/// but the last can be walked through existing (or absent) documents
/// without crossing an array or a scalar (spec §4.2, §9 open question
/// about `$rename` under arrays — we decline to support it, matching
/// the conservative reading of MongoDB's own documented behavior).
pub fn can_fully_traverse_for_rename(doc: &Value, path: &Path) -> bool {
    let fragments = path.fragments();
    if fragments.is_empty() {
        return false;
    }
    let mut current = doc;
    for frag in &fragments[..fragments.len() - 1] {
        match (current, frag) {
            (Value::Document(d), Fragment::Name(n)) => match d.get(n) {
                Some(v) => current = v,
                None => return true, // absent parent: rename is a no-op, not a failure
            },
            (Value::Document(d), Fragment::Index(i)) => match d.get(&i.to_string()) {
                Some(v) => current = v,
                None => return true,
            },
            _ => return false,
        }
    }
    true
}

/// `copy(src, dst, path)` — copy the value at `path` in `src` into the
/// same `path` in `dst`, using strict (non-fan-out) traversal, per spec
/// §4.2.
pub fn copy(src: &Value, dst: &mut Value, path: &Path) -> Result<(), Error> {
    let value = get(src, path).clone();
    if value.is_missing() {
        return Ok(());
    }
    set(dst, path, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_from(pairs: &[(&str, Value)]) -> Value {
        let mut d = Document::new();
        for (k, v) in pairs {
            d.insert(*k, v.clone());
        }
        Value::Document(d)
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut doc = doc_from(&[]);
        let path = Path::parse("a.b.c").unwrap();
        set(&mut doc, &path, Value::Int32(42)).unwrap();
        assert!(get(&doc, &path).deep_eq(&Value::Int32(42)));
    }

    #[test]
    fn set_into_scalar_is_path_not_viable() {
        let mut doc = doc_from(&[("a", Value::Int32(1))]);
        let path = Path::parse("a.b").unwrap();
        let err = set(&mut doc, &path, Value::Int32(2)).unwrap_err();
        assert_eq!(err.code, ErrorCode::PathNotViable);
    }

    #[test]
    fn set_numeric_index_pads_with_null() {
        let mut doc = doc_from(&[("arr", Value::Array(vec![]))]);
        let path = Path::parse("arr.3").unwrap();
        set(&mut doc, &path, Value::Int32(9)).unwrap();
        let arr = get(&doc, &Path::parse("arr").unwrap()).as_array().unwrap();
        assert_eq!(arr.len(), 4);
        assert!(arr[0].deep_eq(&Value::Null));
        assert!(arr[3].deep_eq(&Value::Int32(9)));
    }

    #[test]
    fn has_matches_get_missing_invariant() {
        let doc = doc_from(&[("a", Value::Int32(1))]);
        assert!(has(&doc, &Path::parse("a").unwrap()));
        assert!(!has(&doc, &Path::parse("b").unwrap()));
    }

    #[test]
    fn fan_out_projects_field_across_array_elements() {
        let arr = Value::Array(vec![
            doc_from(&[("foo", Value::String("bar".into()))]),
            doc_from(&[("foo", Value::String("bas".into()))]),
        ]);
        let doc = doc_from(&[("a", arr)]);
        let result = get_collection_aware(&doc, &Path::parse("a.foo").unwrap());
        assert!(result.deep_eq(&Value::Array(vec![
            Value::String("bar".into()),
            Value::String("bas".into())
        ])));
    }

    #[test]
    fn positional_without_match_position_fails() {
        let path = Path::parse("arr.$.y").unwrap();
        let bindings = std::collections::HashMap::new();
        let err = path.resolve_positional(None, &bindings).unwrap_err();
        assert_eq!(err.code, docwire_errors::ErrorCode::BadValue);
    }

    #[test]
    fn too_many_positional_fragments_rejected() {
        let err = Path::parse("a.$.b.$.c").unwrap_err();
        assert_eq!(err.code, ErrorCode::TooManyPositionalElements);
    }

    #[test]
    fn overlapping_paths_detected_for_conflict_checks() {
        let a = Path::parse("a.b").unwrap();
        let b = Path::parse("a").unwrap();
        assert!(Path::overlaps(&a, &b));
        let c = Path::parse("a.c").unwrap();
        assert!(!Path::overlaps(&a, &c));
    }

    #[test]
    fn remove_returns_removed_value() {
        let mut doc = doc_from(&[("a", Value::Int32(1))]);
        let removed = remove(&mut doc, &Path::parse("a").unwrap());
        assert!(removed.deep_eq(&Value::Int32(1)));
        assert!(!has(&doc, &Path::parse("a").unwrap()));
    }
}
