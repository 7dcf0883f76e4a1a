//! Array filters: `$[identifier]` bindings supplied alongside an update
//! (spec §4.5). A filter document like `{"i.x": {$gt: 5}}` is rewritten
//! into a query document keyed under a synthetic `__root__` field so the
//! existing matcher can evaluate it against an array element as if that
//! element were the whole candidate document.

use docwire_errors::Error;
use docwire_query::{matches as query_matches, parse_filter, Predicate};
use docwire_value::{Document, Value};

pub struct ArrayFilter {
    pub identifier: String,
    predicate: Predicate,
}

impl ArrayFilter {
    pub fn matches(&self, element: &Value) -> Result<bool, Error> {
        Ok(query_matches(&self.predicate, &wrap(element))?.matched)
    }
}

pub(crate) fn wrap(element: &Value) -> Value {
    let mut d = Document::new();
    d.insert("__root__", element.clone());
    Value::Document(d)
}

pub fn parse_array_filters(filters: &[Document]) -> Result<Vec<ArrayFilter>, Error> {
    filters.iter().map(parse_one).collect()
}

fn parse_one(filter_doc: &Document) -> Result<ArrayFilter, Error> {
    let first_key = filter_doc
        .keys()
        .next()
        .ok_or_else(|| Error::bad_value("an array filter must not be empty"))?;
    let identifier = first_key.split('.').next().unwrap().to_string();

    let mut rewritten = Document::new();
    for (k, v) in filter_doc.iter() {
        let (ident, rest) = match k.split_once('.') {
            Some((id, rest)) => (id, Some(rest)),
            None => (k, None),
        };
        if ident != identifier {
            return Err(Error::bad_value(format!(
                "array filter document uses more than one identifier: '{ident}' and '{identifier}'"
            )));
        }
        let new_key = match rest {
            Some(r) => format!("__root__.{r}"),
            None => "__root__".to_string(),
        };
        rewritten.insert(new_key, v.clone());
    }

    Ok(ArrayFilter {
        identifier,
        predicate: parse_filter(&rewritten)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwire_value::Document as Doc;

    #[test]
    fn identifier_condition_matches_subfield() {
        let mut cond = Doc::new();
        let mut gt = Doc::new();
        gt.insert("$gt", Value::Int32(5));
        cond.insert("i.x", Value::Document(gt));
        let filters = parse_array_filters(&[cond]).unwrap();
        assert_eq!(filters[0].identifier, "i");

        let mut elem = Doc::new();
        elem.insert("x", Value::Int32(9));
        assert!(filters[0].matches(&Value::Document(elem)).unwrap());

        let mut elem2 = Doc::new();
        elem2.insert("x", Value::Int32(1));
        assert!(!filters[0].matches(&Value::Document(elem2)).unwrap());
    }
}
