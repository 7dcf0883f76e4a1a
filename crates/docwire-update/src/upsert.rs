//! Upsert document composition (spec §4.5 "Upsert").
//!
//! Open question (a) from spec §9 — exact field order when both the
//! selector and `$setOnInsert` touch the same path — is resolved here by
//! applying the selector's equality fragments first and letting the
//! update operators (including `$setOnInsert`) run over that base
//! exactly as they would against any other document; a later operator
//! touching the same path simply overwrites it in place, preserving that
//! field's original position rather than moving it to the end.

use docwire_errors::Error;
use docwire_query::{FieldOp, FieldPredicate, Predicate, UpdateDocument};
use docwire_value::{set, Document, Value};

use crate::apply::apply_operators;
use crate::array_filter::ArrayFilter;

/// Build the document that would be inserted for an upsert with no
/// matching document: selector equality fragments, then the update
/// document applied as an insert.
pub fn compose_upsert_document(
    selector: &Predicate,
    update: &UpdateDocument,
    array_filters: &[ArrayFilter],
) -> Result<Value, Error> {
    let mut base = Value::Document(Document::new());
    apply_selector_equalities(selector, &mut base)?;

    match update {
        UpdateDocument::Replacement(repl) => {
            let existing_id = base.as_document().and_then(|d| d.get("_id")).cloned();
            let mut doc = repl.clone();
            if !doc.contains_key("_id") {
                if let Some(id) = existing_id {
                    doc.insert("_id", id);
                }
            }
            base = Value::Document(doc);
        }
        UpdateDocument::Operators(ops) => {
            apply_operators(&mut base, ops, array_filters, None, true)?;
        }
    }

    Ok(base)
}

fn apply_selector_equalities(pred: &Predicate, doc: &mut Value) -> Result<(), Error> {
    match pred {
        Predicate::And(clauses) => {
            for c in clauses {
                apply_selector_equalities(c, doc)?;
            }
        }
        Predicate::Field(path, FieldPredicate::Eq(v)) => {
            set(doc, path, v.clone())?;
        }
        Predicate::Field(path, FieldPredicate::Ops(ops)) => {
            for op in ops {
                if let FieldOp::Eq(v) = op {
                    set(doc, path, v.clone())?;
                }
            }
        }
        // $or/$nor/$not/$expr and friends don't pin down a single
        // equality value, so they contribute nothing to the base
        // upsert document, matching the reference behavior of treating
        // only unambiguous equality clauses as seed data.
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwire_query::parse_filter;

    #[test]
    fn upsert_seeds_selector_equalities_then_applies_set_on_insert() {
        let mut selector_doc = Document::new();
        selector_doc.insert("status", Value::String("new".into()));
        let selector = parse_filter(&selector_doc).unwrap();

        let mut soi = Document::new();
        soi.insert("createdAt", Value::Int32(1));
        let mut update_doc = Document::new();
        update_doc.insert("$setOnInsert", Value::Document(soi));
        let update = docwire_query::parse_update(&update_doc).unwrap();

        let composed = compose_upsert_document(&selector, &update, &[]).unwrap();
        let doc = composed.as_document().unwrap();
        assert!(doc.get("status").unwrap().deep_eq(&Value::String("new".into())));
        assert!(doc.get("createdAt").unwrap().deep_eq(&Value::Int32(1)));
    }
}
