//! Update operators and upsert seeding.

use bson::{Bson, Document};

use super::filter::is_operator_document;
use super::values::{get_path, remove_path, set_path};
use crate::driver::DriverError;
use crate::oid::ID_FIELD;

fn invalid(message: impl Into<String>) -> DriverError {
    DriverError::InvalidOperation(message.into())
}

/// Reject update documents that are not made of `$` operators.
pub(crate) fn validate_update(update: &Document) -> Result<(), DriverError> {
    if update.is_empty() {
        return Err(invalid("update document must not be empty"));
    }
    match update.keys().find(|k| !k.starts_with('$')) {
        Some(key) => Err(invalid(format!(
            "update document requires atomic operators, found '{}'",
            key
        ))),
        None => Ok(()),
    }
}

/// Reject replacement documents that contain `$` operators.
pub(crate) fn validate_replacement(replacement: &Document) -> Result<(), DriverError> {
    match replacement.keys().find(|k| k.starts_with('$')) {
        Some(key) => Err(invalid(format!(
            "replacement document must not contain operators, found '{}'",
            key
        ))),
        None => Ok(()),
    }
}

/// Apply `update` to `doc` in place. `inserting` enables `$setOnInsert`.
pub(crate) fn apply_update(
    doc: &mut Document,
    update: &Document,
    inserting: bool,
) -> Result<(), DriverError> {
    let original_id = doc.get(ID_FIELD).cloned();

    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| invalid(format!("{} needs a document operand", op)))?;
        for (path, value) in fields {
            match op.as_str() {
                "$set" => set_path(doc, path, value.clone()).map_err(invalid)?,
                "$setOnInsert" if inserting => set_path(doc, path, value.clone()).map_err(invalid)?,
                "$setOnInsert" => {}
                "$unset" => {
                    remove_path(doc, path);
                }
                "$inc" => {
                    let current = get_path(doc, path).cloned();
                    let next = increment(current.as_ref(), value, path)?;
                    set_path(doc, path, next).map_err(invalid)?;
                }
                "$push" => {
                    let mut items = match get_path(doc, path) {
                        None => Vec::new(),
                        Some(Bson::Array(items)) => items.clone(),
                        Some(_) => {
                            return Err(invalid(format!(
                                "the field '{}' must be an array",
                                path
                            )))
                        }
                    };
                    match value {
                        Bson::Document(modifier) if modifier.contains_key("$each") => {
                            match modifier.get("$each") {
                                Some(Bson::Array(each)) => items.extend(each.iter().cloned()),
                                _ => return Err(invalid("$each needs an array")),
                            }
                        }
                        single => items.push(single.clone()),
                    }
                    set_path(doc, path, Bson::Array(items)).map_err(invalid)?;
                }
                other => return Err(invalid(format!("unknown update operator: {}", other))),
            }
        }
    }

    if let Some(id) = original_id {
        if doc.get(ID_FIELD) != Some(&id) {
            return Err(invalid(
                "performing an update on the path '_id' would modify the immutable field '_id'",
            ));
        }
    }
    Ok(())
}

fn checked_long(a: i64, b: i64, path: &str) -> Result<Bson, DriverError> {
    a.checked_add(b)
        .map(Bson::Int64)
        .ok_or_else(|| invalid(format!("$inc overflows a 64-bit integer at '{}'", path)))
}

fn increment(current: Option<&Bson>, by: &Bson, path: &str) -> Result<Bson, DriverError> {
    let next = match (current, by) {
        (None, by) if is_number(by) => by.clone(),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*a) + i64::from(*b)),
        },
        (Some(Bson::Int32(a)), Bson::Int64(b)) => checked_long(i64::from(*a), *b, path)?,
        (Some(Bson::Int64(a)), Bson::Int32(b)) => checked_long(*a, i64::from(*b), path)?,
        (Some(Bson::Int64(a)), Bson::Int64(b)) => checked_long(*a, *b, path)?,
        (Some(Bson::Double(a)), Bson::Double(b)) => Bson::Double(a + b),
        (Some(Bson::Double(a)), Bson::Int32(b)) => Bson::Double(a + f64::from(*b)),
        (Some(Bson::Double(a)), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Some(Bson::Int32(a)), Bson::Double(b)) => Bson::Double(f64::from(*a) + b),
        (Some(Bson::Int64(a)), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => {
            return Err(invalid(format!(
                "cannot apply $inc to a non-numeric value at '{}'",
                path
            )))
        }
    };
    Ok(next)
}

fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

/// Base document for an upsert: the plain equality clauses of the filter.
pub(crate) fn seed_from_filter(filter: &Document) -> Result<Document, DriverError> {
    let mut seed = Document::new();
    for (key, value) in filter {
        if key.starts_with('$') {
            continue;
        }
        match value {
            Bson::Document(ops) if is_operator_document(value) => {
                if let Some(eq) = ops.get("$eq") {
                    set_path(&mut seed, key, eq.clone()).map_err(invalid)?;
                }
            }
            plain => set_path(&mut seed, key, plain.clone()).map_err(invalid)?,
        }
    }
    Ok(seed)
}

/// Put `_id` first, as stored documents always carry it in front.
pub(crate) fn with_id_first(id: Bson, doc: Document) -> Document {
    let mut ordered = Document::new();
    ordered.insert(ID_FIELD, id);
    for (key, value) in doc {
        if key != ID_FIELD {
            ordered.insert(key, value);
        }
    }
    ordered
}
