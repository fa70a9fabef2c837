//! Sorting, projection and the aggregation stages the in-memory store runs.

use std::cmp::Ordering;

use bson::{Bson, Document};

use super::filter::matches;
use super::values::{as_i64, compare, get_path, remove_path, set_path, truthy};
use crate::driver::DriverError;
use crate::oid::ID_FIELD;

fn invalid(message: impl Into<String>) -> DriverError {
    DriverError::InvalidOperation(message.into())
}

/// Parsed `{field: 1 | -1}` sort document.
pub(crate) struct SortKeys<'a> {
    keys: Vec<(&'a str, bool)>,
}

impl<'a> SortKeys<'a> {
    pub(crate) fn parse(sort: &'a Document) -> Result<Self, DriverError> {
        let keys = sort
            .iter()
            .map(|(field, direction)| match as_i64(direction) {
                Some(1) => Ok((field.as_str(), true)),
                Some(-1) => Ok((field.as_str(), false)),
                _ => Err(invalid(format!(
                    "invalid sort direction for '{}': {}",
                    field, direction
                ))),
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { keys })
    }

    /// Missing fields compare as null.
    pub(crate) fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (field, ascending) in &self.keys {
            let left = get_path(a, field).unwrap_or(&Bson::Null);
            let right = get_path(b, field).unwrap_or(&Bson::Null);
            let ordering = compare(left, right);
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Stable sort by a `{field: 1 | -1}` document.
pub(crate) fn sort_documents(docs: &mut [Document], sort: &Document) -> Result<(), DriverError> {
    let keys = SortKeys::parse(sort)?;
    docs.sort_by(|a, b| keys.compare(a, b));
    Ok(())
}

/// Apply an inclusion or exclusion projection. `_id` stays unless excluded.
pub(crate) fn project(doc: &Document, projection: &Document) -> Result<Document, DriverError> {
    let mut include_id = true;
    let mut inclusive = None;
    for (field, flag) in projection {
        let keep = truthy(flag);
        if field == ID_FIELD {
            include_id = keep;
            continue;
        }
        match inclusive {
            None => inclusive = Some(keep),
            Some(mode) if mode != keep => {
                return Err(invalid(
                    "projection cannot mix inclusion and exclusion of fields",
                ))
            }
            Some(_) => {}
        }
    }

    match inclusive {
        Some(true) => {
            let mut projected = Document::new();
            if include_id {
                if let Some(id) = doc.get(ID_FIELD) {
                    projected.insert(ID_FIELD, id.clone());
                }
            }
            for (field, _) in projection.iter().filter(|(f, _)| *f != ID_FIELD) {
                if let Some(value) = get_path(doc, field) {
                    set_path(&mut projected, field, value.clone()).map_err(invalid)?;
                }
            }
            Ok(projected)
        }
        _ => {
            let mut projected = doc.clone();
            for (field, _) in projection.iter().filter(|(f, _)| *f != ID_FIELD) {
                remove_path(&mut projected, field);
            }
            if !include_id {
                projected.remove(ID_FIELD);
            }
            Ok(projected)
        }
    }
}

fn stage_count(operand: &Bson, stage: &str) -> Result<usize, DriverError> {
    match as_i64(operand) {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(invalid(format!("{} needs a non-negative integer", stage))),
    }
}

/// Run an aggregation pipeline over `docs`.
pub(crate) fn run_pipeline(
    mut docs: Vec<Document>,
    pipeline: &[Document],
) -> Result<Vec<Document>, DriverError> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (name, operand) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => return Err(invalid("a pipeline stage needs exactly one field")),
        };
        docs = match name.as_str() {
            "$match" => {
                let filter = operand
                    .as_document()
                    .ok_or_else(|| invalid("$match needs a document"))?;
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$sort" => {
                let sort = operand
                    .as_document()
                    .ok_or_else(|| invalid("$sort needs a document"))?;
                if sort.is_empty() {
                    return Err(invalid("$sort stage must have at least one sort key"));
                }
                sort_documents(&mut docs, sort)?;
                docs
            }
            "$skip" => {
                let n = stage_count(operand, name)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = stage_count(operand, name)?;
                if n == 0 {
                    return Err(invalid("$limit must be positive"));
                }
                docs.into_iter().take(n).collect()
            }
            "$project" => {
                let projection = operand
                    .as_document()
                    .ok_or_else(|| invalid("$project needs a document"))?;
                docs.iter()
                    .map(|doc| project(doc, projection))
                    .collect::<Result<_, _>>()?
            }
            "$count" => {
                let field = operand
                    .as_str()
                    .filter(|f| !f.is_empty() && !f.starts_with('$'))
                    .ok_or_else(|| invalid("$count needs a field name"))?;
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut out = Document::new();
                    out.insert(field, docs.len() as i64);
                    vec![out]
                }
            }
            other => return Err(invalid(format!("unsupported pipeline stage: {}", other))),
        };
    }
    Ok(docs)
}
