//! Query filter evaluation.

use std::cmp::Ordering;

use bson::{Bson, Document};

use super::values::{compare, get_path, same_type_bracket, truthy, values_equal};
use crate::driver::DriverError;

/// Does `doc` satisfy `filter`?
pub(crate) fn matches(doc: &Document, filter: &Document) -> Result<bool, DriverError> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => sub_filters(condition, key)?
                .iter()
                .try_fold(true, |acc, f| Ok::<_, DriverError>(acc && matches(doc, f)?))?,
            "$or" => sub_filters(condition, key)?
                .iter()
                .try_fold(false, |acc, f| Ok::<_, DriverError>(acc || matches(doc, f)?))?,
            "$nor" => !sub_filters(condition, key)?
                .iter()
                .try_fold(false, |acc, f| Ok::<_, DriverError>(acc || matches(doc, f)?))?,
            op if op.starts_with('$') => {
                return Err(DriverError::InvalidOperation(format!(
                    "unknown top level operator: {}",
                    op
                )))
            }
            path => matches_condition(get_path(doc, path), condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(condition: &'a Bson, op: &str) -> Result<Vec<&'a Document>, DriverError> {
    let invalid = || DriverError::InvalidOperation(format!("{} must be a nonempty array", op));
    match condition {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| item.as_document().ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

/// True when `condition` is an operator expression such as `{"$gt": 1}`.
pub(crate) fn is_operator_document(condition: &Bson) -> bool {
    match condition {
        Bson::Document(ops) => ops.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> Result<bool, DriverError> {
    match condition {
        Bson::Document(ops) if is_operator_document(condition) => {
            for (op, operand) in ops {
                if !apply_operator(value, op, operand)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        expected => Ok(equals_or_contains(value, expected)),
    }
}

/// Equality with array membership: `{tags: "a"}` matches `tags: ["a", "b"]`.
fn equals_or_contains(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(actual) => values_equal(actual, expected),
    }
}

fn range(value: Option<&Bson>, operand: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let check = |candidate: &Bson| {
        same_type_bracket(candidate, operand) && accept(compare(candidate, operand))
    };
    match value {
        None => false,
        Some(Bson::Array(items)) if !matches!(operand, Bson::Array(_)) => items.iter().any(check),
        Some(actual) => check(actual),
    }
}

fn apply_operator(value: Option<&Bson>, op: &str, operand: &Bson) -> Result<bool, DriverError> {
    let result = match op {
        "$eq" => equals_or_contains(value, operand),
        "$ne" => !equals_or_contains(value, operand),
        "$gt" => range(value, operand, Ordering::is_gt),
        "$gte" => range(value, operand, Ordering::is_ge),
        "$lt" => range(value, operand, Ordering::is_lt),
        "$lte" => range(value, operand, Ordering::is_le),
        "$in" => in_array(value, operand, op)?,
        "$nin" => !in_array(value, operand, op)?,
        "$exists" => truthy(operand) == value.is_some(),
        "$not" => !matches_condition(value, operand)?,
        other => {
            return Err(DriverError::InvalidOperation(format!(
                "unknown operator: {}",
                other
            )))
        }
    };
    Ok(result)
}

fn in_array(value: Option<&Bson>, operand: &Bson, op: &str) -> Result<bool, DriverError> {
    match operand {
        Bson::Array(candidates) => Ok(candidates
            .iter()
            .any(|candidate| equals_or_contains(value, candidate))),
        _ => Err(DriverError::InvalidOperation(format!("{} needs an array", op))),
    }
}
