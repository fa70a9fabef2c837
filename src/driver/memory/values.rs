//! Path access and ordering over BSON values.

use std::cmp::Ordering;

use bson::{Bson, Document};

/// Resolve a dotted path. Numeric segments index into arrays.
pub(crate) fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a dotted path, creating intermediate documents. Fails when an
/// intermediate segment holds a non-document value.
pub(crate) fn set_path(doc: &mut Document, path: &str, value: Bson) -> Result<(), String> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));
            match entry {
                Bson::Document(inner) => set_path(inner, rest, value),
                other => Err(format!(
                    "cannot create field '{}' in element {{{}: {}}}",
                    rest, head, other
                )),
            }
        }
    }
}

/// Remove a dotted path. Returns whether something was removed.
pub(crate) fn remove_path(doc: &mut Document, path: &str) -> bool {
    match path.split_once('.') {
        None => doc.remove(path).is_some(),
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Bson::Document(inner)) => remove_path(inner, rest),
            _ => false,
        },
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Cross-type sort rank, lowest first.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 13,
        _ => 12,
    }
}

pub(crate) fn same_type_bracket(a: &Bson, b: &Bson) -> bool {
    type_rank(a) == type_rank(b)
}

/// Total order used for sorting and range operators.
pub(crate) fn compare(a: &Bson, b: &Bson) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Symbol(x), Bson::Symbol(y)) => x.cmp(y),
        (Bson::String(x), Bson::Symbol(y)) | (Bson::Symbol(x), Bson::String(y)) => x.cmp(y),
        (Bson::Document(x), Bson::Document(y)) => compare_documents(x, y),
        (Bson::Array(x), Bson::Array(y)) => compare_arrays(x, y),
        (Bson::Binary(x), Bson::Binary(y)) => x.bytes.cmp(&y.bytes),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let ordering = compare(va, vb).then_with(|| ka.cmp(kb));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_arrays(a: &[Bson], b: &[Bson]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ordering = compare(x, y);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

/// Equality with numeric widening (`1 == 1i64 == 1.0`).
pub(crate) fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => same_type_bracket(a, b) && compare(a, b) == Ordering::Equal && same_shape(a, b),
    }
}

fn same_shape(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Document(x), Bson::Document(y)) => {
            x.len() == y.len() && x.keys().zip(y.keys()).all(|(ka, kb)| ka == kb)
        }
        (Bson::Array(x), Bson::Array(y)) => x.len() == y.len(),
        _ => true,
    }
}

/// Truthiness for projection flags and `$exists` operands.
pub(crate) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_f64(other).map(|n| n != 0.0).unwrap_or(true),
    }
}

/// Non-negative integer operand (`$skip`, `$limit`, sort directions).
pub(crate) fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc, oid::ObjectId};

    #[test]
    fn dotted_paths() {
        let mut doc = doc! { "a": { "b": { "c": 1 } }, "list": [10, 20] };
        assert_eq!(get_path(&doc, "a.b.c"), Some(&Bson::Int32(1)));
        assert_eq!(get_path(&doc, "list.1"), Some(&Bson::Int32(20)));
        assert_eq!(get_path(&doc, "a.x"), None);

        set_path(&mut doc, "a.b.d", Bson::from("x")).unwrap();
        set_path(&mut doc, "new.path", Bson::from(true)).unwrap();
        assert_eq!(get_path(&doc, "a.b.d"), Some(&Bson::from("x")));
        assert_eq!(get_path(&doc, "new.path"), Some(&Bson::Boolean(true)));
        assert!(set_path(&mut doc, "list.x.y", Bson::Null).is_err());

        assert!(remove_path(&mut doc, "a.b.c"));
        assert!(!remove_path(&mut doc, "a.b.c"));
    }

    #[test]
    fn numbers_compare_across_types() {
        assert!(values_equal(&Bson::Int32(1), &Bson::Int64(1)));
        assert!(values_equal(&Bson::Int32(1), &Bson::Double(1.0)));
        assert_eq!(compare(&Bson::Int32(2), &Bson::Double(1.5)), Ordering::Greater);
    }

    #[test]
    fn cross_type_ranks() {
        assert_eq!(compare(&Bson::Null, &Bson::Int32(0)), Ordering::Less);
        assert_eq!(compare(&Bson::from("a"), &Bson::Int32(100)), Ordering::Greater);
        assert_eq!(
            compare(&Bson::ObjectId(ObjectId::new()), &Bson::from("zzz")),
            Ordering::Greater
        );
    }

    #[test]
    fn documents_equal_only_with_same_shape() {
        assert!(values_equal(&bson!({ "a": 1 }), &bson!({ "a": 1 })));
        assert!(!values_equal(&bson!({ "a": 1 }), &bson!({ "a": 1, "b": 2 })));
        assert!(!values_equal(&bson!({ "a": 1 }), &bson!({ "b": 1 })));
    }
}
