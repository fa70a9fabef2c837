//! JSON rendering of storage documents.
//!
//! ObjectIds become their hex string and datetimes become UNIX seconds, the
//! shape API responses expect. Every other value uses relaxed extended JSON.

use bson::{Bson, Document};
use serde_json::{Map, Number, Value};

/// Render a storage document as JSON.
pub fn to_json(document: &Document) -> Value {
    Value::Object(object(document))
}

/// Render a single BSON value as JSON.
pub fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => {
            let seconds = dt.timestamp_millis() as f64 / 1000.0;
            Number::from_f64(seconds)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        Bson::Document(inner) => Value::Object(object(inner)),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        other => other.clone().into_relaxed_extjson(),
    }
}

fn object(document: &Document) -> Map<String, Value> {
    document
        .iter()
        .map(|(key, value)| (key.clone(), bson_to_json(value)))
        .collect()
}
