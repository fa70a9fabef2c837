//! Index definitions shared by every backend.

use bson::{Bson, Document};

/// Name of the index every collection carries on `_id`.
pub const ID_INDEX: &str = "_id_";

/// An index over one or more keys, in key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexModel {
    pub keys: Document,
    /// Defaults to the keys joined with their directions, e.g. `age_-1_name_1`.
    pub name: Option<String>,
    pub unique: bool,
}

impl IndexModel {
    pub fn new(keys: Document) -> Self {
        Self {
            keys,
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// The explicit name, or the one the server would generate.
    pub fn resolved_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|(key, value)| format!("{}_{}", key, key_suffix(value)))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub(crate) fn id_index() -> Self {
        Self::new(bson::doc! { "_id": 1 }).name(ID_INDEX)
    }
}

fn key_suffix(value: &Bson) -> String {
    match value {
        Bson::Int32(v) => v.to_string(),
        Bson::Int64(v) => v.to_string(),
        Bson::Double(v) if v.fract() == 0.0 => format!("{}", *v as i64),
        Bson::String(v) => v.clone(),
        other => other.to_string(),
    }
}
