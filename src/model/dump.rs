use bson::Bson;

use super::{Document, CREATED_AT, UPDATED_AT};
use crate::error::Result;
use crate::oid::{ObjectId, ID_FIELD};

/// Serialization toggles for [`Document::to_db`].
///
/// Field names in `include` / `exclude` may be given either as the Rust
/// field name or as the storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpOptions {
    pub include: Option<Vec<String>>,
    pub exclude: Vec<String>,
    /// Emit storage keys (`true`) or Rust field names.
    pub by_alias: bool,
    /// Drop fields equal to [`Document::defaults`].
    pub exclude_defaults: bool,
    /// Drop null fields. Unset optional fields are `None`, so this also
    /// covers "exclude unset".
    pub exclude_none: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            include: None,
            exclude: Vec::new(),
            by_alias: true,
            exclude_defaults: false,
            exclude_none: true,
        }
    }
}

impl DumpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn by_alias(mut self, by_alias: bool) -> Self {
        self.by_alias = by_alias;
        self
    }

    pub fn exclude_defaults(mut self, exclude_defaults: bool) -> Self {
        self.exclude_defaults = exclude_defaults;
        self
    }

    pub fn exclude_none(mut self, exclude_none: bool) -> Self {
        self.exclude_none = exclude_none;
        self
    }
}

fn names_key<M: Document>(names: &[String], key: &str) -> bool {
    names
        .iter()
        .any(|name| name == key || M::storage_key(name) == key)
}

pub(super) fn dump<M: Document>(record: &M, options: &DumpOptions) -> Result<bson::Document> {
    let mut fields = bson::to_document(record)?;
    fields.remove(M::ID_KEY);

    let defaults = match M::defaults() {
        Some(defaults) if options.exclude_defaults => Some(bson::to_document(&defaults)?),
        _ => None,
    };

    let mut out = bson::Document::new();
    out.insert(ID_FIELD, record.id().unwrap_or_else(ObjectId::new));
    for (key, value) in fields {
        if let Some(include) = &options.include {
            if !names_key::<M>(include, &key) {
                continue;
            }
        }
        if names_key::<M>(&options.exclude, &key) {
            continue;
        }
        if options.exclude_none && matches!(value, Bson::Null) {
            continue;
        }
        if defaults.as_ref().and_then(|d| d.get(&key)) == Some(&value) {
            continue;
        }
        let key = if options.by_alias {
            key
        } else {
            M::field_aliases()
                .iter()
                .find(|(_, storage)| *storage == key)
                .map(|(field, _)| field.to_string())
                .unwrap_or(key)
        };
        out.insert(key, value);
    }

    if M::TIMESTAMPS {
        let id = record.id().map(|id| id.timestamp());
        let created = match (id, out.get(ID_FIELD)) {
            (Some(at), _) => at,
            (None, Some(Bson::ObjectId(generated))) => generated.timestamp(),
            _ => bson::DateTime::now(),
        };
        let updated = match out.get(UPDATED_AT) {
            Some(Bson::DateTime(at)) => *at,
            _ => created,
        };
        out.insert(CREATED_AT, created);
        out.insert(UPDATED_AT, updated);
    }
    Ok(out)
}

pub(super) fn load<M: Document>(data: Option<bson::Document>) -> Result<Option<M>> {
    let mut data = match data {
        Some(data) if !data.is_empty() => data,
        _ => return Ok(None),
    };
    if let Some(raw) = data.remove(ID_FIELD) {
        let id = ObjectId::from_bson(&raw)?;
        data.insert(M::ID_KEY, id);
        if M::TIMESTAMPS {
            data.insert(CREATED_AT, id.timestamp());
        }
    }
    Ok(Some(bson::from_document(data)?))
}
