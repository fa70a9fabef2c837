use bson::{doc, Document as BsonDocument};

use super::Direction;
use crate::error::{ConfigurationError, Result, ValidationError};
use crate::model::Sortable;
use crate::oid::ID_FIELD;

/// Longest accepted `orderBy` expression, in characters.
pub const MAX_SORT_LENGTH: usize = 256;

/// Validated sorting declaration of a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortConfig {
    model: &'static str,
    fields: &'static [&'static str],
    default: &'static [(&'static str, Direction)],
}

impl SortConfig {
    /// Check the declaration of `M`: it must name at least one sortable
    /// field, and its default order may only use sortable fields or `_id`.
    pub fn of<M: Sortable>() -> std::result::Result<Self, ConfigurationError> {
        let config = Self {
            model: M::NAME,
            fields: M::sortable_fields(),
            default: M::default_sort(),
        };
        if config.fields.is_empty() {
            return Err(ConfigurationError::NoSortableFields { model: M::NAME });
        }
        if let Some((field, _)) = config
            .default
            .iter()
            .find(|(field, _)| !config.is_sortable(field))
        {
            return Err(ConfigurationError::InvalidDefaultSort {
                model: M::NAME,
                field: field.to_string(),
            });
        }
        Ok(config)
    }

    pub fn model(&self) -> &'static str {
        self.model
    }

    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// `_id` is always sortable.
    pub fn is_sortable(&self, field: &str) -> bool {
        field == ID_FIELD || field == "id" || self.fields.iter().any(|f| *f == field)
    }

    pub fn default_order(&self) -> SortOrder {
        SortOrder(
            self.default
                .iter()
                .map(|(field, direction)| (field.to_string(), *direction))
                .collect(),
        )
    }
}

/// Parsed `orderBy` expression, e.g. `"-age, name"`.
///
/// Fields are checked against the record type only when the order is built,
/// so the same builder can be reused across record types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortBuilder {
    requested: Vec<(String, Direction)>,
    strict: bool,
}

impl SortBuilder {
    /// Builder that always yields the record type's default order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma separated field list. A leading `-` sorts descending.
    pub fn parse(order_by: impl AsRef<str>) -> std::result::Result<Self, ValidationError> {
        let order_by = order_by.as_ref();
        if order_by.chars().count() > MAX_SORT_LENGTH {
            return Err(ValidationError::SortTooLong {
                max: MAX_SORT_LENGTH,
            });
        }
        let requested = order_by
            .split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.strip_prefix('-') {
                Some(field) => (field.trim(), Direction::Descending),
                None => (segment, Direction::Ascending),
            })
            .filter(|(field, _)| !field.is_empty())
            .map(|(field, direction)| (field.to_string(), direction))
            .collect();
        Ok(Self {
            requested,
            strict: false,
        })
    }

    /// `None` keeps the default order, like an absent query parameter.
    pub fn from_query(order_by: Option<&str>) -> std::result::Result<Self, ValidationError> {
        match order_by {
            Some(order_by) => Self::parse(order_by),
            None => Ok(Self::new()),
        }
    }

    /// Reject undeclared fields instead of dropping them.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn requested(&self) -> &[(String, Direction)] {
        &self.requested
    }

    /// Resolve against `M`.
    ///
    /// Declared fields keep their requested order, followed by `_id`
    /// descending as a tie-break unless `_id` was requested. When nothing
    /// usable was requested the declared default order is returned, resolved to
    /// storage keys but otherwise unchanged.
    pub fn build<M: Sortable>(&self) -> Result<SortOrder> {
        let config = SortConfig::of::<M>()?;
        let mut keys: Vec<(String, Direction)> = Vec::new();
        for (field, direction) in &self.requested {
            if !config.is_sortable(field) {
                if self.strict {
                    return Err(ValidationError::UnknownSortField {
                        field: field.clone(),
                    }
                    .into());
                }
                continue;
            }
            let key = M::storage_key(field);
            if !keys.iter().any(|(existing, _)| existing == key) {
                keys.push((key.to_string(), *direction));
            }
        }

        if keys.is_empty() {
            let fallback = config
                .default
                .iter()
                .map(|(field, direction)| (M::storage_key(field).to_string(), *direction))
                .collect();
            return Ok(SortOrder(fallback));
        }
        if !keys.iter().any(|(field, _)| field == ID_FIELD) {
            keys.push((ID_FIELD.to_string(), Direction::Descending));
        }
        Ok(SortOrder(keys))
    }
}

/// Ordered list of sort keys, ready for the storage layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortOrder(Vec<(String, Direction)>);

impl SortOrder {
    pub fn new(keys: Vec<(String, Direction)>) -> Self {
        Self(keys)
    }

    /// Cursor-style `(field, direction)` pairs.
    pub fn to_pairs(&self) -> Vec<(String, i32)> {
        self.0
            .iter()
            .map(|(field, direction)| (field.clone(), direction.as_i32()))
            .collect()
    }

    /// Ordered `{field: 1 | -1}` mapping.
    pub fn to_document(&self) -> BsonDocument {
        let mut sort = BsonDocument::new();
        for (field, direction) in &self.0 {
            sort.insert(field.clone(), *direction);
        }
        sort
    }

    /// `{"$sort": {...}}` aggregation stage.
    pub fn to_stage(&self) -> BsonDocument {
        doc! { "$sort": self.to_document() }
    }

    pub fn keys(&self) -> &[(String, Direction)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<SortOrder> for BsonDocument {
    fn from(order: SortOrder) -> Self {
        order.to_document()
    }
}
