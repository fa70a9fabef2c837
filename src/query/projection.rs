use bson::{Bson, Document as BsonDocument};

use crate::error::ValidationError;
use crate::model::Document;
use crate::oid::ID_FIELD;

/// Field selection from `fieldsShow` / `fieldsHide` style parameters.
///
/// `_id` can never be hidden: it is removed from any built mapping, which
/// leaves the storage default of returning it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    show: Option<String>,
    hide: Option<String>,
}

fn present(value: Option<&str>) -> Option<String> {
    value
        .filter(|fields| !fields.trim().is_empty())
        .map(str::to_string)
}

impl Projection {
    /// Both lists given (and non-blank) is a validation error.
    pub fn new(
        fields_show: Option<&str>,
        fields_hide: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let show = present(fields_show);
        let hide = present(fields_hide);
        if show.is_some() && hide.is_some() {
            return Err(ValidationError::ConflictingProjection);
        }
        Ok(Self { show, hide })
    }

    pub fn show(fields: &str) -> Self {
        Self {
            show: present(Some(fields)),
            hide: None,
        }
    }

    pub fn hide(fields: &str) -> Self {
        Self {
            show: None,
            hide: present(Some(fields)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.show.is_none() && self.hide.is_none()
    }

    /// Storage projection for `M`, or `None` when nothing was requested.
    /// Names are resolved through the record's storage aliases.
    pub fn to_db<M: Document>(&self) -> Option<BsonDocument> {
        let (fields, include) = match (&self.show, &self.hide) {
            (Some(show), _) => (show, true),
            (None, Some(hide)) => (hide, false),
            (None, None) => return None,
        };
        let mut projection = BsonDocument::new();
        for field in fields.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            projection.insert(M::storage_key(field), Bson::Boolean(include));
        }
        projection.remove(ID_FIELD);
        Some(projection)
    }
}
