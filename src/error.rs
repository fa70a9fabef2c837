use thiserror::Error;

use crate::driver::DriverError;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error returned by repositories, models and query builders.
#[derive(Debug, Error)]
pub enum Error {
    /// A single-document operation matched nothing and the caller asked for
    /// strict behavior.
    #[error("{name} not found")]
    NotFound { name: &'static str },

    /// Misconfiguration detected while wiring repositories, sort configs or
    /// settings. Never retried.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Bad caller input (identifiers, pagination bounds, projections, sorts,
    /// documents that do not fit the record type).
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Errors raised by the storage driver, carried unchanged.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl Error {
    pub(crate) fn not_found(name: &'static str) -> Self {
        Error::NotFound { name }
    }

    /// HTTP-style status code hint for the boundary layer.
    ///
    /// Only the kinds with an obvious mapping carry one; everything else is
    /// left to the caller's own error translation.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::NotFound { .. } => Some(404),
            Error::Validation(_) => Some(400),
            Error::Configuration(_) | Error::Driver(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Construction-time misconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("set `convert_to` or disable `convert`")]
    MissingConversionTarget,

    #[error("`convert_to` must be the repository record type `{expected}`, got `{found}`")]
    ConversionTargetMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("`{model}` declares no sortable fields")]
    NoSortableFields { model: &'static str },

    #[error("default sort of `{model}` uses `{field}`, which is not a sortable field")]
    InvalidDefaultSort { model: &'static str, field: String },

    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("unsupported database url `{0}`")]
    UnsupportedUrl(String),

    #[error("driver feature `{0}` is not enabled")]
    DriverUnavailable(&'static str),
}

/// Invalid caller input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("`{value}` is not a valid ObjectId (expected 24 hex characters)")]
    InvalidObjectId { value: String },

    #[error("{field} must be between {min} and {max}, got {value}")]
    Pagination {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("You can't add 'fieldsShow' and 'fieldsHide' together to Projector")]
    ConflictingProjection,

    #[error("sort expression is longer than {max} characters")]
    SortTooLong { max: usize },

    #[error("`{field}` is not a sortable field")]
    UnknownSortField { field: String },

    #[error("document does not match record type: {0}")]
    Document(String),
}

impl From<bson::de::Error> for ValidationError {
    fn from(error: bson::de::Error) -> Self {
        ValidationError::Document(error.to_string())
    }
}

impl From<bson::ser::Error> for ValidationError {
    fn from(error: bson::ser::Error) -> Self {
        ValidationError::Document(error.to_string())
    }
}

impl From<bson::de::Error> for Error {
    fn from(error: bson::de::Error) -> Self {
        Error::Validation(error.into())
    }
}

impl From<bson::ser::Error> for Error {
    fn from(error: bson::ser::Error) -> Self {
        Error::Validation(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_carries_record_name() {
        let err = Error::not_found("User");
        assert_eq!(err.to_string(), "User not found");
        assert_eq!(err.status_code(), Some(404));
        assert!(err.is_not_found());
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let err: Error = ValidationError::ConflictingProjection.into();
        assert_eq!(err.status_code(), Some(400));
        assert_eq!(
            err.to_string(),
            "You can't add 'fieldsShow' and 'fieldsHide' together to Projector"
        );
    }

    #[test]
    fn configuration_has_no_status_hint() {
        let err: Error = ConfigurationError::MissingConversionTarget.into();
        assert_eq!(err.status_code(), None);
        assert_eq!(err.to_string(), "set `convert_to` or disable `convert`");
    }
}
