use crate::error::ConfigurationError;
use crate::model::{Document, ModelInfo};

/// Conversion and not-found policy of a repository.
///
/// When `convert` is set, documents read back are passed through
/// `convert_to`'s `from_db`. `raise_not_found` turns an absent result of a
/// single-document read into [`Error::NotFound`](crate::Error::NotFound).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub convert: bool,
    pub convert_to: Option<ModelInfo>,
    pub raise_not_found: bool,
}

impl RepositoryConfig {
    /// Fails when conversion is requested without a target.
    pub fn new(
        convert: bool,
        convert_to: Option<ModelInfo>,
        raise_not_found: bool,
    ) -> Result<Self, ConfigurationError> {
        let config = Self {
            convert,
            convert_to,
            raise_not_found,
        };
        if config.convert && config.convert_to.is_none() {
            return Err(ConfigurationError::MissingConversionTarget);
        }
        Ok(config)
    }

    /// Convert every document into `M`.
    pub fn converting<M: Document>() -> Self {
        Self {
            convert: true,
            convert_to: Some(ModelInfo::of::<M>()),
            raise_not_found: true,
        }
    }

    /// Hand back raw documents.
    pub fn raw() -> Self {
        Self {
            convert: false,
            convert_to: None,
            raise_not_found: true,
        }
    }

    pub fn raise_not_found(mut self, raise_not_found: bool) -> Self {
        self.raise_not_found = raise_not_found;
        self
    }

    /// Check the policy against the repository's record type `M`.
    pub fn validate_for<M: Document>(&self) -> Result<(), ConfigurationError> {
        match (self.convert, self.convert_to) {
            (true, None) => Err(ConfigurationError::MissingConversionTarget),
            (_, Some(target)) if !target.is::<M>() => {
                Err(ConfigurationError::ConversionTargetMismatch {
                    expected: M::NAME,
                    found: target.name,
                })
            }
            _ => Ok(()),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::raw()
    }
}

/// A document read through a repository: converted or raw.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<M> {
    Record(M),
    Raw(bson::Document),
}

impl<M> Fetched<M> {
    pub fn is_record(&self) -> bool {
        matches!(self, Fetched::Record(_))
    }

    pub fn record(&self) -> Option<&M> {
        match self {
            Fetched::Record(record) => Some(record),
            Fetched::Raw(_) => None,
        }
    }

    pub fn into_record(self) -> Option<M> {
        match self {
            Fetched::Record(record) => Some(record),
            Fetched::Raw(_) => None,
        }
    }

    pub fn raw(&self) -> Option<&bson::Document> {
        match self {
            Fetched::Raw(document) => Some(document),
            Fetched::Record(_) => None,
        }
    }

    pub fn into_raw(self) -> Option<bson::Document> {
        match self {
            Fetched::Raw(document) => Some(document),
            Fetched::Record(_) => None,
        }
    }
}
