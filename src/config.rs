//! Runtime settings.
//!
//! Settings come from `DOCBASE_*` environment variables or a JSON document.
//! Anything not given keeps its default.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Prefix shared by every environment key.
pub const ENV_PREFIX: &str = "DOCBASE_";

/// Bounds and defaults for offset/limit pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationSettings {
    pub default_limit: u64,
    pub default_offset: u64,
    pub max_limit: u64,
    pub min_limit: u64,
    pub min_offset: u64,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            default_limit: 100,
            default_offset: 0,
            max_limit: 1000,
            min_limit: 1,
            min_offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `memory://`, `mongodb://...` or `mongodb+srv://...`.
    pub database_url: String,
    pub default_database: String,
    pub pagination: PaginationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "memory://".to_string(),
            default_database: "main".to_string(),
            pagination: PaginationSettings::default(),
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidSetting {
        key: key.to_string(),
        reason: reason.into(),
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which receives full key names such as
    /// `DOCBASE_PAGINATION_MAX_LIMIT`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            lookup(&key).map(|value| (key, value))
        };
        let number = |name: &str, target: &mut u64| -> Result<(), ConfigurationError> {
            if let Some((key, value)) = get(name) {
                *target = value
                    .trim()
                    .parse()
                    .map_err(|_| {
                        invalid(&key, format!("`{}` is not a non-negative integer", value))
                    })?;
            }
            Ok(())
        };

        let mut settings = Settings::default();
        if let Some((_, url)) = get("DATABASE_URL") {
            settings.database_url = url;
        }
        if let Some((_, database)) = get("DEFAULT_DATABASE") {
            settings.default_database = database;
        }
        let pagination = &mut settings.pagination;
        number("PAGINATION_DEFAULT_LIMIT", &mut pagination.default_limit)?;
        number("PAGINATION_DEFAULT_OFFSET", &mut pagination.default_offset)?;
        number("PAGINATION_MAX_LIMIT", &mut pagination.max_limit)?;
        number("PAGINATION_MIN_LIMIT", &mut pagination.min_limit)?;
        number("PAGINATION_MIN_OFFSET", &mut pagination.min_offset)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from JSON. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let settings: Settings =
            serde_json::from_str(json).map_err(|e| invalid("json", e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database_url.trim().is_empty() {
            return Err(invalid("database_url", "must not be empty"));
        }
        if self.default_database.trim().is_empty() {
            return Err(invalid("default_database", "must not be empty"));
        }
        let p = &self.pagination;
        if p.min_limit > p.max_limit {
            return Err(invalid(
                "pagination.min_limit",
                format!("{} exceeds max_limit {}", p.min_limit, p.max_limit),
            ));
        }
        if p.default_limit < p.min_limit || p.default_limit > p.max_limit {
            return Err(invalid(
                "pagination.default_limit",
                format!(
                    "{} is outside {}..={}",
                    p.default_limit, p.min_limit, p.max_limit
                ),
            ));
        }
        if p.default_offset < p.min_offset {
            return Err(invalid(
                "pagination.default_offset",
                format!("{} is below min_offset {}", p.default_offset, p.min_offset),
            ));
        }
        Ok(())
    }
}
