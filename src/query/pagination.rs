use bson::{doc, Document as BsonDocument};
use serde::Serialize;

use crate::config::PaginationSettings;
use crate::error::ValidationError;

/// Largest skip or limit a storage backend accepts (a signed 64-bit count).
pub const MAX_WINDOW: u64 = i64::MAX as u64;

/// Offset/limit window, bounded by [`PaginationSettings`] and [`MAX_WINDOW`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    skip: u64,
    limit: u64,
}

impl Pagination {
    /// Fails when `skip` is outside `min_offset..=MAX_WINDOW` or `limit` is
    /// outside `min_limit..=max_limit` (capped at [`MAX_WINDOW`]).
    pub fn new(
        skip: u64,
        limit: u64,
        settings: &PaginationSettings,
    ) -> Result<Self, ValidationError> {
        if skip < settings.min_offset || skip > MAX_WINDOW {
            return Err(ValidationError::Pagination {
                field: "skip",
                value: skip,
                min: settings.min_offset,
                max: MAX_WINDOW,
            });
        }
        let max_limit = settings.max_limit.min(MAX_WINDOW);
        if limit < settings.min_limit || limit > max_limit {
            return Err(ValidationError::Pagination {
                field: "limit",
                value: limit,
                min: settings.min_limit,
                max: max_limit,
            });
        }
        Ok(Self { skip, limit })
    }

    /// Build from optional `limit` / `offset` query parameters, falling back
    /// to the configured defaults.
    pub fn from_query(
        limit: Option<u64>,
        offset: Option<u64>,
        settings: &PaginationSettings,
    ) -> Result<Self, ValidationError> {
        Self::new(
            offset.unwrap_or(settings.default_offset),
            limit.unwrap_or(settings.default_limit),
            settings,
        )
    }

    pub fn skip(&self) -> u64 {
        self.skip
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// `$skip` and `$limit` aggregation stages.
    pub fn to_stages(&self) -> Vec<BsonDocument> {
        vec![
            doc! { "$skip": stage_count(self.skip) },
            doc! { "$limit": stage_count(self.limit) },
        ]
    }
}

// `new` keeps both counts within MAX_WINDOW.
fn stage_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PaginationSettings {
        PaginationSettings::default()
    }

    #[test]
    fn valid_bounds_pass_through() {
        let page = Pagination::new(20, 50, &settings()).unwrap();
        assert_eq!((page.skip(), page.limit()), (20, 50));

        let edge = Pagination::new(0, 1000, &settings()).unwrap();
        assert_eq!(edge.limit(), 1000);
        assert_eq!(Pagination::new(0, 1, &settings()).unwrap().limit(), 1);
    }

    #[test]
    fn limit_out_of_range_fails() {
        assert_eq!(
            Pagination::new(0, 0, &settings()).unwrap_err(),
            ValidationError::Pagination {
                field: "limit",
                value: 0,
                min: 1,
                max: 1000
            }
        );
        assert!(Pagination::new(0, 1001, &settings()).is_err());
    }

    #[test]
    fn skip_below_minimum_fails() {
        let custom = PaginationSettings {
            min_offset: 5,
            default_offset: 5,
            ..settings()
        };
        let err = Pagination::new(4, 10, &custom).unwrap_err();
        assert!(matches!(err, ValidationError::Pagination { field: "skip", .. }));
    }

    #[test]
    fn counts_stay_in_signed_range() {
        let err = Pagination::new(u64::MAX, 10, &settings()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::Pagination {
                field: "skip",
                value: u64::MAX,
                min: 0,
                max: MAX_WINDOW
            }
        );

        let edge = Pagination::new(MAX_WINDOW, 10, &settings()).unwrap();
        assert_eq!(edge.to_stages()[0], doc! { "$skip": i64::MAX });

        let unbounded = PaginationSettings {
            max_limit: u64::MAX,
            ..settings()
        };
        let err = Pagination::new(0, MAX_WINDOW + 1, &unbounded).unwrap_err();
        assert!(matches!(err, ValidationError::Pagination { field: "limit", max: MAX_WINDOW, .. }));
    }

    #[test]
    fn query_defaults() {
        let page = Pagination::from_query(None, None, &settings()).unwrap();
        assert_eq!((page.skip(), page.limit()), (0, 100));
        let page = Pagination::from_query(Some(5), Some(10), &settings()).unwrap();
        assert_eq!((page.skip(), page.limit()), (10, 5));
    }

    #[test]
    fn renders_pipeline_stages() {
        let page = Pagination::new(10, 5, &settings()).unwrap();
        assert_eq!(
            page.to_stages(),
            vec![doc! { "$skip": 10_i64 }, doc! { "$limit": 5_i64 }]
        );
    }
}
