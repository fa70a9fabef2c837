//! Request-scoped query builders: sorting, pagination and projection.
//!
//! These turn user-facing parameters (`orderBy=-age,name`, `limit`/`offset`,
//! `fieldsShow`/`fieldsHide`) into storage-ready structures validated against
//! a record type.

mod pagination;
mod projection;
mod sort;

use bson::Bson;
use serde::{Deserialize, Serialize};

pub use pagination::{Pagination, MAX_WINDOW};
pub use projection::Projection;
pub use sort::{SortBuilder, SortConfig, SortOrder, MAX_SORT_LENGTH};

/// Sort direction, stored as `1` / `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn as_i32(self) -> i32 {
        match self {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Direction::Ascending => Direction::Descending,
            Direction::Descending => Direction::Ascending,
        }
    }
}

impl From<Direction> for i32 {
    fn from(direction: Direction) -> Self {
        direction.as_i32()
    }
}

impl TryFrom<i32> for Direction {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Direction::Ascending),
            -1 => Ok(Direction::Descending),
            other => Err(format!("invalid sort direction {}", other)),
        }
    }
}

impl From<Direction> for Bson {
    fn from(direction: Direction) -> Self {
        Bson::Int32(direction.as_i32())
    }
}
