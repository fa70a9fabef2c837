//! Document identity.
//!
//! Identifiers are 12-byte, client-generated ObjectIds: a 4-byte big-endian
//! UNIX timestamp (seconds) followed by process-unique and counter bytes. The
//! embedded timestamp doubles as the record's creation instant, so nothing
//! else has to be stored or read from the clock to know when a record was
//! created.

use std::fmt;
use std::str::FromStr;

use bson::Bson;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Storage key reserved for the identifier.
pub const ID_FIELD: &str = "_id";

/// A time-ordered, globally unique 12-byte identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(bson::oid::ObjectId);

impl ObjectId {
    /// Generate a fresh identifier stamped with the current second.
    pub fn new() -> Self {
        Self(bson::oid::ObjectId::new())
    }

    /// Parse a 24-character hex string.
    pub fn parse_str(value: impl AsRef<str>) -> Result<Self, ValidationError> {
        let value = value.as_ref();
        bson::oid::ObjectId::parse_str(value)
            .map(Self)
            .map_err(|_| ValidationError::InvalidObjectId {
                value: value.to_string(),
            })
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bson::oid::ObjectId::from_bytes(bytes))
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0.bytes()
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Embedded creation instant as a BSON datetime (whole seconds).
    pub fn timestamp(&self) -> bson::DateTime {
        self.0.timestamp()
    }

    /// Embedded creation instant in UTC. No clock read is involved.
    pub fn generated_at(&self) -> DateTime<Utc> {
        self.0.timestamp().to_chrono()
    }

    pub fn into_inner(self) -> bson::oid::ObjectId {
        self.0
    }

    /// Interpret a stored `_id` value. Accepts native ObjectIds and their
    /// hex string form.
    pub fn from_bson(value: &Bson) -> Result<Self, ValidationError> {
        match value {
            Bson::ObjectId(oid) => Ok(Self(*oid)),
            Bson::String(hex) => Self::parse_str(hex),
            other => Err(ValidationError::InvalidObjectId {
                value: other.to_string(),
            }),
        }
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl From<bson::oid::ObjectId> for ObjectId {
    fn from(oid: bson::oid::ObjectId) -> Self {
        Self(oid)
    }
}

impl From<ObjectId> for bson::oid::ObjectId {
    fn from(oid: ObjectId) -> Self {
        oid.0
    }
}

impl From<ObjectId> for Bson {
    fn from(oid: ObjectId) -> Self {
        Bson::ObjectId(oid.0)
    }
}

/// Produce a fresh identifier.
pub fn generate_identifier() -> ObjectId {
    ObjectId::new()
}

/// Parse an identifier from its hex form.
pub fn parse_identifier(value: &str) -> Result<ObjectId, ValidationError> {
    ObjectId::parse_str(value)
}
