//! Document models - typed records stored as BSON documents.
//!
//! A record type implements [`Document`] (usually through
//! `#[derive(Document)]`) and gets `from_db` / `to_db` for free: the
//! identifier is stored under `_id`, missing identifiers are generated on
//! the way out, and timestamped records derive `created_at` from the
//! identifier.
//!
//! ## Example
//!
//! ```ignore
//! use docbase::{Document, DumpOptions, ObjectId};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Document)]
//! #[document(collection = "users", sortable("name", "age"), default_sort = "-age")]
//! struct User {
//!     id: Option<ObjectId>,
//!     name: String,
//!     age: u32,
//! }
//!
//! let stored = user.to_db(&DumpOptions::default())?;
//! let loaded = User::from_db(Some(stored))?;
//! ```

mod dump;

use std::any::TypeId;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::oid::{ObjectId, ID_FIELD};
use crate::query::Direction;

pub use dump::DumpOptions;

/// Storage key of the creation timestamp of timestamped records.
pub const CREATED_AT: &str = "created_at";
/// Storage key of the last-update timestamp of timestamped records.
pub const UPDATED_AT: &str = "updated_at";

/// A record type stored in a document collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Human-readable name, used in not-found errors.
    const NAME: &'static str;

    /// Collection the records live in.
    const COLLECTION: &'static str;

    /// Whether `created_at` / `updated_at` are maintained.
    const TIMESTAMPS: bool = false;

    /// Serialized key of the identifier field before it is renamed to `_id`.
    const ID_KEY: &'static str = "id";

    fn id(&self) -> Option<ObjectId>;

    fn set_id(&mut self, id: ObjectId);

    /// `(field name, storage key)` pairs for fields stored under another key.
    fn field_aliases() -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Instance used by [`DumpOptions::exclude_defaults`].
    fn defaults() -> Option<Self> {
        None
    }

    /// Build a record from a stored document.
    ///
    /// Absent or empty input means "no record" and yields `Ok(None)`. When
    /// `_id` is missing (projections can drop it) the record has no id.
    fn from_db(data: Option<bson::Document>) -> Result<Option<Self>> {
        dump::load(data)
    }

    /// Serialize for storage. `_id` always comes first and is generated
    /// when the record has none.
    fn to_db(&self, options: &DumpOptions) -> Result<bson::Document> {
        dump::dump(self, options)
    }

    /// Return the identifier, generating and storing one if missing.
    fn ensure_id(&mut self) -> ObjectId {
        match self.id() {
            Some(id) => id,
            None => {
                let id = ObjectId::new();
                self.set_id(id);
                id
            }
        }
    }

    /// Resolve a field name to its storage key.
    fn storage_key(name: &str) -> &str {
        if name == "id" || name == Self::ID_KEY {
            return ID_FIELD;
        }
        Self::field_aliases()
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, key)| *key)
            .unwrap_or(name)
    }
}

/// Records carrying `created_at` / `updated_at`.
///
/// `created_at` is always the identifier's generation time. `updated_at`
/// only moves when [`mark_updated`](Timestamped::mark_updated) is called;
/// serializing a record never touches it.
pub trait Timestamped: Document {
    fn created_at(&self) -> Option<bson::DateTime>;

    fn updated_at(&self) -> Option<bson::DateTime>;

    fn set_updated_at(&mut self, at: bson::DateTime);

    fn mark_updated(&mut self) {
        self.set_updated_at(bson::DateTime::now());
    }
}

/// Sorting capabilities of a record type.
pub trait Sortable: Document {
    /// Fields callers may sort by.
    fn sortable_fields() -> &'static [&'static str];

    /// Order used when a request names no usable field.
    fn default_sort() -> &'static [(&'static str, Direction)] {
        &[(ID_FIELD, Direction::Descending)]
    }
}

/// Runtime identity of a record type, used for conversion targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: &'static str,
    pub type_id: TypeId,
}

impl ModelInfo {
    pub fn of<M: Document>() -> Self {
        Self {
            name: M::NAME,
            type_id: TypeId::of::<M>(),
        }
    }

    pub fn is<M: Document>(&self) -> bool {
        self.type_id == TypeId::of::<M>()
    }
}
