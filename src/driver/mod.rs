//! Storage driver seam.
//!
//! Repositories never talk to a database directly; they go through the
//! [`Client`] and [`Collection`] traits defined here. Two backends ship with
//! the crate:
//!
//! - [`InMemoryClient`]: a process-local document store used for tests and
//!   development.
//! - `MongoClient` (feature `mongodb`): a thin mapping onto the official
//!   MongoDB driver.
//!
//! The host application owns the client: it is created once at startup
//! (see [`connect`]), handed to repositories through a [`Database`] handle
//! and closed explicitly at shutdown.
//!
//! ## Example
//!
//! ```ignore
//! use docbase::{Client, Database, InMemoryClient};
//! use std::sync::Arc;
//!
//! let client = Arc::new(InMemoryClient::new());
//! let db = Database::new(client.clone(), "main");
//! let users = db.collection("users");
//! users.insert_one(bson::doc! { "name": "a" }, None).await?;
//! client.close().await?;
//! ```

mod index;
mod memory;
#[cfg(feature = "mongodb")]
mod mongo;
mod results;
mod session;

use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;
use thiserror::Error;

use crate::config::Settings;
use crate::error::{ConfigurationError, Result};

pub use index::{IndexModel, ID_INDEX};
pub use memory::{InMemoryClient, InMemoryCollection};
#[cfg(feature = "mongodb")]
pub use mongo::{MongoClient, MongoCollection};
pub use results::{
    BulkWriteFailure, BulkWriteResult, DeleteResult, InsertManyResult, InsertOneResult,
    UpdateResult, WriteModel,
};
pub use session::Session;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum DriverError {
    /// `key` is rendered the way the server reports it, e.g. `{ _id: 1 }`.
    #[error("E11000 duplicate key error collection: {collection} index: {index} dup key: {key}")]
    DuplicateKey {
        collection: String,
        index: String,
        key: String,
    },

    #[error("collection already exists: {0}")]
    NamespaceExists(String),

    #[error("ns does not exist: {0}")]
    NamespaceNotFound(String),

    #[error("index not found with name [{0}]")]
    IndexNotFound(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("client is closed")]
    Closed,

    #[error("bulk write failed with {} error(s)", .errors.len())]
    BulkWrite {
        errors: Vec<BulkWriteFailure>,
        partial: BulkWriteResult,
    },

    #[cfg(feature = "mongodb")]
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
}

/// Which version of a document `find_one_and_*` hands back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    Before,
    #[default]
    After,
}

/// Read options understood by every backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    pub sort: Option<Document>,
    pub skip: u64,
    /// `0` means no limit.
    pub limit: u64,
    pub projection: Option<Document>,
}

/// Options for the `find_one_and_*` family.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindAndModifySpec {
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub upsert: bool,
    pub return_document: ReturnDocument,
}

/// A connection to a document store.
#[async_trait]
pub trait Client: Send + Sync {
    /// Handle to a collection. Collections are created lazily on first write.
    fn collection(&self, database: &str, name: &str) -> Arc<dyn Collection>;

    /// Start a session that callers may thread through several operations.
    async fn start_session(&self) -> Result<Session, DriverError>;

    /// Create an empty collection. Fails with
    /// [`DriverError::NamespaceExists`] when it already exists.
    async fn create_collection(&self, database: &str, name: &str) -> Result<(), DriverError>;

    /// Drop a collection with its documents and indexes. Dropping a missing
    /// collection succeeds.
    async fn drop_collection(&self, database: &str, name: &str) -> Result<(), DriverError>;

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, DriverError>;

    async fn list_database_names(&self) -> Result<Vec<String>, DriverError>;

    async fn drop_database(&self, database: &str) -> Result<(), DriverError>;

    /// Release the connection pool. Part of the host application's shutdown.
    async fn close(&self) -> Result<(), DriverError>;
}

/// Collection-level primitives. All methods take an optional session which
/// is passed to the backend untouched.
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn insert_one(
        &self,
        document: Document,
        session: Option<&mut Session>,
    ) -> Result<InsertOneResult, DriverError>;

    async fn insert_many(
        &self,
        documents: Vec<Document>,
        ordered: bool,
        session: Option<&mut Session>,
    ) -> Result<InsertManyResult, DriverError>;

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
        session: Option<&mut Session>,
    ) -> Result<UpdateResult, DriverError>;

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        session: Option<&mut Session>,
    ) -> Result<UpdateResult, DriverError>;

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        session: Option<&mut Session>,
    ) -> Result<UpdateResult, DriverError>;

    async fn delete_one(
        &self,
        filter: Document,
        session: Option<&mut Session>,
    ) -> Result<DeleteResult, DriverError>;

    async fn delete_many(
        &self,
        filter: Document,
        session: Option<&mut Session>,
    ) -> Result<DeleteResult, DriverError>;

    async fn find(
        &self,
        filter: Document,
        spec: FindSpec,
        session: Option<&mut Session>,
    ) -> Result<Vec<Document>, DriverError>;

    async fn find_one(
        &self,
        filter: Document,
        sort: Option<Document>,
        projection: Option<Document>,
        session: Option<&mut Session>,
    ) -> Result<Option<Document>, DriverError>;

    async fn find_one_and_delete(
        &self,
        filter: Document,
        sort: Option<Document>,
        projection: Option<Document>,
        session: Option<&mut Session>,
    ) -> Result<Option<Document>, DriverError>;

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        spec: FindAndModifySpec,
        session: Option<&mut Session>,
    ) -> Result<Option<Document>, DriverError>;

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        spec: FindAndModifySpec,
        session: Option<&mut Session>,
    ) -> Result<Option<Document>, DriverError>;

    async fn count_documents(
        &self,
        filter: Document,
        session: Option<&mut Session>,
    ) -> Result<u64, DriverError>;

    /// Approximate count from collection metadata; takes no filter.
    async fn estimated_document_count(&self) -> Result<u64, DriverError>;

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        session: Option<&mut Session>,
    ) -> Result<Vec<Document>, DriverError>;

    /// Apply a batch of writes. An empty batch is an
    /// [`DriverError::InvalidOperation`] on every backend.
    async fn bulk_write(
        &self,
        operations: Vec<WriteModel>,
        ordered: bool,
        session: Option<&mut Session>,
    ) -> Result<BulkWriteResult, DriverError>;

    /// Create an index and return its name. Creating an identical index
    /// again is a no-op.
    async fn create_index(
        &self,
        index: IndexModel,
        session: Option<&mut Session>,
    ) -> Result<String, DriverError>;

    /// Create several indexes; names come back in input order.
    async fn create_indexes(
        &self,
        indexes: Vec<IndexModel>,
        session: Option<&mut Session>,
    ) -> Result<Vec<String>, DriverError>;

    async fn drop_index(&self, name: &str, session: Option<&mut Session>)
        -> Result<(), DriverError>;

    /// Every index of the collection, `_id_` first, with names resolved.
    async fn list_indexes(
        &self,
        session: Option<&mut Session>,
    ) -> Result<Vec<IndexModel>, DriverError>;

    async fn list_index_names(
        &self,
        session: Option<&mut Session>,
    ) -> Result<Vec<String>, DriverError> {
        Ok(self
            .list_indexes(session)
            .await?
            .iter()
            .map(IndexModel::resolved_name)
            .collect())
    }
}

/// A named database on a shared client.
#[derive(Clone)]
pub struct Database {
    client: Arc<dyn Client>,
    name: String,
}

impl Database {
    pub fn new(client: Arc<dyn Client>, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    pub fn collection(&self, name: &str) -> Arc<dyn Collection> {
        self.client.collection(&self.name, name)
    }

    pub async fn list_collection_names(&self) -> Result<Vec<String>, DriverError> {
        self.client.list_collection_names(&self.name).await
    }

    pub async fn create_collection(&self, name: &str) -> Result<Arc<dyn Collection>, DriverError> {
        self.client.create_collection(&self.name, name).await?;
        Ok(self.collection(name))
    }

    /// Like [`Database::create_collection`], but an existing collection is
    /// not an error.
    pub async fn ensure_collection(&self, name: &str) -> Result<Arc<dyn Collection>, DriverError> {
        match self.client.create_collection(&self.name, name).await {
            Ok(()) | Err(DriverError::NamespaceExists(_)) => Ok(self.collection(name)),
            Err(err) => Err(err),
        }
    }

    pub async fn drop_collection(&self, name: &str) -> Result<(), DriverError> {
        self.client.drop_collection(&self.name, name).await
    }

    pub async fn drop(&self) -> Result<(), DriverError> {
        self.client.drop_database(&self.name).await
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}

/// Open a client for `settings.database_url` and return a handle to the
/// default database.
///
/// `memory://` selects the in-memory backend; `mongodb://` and
/// `mongodb+srv://` need the `mongodb` feature.
pub async fn connect(settings: &Settings) -> Result<Database> {
    let url = settings.database_url.as_str();
    let client: Arc<dyn Client> = if url.starts_with("memory://") {
        Arc::new(InMemoryClient::new())
    } else if url.starts_with("mongodb://") || url.starts_with("mongodb+srv://") {
        connect_mongo(url).await?
    } else {
        return Err(ConfigurationError::UnsupportedUrl(url.to_string()).into());
    };
    Ok(Database::new(client, settings.default_database.clone()))
}

#[cfg(feature = "mongodb")]
async fn connect_mongo(url: &str) -> Result<Arc<dyn Client>> {
    Ok(Arc::new(MongoClient::connect(url).await?))
}

#[cfg(not(feature = "mongodb"))]
async fn connect_mongo(_url: &str) -> Result<Arc<dyn Client>> {
    Err(ConfigurationError::DriverUnavailable("mongodb").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn connect_memory_url() {
        let settings = Settings::default();
        let db = connect(&settings).await.unwrap();
        assert_eq!(db.name(), "main");
        db.collection("things")
            .insert_one(bson::doc! { "a": 1 }, None)
            .await
            .unwrap();
        assert_eq!(db.list_collection_names().await.unwrap(), vec!["things"]);
    }

    #[tokio::test]
    async fn connect_rejects_unknown_scheme() {
        let settings = Settings {
            database_url: "redis://localhost".into(),
            ..Settings::default()
        };
        let err = connect(&settings).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnsupportedUrl(_))
        ));
    }

    #[test]
    fn duplicate_key_message() {
        let err = DriverError::DuplicateKey {
            collection: "main.users".into(),
            index: ID_INDEX.into(),
            key: "{ _id: ObjectId(\"5f5cf6f50cde9ec07786b294\") }".into(),
        };
        assert_eq!(
            err.to_string(),
            "E11000 duplicate key error collection: main.users index: _id_ \
             dup key: { _id: ObjectId(\"5f5cf6f50cde9ec07786b294\") }"
        );
    }

    #[tokio::test]
    async fn database_manages_collections() {
        let db = connect(&Settings::default()).await.unwrap();
        db.create_collection("audit").await.unwrap();
        assert!(matches!(
            db.create_collection("audit").await,
            Err(DriverError::NamespaceExists(_))
        ));
        let audit = db.ensure_collection("audit").await.unwrap();
        assert_eq!(audit.name(), "audit");
        assert_eq!(db.list_collection_names().await.unwrap(), vec!["audit"]);
        assert_eq!(db.client().list_database_names().await.unwrap(), vec!["main"]);

        db.drop_collection("audit").await.unwrap();
        assert!(db.list_collection_names().await.unwrap().is_empty());
        assert!(db.client().list_database_names().await.unwrap().is_empty());
        db.drop_collection("audit").await.unwrap();
    }
}
