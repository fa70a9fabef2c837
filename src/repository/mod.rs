//! Repository - typed CRUD over one collection.
//!
//! A [`Repository`] wraps a driver [`Collection`] for a record type `M` and
//! applies the conversion and not-found policy of its [`RepositoryConfig`].
//! Write operations return the driver results unchanged; read operations
//! return [`Fetched`] values.
//!
//! ## Example
//!
//! ```ignore
//! use docbase::{Database, FindOneOptions, Repository, RepositoryConfig};
//!
//! let users = Repository::<User>::open(&db, RepositoryConfig::converting::<User>())?;
//! let inserted = users.insert_record(&user, None).await?;
//! let found = users
//!     .find_one(bson::doc! { "_id": inserted.inserted_id }, FindOneOptions::new(), None)
//!     .await?;
//! ```

mod config;
mod options;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bson::Document as BsonDocument;
use tracing::trace;

use crate::driver::{
    BulkWriteResult, Collection, Database, DeleteResult, IndexModel, InsertManyResult,
    InsertOneResult, Session, UpdateResult, WriteModel,
};
use crate::error::{Error, Result};
use crate::model::{Document, DumpOptions};

pub use config::{Fetched, RepositoryConfig};
pub use options::{FindOneAndModifyOptions, FindOneOptions, FindOptions};

/// Typed repository over the collection of `M`.
pub struct Repository<M> {
    collection: Arc<dyn Collection>,
    config: RepositoryConfig,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Clone for Repository<M> {
    fn clone(&self) -> Self {
        Self {
            collection: Arc::clone(&self.collection),
            config: self.config,
            _marker: PhantomData,
        }
    }
}

impl<M> fmt::Debug for Repository<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("collection", &self.collection.name())
            .field("config", &self.config)
            .finish()
    }
}

impl<M: Document> Repository<M> {
    /// Wrap `collection`. The config is validated here, not on first use.
    pub fn new(collection: Arc<dyn Collection>, config: RepositoryConfig) -> Result<Self> {
        config.validate_for::<M>()?;
        Ok(Self {
            collection,
            config,
            _marker: PhantomData,
        })
    }

    /// Repository over `M::COLLECTION` in `database`.
    pub fn open(database: &Database, config: RepositoryConfig) -> Result<Self> {
        Self::new(database.collection(M::COLLECTION), config)
    }

    pub fn collection(&self) -> &Arc<dyn Collection> {
        &self.collection
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    fn policy(&self, call: Option<RepositoryConfig>) -> Result<RepositoryConfig> {
        match call {
            Some(config) => {
                config.validate_for::<M>()?;
                Ok(config)
            }
            None => Ok(self.config),
        }
    }

    fn trace(&self, operation: &'static str) {
        trace!(collection = self.collection.name(), operation, "repository call");
    }

    /// Apply the conversion and not-found policy to a single result.
    pub fn convert_one(
        &self,
        document: Option<BsonDocument>,
        config: &RepositoryConfig,
    ) -> Result<Option<Fetched<M>>> {
        match document {
            None if config.raise_not_found => Err(Error::not_found(M::NAME)),
            None => Ok(None),
            Some(document) => self.convert(document, config).map(Some),
        }
    }

    /// Apply the conversion policy to a batch of results.
    pub fn convert_many(
        &self,
        documents: Vec<BsonDocument>,
        config: &RepositoryConfig,
    ) -> Result<Vec<Fetched<M>>> {
        documents
            .into_iter()
            .map(|document| self.convert(document, config))
            .collect()
    }

    fn convert(&self, document: BsonDocument, config: &RepositoryConfig) -> Result<Fetched<M>> {
        if !config.convert || document.is_empty() {
            return Ok(Fetched::Raw(document));
        }
        match M::from_db(Some(document.clone()))? {
            Some(record) => Ok(Fetched::Record(record)),
            None => Ok(Fetched::Raw(document)),
        }
    }

    pub async fn insert_one(
        &self,
        document: BsonDocument,
        session: Option<&mut Session>,
    ) -> Result<InsertOneResult> {
        self.trace("insert_one");
        Ok(self.collection.insert_one(document, session).await?)
    }

    /// Serialize `record` with the default [`DumpOptions`] and insert it.
    pub async fn insert_record(
        &self,
        record: &M,
        session: Option<&mut Session>,
    ) -> Result<InsertOneResult> {
        let document = record.to_db(&DumpOptions::default())?;
        self.insert_one(document, session).await
    }

    pub async fn insert_many(
        &self,
        documents: Vec<BsonDocument>,
        ordered: bool,
        session: Option<&mut Session>,
    ) -> Result<InsertManyResult> {
        self.trace("insert_many");
        Ok(self
            .collection
            .insert_many(documents, ordered, session)
            .await?)
    }

    pub async fn replace_one(
        &self,
        filter: BsonDocument,
        replacement: BsonDocument,
        upsert: bool,
        session: Option<&mut Session>,
    ) -> Result<UpdateResult> {
        self.trace("replace_one");
        Ok(self
            .collection
            .replace_one(filter, replacement, upsert, session)
            .await?)
    }

    pub async fn update_one(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
        session: Option<&mut Session>,
    ) -> Result<UpdateResult> {
        self.trace("update_one");
        Ok(self
            .collection
            .update_one(filter, update, upsert, session)
            .await?)
    }

    pub async fn update_many(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
        session: Option<&mut Session>,
    ) -> Result<UpdateResult> {
        self.trace("update_many");
        Ok(self
            .collection
            .update_many(filter, update, upsert, session)
            .await?)
    }

    pub async fn delete_one(
        &self,
        filter: BsonDocument,
        session: Option<&mut Session>,
    ) -> Result<DeleteResult> {
        self.trace("delete_one");
        Ok(self.collection.delete_one(filter, session).await?)
    }

    pub async fn delete_many(
        &self,
        filter: BsonDocument,
        session: Option<&mut Session>,
    ) -> Result<DeleteResult> {
        self.trace("delete_many");
        Ok(self.collection.delete_many(filter, session).await?)
    }

    /// All matching documents. An empty result is never a not-found error.
    pub async fn find(
        &self,
        filter: BsonDocument,
        options: FindOptions,
        session: Option<&mut Session>,
    ) -> Result<Vec<Fetched<M>>> {
        let config = self.policy(options.config)?;
        self.trace("find");
        let documents = self.collection.find(filter, options.spec(), session).await?;
        self.convert_many(documents, &config)
    }

    pub async fn find_one(
        &self,
        filter: BsonDocument,
        options: FindOneOptions,
        session: Option<&mut Session>,
    ) -> Result<Option<Fetched<M>>> {
        let config = self.policy(options.config)?;
        self.trace("find_one");
        let document = self
            .collection
            .find_one(filter, options.sort_document(), options.projection, session)
            .await?;
        self.convert_one(document, &config)
    }

    pub async fn find_one_and_delete(
        &self,
        filter: BsonDocument,
        options: FindOneOptions,
        session: Option<&mut Session>,
    ) -> Result<Option<Fetched<M>>> {
        let config = self.policy(options.config)?;
        self.trace("find_one_and_delete");
        let document = self
            .collection
            .find_one_and_delete(filter, options.sort_document(), options.projection, session)
            .await?;
        self.convert_one(document, &config)
    }

    pub async fn find_one_and_replace(
        &self,
        filter: BsonDocument,
        replacement: BsonDocument,
        options: FindOneAndModifyOptions,
        session: Option<&mut Session>,
    ) -> Result<Option<Fetched<M>>> {
        let config = self.policy(options.config)?;
        self.trace("find_one_and_replace");
        let document = self
            .collection
            .find_one_and_replace(filter, replacement, options.spec(), session)
            .await?;
        self.convert_one(document, &config)
    }

    pub async fn find_one_and_update(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        options: FindOneAndModifyOptions,
        session: Option<&mut Session>,
    ) -> Result<Option<Fetched<M>>> {
        let config = self.policy(options.config)?;
        self.trace("find_one_and_update");
        let document = self
            .collection
            .find_one_and_update(filter, update, options.spec(), session)
            .await?;
        self.convert_one(document, &config)
    }

    pub async fn count_documents(
        &self,
        filter: BsonDocument,
        session: Option<&mut Session>,
    ) -> Result<u64> {
        self.trace("count_documents");
        Ok(self.collection.count_documents(filter, session).await?)
    }

    /// Metadata-based count; takes no filter.
    pub async fn estimated_document_count(&self) -> Result<u64> {
        self.trace("estimated_document_count");
        Ok(self.collection.estimated_document_count().await?)
    }

    /// Run a pipeline. Results are returned raw.
    pub async fn aggregate(
        &self,
        pipeline: Vec<BsonDocument>,
        session: Option<&mut Session>,
    ) -> Result<Vec<BsonDocument>> {
        self.trace("aggregate");
        Ok(self.collection.aggregate(pipeline, session).await?)
    }

    pub async fn bulk_write(
        &self,
        operations: Vec<WriteModel>,
        ordered: bool,
        session: Option<&mut Session>,
    ) -> Result<BulkWriteResult> {
        self.trace("bulk_write");
        Ok(self
            .collection
            .bulk_write(operations, ordered, session)
            .await?)
    }

    pub async fn create_index(
        &self,
        index: IndexModel,
        session: Option<&mut Session>,
    ) -> Result<String> {
        self.trace("create_index");
        Ok(self.collection.create_index(index, session).await?)
    }

    pub async fn create_indexes(
        &self,
        indexes: Vec<IndexModel>,
        session: Option<&mut Session>,
    ) -> Result<Vec<String>> {
        self.trace("create_indexes");
        Ok(self.collection.create_indexes(indexes, session).await?)
    }

    pub async fn drop_index(&self, name: &str, session: Option<&mut Session>) -> Result<()> {
        self.trace("drop_index");
        Ok(self.collection.drop_index(name, session).await?)
    }

    pub async fn list_indexes(&self, session: Option<&mut Session>) -> Result<Vec<IndexModel>> {
        self.trace("list_indexes");
        Ok(self.collection.list_indexes(session).await?)
    }
}
