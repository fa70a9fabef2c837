//! MongoDB backend on top of the official driver.

use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;
use futures::TryStreamExt;
use mongodb::error::ErrorKind;
use mongodb::options::{
    FindOneAndDeleteOptions, FindOneAndReplaceOptions, FindOneAndUpdateOptions, FindOneOptions,
    FindOptions, IndexOptions, InsertManyOptions, ReplaceOptions,
    ReturnDocument as MongoReturnDocument, UpdateOptions,
};
use mongodb::ClientSession;
use tracing::debug;

use super::{
    BulkWriteFailure, BulkWriteResult, Client, Collection, DeleteResult, DriverError,
    FindAndModifySpec, FindSpec, IndexModel, InsertManyResult, InsertOneResult, ReturnDocument,
    Session, UpdateResult, WriteModel,
};

const NAMESPACE_NOT_FOUND: i32 = 26;
const INDEX_NOT_FOUND: i32 = 27;
const NAMESPACE_EXISTS: i32 = 48;

fn mongo_session(session: Option<&mut Session>) -> Option<&mut ClientSession> {
    session.and_then(Session::as_mongo)
}

fn command_code(err: &mongodb::error::Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

fn to_mongo_index(index: IndexModel) -> mongodb::IndexModel {
    let options = IndexOptions::builder()
        .name(index.name)
        .unique(index.unique.then_some(true))
        .build();
    mongodb::IndexModel::builder()
        .keys(index.keys)
        .options(options)
        .build()
}

fn from_mongo_index(index: mongodb::IndexModel) -> IndexModel {
    let (name, unique) = match index.options {
        Some(options) => (options.name, options.unique.unwrap_or(false)),
        None => (None, false),
    };
    IndexModel {
        keys: index.keys,
        name,
        unique,
    }
}

fn return_document(value: ReturnDocument) -> MongoReturnDocument {
    match value {
        ReturnDocument::Before => MongoReturnDocument::Before,
        ReturnDocument::After => MongoReturnDocument::After,
    }
}

fn update_result(result: mongodb::results::UpdateResult) -> UpdateResult {
    UpdateResult {
        acknowledged: true,
        matched_count: result.matched_count,
        modified_count: result.modified_count,
        upserted_id: result.upserted_id,
    }
}

/// [`Client`] backed by a `mongodb::Client` connection pool.
#[derive(Debug, Clone)]
pub struct MongoClient {
    inner: mongodb::Client,
    sessions: Arc<std::sync::atomic::AtomicU64>,
}

impl MongoClient {
    pub async fn connect(url: &str) -> Result<Self, DriverError> {
        let inner = mongodb::Client::with_uri_str(url).await?;
        debug!("connected to mongodb");
        Ok(Self::from_client(inner))
    }

    pub fn from_client(inner: mongodb::Client) -> Self {
        Self {
            inner,
            sessions: Arc::default(),
        }
    }

    pub fn inner(&self) -> &mongodb::Client {
        &self.inner
    }
}

#[async_trait]
impl Client for MongoClient {
    fn collection(&self, database: &str, name: &str) -> Arc<dyn Collection> {
        Arc::new(MongoCollection {
            inner: self.inner.database(database).collection(name),
        })
    }

    async fn start_session(&self) -> Result<Session, DriverError> {
        let session = self.inner.start_session(None).await?;
        let id = self
            .sessions
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        Ok(Session::mongo(id, session))
    }

    async fn create_collection(&self, database: &str, name: &str) -> Result<(), DriverError> {
        let namespace = format!("{}.{}", database, name);
        match self.inner.database(database).create_collection(name, None).await {
            Ok(()) => Ok(()),
            Err(err) if command_code(&err) == Some(NAMESPACE_EXISTS) => {
                Err(DriverError::NamespaceExists(namespace))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn drop_collection(&self, database: &str, name: &str) -> Result<(), DriverError> {
        self.inner
            .database(database)
            .collection::<Document>(name)
            .drop(None)
            .await?;
        Ok(())
    }

    async fn list_database_names(&self) -> Result<Vec<String>, DriverError> {
        let mut names = self.inner.list_database_names(None, None).await?;
        names.sort();
        Ok(names)
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, DriverError> {
        let mut names = self
            .inner
            .database(database)
            .list_collection_names(None)
            .await?;
        names.sort();
        Ok(names)
    }

    async fn drop_database(&self, database: &str) -> Result<(), DriverError> {
        self.inner.database(database).drop(None).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.inner.clone().shutdown().await;
        debug!("mongodb client shut down");
        Ok(())
    }
}

/// [`Collection`] over `mongodb::Collection<Document>`.
#[derive(Debug, Clone)]
pub struct MongoCollection {
    inner: mongodb::Collection<Document>,
}

impl MongoCollection {
    async fn apply_write(
        &self,
        operation: WriteModel,
        index: usize,
        totals: &mut BulkWriteResult,
        session: Option<&mut Session>,
    ) -> Result<(), DriverError> {
        match operation {
            WriteModel::InsertOne { document } => {
                self.insert_one(document, session).await?;
                totals.inserted_count += 1;
            }
            WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            } => {
                let result = self.update_one(filter, update, upsert, session).await?;
                totals.record_update(index, result);
            }
            WriteModel::UpdateMany {
                filter,
                update,
                upsert,
            } => {
                let result = self.update_many(filter, update, upsert, session).await?;
                totals.record_update(index, result);
            }
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => {
                let result = self
                    .replace_one(filter, replacement, upsert, session)
                    .await?;
                totals.record_update(index, result);
            }
            WriteModel::DeleteOne { filter } => {
                totals.deleted_count += self.delete_one(filter, session).await?.deleted_count;
            }
            WriteModel::DeleteMany { filter } => {
                totals.deleted_count += self.delete_many(filter, session).await?.deleted_count;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Collection for MongoCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn insert_one(
        &self,
        document: Document,
        session: Option<&mut Session>,
    ) -> Result<InsertOneResult, DriverError> {
        let result = match mongo_session(session) {
            Some(s) => self.inner.insert_one_with_session(document, None, s).await?,
            None => self.inner.insert_one(document, None).await?,
        };
        Ok(InsertOneResult {
            acknowledged: true,
            inserted_id: result.inserted_id,
        })
    }

    async fn insert_many(
        &self,
        documents: Vec<Document>,
        ordered: bool,
        session: Option<&mut Session>,
    ) -> Result<InsertManyResult, DriverError> {
        let options = InsertManyOptions::builder().ordered(ordered).build();
        let result = match mongo_session(session) {
            Some(s) => {
                self.inner
                    .insert_many_with_session(documents, options, s)
                    .await?
            }
            None => self.inner.insert_many(documents, options).await?,
        };
        let mut ids: Vec<_> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(InsertManyResult {
            acknowledged: true,
            inserted_ids: ids.into_iter().map(|(_, id)| id).collect(),
        })
    }

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
        session: Option<&mut Session>,
    ) -> Result<UpdateResult, DriverError> {
        let options = ReplaceOptions::builder().upsert(upsert).build();
        let result = match mongo_session(session) {
            Some(s) => {
                self.inner
                    .replace_one_with_session(filter, replacement, options, s)
                    .await?
            }
            None => self.inner.replace_one(filter, replacement, options).await?,
        };
        Ok(update_result(result))
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        session: Option<&mut Session>,
    ) -> Result<UpdateResult, DriverError> {
        let options = UpdateOptions::builder().upsert(upsert).build();
        let result = match mongo_session(session) {
            Some(s) => {
                self.inner
                    .update_one_with_session(filter, update, options, s)
                    .await?
            }
            None => self.inner.update_one(filter, update, options).await?,
        };
        Ok(update_result(result))
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        session: Option<&mut Session>,
    ) -> Result<UpdateResult, DriverError> {
        let options = UpdateOptions::builder().upsert(upsert).build();
        let result = match mongo_session(session) {
            Some(s) => {
                self.inner
                    .update_many_with_session(filter, update, options, s)
                    .await?
            }
            None => self.inner.update_many(filter, update, options).await?,
        };
        Ok(update_result(result))
    }

    async fn delete_one(
        &self,
        filter: Document,
        session: Option<&mut Session>,
    ) -> Result<DeleteResult, DriverError> {
        let result = match mongo_session(session) {
            Some(s) => self.inner.delete_one_with_session(filter, None, s).await?,
            None => self.inner.delete_one(filter, None).await?,
        };
        Ok(DeleteResult {
            acknowledged: true,
            deleted_count: result.deleted_count,
        })
    }

    async fn delete_many(
        &self,
        filter: Document,
        session: Option<&mut Session>,
    ) -> Result<DeleteResult, DriverError> {
        let result = match mongo_session(session) {
            Some(s) => self.inner.delete_many_with_session(filter, None, s).await?,
            None => self.inner.delete_many(filter, None).await?,
        };
        Ok(DeleteResult {
            acknowledged: true,
            deleted_count: result.deleted_count,
        })
    }

    async fn find(
        &self,
        filter: Document,
        spec: FindSpec,
        session: Option<&mut Session>,
    ) -> Result<Vec<Document>, DriverError> {
        let limit = i64::try_from(spec.limit).map_err(|_| {
            DriverError::InvalidOperation(format!("limit {} is out of range", spec.limit))
        })?;
        let options = FindOptions::builder()
            .sort(spec.sort)
            .skip((spec.skip > 0).then_some(spec.skip))
            .limit((limit > 0).then_some(limit))
            .projection(spec.projection)
            .build();
        match mongo_session(session) {
            Some(s) => {
                let mut cursor = self.inner.find_with_session(filter, options, s).await?;
                Ok(cursor.stream(s).try_collect().await?)
            }
            None => Ok(self.inner.find(filter, options).await?.try_collect().await?),
        }
    }

    async fn find_one(
        &self,
        filter: Document,
        sort: Option<Document>,
        projection: Option<Document>,
        session: Option<&mut Session>,
    ) -> Result<Option<Document>, DriverError> {
        let options = FindOneOptions::builder()
            .sort(sort)
            .projection(projection)
            .build();
        let found = match mongo_session(session) {
            Some(s) => self.inner.find_one_with_session(filter, options, s).await?,
            None => self.inner.find_one(filter, options).await?,
        };
        Ok(found)
    }

    async fn find_one_and_delete(
        &self,
        filter: Document,
        sort: Option<Document>,
        projection: Option<Document>,
        session: Option<&mut Session>,
    ) -> Result<Option<Document>, DriverError> {
        let options = FindOneAndDeleteOptions::builder()
            .sort(sort)
            .projection(projection)
            .build();
        let found = match mongo_session(session) {
            Some(s) => {
                self.inner
                    .find_one_and_delete_with_session(filter, options, s)
                    .await?
            }
            None => self.inner.find_one_and_delete(filter, options).await?,
        };
        Ok(found)
    }

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        spec: FindAndModifySpec,
        session: Option<&mut Session>,
    ) -> Result<Option<Document>, DriverError> {
        let options = FindOneAndReplaceOptions::builder()
            .sort(spec.sort)
            .projection(spec.projection)
            .upsert(spec.upsert)
            .return_document(return_document(spec.return_document))
            .build();
        let found = match mongo_session(session) {
            Some(s) => {
                self.inner
                    .find_one_and_replace_with_session(filter, replacement, options, s)
                    .await?
            }
            None => {
                self.inner
                    .find_one_and_replace(filter, replacement, options)
                    .await?
            }
        };
        Ok(found)
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        spec: FindAndModifySpec,
        session: Option<&mut Session>,
    ) -> Result<Option<Document>, DriverError> {
        let options = FindOneAndUpdateOptions::builder()
            .sort(spec.sort)
            .projection(spec.projection)
            .upsert(spec.upsert)
            .return_document(return_document(spec.return_document))
            .build();
        let found = match mongo_session(session) {
            Some(s) => {
                self.inner
                    .find_one_and_update_with_session(filter, update, options, s)
                    .await?
            }
            None => self.inner.find_one_and_update(filter, update, options).await?,
        };
        Ok(found)
    }

    async fn count_documents(
        &self,
        filter: Document,
        session: Option<&mut Session>,
    ) -> Result<u64, DriverError> {
        let count = match mongo_session(session) {
            Some(s) => {
                self.inner
                    .count_documents_with_session(filter, None, s)
                    .await?
            }
            None => self.inner.count_documents(filter, None).await?,
        };
        Ok(count)
    }

    async fn estimated_document_count(&self) -> Result<u64, DriverError> {
        Ok(self.inner.estimated_document_count(None).await?)
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        session: Option<&mut Session>,
    ) -> Result<Vec<Document>, DriverError> {
        match mongo_session(session) {
            Some(s) => {
                let mut cursor = self.inner.aggregate_with_session(pipeline, None, s).await?;
                Ok(cursor.stream(s).try_collect().await?)
            }
            None => Ok(self.inner.aggregate(pipeline, None).await?.try_collect().await?),
        }
    }

    /// Sends one request per operation, so a batch is neither atomic nor a
    /// single round trip. Failures are collected the way a server-side bulk
    /// write reports them.
    async fn bulk_write(
        &self,
        operations: Vec<WriteModel>,
        ordered: bool,
        mut session: Option<&mut Session>,
    ) -> Result<BulkWriteResult, DriverError> {
        if operations.is_empty() {
            return Err(DriverError::InvalidOperation(
                "bulk write needs at least one operation".to_string(),
            ));
        }
        let mut totals = BulkWriteResult::acknowledged();
        let mut errors = Vec::new();
        for (index, operation) in operations.into_iter().enumerate() {
            let result = self
                .apply_write(operation, index, &mut totals, session.as_deref_mut())
                .await;
            if let Err(err) = result {
                errors.push(BulkWriteFailure {
                    index,
                    message: err.to_string(),
                });
                if ordered {
                    break;
                }
            }
        }
        if errors.is_empty() {
            Ok(totals)
        } else {
            Err(DriverError::BulkWrite {
                errors,
                partial: totals,
            })
        }
    }

    async fn create_index(
        &self,
        index: IndexModel,
        session: Option<&mut Session>,
    ) -> Result<String, DriverError> {
        let index = to_mongo_index(index);
        let result = match mongo_session(session) {
            Some(s) => self.inner.create_index_with_session(index, None, s).await?,
            None => self.inner.create_index(index, None).await?,
        };
        Ok(result.index_name)
    }

    async fn create_indexes(
        &self,
        indexes: Vec<IndexModel>,
        session: Option<&mut Session>,
    ) -> Result<Vec<String>, DriverError> {
        if indexes.is_empty() {
            return Err(DriverError::InvalidOperation(
                "indexes must be a non-empty list".to_string(),
            ));
        }
        let indexes: Vec<_> = indexes.into_iter().map(to_mongo_index).collect();
        let result = match mongo_session(session) {
            Some(s) => {
                self.inner
                    .create_indexes_with_session(indexes, None, s)
                    .await?
            }
            None => self.inner.create_indexes(indexes, None).await?,
        };
        Ok(result.index_names)
    }

    async fn drop_index(
        &self,
        name: &str,
        session: Option<&mut Session>,
    ) -> Result<(), DriverError> {
        let result = match mongo_session(session) {
            Some(s) => self.inner.drop_index_with_session(name, None, s).await,
            None => self.inner.drop_index(name, None).await,
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if command_code(&err) == Some(INDEX_NOT_FOUND) => {
                Err(DriverError::IndexNotFound(name.to_string()))
            }
            Err(err) if command_code(&err) == Some(NAMESPACE_NOT_FOUND) => {
                Err(DriverError::NamespaceNotFound(self.inner.namespace().to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_indexes(
        &self,
        session: Option<&mut Session>,
    ) -> Result<Vec<IndexModel>, DriverError> {
        let result: Result<Vec<mongodb::IndexModel>, mongodb::error::Error> =
            match mongo_session(session) {
                Some(s) => match self.inner.list_indexes_with_session(None, s).await {
                    Ok(mut cursor) => cursor.stream(s).try_collect().await,
                    Err(err) => Err(err),
                },
                None => match self.inner.list_indexes(None).await {
                    Ok(cursor) => cursor.try_collect().await,
                    Err(err) => Err(err),
                },
            };
        match result {
            Ok(indexes) => Ok(indexes.into_iter().map(from_mongo_index).collect()),
            Err(err) if command_code(&err) == Some(NAMESPACE_NOT_FOUND) => {
                Err(DriverError::NamespaceNotFound(self.inner.namespace().to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Client construction is lazy; these calls fail before any round trip.
    async fn unreachable_collection() -> Arc<dyn Collection> {
        let client = MongoClient::connect("mongodb://127.0.0.1:1").await.unwrap();
        client.collection("main", "users")
    }

    #[tokio::test]
    async fn empty_bulk_write_is_rejected_locally() {
        let users = unreachable_collection().await;
        let err = users.bulk_write(Vec::new(), false, None).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidOperation(_)));
        let err = users.create_indexes(Vec::new(), None).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn oversized_limit_is_rejected_locally() {
        let users = unreachable_collection().await;
        let spec = FindSpec {
            limit: u64::MAX,
            ..FindSpec::default()
        };
        let err = users.find(bson::doc! {}, spec, None).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidOperation(_)));
    }

    #[test]
    fn index_options_round_trip() {
        let index = IndexModel::new(bson::doc! { "email": 1 })
            .name("by_email")
            .unique(true);
        assert_eq!(from_mongo_index(to_mongo_index(index.clone())), index);

        let plain = IndexModel::new(bson::doc! { "age": -1 });
        assert_eq!(from_mongo_index(to_mongo_index(plain.clone())), plain);
    }
}
