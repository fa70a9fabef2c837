//! Process-local document store.
//!
//! Documents live in insertion order inside a `RwLock<Vec<Document>>` per
//! collection. Filters, updates and pipelines cover the operator subset the
//! repositories and tests rely on; anything else is rejected with
//! [`DriverError::InvalidOperation`] instead of being silently ignored.
//!
//! Indexes are bookkeeping plus constraint checks: unique indexes reject
//! colliding inserts, updates and replacements, and a missing key counts as
//! `null`. Lock order is documents first, then indexes.

mod filter;
mod pipeline;
mod update;
mod values;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bson::{Bson, Document};
use tracing::{debug, trace};

use super::{
    BulkWriteFailure, BulkWriteResult, Client, Collection, DeleteResult, DriverError,
    FindAndModifySpec, FindSpec, IndexModel, InsertManyResult, InsertOneResult, ReturnDocument,
    Session, UpdateResult, WriteModel, ID_INDEX,
};
use crate::oid::{ObjectId, ID_FIELD};

use filter::matches;
use pipeline::{project, run_pipeline, sort_documents, SortKeys};
use update::{apply_update, seed_from_filter, validate_replacement, validate_update, with_id_first};
use values::{get_path, values_equal};

type Databases = HashMap<String, HashMap<String, Arc<InMemoryCollection>>>;

fn poisoned<T>(_: PoisonError<T>) -> DriverError {
    DriverError::Storage("lock poisoned".to_string())
}

/// In-memory [`Client`]. Cheap to create; every instance is isolated.
#[derive(Debug, Default)]
pub struct InMemoryClient {
    databases: RwLock<Databases>,
    next_session: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl InMemoryClient {
    pub fn new() -> Self {
        debug!("opening in-memory document store");
        Self::default()
    }

    /// Typed handle, for callers that want the concrete collection.
    pub fn memory_collection(&self, database: &str, name: &str) -> Arc<InMemoryCollection> {
        let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
        databases
            .entry(database.to_string())
            .or_default()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(InMemoryCollection::new(
                    database,
                    name,
                    Arc::clone(&self.closed),
                ))
            })
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Client for InMemoryClient {
    fn collection(&self, database: &str, name: &str) -> Arc<dyn Collection> {
        self.memory_collection(database, name)
    }

    async fn start_session(&self) -> Result<Session, DriverError> {
        self.ensure_open()?;
        let id = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(session = id, "session started");
        Ok(Session::detached(id))
    }

    async fn create_collection(&self, database: &str, name: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        self.memory_collection(database, name).create()?;
        debug!(database, collection = name, "created collection");
        Ok(())
    }

    async fn drop_collection(&self, database: &str, name: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        let existing = self
            .databases
            .read()
            .map_err(poisoned)?
            .get(database)
            .and_then(|collections| collections.get(name))
            .cloned();
        if let Some(collection) = existing {
            collection.clear()?;
            debug!(database, collection = name, "dropped collection");
        }
        Ok(())
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, DriverError> {
        self.ensure_open()?;
        let databases = self.databases.read().map_err(poisoned)?;
        let mut names: Vec<String> = databases
            .get(database)
            .map(|collections| {
                collections
                    .values()
                    .filter(|c| c.is_created())
                    .map(|c| c.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn list_database_names(&self) -> Result<Vec<String>, DriverError> {
        self.ensure_open()?;
        let databases = self.databases.read().map_err(poisoned)?;
        let mut names: Vec<String> = databases
            .iter()
            .filter(|(_, collections)| collections.values().any(|c| c.is_created()))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    // Handles already given out stay valid and see an empty collection.
    async fn drop_database(&self, database: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        let databases = self.databases.read().map_err(poisoned)?;
        if let Some(collections) = databases.get(database) {
            for collection in collections.values() {
                collection.clear()?;
            }
            debug!(database, "dropped database");
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("closed in-memory document store");
        }
        Ok(())
    }
}

/// One collection of the in-memory store.
#[derive(Debug)]
pub struct InMemoryCollection {
    name: String,
    namespace: String,
    documents: RwLock<Vec<Document>>,
    /// Secondary indexes; `_id_` is implicit.
    indexes: RwLock<Vec<IndexModel>>,
    created: AtomicBool,
    closed: Arc<AtomicBool>,
}

impl InMemoryCollection {
    fn new(database: &str, name: &str, closed: Arc<AtomicBool>) -> Self {
        Self {
            name: name.to_string(),
            namespace: format!("{}.{}", database, name),
            documents: RwLock::new(Vec::new()),
            indexes: RwLock::new(Vec::new()),
            created: AtomicBool::new(false),
            closed,
        }
    }

    /// Snapshot of every stored document, in insertion order.
    pub fn documents(&self) -> Result<Vec<Document>, DriverError> {
        Ok(self.read()?.clone())
    }

    fn is_created(&self) -> bool {
        self.created.load(Ordering::SeqCst)
    }

    fn clear(&self) -> Result<(), DriverError> {
        let mut docs = self.documents.write().map_err(poisoned)?;
        docs.clear();
        self.indexes.write().map_err(poisoned)?.clear();
        self.created.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn create(&self) -> Result<(), DriverError> {
        if self.created.swap(true, Ordering::SeqCst) {
            return Err(DriverError::NamespaceExists(self.namespace.clone()));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    fn ensure_exists(&self) -> Result<(), DriverError> {
        self.ensure_open()?;
        if !self.is_created() {
            return Err(DriverError::NamespaceNotFound(self.namespace.clone()));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Document>>, DriverError> {
        self.ensure_open()?;
        self.documents.read().map_err(poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Document>>, DriverError> {
        self.ensure_open()?;
        let guard = self.documents.write().map_err(poisoned)?;
        self.created.store(true, Ordering::SeqCst);
        Ok(guard)
    }

    fn duplicate_key(&self, index: &IndexModel, values: &[Bson]) -> DriverError {
        let fields: Vec<String> = index
            .keys
            .keys()
            .zip(values)
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect();
        DriverError::DuplicateKey {
            collection: self.namespace.clone(),
            index: index.resolved_name(),
            key: format!("{{ {} }}", fields.join(", ")),
        }
    }

    /// Fails when `candidate` collides with a document other than the one at
    /// `position` on a unique index.
    fn check_unique(
        &self,
        docs: &[Document],
        candidate: &Document,
        position: Option<usize>,
    ) -> Result<(), DriverError> {
        let indexes = self.indexes.read().map_err(poisoned)?;
        for index in indexes.iter().filter(|index| index.unique) {
            let key = index_key(index, candidate);
            let clash = docs
                .iter()
                .enumerate()
                .filter(|(other, _)| Some(*other) != position)
                .any(|(_, doc)| keys_equal(&index_key(index, doc), &key));
            if clash {
                return Err(self.duplicate_key(index, &key));
            }
        }
        Ok(())
    }

    fn insert_into(
        &self,
        docs: &mut Vec<Document>,
        mut doc: Document,
    ) -> Result<Bson, DriverError> {
        let id = match doc.remove(ID_FIELD) {
            Some(id) => id,
            None => Bson::from(ObjectId::new()),
        };
        if docs
            .iter()
            .any(|existing| existing.get(ID_FIELD).is_some_and(|e| values_equal(e, &id)))
        {
            return Err(self.duplicate_key(&IndexModel::id_index(), &[id]));
        }
        let doc = with_id_first(id.clone(), doc);
        self.check_unique(docs, &doc, None)?;
        docs.push(doc);
        Ok(id)
    }

    fn add_index(&self, docs: &[Document], index: IndexModel) -> Result<String, DriverError> {
        if index.keys.is_empty() {
            return Err(DriverError::InvalidOperation(
                "index keys must not be empty".to_string(),
            ));
        }
        let name = index.resolved_name();
        let mut indexes = self.indexes.write().map_err(poisoned)?;
        let id_index = IndexModel::id_index();
        let existing = std::iter::once(&id_index)
            .chain(indexes.iter())
            .find(|existing| existing.keys == index.keys || existing.resolved_name() == name);
        if let Some(existing) = existing {
            let same_name = index
                .name
                .as_ref()
                .map_or(true, |name| *name == existing.resolved_name());
            if existing.keys == index.keys && existing.unique == index.unique && same_name {
                return Ok(existing.resolved_name());
            }
            return Err(DriverError::InvalidOperation(format!(
                "index '{}' conflicts with existing index '{}'",
                name,
                existing.resolved_name()
            )));
        }
        if index.unique {
            for (position, doc) in docs.iter().enumerate() {
                let key = index_key(&index, doc);
                if docs[..position]
                    .iter()
                    .any(|earlier| keys_equal(&index_key(&index, earlier), &key))
                {
                    return Err(self.duplicate_key(&index, &key));
                }
            }
        }
        debug!(collection = %self.namespace, index = %name, unique = index.unique, "created index");
        indexes.push(IndexModel {
            name: Some(name.clone()),
            ..index
        });
        Ok(name)
    }

    fn matching(docs: &[Document], filter: &Document) -> Result<Vec<usize>, DriverError> {
        let mut hits = Vec::new();
        for (index, doc) in docs.iter().enumerate() {
            if matches(doc, filter)? {
                hits.push(index);
            }
        }
        Ok(hits)
    }

    /// Index of the first match, honouring `sort` when given.
    fn select(
        docs: &[Document],
        filter: &Document,
        sort: Option<&Document>,
    ) -> Result<Option<usize>, DriverError> {
        let hits = Self::matching(docs, filter)?;
        match sort {
            None => Ok(hits.first().copied()),
            Some(sort) => {
                let keys = SortKeys::parse(sort)?;
                let mut hits = hits;
                hits.sort_by(|&a, &b| keys.compare(&docs[a], &docs[b]));
                Ok(hits.first().copied())
            }
        }
    }

    fn update_in(
        &self,
        docs: &mut Vec<Document>,
        filter: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
    ) -> Result<UpdateResult, DriverError> {
        validate_update(update)?;
        let mut hits = Self::matching(docs, filter)?;
        if !multi {
            hits.truncate(1);
        }
        let mut result = UpdateResult {
            acknowledged: true,
            ..UpdateResult::default()
        };
        for index in &hits {
            let mut next = docs[*index].clone();
            apply_update(&mut next, update, false)?;
            result.matched_count += 1;
            if next != docs[*index] {
                self.check_unique(docs, &next, Some(*index))?;
                result.modified_count += 1;
                docs[*index] = next;
            }
        }
        if hits.is_empty() && upsert {
            let mut seed = seed_from_filter(filter)?;
            apply_update(&mut seed, update, true)?;
            result.upserted_id = Some(self.insert_into(docs, seed)?);
        }
        Ok(result)
    }

    fn replace_in(
        &self,
        docs: &mut Vec<Document>,
        filter: &Document,
        replacement: &Document,
        upsert: bool,
    ) -> Result<UpdateResult, DriverError> {
        validate_replacement(replacement)?;
        let mut result = UpdateResult {
            acknowledged: true,
            ..UpdateResult::default()
        };
        match Self::select(docs, filter, None)? {
            Some(index) => {
                let next = Self::replacement_for(&docs[index], replacement)?;
                result.matched_count = 1;
                if next != docs[index] {
                    self.check_unique(docs, &next, Some(index))?;
                    result.modified_count = 1;
                    docs[index] = next;
                }
            }
            None if upsert => {
                let mut seed = seed_from_filter(filter)?;
                for (key, value) in replacement {
                    seed.insert(key.clone(), value.clone());
                }
                result.upserted_id = Some(self.insert_into(docs, seed)?);
            }
            None => {}
        }
        Ok(result)
    }

    fn replacement_for(
        current: &Document,
        replacement: &Document,
    ) -> Result<Document, DriverError> {
        let id = current.get(ID_FIELD).cloned().unwrap_or(Bson::Null);
        if let Some(new_id) = replacement.get(ID_FIELD) {
            if !values_equal(new_id, &id) {
                return Err(DriverError::InvalidOperation(
                    "the _id field cannot be changed by a replacement".to_string(),
                ));
            }
        }
        Ok(with_id_first(id, replacement.clone()))
    }

    fn delete_in(
        docs: &mut Vec<Document>,
        filter: &Document,
        multi: bool,
    ) -> Result<DeleteResult, DriverError> {
        let mut hits = Self::matching(docs, filter)?;
        if !multi {
            hits.truncate(1);
        }
        for index in hits.iter().rev() {
            docs.remove(*index);
        }
        Ok(DeleteResult {
            acknowledged: true,
            deleted_count: hits.len() as u64,
        })
    }

    fn apply_write(
        &self,
        docs: &mut Vec<Document>,
        index: usize,
        operation: WriteModel,
        totals: &mut BulkWriteResult,
    ) -> Result<(), DriverError> {
        match operation {
            WriteModel::InsertOne { document } => {
                self.insert_into(docs, document)?;
                totals.inserted_count += 1;
            }
            WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            } => {
                let result = self.update_in(docs, &filter, &update, upsert, false)?;
                totals.record_update(index, result);
            }
            WriteModel::UpdateMany {
                filter,
                update,
                upsert,
            } => {
                let result = self.update_in(docs, &filter, &update, upsert, true)?;
                totals.record_update(index, result);
            }
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => {
                let result = self.replace_in(docs, &filter, &replacement, upsert)?;
                totals.record_update(index, result);
            }
            WriteModel::DeleteOne { filter } => {
                totals.deleted_count += Self::delete_in(docs, &filter, false)?.deleted_count;
            }
            WriteModel::DeleteMany { filter } => {
                totals.deleted_count += Self::delete_in(docs, &filter, true)?.deleted_count;
            }
        }
        Ok(())
    }

    fn modify_one(
        &self,
        filter: &Document,
        spec: &FindAndModifySpec,
        apply: impl FnOnce(&Document) -> Result<Document, DriverError>,
        seed: impl FnOnce() -> Result<Document, DriverError>,
    ) -> Result<Option<Document>, DriverError> {
        let mut docs = self.write()?;
        let (before, after) = match Self::select(&docs, filter, spec.sort.as_ref())? {
            Some(index) => {
                let before = docs[index].clone();
                let after = apply(&before)?;
                self.check_unique(&docs, &after, Some(index))?;
                docs[index] = after.clone();
                (Some(before), after)
            }
            None if spec.upsert => {
                self.insert_into(&mut docs, seed()?)?;
                (None, docs.last().cloned().unwrap_or_default())
            }
            None => return Ok(None),
        };
        let chosen = match spec.return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => Some(after),
        };
        chosen
            .map(|doc| project_optional(&doc, spec.projection.as_ref()))
            .transpose()
    }
}

/// Values of `index`'s keys in `doc`; a missing key is `null`.
fn index_key(index: &IndexModel, doc: &Document) -> Vec<Bson> {
    index
        .keys
        .keys()
        .map(|key| get_path(doc, key).cloned().unwrap_or(Bson::Null))
        .collect()
}

fn keys_equal(a: &[Bson], b: &[Bson]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_equal(a, b))
}

fn project_optional(
    doc: &Document,
    projection: Option<&Document>,
) -> Result<Document, DriverError> {
    match projection {
        Some(projection) => project(doc, projection),
        None => Ok(doc.clone()),
    }
}

#[async_trait]
impl Collection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(
        &self,
        document: Document,
        _session: Option<&mut Session>,
    ) -> Result<InsertOneResult, DriverError> {
        let mut docs = self.write()?;
        let inserted_id = self.insert_into(&mut docs, document)?;
        trace!(collection = %self.namespace, id = %inserted_id, "inserted document");
        Ok(InsertOneResult {
            acknowledged: true,
            inserted_id,
        })
    }

    async fn insert_many(
        &self,
        documents: Vec<Document>,
        ordered: bool,
        _session: Option<&mut Session>,
    ) -> Result<InsertManyResult, DriverError> {
        if documents.is_empty() {
            return Err(DriverError::InvalidOperation(
                "documents must be a non-empty list".to_string(),
            ));
        }
        let mut docs = self.write()?;
        let mut inserted_ids = Vec::with_capacity(documents.len());
        let mut errors = Vec::new();
        for (index, document) in documents.into_iter().enumerate() {
            match self.insert_into(&mut docs, document) {
                Ok(id) => inserted_ids.push(id),
                Err(err) => {
                    errors.push(BulkWriteFailure {
                        index,
                        message: err.to_string(),
                    });
                    if ordered {
                        break;
                    }
                }
            }
        }
        if !errors.is_empty() {
            let mut partial = BulkWriteResult::acknowledged();
            partial.inserted_count = inserted_ids.len() as u64;
            return Err(DriverError::BulkWrite { errors, partial });
        }
        Ok(InsertManyResult {
            acknowledged: true,
            inserted_ids,
        })
    }

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
        _session: Option<&mut Session>,
    ) -> Result<UpdateResult, DriverError> {
        let mut docs = self.write()?;
        self.replace_in(&mut docs, &filter, &replacement, upsert)
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        _session: Option<&mut Session>,
    ) -> Result<UpdateResult, DriverError> {
        let mut docs = self.write()?;
        self.update_in(&mut docs, &filter, &update, upsert, false)
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        _session: Option<&mut Session>,
    ) -> Result<UpdateResult, DriverError> {
        let mut docs = self.write()?;
        self.update_in(&mut docs, &filter, &update, upsert, true)
    }

    async fn delete_one(
        &self,
        filter: Document,
        _session: Option<&mut Session>,
    ) -> Result<DeleteResult, DriverError> {
        let mut docs = self.write()?;
        Self::delete_in(&mut docs, &filter, false)
    }

    async fn delete_many(
        &self,
        filter: Document,
        _session: Option<&mut Session>,
    ) -> Result<DeleteResult, DriverError> {
        let mut docs = self.write()?;
        Self::delete_in(&mut docs, &filter, true)
    }

    async fn find(
        &self,
        filter: Document,
        spec: FindSpec,
        _session: Option<&mut Session>,
    ) -> Result<Vec<Document>, DriverError> {
        let mut found = {
            let docs = self.read()?;
            let mut found = Vec::new();
            for doc in docs.iter() {
                if matches(doc, &filter)? {
                    found.push(doc.clone());
                }
            }
            found
        };
        if let Some(sort) = &spec.sort {
            sort_documents(&mut found, sort)?;
        }
        let limit = match spec.limit {
            0 => usize::MAX,
            limit => usize::try_from(limit).unwrap_or(usize::MAX),
        };
        found
            .into_iter()
            .skip(usize::try_from(spec.skip).unwrap_or(usize::MAX))
            .take(limit)
            .map(|doc| project_optional(&doc, spec.projection.as_ref()))
            .collect()
    }

    async fn find_one(
        &self,
        filter: Document,
        sort: Option<Document>,
        projection: Option<Document>,
        _session: Option<&mut Session>,
    ) -> Result<Option<Document>, DriverError> {
        let docs = self.read()?;
        Self::select(&docs, &filter, sort.as_ref())?
            .map(|index| project_optional(&docs[index], projection.as_ref()))
            .transpose()
    }

    async fn find_one_and_delete(
        &self,
        filter: Document,
        sort: Option<Document>,
        projection: Option<Document>,
        _session: Option<&mut Session>,
    ) -> Result<Option<Document>, DriverError> {
        let mut docs = self.write()?;
        Self::select(&docs, &filter, sort.as_ref())?
            .map(|index| docs.remove(index))
            .map(|doc| project_optional(&doc, projection.as_ref()))
            .transpose()
    }

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        spec: FindAndModifySpec,
        _session: Option<&mut Session>,
    ) -> Result<Option<Document>, DriverError> {
        validate_replacement(&replacement)?;
        self.modify_one(
            &filter,
            &spec,
            |current| Self::replacement_for(current, &replacement),
            || {
                let mut seed = seed_from_filter(&filter)?;
                for (key, value) in &replacement {
                    seed.insert(key.clone(), value.clone());
                }
                Ok(seed)
            },
        )
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        spec: FindAndModifySpec,
        _session: Option<&mut Session>,
    ) -> Result<Option<Document>, DriverError> {
        validate_update(&update)?;
        self.modify_one(
            &filter,
            &spec,
            |current| {
                let mut next = current.clone();
                apply_update(&mut next, &update, false)?;
                Ok(next)
            },
            || {
                let mut seed = seed_from_filter(&filter)?;
                apply_update(&mut seed, &update, true)?;
                Ok(seed)
            },
        )
    }

    async fn count_documents(
        &self,
        filter: Document,
        _session: Option<&mut Session>,
    ) -> Result<u64, DriverError> {
        let docs = self.read()?;
        Ok(Self::matching(&docs, &filter)?.len() as u64)
    }

    async fn estimated_document_count(&self) -> Result<u64, DriverError> {
        Ok(self.read()?.len() as u64)
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        _session: Option<&mut Session>,
    ) -> Result<Vec<Document>, DriverError> {
        let docs = self.read()?.clone();
        run_pipeline(docs, &pipeline)
    }

    async fn bulk_write(
        &self,
        operations: Vec<WriteModel>,
        ordered: bool,
        _session: Option<&mut Session>,
    ) -> Result<BulkWriteResult, DriverError> {
        if operations.is_empty() {
            return Err(DriverError::InvalidOperation(
                "bulk write needs at least one operation".to_string(),
            ));
        }
        let mut docs = self.write()?;
        let mut totals = BulkWriteResult::acknowledged();
        let mut errors = Vec::new();
        for (index, operation) in operations.into_iter().enumerate() {
            let name = operation.name();
            if let Err(err) = self.apply_write(&mut docs, index, operation, &mut totals) {
                trace!(collection = %self.namespace, index, name, %err, "bulk operation failed");
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
        _session: Option<&mut Session>,
    ) -> Result<String, DriverError> {
        let docs = self.write()?;
        self.add_index(&docs, index)
    }

    async fn create_indexes(
        &self,
        indexes: Vec<IndexModel>,
        _session: Option<&mut Session>,
    ) -> Result<Vec<String>, DriverError> {
        if indexes.is_empty() {
            return Err(DriverError::InvalidOperation(
                "indexes must be a non-empty list".to_string(),
            ));
        }
        let docs = self.write()?;
        let before = self.indexes.read().map_err(poisoned)?.len();
        let mut names = Vec::with_capacity(indexes.len());
        for index in indexes {
            match self.add_index(&docs, index) {
                Ok(name) => names.push(name),
                Err(err) => {
                    self.indexes.write().map_err(poisoned)?.truncate(before);
                    return Err(err);
                }
            }
        }
        Ok(names)
    }

    async fn drop_index(
        &self,
        name: &str,
        _session: Option<&mut Session>,
    ) -> Result<(), DriverError> {
        self.ensure_exists()?;
        if name == ID_INDEX {
            return Err(DriverError::InvalidOperation(
                "cannot drop _id index".to_string(),
            ));
        }
        let mut indexes = self.indexes.write().map_err(poisoned)?;
        let position = indexes
            .iter()
            .position(|index| index.resolved_name() == name)
            .ok_or_else(|| DriverError::IndexNotFound(name.to_string()))?;
        indexes.remove(position);
        debug!(collection = %self.namespace, index = name, "dropped index");
        Ok(())
    }

    async fn list_indexes(
        &self,
        _session: Option<&mut Session>,
    ) -> Result<Vec<IndexModel>, DriverError> {
        self.ensure_exists()?;
        let indexes = self.indexes.read().map_err(poisoned)?;
        Ok(std::iter::once(IndexModel::id_index())
            .chain(indexes.iter().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn users(client: &InMemoryClient) -> Arc<dyn Collection> {
        client.collection("main", "users")
    }

    async fn seeded() -> (InMemoryClient, Arc<dyn Collection>) {
        let client = InMemoryClient::new();
        let users = users(&client);
        users
            .insert_many(
                vec![
                    doc! { "_id": 1, "name": "a", "age": 30 },
                    doc! { "_id": 2, "name": "b", "age": 20 },
                    doc! { "_id": 3, "name": "c", "age": 30 },
                ],
                true,
                None,
            )
            .await
            .unwrap();
        (client, users)
    }

    #[tokio::test]
    async fn insert_generates_object_id() {
        let client = InMemoryClient::new();
        let users = users(&client);
        let result = users.insert_one(doc! { "name": "a" }, None).await.unwrap();
        assert!(matches!(result.inserted_id, Bson::ObjectId(_)));
        let stored = users.find_one(doc! {}, None, None, None).await.unwrap().unwrap();
        assert_eq!(stored.keys().next().map(String::as_str), Some("_id"));
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let (_client, users) = seeded().await;
        let err = users.insert_one(doc! { "_id": 1 }, None).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "E11000 duplicate key error collection: main.users index: _id_ dup key: { _id: 1 }"
        );
    }

    #[tokio::test]
    async fn unordered_insert_many_keeps_going() {
        let (_client, users) = seeded().await;
        let err = users
            .insert_many(vec![doc! { "_id": 1 }, doc! { "_id": 9 }], false, None)
            .await
            .unwrap_err();
        match err {
            DriverError::BulkWrite { errors, partial } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].index, 0);
                assert_eq!(partial.inserted_count, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(users.count_documents(doc! {}, None).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn find_sorts_skips_limits_and_projects() {
        let (_client, users) = seeded().await;
        let spec = FindSpec {
            sort: Some(doc! { "age": -1, "_id": -1 }),
            skip: 1,
            limit: 1,
            projection: Some(doc! { "name": 1, "_id": 0 }),
        };
        let found = users.find(doc! {}, spec, None).await.unwrap();
        assert_eq!(found, vec![doc! { "name": "a" }]);
    }

    #[tokio::test]
    async fn find_one_honours_sort() {
        let (_client, users) = seeded().await;
        let found = users
            .find_one(doc! { "age": 30 }, Some(doc! { "_id": -1 }), None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.get_i32("_id").unwrap(), 3);
    }

    #[tokio::test]
    async fn update_and_upsert() {
        let (_client, users) = seeded().await;
        let result = users
            .update_many(doc! { "age": 30 }, doc! { "$inc": { "age": 1 } }, false, None)
            .await
            .unwrap();
        assert_eq!((result.matched_count, result.modified_count), (2, 2));

        let result = users
            .update_one(
                doc! { "name": "z" },
                doc! { "$set": { "age": 1 } },
                true,
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.matched_count, 0);
        let id = result.upserted_id.unwrap();
        let upserted = users
            .find_one(doc! { "_id": id }, None, None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(upserted.get_str("name").unwrap(), "z");
        assert_eq!(upserted.get_i32("age").unwrap(), 1);
    }

    #[tokio::test]
    async fn update_requires_operators() {
        let (_client, users) = seeded().await;
        let err = users
            .update_one(doc! {}, doc! { "name": "x" }, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn replace_keeps_id() {
        let (_client, users) = seeded().await;
        let result = users
            .replace_one(doc! { "_id": 2 }, doc! { "name": "bb" }, false, None)
            .await
            .unwrap();
        assert_eq!(result.modified_count, 1);
        let doc = users
            .find_one(doc! { "_id": 2 }, None, None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, doc! { "_id": 2, "name": "bb" });

        let err = users
            .replace_one(doc! { "_id": 2 }, doc! { "_id": 5 }, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn find_one_and_update_returns_requested_version() {
        let (_client, users) = seeded().await;
        let after = users
            .find_one_and_update(
                doc! { "_id": 1 },
                doc! { "$set": { "name": "aa" } },
                FindAndModifySpec::default(),
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.get_str("name").unwrap(), "aa");

        let before = users
            .find_one_and_update(
                doc! { "_id": 1 },
                doc! { "$set": { "name": "aaa" } },
                FindAndModifySpec {
                    return_document: ReturnDocument::Before,
                    ..FindAndModifySpec::default()
                },
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before.get_str("name").unwrap(), "aa");

        let missing = users
            .find_one_and_update(
                doc! { "_id": 42 },
                doc! { "$set": { "name": "x" } },
                FindAndModifySpec::default(),
                None,
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn find_one_and_replace_upserts() {
        let (_client, users) = seeded().await;
        let doc = users
            .find_one_and_replace(
                doc! { "_id": 7 },
                doc! { "name": "g" },
                FindAndModifySpec {
                    upsert: true,
                    ..FindAndModifySpec::default()
                },
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, doc! { "_id": 7, "name": "g" });
    }

    #[tokio::test]
    async fn find_one_and_delete_removes() {
        let (_client, users) = seeded().await;
        let doc = users
            .find_one_and_delete(doc! { "age": 30 }, Some(doc! { "name": -1 }), None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.get_str("name").unwrap(), "c");
        assert_eq!(users.estimated_document_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_one_and_many() {
        let (_client, users) = seeded().await;
        let one = users.delete_one(doc! { "age": 30 }, None).await.unwrap();
        assert_eq!(one.deleted_count, 1);
        let many = users.delete_many(doc! {}, None).await.unwrap();
        assert_eq!(many.deleted_count, 2);
    }

    #[tokio::test]
    async fn aggregate_runs_pipeline() {
        let (_client, users) = seeded().await;
        let out = users
            .aggregate(
                vec![doc! { "$match": { "age": 30 } }, doc! { "$count": "n" }],
                None,
            )
            .await
            .unwrap();
        assert_eq!(out, vec![doc! { "n": 2_i64 }]);
    }

    #[tokio::test]
    async fn ordered_bulk_write_stops_at_first_error() {
        let (_client, users) = seeded().await;
        let err = users
            .bulk_write(
                vec![
                    WriteModel::InsertOne {
                        document: doc! { "_id": 10 },
                    },
                    WriteModel::InsertOne {
                        document: doc! { "_id": 1 },
                    },
                    WriteModel::DeleteMany { filter: doc! {} },
                ],
                true,
                None,
            )
            .await
            .unwrap_err();
        match err {
            DriverError::BulkWrite { errors, partial } => {
                assert_eq!(errors[0].index, 1);
                assert_eq!(partial.inserted_count, 1);
                assert_eq!(partial.deleted_count, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn bulk_write_totals() {
        let (_client, users) = seeded().await;
        let result = users
            .bulk_write(
                vec![
                    WriteModel::UpdateOne {
                        filter: doc! { "_id": 1 },
                        update: doc! { "$set": { "x": 1 } },
                        upsert: false,
                    },
                    WriteModel::ReplaceOne {
                        filter: doc! { "_id": 99 },
                        replacement: doc! { "name": "new" },
                        upsert: true,
                    },
                    WriteModel::DeleteOne {
                        filter: doc! { "_id": 2 },
                    },
                ],
                false,
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.modified_count, 1);
        assert_eq!(result.upserted_count, 1);
        assert_eq!(result.upserted_ids.get(&1), Some(&Bson::Int32(99)));
        assert_eq!(result.deleted_count, 1);
    }

    #[tokio::test]
    async fn closed_client_rejects_work() {
        let (client, users) = seeded().await;
        client.close().await.unwrap();
        assert!(client.is_closed());
        assert!(matches!(
            users.count_documents(doc! {}, None).await,
            Err(DriverError::Closed)
        ));
        assert!(matches!(client.start_session().await, Err(DriverError::Closed)));
    }

    #[tokio::test]
    async fn sessions_are_numbered() {
        let client = InMemoryClient::new();
        let first = client.start_session().await.unwrap();
        let second = client.start_session().await.unwrap();
        assert_eq!((first.id(), second.id()), (1, 2));
    }

    #[tokio::test]
    async fn unique_index_rejects_collisions() {
        let (_client, users) = seeded().await;
        let name = users
            .create_index(IndexModel::new(doc! { "name": 1 }).unique(true), None)
            .await
            .unwrap();
        assert_eq!(name, "name_1");

        let err = users
            .insert_one(doc! { "_id": 4, "name": "a" }, None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "E11000 duplicate key error collection: main.users index: name_1 \
             dup key: { name: \"a\" }"
        );

        let err = users
            .update_one(doc! { "_id": 2 }, doc! { "$set": { "name": "c" } }, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::DuplicateKey { .. }));
        let err = users
            .replace_one(doc! { "_id": 2 }, doc! { "name": "a" }, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::DuplicateKey { .. }));
        let err = users
            .update_one(doc! { "name": "q" }, doc! { "$set": { "name": "b" } }, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::DuplicateKey { .. }));
        let err = users
            .find_one_and_update(
                doc! { "_id": 3 },
                doc! { "$set": { "name": "b" } },
                FindAndModifySpec::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::DuplicateKey { .. }));

        // Rewriting a document onto its own key is fine.
        users
            .update_one(doc! { "_id": 1 }, doc! { "$set": { "age": 31 } }, false, None)
            .await
            .unwrap();
        let names: Vec<String> = users
            .find(doc! {}, FindSpec::default(), None)
            .await
            .unwrap()
            .iter()
            .map(|doc| doc.get_str("name").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn unique_index_needs_distinct_existing_values() {
        let (_client, users) = seeded().await;
        let err = users
            .create_index(IndexModel::new(doc! { "age": 1 }).unique(true), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::DuplicateKey { ref index, .. } if index == "age_1"));
        assert_eq!(users.list_index_names(None).await.unwrap(), vec![ID_INDEX]);

        // Missing keys count as null, so only one document may lack them.
        users
            .create_index(IndexModel::new(doc! { "email": 1 }).unique(true), None)
            .await
            .unwrap_err();
        users.delete_many(doc! { "_id": { "$ne": 1 } }, None).await.unwrap();
        users
            .create_index(IndexModel::new(doc! { "email": 1 }).unique(true), None)
            .await
            .unwrap();
        let err = users.insert_one(doc! { "_id": 8 }, None).await.unwrap_err();
        assert!(matches!(err, DriverError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn index_lifecycle() {
        let client = InMemoryClient::new();
        let users = users(&client);
        assert!(matches!(
            users.list_indexes(None).await,
            Err(DriverError::NamespaceNotFound(_))
        ));

        let names = users
            .create_indexes(
                vec![
                    IndexModel::new(doc! { "age": -1, "name": 1 }),
                    IndexModel::new(doc! { "email": 1 }).name("by_email").unique(true),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(names, vec!["age_-1_name_1", "by_email"]);
        assert_eq!(
            client.list_collection_names("main").await.unwrap(),
            vec!["users"]
        );

        let again = users
            .create_index(IndexModel::new(doc! { "email": 1 }).unique(true), None)
            .await
            .unwrap();
        assert_eq!(again, "by_email");
        let err = users
            .create_index(IndexModel::new(doc! { "email": 1 }), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidOperation(_)));

        let listed = users.list_indexes(None).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0], IndexModel::id_index());
        assert!(listed[2].unique);

        users.drop_index("by_email", None).await.unwrap();
        assert!(matches!(
            users.drop_index("by_email", None).await,
            Err(DriverError::IndexNotFound(ref name)) if name == "by_email"
        ));
        assert!(matches!(
            users.drop_index(ID_INDEX, None).await,
            Err(DriverError::InvalidOperation(_))
        ));
        assert_eq!(
            users.list_index_names(None).await.unwrap(),
            vec!["_id_", "age_-1_name_1"]
        );
    }

    #[tokio::test]
    async fn create_indexes_is_all_or_nothing() {
        let (_client, users) = seeded().await;
        let err = users
            .create_indexes(
                vec![
                    IndexModel::new(doc! { "name": 1 }),
                    IndexModel::new(doc! { "age": 1 }).unique(true),
                ],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::DuplicateKey { .. }));
        assert_eq!(users.list_index_names(None).await.unwrap(), vec![ID_INDEX]);
        assert!(matches!(
            users.create_indexes(Vec::new(), None).await,
            Err(DriverError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn collections_are_created_and_dropped() {
        let client = InMemoryClient::new();
        client.create_collection("main", "logs").await.unwrap();
        assert!(matches!(
            client.create_collection("main", "logs").await,
            Err(DriverError::NamespaceExists(ref ns)) if ns == "main.logs"
        ));
        client.create_collection("audit", "events").await.unwrap();
        assert_eq!(
            client.list_database_names().await.unwrap(),
            vec!["audit", "main"]
        );

        let logs = client.collection("main", "logs");
        logs.create_index(IndexModel::new(doc! { "at": 1 }), None)
            .await
            .unwrap();
        logs.insert_one(doc! { "at": 1 }, None).await.unwrap();
        client.drop_collection("main", "logs").await.unwrap();
        assert_eq!(logs.estimated_document_count().await.unwrap(), 0);
        assert!(client.list_collection_names("main").await.unwrap().is_empty());
        assert_eq!(client.list_database_names().await.unwrap(), vec!["audit"]);

        logs.insert_one(doc! { "at": 2 }, None).await.unwrap();
        assert_eq!(logs.list_index_names(None).await.unwrap(), vec![ID_INDEX]);
        client.create_collection("main", "logs").await.unwrap_err();
    }

    #[tokio::test]
    async fn empty_bulk_write_is_rejected() {
        let (_client, users) = seeded().await;
        let err = users.bulk_write(Vec::new(), true, None).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn drop_database_clears_collections() {
        let (client, users) = seeded().await;
        client.drop_database("main").await.unwrap();
        assert!(client.list_collection_names("main").await.unwrap().is_empty());
        assert_eq!(users.estimated_document_count().await.unwrap(), 0);
    }
}
