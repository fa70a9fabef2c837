use bson::Document as BsonDocument;

use super::RepositoryConfig;
use crate::driver::{FindAndModifySpec, FindSpec, ReturnDocument};
use crate::query::{Pagination, SortOrder};

/// Options for [`Repository::find`](super::Repository::find).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<SortOrder>,
    pub skip: u64,
    /// `0` means no limit.
    pub limit: u64,
    pub projection: Option<BsonDocument>,
    /// Per-call override of the repository policy.
    pub config: Option<RepositoryConfig>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn paginate(self, pagination: Pagination) -> Self {
        self.skip(pagination.skip()).limit(pagination.limit())
    }

    pub fn projection(mut self, projection: Option<BsonDocument>) -> Self {
        self.projection = projection;
        self
    }

    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub(crate) fn spec(&self) -> FindSpec {
        FindSpec {
            sort: self.sort.as_ref().map(SortOrder::to_document),
            skip: self.skip,
            limit: self.limit,
            projection: self.projection.clone(),
        }
    }
}

/// Options for `find_one` and `find_one_and_delete`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneOptions {
    pub sort: Option<SortOrder>,
    pub projection: Option<BsonDocument>,
    pub config: Option<RepositoryConfig>,
}

impl FindOneOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn projection(mut self, projection: Option<BsonDocument>) -> Self {
        self.projection = projection;
        self
    }

    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub(crate) fn sort_document(&self) -> Option<BsonDocument> {
        self.sort.as_ref().map(SortOrder::to_document)
    }
}

/// Options for `find_one_and_replace` / `find_one_and_update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndModifyOptions {
    pub sort: Option<SortOrder>,
    pub projection: Option<BsonDocument>,
    pub upsert: bool,
    /// Defaults to the document after modification.
    pub return_document: ReturnDocument,
    pub config: Option<RepositoryConfig>,
}

impl FindOneAndModifyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn projection(mut self, projection: Option<BsonDocument>) -> Self {
        self.projection = projection;
        self
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn return_document(mut self, return_document: ReturnDocument) -> Self {
        self.return_document = return_document;
        self
    }

    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub(crate) fn spec(&self) -> FindAndModifySpec {
        FindAndModifySpec {
            sort: self.sort.as_ref().map(SortOrder::to_document),
            projection: self.projection.clone(),
            upsert: self.upsert,
            return_document: self.return_document,
        }
    }
}
