//! Typed repositories over document collections.
//!
//! `docbase` is the data-access core of a document-store service:
//!
//! - [`ObjectId`] identifiers with generation, parsing and timestamps.
//! - [`Document`] records with `from_db` / `to_db` conversion.
//! - Query builders: [`SortBuilder`], [`Pagination`], [`Projection`].
//! - A generic [`Repository`] forwarding CRUD calls to a [`Collection`].
//!
//! Storage is reached through the [`Client`] / [`Collection`] traits; the
//! crate ships an in-memory backend and, behind the `mongodb` feature, a
//! MongoDB one.

extern crate self as docbase;

mod config;
mod driver;
mod error;
mod json;
mod model;
mod oid;
mod query;
mod repository;

pub use config::{PaginationSettings, Settings, ENV_PREFIX};
pub use driver::{
    connect, BulkWriteFailure, BulkWriteResult, Client, Collection, Database, DeleteResult,
    DriverError, FindAndModifySpec, FindSpec, InMemoryClient, InMemoryCollection, IndexModel,
    InsertManyResult, InsertOneResult, ReturnDocument, Session, UpdateResult, WriteModel,
    ID_INDEX,
};
#[cfg(feature = "mongodb")]
pub use driver::{MongoClient, MongoCollection};
pub use error::{ConfigurationError, Error, Result, ValidationError};
pub use json::{bson_to_json, to_json};
pub use model::{
    Document, DumpOptions, ModelInfo, Sortable, Timestamped, CREATED_AT, UPDATED_AT,
};
pub use oid::{generate_identifier, parse_identifier, ObjectId, ID_FIELD};
pub use query::{
    Direction, Pagination, Projection, SortBuilder, SortConfig, SortOrder, MAX_SORT_LENGTH,
    MAX_WINDOW,
};
pub use repository::{
    Fetched, FindOneAndModifyOptions, FindOneOptions, FindOptions, Repository,
    RepositoryConfig,
};

/// `#[derive(Document)]`, also implementing `Sortable` / `Timestamped` when
/// asked to.
pub use docbase_macros::Document;

// Re-exported so generated code and callers agree on the BSON version.
pub use bson;
