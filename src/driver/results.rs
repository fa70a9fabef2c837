use std::collections::BTreeMap;

use bson::{Bson, Document};

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: Bson,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    pub acknowledged: bool,
    /// Identifiers of the inserted documents, in input order.
    pub inserted_ids: Vec<Bson>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

/// Totals for a batch of heterogeneous writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteResult {
    pub acknowledged: bool,
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_count: u64,
    /// Upserted identifiers keyed by operation index.
    pub upserted_ids: BTreeMap<usize, Bson>,
}

impl BulkWriteResult {
    pub(crate) fn acknowledged() -> Self {
        Self {
            acknowledged: true,
            ..Self::default()
        }
    }

    pub(crate) fn record_update(&mut self, index: usize, result: UpdateResult) {
        self.matched_count += result.matched_count;
        self.modified_count += result.modified_count;
        if let Some(id) = result.upserted_id {
            self.upserted_count += 1;
            self.upserted_ids.insert(index, id);
        }
    }
}

/// One failed operation inside a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkWriteFailure {
    pub index: usize,
    pub message: String,
}

/// A single operation of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne {
        document: Document,
    },
    UpdateOne {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    UpdateMany {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    ReplaceOne {
        filter: Document,
        replacement: Document,
        upsert: bool,
    },
    DeleteOne {
        filter: Document,
    },
    DeleteMany {
        filter: Document,
    },
}

impl WriteModel {
    pub fn name(&self) -> &'static str {
        match self {
            WriteModel::InsertOne { .. } => "insert_one",
            WriteModel::UpdateOne { .. } => "update_one",
            WriteModel::UpdateMany { .. } => "update_many",
            WriteModel::ReplaceOne { .. } => "replace_one",
            WriteModel::DeleteOne { .. } => "delete_one",
            WriteModel::DeleteMany { .. } => "delete_many",
        }
    }
}
