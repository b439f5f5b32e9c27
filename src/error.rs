//! # Errors
//!
//! Failure taxonomy of a reconciliation pass. Every error aborts the pass without
//! committing any collection.

use crate::store::{Collection, Version};

/// Errors raised by the reconciliation engine and its store collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("elimination mapping is stale: derived from effect version {expected}, effect collection is at {found}")]
    StaleMapping { expected: Version, found: Version },

    #[error("effect id {id} is claimed by {groups} distinct identity keys; canonical selection is not reproducible")]
    NonDeterministicTieBreak { id: String, groups: usize },

    #[error("inconsistent elimination mapping for {id}: folded into {first} and {second}")]
    InconsistentMapping {
        id: String,
        first: String,
        second: String,
    },

    #[error("write to {collection} interrupted: {reason}")]
    PartialWrite {
        collection: Collection,
        reason: String,
    },

    #[error("{count} variant clusters carry more than one {namespace} identifier (first: {example})")]
    OverMerge {
        namespace: String,
        count: usize,
        example: String,
    },

    #[error("{count} references in {collection} point at unknown effects (first: {example})")]
    DanglingReferences {
        collection: Collection,
        count: usize,
        example: String,
    },

    #[error("version conflict on {collection}: expected {expected}, found {found}")]
    VersionConflict {
        collection: Collection,
        expected: Version,
        found: Version,
    },

    #[error("duplicate document key {key} in {collection}")]
    DuplicateKey { collection: Collection, key: String },

    #[error("merged cluster id {id} collides with an existing variant")]
    IdCollision { id: String },

    #[error("invalid document {key} in {collection}: {reason}")]
    InvalidDocument {
        collection: Collection,
        key: String,
        reason: String,
    },

    #[error("failed to decode {key} in {collection}: {source}")]
    Decode {
        collection: Collection,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode document for {collection}: {source}")]
    Encode {
        collection: Collection,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage error: {reason}")]
    Storage { reason: String },
}

impl From<rocksdb::Error> for ReconcileError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Storage {
            reason: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
