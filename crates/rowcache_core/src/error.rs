//! Error types for the rowcache core.

use crate::types::RecordId;
use rowcache_backend::BackendError;
use thiserror::Error;

/// Result type for core operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in rowcache core operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Cache backend error.
    ///
    /// On the read path this is recovered locally by falling through to
    /// the record store; on the invalidation path it escalates to a
    /// version bump before surfacing.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Record store error.
    #[error("record store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// A cache entry could not be encoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// No index with the given name (or entry point) is registered.
    #[error("unknown index {name} for entity type {entity}")]
    UnknownIndex {
        /// The entity type searched.
        entity: String,
        /// The index or entry-point name that was not found.
        name: String,
    },

    /// No registry exists for the given entity type.
    #[error("unknown entity type: {name}")]
    UnknownEntity {
        /// The entity type name.
        name: String,
    },

    /// The entity type is already registered.
    #[error("entity type already registered: {name}")]
    DuplicateEntity {
        /// The entity type name.
        name: String,
    },

    /// A key was supplied with the wrong number of values for its index.
    #[error("invalid key arity for index {index}: expected {expected}, got {actual}")]
    InvalidKeyArity {
        /// The index name.
        index: String,
        /// Number of fields the index is keyed on.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// An index with the same name is already registered for the type.
    #[error("duplicate index {name} for entity type {entity}")]
    DuplicateIndex {
        /// The entity type.
        entity: String,
        /// The conflicting index name.
        name: String,
    },

    /// Two registered indexes generate the same entry-point identifier.
    #[error("entry point collision for entity type {entity}: {entry_point}")]
    EntryPointCollision {
        /// The entity type.
        entity: String,
        /// The colliding entry-point identifier.
        entry_point: String,
    },

    /// A primary-key lookup matched no record.
    ///
    /// Raised from cached results too: a cache hit returning nothing
    /// for a requested identifier is still not-found, never an empty
    /// success.
    #[error("record not found: {entity} id {id}")]
    RecordNotFound {
        /// The entity type searched.
        entity: String,
        /// The identifier that was not found.
        id: RecordId,
    },

    /// A record is structurally unusable (e.g. missing its primary key).
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the problem.
        message: String,
    },
}

impl CacheError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an unknown-index error.
    pub fn unknown_index(entity: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownIndex {
            entity: entity.into(),
            name: name.into(),
        }
    }

    /// Creates an unknown-entity error.
    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity { name: name.into() }
    }

    /// Creates a record-not-found error.
    pub fn not_found(entity: impl Into<String>, id: RecordId) -> Self {
        Self::RecordNotFound {
            entity: entity.into(),
            id,
        }
    }

    /// Creates an invalid-record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }
}
