//! Record store interface.
//!
//! The record store is an external collaborator: rowcache consumes it
//! to populate cache entries and to resolve bulk-write conditions, and
//! routes queries back to it whenever no index applies.

use crate::record::RawRecord;
use crate::types::RecordId;
use crate::value::FieldValue;
use thiserror::Error;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by a record store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached.
    #[error("record store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// A query failed inside the store.
    #[error("record store query failed: {message}")]
    Query {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }
}

/// A typed query/write condition.
///
/// Replaces condition-string parsing: callers describe the shape they
/// mean and dispatch matches on it structurally. Only primary-key,
/// single-field equality, and single-field IN-list shapes are
/// index-eligible; everything else passes through to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Every record of the entity type.
    All,
    /// Records with the given primary keys.
    Ids(Vec<RecordId>),
    /// Records where `field` equals `value`.
    Eq {
        /// Field name.
        field: String,
        /// Required value.
        value: FieldValue,
    },
    /// Records where `field` is any of `values`.
    In {
        /// Field name.
        field: String,
        /// Accepted values.
        values: Vec<FieldValue>,
    },
}

impl Condition {
    /// Builds an equality condition.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Builds an IN-list condition.
    #[must_use]
    pub fn any(
        field: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<FieldValue>>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a primary-key condition.
    #[must_use]
    pub fn ids(ids: impl IntoIterator<Item = impl Into<RecordId>>) -> Self {
        Self::Ids(ids.into_iter().map(Into::into).collect())
    }
}

/// The capabilities rowcache requires from a record store.
///
/// # Contract
///
/// - Fetches return records in the store's natural order
/// - `entity` names the concrete type being queried; implementations
///   that model subtypes in one table scope fetches and writes to the
///   named type and its descendants
/// - `resolve_ids` evaluates a condition against the *current* data;
///   rowcache calls it exactly once per bulk write and treats the
///   result as frozen
/// - Implementations must be `Send + Sync`
pub trait RecordStore: Send + Sync {
    /// Fetches records by primary key.
    ///
    /// Identifiers with no matching record are simply absent from the
    /// result; the cache layer decides whether that is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or the query
    /// fails.
    fn fetch_by_ids(&self, entity: &str, ids: &[RecordId]) -> StoreResult<Vec<RawRecord>>;

    /// Fetches records matching every `(field, value)` equality.
    ///
    /// A single pair is a plain equality fetch; multiple pairs are
    /// conjunctive (used by compound indexes).
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or the query
    /// fails.
    fn fetch_matching(
        &self,
        entity: &str,
        criteria: &[(String, FieldValue)],
    ) -> StoreResult<Vec<RawRecord>>;

    /// Resolves a condition to the primary keys of matching records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or the query
    /// fails.
    fn resolve_ids(&self, entity: &str, condition: &Condition) -> StoreResult<Vec<RecordId>>;

    /// Applies field updates to the given records.
    ///
    /// Returns the number of records updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or the write
    /// fails.
    fn update_by_ids(
        &self,
        entity: &str,
        ids: &[RecordId],
        changes: &[(String, FieldValue)],
    ) -> StoreResult<usize>;

    /// Deletes the given records.
    ///
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or the write
    /// fails.
    fn delete_by_ids(&self, entity: &str, ids: &[RecordId]) -> StoreResult<usize>;

    /// Applies field updates to every record of the type.
    ///
    /// Returns the number of records updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or the write
    /// fails.
    fn update_all(&self, entity: &str, changes: &[(String, FieldValue)]) -> StoreResult<usize>;

    /// Deletes every record of the type.
    ///
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or the write
    /// fails.
    fn delete_all(&self, entity: &str) -> StoreResult<usize>;
}
