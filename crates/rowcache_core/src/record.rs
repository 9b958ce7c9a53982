//! Records and change snapshots.
//!
//! [`RawRecord`] is the store-shape of a record: an ordered field map.
//! [`RecordChange`] is the dirty-tracking view of one in-flight write,
//! exposing both the record's pending values and its prior committed
//! values so indexes can invalidate both positions.

use crate::error::{CacheError, CacheResult};
use crate::types::RecordId;
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name of the primary key.
pub const ID_FIELD: &str = "id";

/// Field name of the subtype discriminator, when present.
pub const TYPE_FIELD: &str = "type";

/// A record as fetched from the record store: an ordered field map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl RawRecord {
    /// Creates a record with the given primary key.
    #[must_use]
    pub fn new(id: RecordId) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(ID_FIELD.to_string(), FieldValue::from(id));
        Self { fields }
    }

    /// Creates a record from a complete field map.
    #[must_use]
    pub fn from_fields(fields: BTreeMap<String, FieldValue>) -> Self {
        Self { fields }
    }

    /// Adds or replaces a field, builder style.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Returns the record's primary key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidRecord`] if the record has no
    /// integer `id` field.
    pub fn id(&self) -> CacheResult<RecordId> {
        self.fields
            .get(ID_FIELD)
            .and_then(FieldValue::as_id)
            .ok_or_else(|| CacheError::invalid_record("record has no integer id field"))
    }

    /// Returns the subtype discriminator, if the record carries one.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        match self.fields.get(TYPE_FIELD) {
            Some(FieldValue::Text(kind)) => Some(kind),
            _ => None,
        }
    }

    /// Returns a field value, if set.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Returns a field value, null if absent.
    #[must_use]
    pub fn value(&self, field: &str) -> FieldValue {
        self.fields.get(field).cloned().unwrap_or(FieldValue::Null)
    }

    /// Returns the full field map.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }
}

/// The dirty-tracking view of one in-flight write to one record.
///
/// Captures the record's *current* in-memory field values (which
/// already reflect the pending write) alongside its *prior* committed
/// values. Freshly created records have no prior side.
#[derive(Debug, Clone)]
pub struct RecordChange {
    id: RecordId,
    current: BTreeMap<String, FieldValue>,
    prior: Option<BTreeMap<String, FieldValue>>,
}

impl RecordChange {
    /// A change for a freshly created record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record has no primary key.
    pub fn created(record: &RawRecord) -> CacheResult<Self> {
        Ok(Self {
            id: record.id()?,
            current: record.fields().clone(),
            prior: None,
        })
    }

    /// A change for an update: current pending values plus the prior
    /// committed record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record has no primary key.
    pub fn updated(current: &RawRecord, prior: &RawRecord) -> CacheResult<Self> {
        Ok(Self {
            id: current.id()?,
            current: current.fields().clone(),
            prior: Some(prior.fields().clone()),
        })
    }

    /// A change for a destroy: the record's committed values on both
    /// sides (nothing is dirty, the whole row goes away).
    ///
    /// # Errors
    ///
    /// Returns an error if the record has no primary key.
    pub fn destroyed(record: &RawRecord) -> CacheResult<Self> {
        Ok(Self {
            id: record.id()?,
            current: record.fields().clone(),
            prior: Some(record.fields().clone()),
        })
    }

    /// The record's primary key.
    #[must_use]
    pub const fn id(&self) -> RecordId {
        self.id
    }

    /// True if the record was freshly created (no prior side).
    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.prior.is_none()
    }

    /// The current (pending) value of a field, null if absent.
    #[must_use]
    pub fn current(&self, field: &str) -> FieldValue {
        self.current.get(field).cloned().unwrap_or(FieldValue::Null)
    }

    /// The prior committed value of a field.
    ///
    /// Null for freshly created records, which had no prior state.
    #[must_use]
    pub fn prior(&self, field: &str) -> FieldValue {
        match &self.prior {
            Some(prior) => prior.get(field).cloned().unwrap_or(FieldValue::Null),
            None => FieldValue::Null,
        }
    }

    /// True if this write changes the given field.
    #[must_use]
    pub fn changed(&self, field: &str) -> bool {
        match &self.prior {
            Some(_) => self.prior(field) != self.current(field),
            None => true,
        }
    }

    /// The full current field map.
    #[must_use]
    pub fn current_fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.current
    }

    /// The full prior field map, if the record existed before.
    #[must_use]
    pub fn prior_fields(&self) -> Option<&BTreeMap<String, FieldValue>> {
        self.prior.as_ref()
    }
}
