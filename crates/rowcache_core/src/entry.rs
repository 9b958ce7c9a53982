//! Versioned cache entries and their storage protocol.
//!
//! A cache entry is the current answer for one index key: a sequence
//! of record identifiers, a sequence of full records, or an explicit
//! not-yet-known marker. Entries are stamped with the entity type's
//! version at write time; a stamp that no longer matches the version
//! counter means the entry is stale and reads as a miss.

use crate::error::{CacheError, CacheResult};
use crate::record::RawRecord;
use crate::types::{RecordId, Version};
use crate::version::VersionStore;
use rowcache_backend::CacheBackend;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// The payload of one cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// Identifiers of the records under this key, in store order.
    Ids(Vec<RecordId>),
    /// Full records under this key, in store order.
    Records(Vec<RawRecord>),
    /// Membership under this key has been superseded and is unknown;
    /// readers treat this exactly as a miss and repopulate.
    Unknown,
}

/// One versioned, TTL-bounded value in the distributed cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    version: Version,
    payload: EntryPayload,
}

impl CacheEntry {
    /// Creates an entry stamped with the given version.
    #[must_use]
    pub const fn new(version: Version, payload: EntryPayload) -> Self {
        Self { version, payload }
    }

    /// Creates a not-yet-known marker entry.
    #[must_use]
    pub const fn unknown(version: Version) -> Self {
        Self::new(version, EntryPayload::Unknown)
    }

    /// The version this entry was stamped with.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// The entry's payload.
    #[must_use]
    pub const fn payload(&self) -> &EntryPayload {
        &self.payload
    }

    /// True if the entry is valid for the given current version.
    #[must_use]
    pub fn is_current(&self, current: Version) -> bool {
        self.version == current
    }

    /// True if this entry is the not-yet-known marker.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self.payload, EntryPayload::Unknown)
    }

    /// The identifiers in this entry, for id payloads.
    #[must_use]
    pub fn ids(&self) -> Option<&[RecordId]> {
        match &self.payload {
            EntryPayload::Ids(ids) => Some(ids),
            _ => None,
        }
    }

    /// The records in this entry, for full-record payloads.
    #[must_use]
    pub fn records(&self) -> Option<&[RawRecord]> {
        match &self.payload {
            EntryPayload::Records(records) => Some(records),
            _ => None,
        }
    }

    /// Adds an identifier to an id payload if not already present.
    ///
    /// Returns true if the payload changed.
    pub fn add_id(&mut self, id: RecordId) -> bool {
        match &mut self.payload {
            EntryPayload::Ids(ids) if !ids.contains(&id) => {
                ids.push(id);
                true
            }
            _ => false,
        }
    }

    /// Removes an identifier (or the record carrying it) from the
    /// payload.
    ///
    /// Returns true if the payload changed.
    pub fn remove_id(&mut self, id: RecordId) -> bool {
        match &mut self.payload {
            EntryPayload::Ids(ids) => {
                let before = ids.len();
                ids.retain(|existing| *existing != id);
                ids.len() != before
            }
            EntryPayload::Records(records) => {
                let before = records.len();
                records.retain(|record| record.id().ok() != Some(id));
                records.len() != before
            }
            EntryPayload::Unknown => false,
        }
    }

    /// Encodes the entry to its CBOR wire form.
    ///
    /// # Errors
    ///
    /// Returns a codec error if serialization fails.
    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|err| CacheError::codec(err.to_string()))?;
        Ok(bytes)
    }

    /// Decodes an entry from its CBOR wire form.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the bytes are not a valid entry.
    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        ciborium::from_reader(bytes).map_err(|err| CacheError::codec(err.to_string()))
    }
}

/// Storage protocol for cache entries.
///
/// Owns the key namespace, the TTL default, the version stamping on
/// write, the staleness check on read, and the degradation rules: a
/// delete that fails escalates to a version bump (atomic, idempotent,
/// retryable) rather than leaving a possibly-stale entry readable.
pub struct EntryStore {
    backend: Arc<dyn CacheBackend>,
    versions: Arc<VersionStore>,
    namespace: String,
    default_ttl: Duration,
}

impl EntryStore {
    /// Creates an entry store.
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        versions: Arc<VersionStore>,
        namespace: impl Into<String>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            versions,
            namespace: namespace.into(),
            default_ttl,
        }
    }

    /// The TTL applied when an index has no override.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Reads the entry under `key`, if present and current.
    ///
    /// Stale entries (version mismatch) and undecodable entries read
    /// as `None`; the caller repopulates transparently. The
    /// not-yet-known marker is returned as-is - callers must treat it
    /// as a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached; the caller
    /// decides whether to degrade to the record store.
    pub fn read(&self, entity: &str, key: &str) -> CacheResult<Option<CacheEntry>> {
        let Some(bytes) = self.backend.get(&self.full_key(entity, key))? else {
            return Ok(None);
        };
        let entry = match CacheEntry::decode(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(entity, key, %err, "undecodable cache entry, treating as miss");
                return Ok(None);
            }
        };
        let current = self.versions.current(entity)?;
        if entry.is_current(current) {
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    /// Writes a payload under `key`, stamped with the entity type's
    /// current version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read or the backend
    /// write fails; a result that cannot be stamped must not be cached.
    pub fn write(
        &self,
        entity: &str,
        key: &str,
        payload: EntryPayload,
        ttl: Duration,
    ) -> CacheResult<()> {
        let version = self.versions.current(entity)?;
        self.write_stamped(entity, key, &CacheEntry::new(version, payload), ttl)
    }

    /// Deletes the entry under `key`.
    ///
    /// A failed delete risks leaving a stale entry readable, so it
    /// escalates to a version bump for the whole entity type.
    ///
    /// # Errors
    ///
    /// Returns an error only if the bump fails too.
    pub fn delete(&self, entity: &str, key: &str) -> CacheResult<()> {
        match self.backend.delete(&self.full_key(entity, key)) {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(entity, key, %err, "entry delete failed, bumping version");
                self.versions.bump(entity)?;
                Ok(())
            }
        }
    }

    /// Adds an identifier to the id entry under `key`, in place.
    ///
    /// If the entry is not cached (or stale), membership cannot be
    /// asserted without a store query, so the not-yet-known marker is
    /// written instead and the next read repopulates.
    ///
    /// # Errors
    ///
    /// Returns an error only if escalation to a version bump fails.
    pub fn add_id(&self, entity: &str, key: &str, id: RecordId, ttl: Duration) -> CacheResult<()> {
        let result = self.correct(entity, key, ttl, |entry| entry.add_id(id), true);
        self.recover_correction(entity, key, result)
    }

    /// Removes an identifier from the entry under `key`, in place.
    ///
    /// Removing from an uncached key is a no-op: absence already reads
    /// as a miss.
    ///
    /// # Errors
    ///
    /// Returns an error only if escalation to a version bump fails.
    pub fn remove_id(
        &self,
        entity: &str,
        key: &str,
        id: RecordId,
        ttl: Duration,
    ) -> CacheResult<()> {
        let result = self.correct(entity, key, ttl, |entry| entry.remove_id(id), false);
        self.recover_correction(entity, key, result)
    }

    fn correct(
        &self,
        entity: &str,
        key: &str,
        ttl: Duration,
        apply: impl FnOnce(&mut CacheEntry) -> bool,
        mark_unknown_when_missing: bool,
    ) -> CacheResult<()> {
        match self.read(entity, key)? {
            Some(mut entry) if !entry.is_unknown() => {
                if apply(&mut entry) {
                    // Keep the original stamp: no bump happened, the
                    // corrected entry stays valid for its version.
                    self.write_stamped(entity, key, &entry, ttl)?;
                }
                Ok(())
            }
            Some(_) => Ok(()),
            None if mark_unknown_when_missing => {
                let version = self.versions.current(entity)?;
                self.write_stamped(entity, key, &CacheEntry::unknown(version), ttl)
            }
            None => Ok(()),
        }
    }

    /// An in-place correction that fails midway may leave the entry
    /// half-written; deleting it (with its own bump escalation) is the
    /// recovery that fails toward repopulation.
    fn recover_correction(
        &self,
        entity: &str,
        key: &str,
        result: CacheResult<()>,
    ) -> CacheResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(entity, key, %err, "in-place correction failed, deleting entry");
                self.delete(entity, key)
            }
        }
    }

    fn write_stamped(
        &self,
        entity: &str,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> CacheResult<()> {
        let bytes = entry.encode()?;
        self.backend.set(&self.full_key(entity, key), &bytes, ttl)?;
        Ok(())
    }

    fn full_key(&self, entity: &str, key: &str) -> String {
        format!("{}:{}:{}", self.namespace, entity, key)
    }
}

impl std::fmt::Debug for EntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryStore")
            .field("namespace", &self.namespace)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}
