//! Secondary indexes over record-store query fields.
//!
//! An index owns one (field-tuple → cache entry) mapping for one
//! entity type: it populates entries from the record store on miss,
//! applies its scope predicate, and keeps entries correct as records
//! are written, destroyed, or bulk-modified.

use crate::entry::{EntryPayload, EntryStore};
use crate::error::{CacheError, CacheResult};
use crate::record::{RawRecord, RecordChange, ID_FIELD};
use crate::scope::Scope;
use crate::store::RecordStore;
use crate::types::RecordId;
use crate::value::FieldValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What an index stores per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Record identifiers only; full records are materialized on
    /// demand through the identifier index or the record store.
    IdsOnly,
    /// Complete records.
    FullRecord,
}

/// How a find resolves its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    /// The first matching record.
    First,
    /// All matching records.
    All,
    /// Identifiers only.
    Ids,
    /// Raw rows, skipping subtype filtering.
    Raw,
}

/// A concrete value tuple for an index's key fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey(Vec<FieldValue>);

impl IndexKey {
    /// Creates a key from its field values, in index field order.
    #[must_use]
    pub fn new(values: Vec<FieldValue>) -> Self {
        Self(values)
    }

    /// The key's values.
    #[must_use]
    pub fn values(&self) -> &[FieldValue] {
        &self.0
    }

    /// Number of values in the key.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

impl From<FieldValue> for IndexKey {
    fn from(value: FieldValue) -> Self {
        Self(vec![value])
    }
}

impl From<i64> for IndexKey {
    fn from(value: i64) -> Self {
        Self(vec![FieldValue::Int(value)])
    }
}

impl From<&str> for IndexKey {
    fn from(value: &str) -> Self {
        Self(vec![FieldValue::from(value)])
    }
}

impl From<String> for IndexKey {
    fn from(value: String) -> Self {
        Self(vec![FieldValue::from(value)])
    }
}

impl From<RecordId> for IndexKey {
    fn from(id: RecordId) -> Self {
        Self(vec![FieldValue::from(id)])
    }
}

/// Registration-time description of an index.
///
/// Immutable once registered; only the index's cache entries change at
/// runtime.
///
/// # Example
///
/// ```rust
/// use rowcache_core::{IndexSpec, Scope};
///
/// // ids of male pets by color, speculatively maintained on write
/// let spec = IndexSpec::new(["color_id"])
///     .scoped(Scope::none().eq("sex", "m"))
///     .prefixed("male")
///     .write_ahead();
/// assert_eq!(spec.resolved_name(), "male_by_color_id");
/// ```
#[derive(Debug, Clone)]
pub struct IndexSpec {
    name: Option<String>,
    prefix: Option<String>,
    key_fields: Vec<String>,
    scope: Scope,
    storage: StorageMode,
    write_ahead: bool,
    ttl: Option<Duration>,
}

impl IndexSpec {
    /// Creates a spec keyed on the given fields, in order.
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: None,
            prefix: None,
            key_fields: fields.into_iter().map(Into::into).collect(),
            scope: Scope::none(),
            storage: StorageMode::IdsOnly,
            write_ahead: false,
            ttl: None,
        }
    }

    /// Gives the index an explicit name instead of the generated one.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a disambiguating prefix to the generated name.
    #[must_use]
    pub fn prefixed(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Restricts the index to records matching a scope.
    #[must_use]
    pub fn scoped(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Stores complete records instead of identifiers.
    #[must_use]
    pub const fn full_record(mut self) -> Self {
        self.storage = StorageMode::FullRecord;
        self
    }

    /// Allows speculative in-place additions for records entering the
    /// index on write, instead of deleting the entry and re-querying.
    #[must_use]
    pub const fn write_ahead(mut self) -> Self {
        self.write_ahead = true;
        self
    }

    /// Overrides the cache-wide TTL for this index's entries.
    #[must_use]
    pub const fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// The name this index registers under.
    ///
    /// Generated as `by_<field>` (fields joined with `_and_`), with
    /// the prefix prepended, unless an explicit name was given.
    #[must_use]
    pub fn resolved_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let base = format!("by_{}", self.key_fields.join("_and_"));
        match &self.prefix {
            Some(prefix) => format!("{prefix}_{base}"),
            None => base,
        }
    }

    /// True if this index is keyed on the primary key alone, which
    /// enables direct identifier lookups that bypass the record store.
    #[must_use]
    pub fn is_identifier(&self) -> bool {
        self.key_fields.len() == 1 && self.key_fields[0] == ID_FIELD
    }
}

/// Results of resolving one or more index keys.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Identifier results (ids-only storage).
    Ids(Vec<RecordId>),
    /// Full-record results (full-record storage).
    Records(Vec<RawRecord>),
}

impl Resolved {
    fn into_payload(self) -> EntryPayload {
        match self {
            Self::Ids(ids) => EntryPayload::Ids(ids),
            Self::Records(records) => EntryPayload::Records(records),
        }
    }

    /// The identifiers in this result, fetching them out of full
    /// records when necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if a full record has no primary key.
    pub fn to_ids(&self) -> CacheResult<Vec<RecordId>> {
        match self {
            Self::Ids(ids) => Ok(ids.clone()),
            Self::Records(records) => records.iter().map(RawRecord::id).collect(),
        }
    }

    fn append(&mut self, other: Self) {
        match (self, other) {
            (Self::Ids(all), Self::Ids(more)) => all.extend(more),
            (Self::Records(all), Self::Records(more)) => all.extend(more),
            // Mixed payloads cannot happen: one index has one storage mode.
            _ => unreachable!("mixed resolution payloads"),
        }
    }
}

/// A deferred correction produced by staging a record write.
///
/// Applied at commit (removing the record from its prior key) or
/// discarded at rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged {
    /// The prior-value key to correct.
    pub key: IndexKey,
    /// How to correct it.
    pub action: CorrectionAction,
}

/// How a staged correction is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionAction {
    /// Remove the record's identifier in place (ids-only storage).
    RemoveId,
    /// Delete the whole entry (full-record storage).
    Delete,
}

/// One secondary index over one entity type.
pub struct Index {
    entity: String,
    name: String,
    spec: IndexSpec,
    entries: Arc<EntryStore>,
    ttl: Duration,
}

impl Index {
    /// Creates an index for an entity type.
    pub fn new(entity: impl Into<String>, spec: IndexSpec, entries: Arc<EntryStore>) -> Self {
        let ttl = spec.ttl.unwrap_or(entries.default_ttl());
        Self {
            entity: entity.into(),
            name: spec.resolved_name(),
            spec,
            entries,
            ttl,
        }
    }

    /// The entity type this index was registered on.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// The index's resolved name, unique within its entity type.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fields the index is keyed on, in order.
    #[must_use]
    pub fn key_fields(&self) -> &[String] {
        &self.spec.key_fields
    }

    /// The index's scope predicate.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.spec.scope
    }

    /// The index's storage mode.
    #[must_use]
    pub const fn storage(&self) -> StorageMode {
        self.spec.storage
    }

    /// True if speculative write-ahead additions are enabled.
    #[must_use]
    pub const fn write_ahead(&self) -> bool {
        self.spec.write_ahead
    }

    /// True if this index is keyed on the primary key alone.
    #[must_use]
    pub fn is_identifier(&self) -> bool {
        self.spec.is_identifier()
    }

    /// Resolves one key: serve the cache entry if present and current,
    /// populate from the record store otherwise.
    ///
    /// If the cache backend is unreachable the lookup degrades to the
    /// record store and nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKeyArity`] for a malformed key, or
    /// the record store's error if the fallback query fails.
    pub fn lookup(&self, store: &dyn RecordStore, key: &IndexKey) -> CacheResult<Resolved> {
        self.check_key(key)?;
        let entry_key = self.entry_key(key);
        match self.entries.read(&self.entity, &entry_key) {
            Ok(Some(entry)) => match (self.spec.storage, entry.payload()) {
                (StorageMode::IdsOnly, EntryPayload::Ids(ids)) => Ok(Resolved::Ids(ids.clone())),
                (StorageMode::FullRecord, EntryPayload::Records(records)) => {
                    Ok(Resolved::Records(records.clone()))
                }
                // Unknown marker, or a payload shape left behind by an
                // older index definition: repopulate.
                _ => self.populate(store, key, &entry_key),
            },
            Ok(None) => self.populate(store, key, &entry_key),
            Err(CacheError::Backend(err)) => {
                warn!(index = %self.name, key = %key, %err, "cache read failed, serving from record store");
                self.query_store(store, key)
            }
            Err(err) => Err(err),
        }
    }

    /// Resolves a batch of keys, concatenating results in input key
    /// order. Intra-key ordering is the record store's natural order;
    /// duplicates across keys are preserved.
    ///
    /// # Errors
    ///
    /// Propagates the first per-key failure.
    pub fn resolve(&self, store: &dyn RecordStore, keys: &[IndexKey]) -> CacheResult<Resolved> {
        let mut combined = match self.spec.storage {
            StorageMode::IdsOnly => Resolved::Ids(Vec::new()),
            StorageMode::FullRecord => Resolved::Records(Vec::new()),
        };
        for key in keys {
            combined.append(self.lookup(store, key)?);
        }
        Ok(combined)
    }

    /// Looks up full records directly by identifier.
    ///
    /// Meaningful only for the full-record identifier index: each id
    /// has its own cache entry, and ids missing from the cache are
    /// fetched from the store in one batch and cached - including the
    /// negative (empty) case. Ids that match no record are absent from
    /// the result.
    ///
    /// # Errors
    ///
    /// Returns the record store's error if the batch fetch fails.
    pub fn find_by_ids(
        &self,
        store: &dyn RecordStore,
        ids: &[RecordId],
    ) -> CacheResult<Vec<RawRecord>> {
        let mut cached: BTreeMap<RecordId, Vec<RawRecord>> = BTreeMap::new();
        let mut misses: Vec<RecordId> = Vec::new();
        let mut degraded = false;

        for &id in ids {
            if cached.contains_key(&id) || misses.contains(&id) {
                continue;
            }
            let entry_key = self.entry_key(&IndexKey::from(id));
            match self.entries.read(&self.entity, &entry_key) {
                Ok(Some(entry)) if entry.records().is_some() => {
                    cached.insert(id, entry.records().unwrap_or_default().to_vec());
                }
                Ok(_) => misses.push(id),
                Err(CacheError::Backend(err)) => {
                    if !degraded {
                        warn!(index = %self.name, %err, "cache read failed, serving ids from record store");
                    }
                    degraded = true;
                    misses.push(id);
                }
                Err(err) => return Err(err),
            }
        }

        if !misses.is_empty() {
            let mut rows = store.fetch_by_ids(&self.entity, &misses)?;
            if !self.spec.scope.is_empty() {
                rows.retain(|row| self.spec.scope.matches(row.fields()));
            }
            let mut fetched: BTreeMap<RecordId, Vec<RawRecord>> = BTreeMap::new();
            for row in rows {
                let id = row.id()?;
                fetched.entry(id).or_default().push(row);
            }
            for &id in &misses {
                let records = fetched.remove(&id).unwrap_or_default();
                if !degraded {
                    let payload = EntryPayload::Records(records.clone());
                    let entry_key = self.entry_key(&IndexKey::from(id));
                    if let Err(err) =
                        self.entries.write(&self.entity, &entry_key, payload, self.ttl)
                    {
                        warn!(index = %self.name, id = %id, %err, "failed to cache fetched record");
                    }
                }
                cached.insert(id, records);
            }
        }

        let mut result = Vec::new();
        for &id in ids {
            if let Some(records) = cached.get(&id) {
                result.extend(records.iter().cloned());
            }
        }
        Ok(result)
    }

    /// Maps each requested key to the first matching identifier.
    ///
    /// Keys with no results are omitted - the explicit "unique
    /// mapping" batch form.
    ///
    /// # Errors
    ///
    /// Propagates per-key lookup failures.
    pub fn find_map(
        &self,
        store: &dyn RecordStore,
        keys: &[IndexKey],
    ) -> CacheResult<BTreeMap<IndexKey, RecordId>> {
        let mut map = BTreeMap::new();
        for key in keys {
            let ids = self.lookup(store, key)?.to_ids()?;
            if let Some(first) = ids.first() {
                map.insert(key.clone(), *first);
            }
        }
        Ok(map)
    }

    /// Maps each requested key to all matching identifiers.
    ///
    /// Keys with no results are omitted.
    ///
    /// # Errors
    ///
    /// Propagates per-key lookup failures.
    pub fn find_all_map(
        &self,
        store: &dyn RecordStore,
        keys: &[IndexKey],
    ) -> CacheResult<BTreeMap<IndexKey, Vec<RecordId>>> {
        let mut map = BTreeMap::new();
        for key in keys {
            let ids = self.lookup(store, key)?.to_ids()?;
            if !ids.is_empty() {
                map.insert(key.clone(), ids);
            }
        }
        Ok(map)
    }

    /// Stages the index maintenance for one record write.
    ///
    /// The record's *current* (pending) position is invalidated
    /// immediately - other readers in this process may already see the
    /// uncommitted write, and invalidation of the new key must happen
    /// whether or not the transaction commits. The *prior* position's
    /// correction is returned for the caller to apply at commit or
    /// discard at rollback.
    ///
    /// # Errors
    ///
    /// Returns an error if the immediate invalidation cannot complete
    /// even by version bump.
    pub fn stage_record(
        &self,
        change: &RecordChange,
        destroyed: bool,
    ) -> CacheResult<Option<Staged>> {
        let id = change.id();
        let current_key = self.key_of(change.current_fields());
        let prior_key = change.prior_fields().and_then(|fields| self.key_of(fields));
        let now_in = self.spec.scope.matches_current(change);
        let was_in = self.spec.scope.matches_prior(change);

        // Update that moves nothing in this index: identifiers are
        // position-only, so an unchanged key and unchanged membership
        // need no work at all.
        if !destroyed
            && !change.is_created()
            && self.spec.storage == StorageMode::IdsOnly
            && current_key == prior_key
            && now_in == was_in
        {
            return Ok(None);
        }

        if let Some(key) = &current_key {
            if now_in {
                let entry_key = self.entry_key(key);
                if destroyed {
                    match self.spec.storage {
                        StorageMode::IdsOnly => {
                            self.entries.remove_id(&self.entity, &entry_key, id, self.ttl)?;
                        }
                        StorageMode::FullRecord => self.entries.delete(&self.entity, &entry_key)?,
                    }
                } else if self.spec.write_ahead && self.spec.storage == StorageMode::IdsOnly {
                    self.entries.add_id(&self.entity, &entry_key, id, self.ttl)?;
                } else {
                    self.entries.delete(&self.entity, &entry_key)?;
                }
            }
        }

        let deferred = match (&prior_key, was_in) {
            (Some(prior), true)
                if destroyed || current_key.as_ref() != Some(prior) || !now_in =>
            {
                Some(Staged {
                    key: prior.clone(),
                    action: match self.spec.storage {
                        StorageMode::IdsOnly => CorrectionAction::RemoveId,
                        StorageMode::FullRecord => CorrectionAction::Delete,
                    },
                })
            }
            _ => None,
        };
        Ok(deferred)
    }

    /// Applies a staged prior-key correction for the given record.
    ///
    /// # Errors
    ///
    /// Returns an error if the correction cannot complete even by
    /// version bump.
    pub fn apply_staged(&self, staged: &Staged, id: RecordId) -> CacheResult<()> {
        let entry_key = self.entry_key(&staged.key);
        match staged.action {
            CorrectionAction::RemoveId => {
                self.entries.remove_id(&self.entity, &entry_key, id, self.ttl)
            }
            CorrectionAction::Delete => self.entries.delete(&self.entity, &entry_key),
        }
    }

    /// Collects the distinct keys the given rows occupy in this index,
    /// applying the scope predicate.
    #[must_use]
    pub fn capture_keys(&self, rows: &[RawRecord]) -> Vec<IndexKey> {
        let mut keys = Vec::new();
        for row in rows {
            if !self.spec.scope.is_empty() && !self.spec.scope.matches(row.fields()) {
                continue;
            }
            if let Some(key) = self.key_of(row.fields()) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Deletes the entries under the given keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a delete cannot complete even by version
    /// bump.
    pub fn invalidate_keys(&self, keys: &[IndexKey]) -> CacheResult<()> {
        for key in keys {
            self.entries.delete(&self.entity, &self.entry_key(key))?;
        }
        Ok(())
    }

    /// Deletes every entry whose key one of the given rows occupies.
    ///
    /// Used for the post-write pass of a bulk update: the rows hold
    /// their new field values, so their keys are the new positions.
    ///
    /// # Errors
    ///
    /// Returns an error if a delete cannot complete even by version
    /// bump.
    pub fn invalidate_rows(&self, rows: &[RawRecord]) -> CacheResult<()> {
        self.invalidate_keys(&self.capture_keys(rows))
    }

    fn populate(
        &self,
        store: &dyn RecordStore,
        key: &IndexKey,
        entry_key: &str,
    ) -> CacheResult<Resolved> {
        let resolved = self.query_store(store, key)?;
        let payload = resolved.clone().into_payload();
        match self.entries.write(&self.entity, entry_key, payload, self.ttl) {
            Ok(()) => debug!(index = %self.name, key = %key, "populated cache entry"),
            Err(err) => {
                warn!(index = %self.name, key = %key, %err, "failed to cache populated entry");
            }
        }
        Ok(resolved)
    }

    fn query_store(&self, store: &dyn RecordStore, key: &IndexKey) -> CacheResult<Resolved> {
        let criteria: Vec<(String, FieldValue)> = self
            .spec
            .key_fields
            .iter()
            .cloned()
            .zip(key.values().iter().cloned())
            .collect();
        let mut rows = store.fetch_matching(&self.entity, &criteria)?;
        if !self.spec.scope.is_empty() {
            rows.retain(|row| self.spec.scope.matches(row.fields()));
        }
        match self.spec.storage {
            StorageMode::IdsOnly => {
                let ids = rows.iter().map(RawRecord::id).collect::<CacheResult<_>>()?;
                Ok(Resolved::Ids(ids))
            }
            StorageMode::FullRecord => Ok(Resolved::Records(rows)),
        }
    }

    fn key_of(&self, fields: &BTreeMap<String, FieldValue>) -> Option<IndexKey> {
        let mut values = Vec::with_capacity(self.spec.key_fields.len());
        for field in &self.spec.key_fields {
            match fields.get(field) {
                Some(value) if !value.is_null() => values.push(value.clone()),
                // A null indexed field means the record occupies no key.
                _ => return None,
            }
        }
        Some(IndexKey::new(values))
    }

    fn entry_key(&self, key: &IndexKey) -> String {
        format!("{}:{}", self.name, key)
    }

    fn check_key(&self, key: &IndexKey) -> CacheResult<()> {
        if key.arity() != self.spec.key_fields.len() {
            return Err(CacheError::InvalidKeyArity {
                index: self.name.clone(),
                expected: self.spec.key_fields.len(),
                actual: key.arity(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("entity", &self.entity)
            .field("name", &self.name)
            .field("storage", &self.spec.storage)
            .field("write_ahead", &self.spec.write_ahead)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entry_store, StubStore};
    use crate::version::VersionStore;
    use rowcache_backend::{CacheBackend, MemoryBackend};

    fn ids_index(entries: Arc<EntryStore>) -> Index {
        Index::new("Pet", IndexSpec::new(["color_id"]), entries)
    }

    fn pet(id: i64, color: i64, sex: &str) -> RawRecord {
        RawRecord::new(RecordId::new(id))
            .with("color_id", color)
            .with("sex", sex)
    }

    #[test]
    fn generated_names() {
        assert_eq!(IndexSpec::new(["id"]).resolved_name(), "by_id");
        assert_eq!(
            IndexSpec::new(["breed_id", "color_id"]).resolved_name(),
            "by_breed_id_and_color_id"
        );
        assert_eq!(
            IndexSpec::new(["color_id"]).prefixed("male").resolved_name(),
            "male_by_color_id"
        );
        assert_eq!(
            IndexSpec::new(["color_id"]).named("all_colors").resolved_name(),
            "all_colors"
        );
    }

    #[test]
    fn identifier_detection() {
        assert!(IndexSpec::new(["id"]).is_identifier());
        assert!(!IndexSpec::new(["color_id"]).is_identifier());
        assert!(!IndexSpec::new(["id", "color_id"]).is_identifier());
    }

    #[test]
    fn wrong_arity_is_an_error() {
        let (entries, _) = entry_store();
        let index = ids_index(entries);
        let store = StubStore::new("Pet", vec![]);
        let key = IndexKey::new(vec![FieldValue::Int(1), FieldValue::Int(2)]);
        assert!(matches!(
            index.lookup(&store, &key),
            Err(CacheError::InvalidKeyArity {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn miss_populates_from_store() {
        let (entries, _) = entry_store();
        let index = ids_index(entries);
        let store = StubStore::new("Pet", vec![pet(1, 9, "f"), pet(2, 10, "m")]);

        let resolved = index.lookup(&store, &IndexKey::from(9i64)).unwrap();
        assert_eq!(resolved, Resolved::Ids(vec![RecordId::new(1)]));
        assert_eq!(store.query_count(), 1);
    }

    #[test]
    fn second_lookup_hits_cache() {
        let (entries, _) = entry_store();
        let index = ids_index(entries);
        let store = StubStore::new("Pet", vec![pet(1, 9, "f")]);

        index.lookup(&store, &IndexKey::from(9i64)).unwrap();
        index.lookup(&store, &IndexKey::from(9i64)).unwrap();
        assert_eq!(store.query_count(), 1);
    }

    #[test]
    fn empty_result_is_cached_negative() {
        let (entries, _) = entry_store();
        let index = ids_index(entries);
        let store = StubStore::new("Pet", vec![]);

        assert_eq!(
            index.lookup(&store, &IndexKey::from(9i64)).unwrap(),
            Resolved::Ids(vec![])
        );
        store.disable();
        // Served from the cached empty entry, no store access.
        assert_eq!(
            index.lookup(&store, &IndexKey::from(9i64)).unwrap(),
            Resolved::Ids(vec![])
        );
    }

    #[test]
    fn scope_filters_population() {
        let (entries, _) = entry_store();
        let index = Index::new(
            "Pet",
            IndexSpec::new(["color_id"])
                .scoped(Scope::none().eq("sex", "m"))
                .prefixed("male"),
            entries,
        );
        let store = StubStore::new("Pet", vec![pet(1, 9, "f"), pet(2, 9, "m")]);

        let resolved = index.lookup(&store, &IndexKey::from(9i64)).unwrap();
        assert_eq!(resolved, Resolved::Ids(vec![RecordId::new(2)]));
    }

    #[test]
    fn batch_preserves_key_order_without_dedup() {
        let (entries, _) = entry_store();
        let index = ids_index(entries);
        let store = StubStore::new("Pet", vec![pet(1, 9, "f"), pet(2, 10, "m")]);

        let keys = [
            IndexKey::from(10i64),
            IndexKey::from(9i64),
            IndexKey::from(10i64),
        ];
        let resolved = index.resolve(&store, &keys).unwrap();
        assert_eq!(
            resolved,
            Resolved::Ids(vec![RecordId::new(2), RecordId::new(1), RecordId::new(2)])
        );
    }

    #[test]
    fn find_by_ids_batches_misses() {
        let (entries, _) = entry_store();
        let index = Index::new("Pet", IndexSpec::new(["id"]).full_record(), entries);
        let store = StubStore::new("Pet", vec![pet(1, 9, "f"), pet(2, 10, "m")]);

        let records = index
            .find_by_ids(&store, &[RecordId::new(2), RecordId::new(1)])
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id().unwrap(), RecordId::new(2));
        assert_eq!(records[1].id().unwrap(), RecordId::new(1));
        assert_eq!(store.query_count(), 1);

        store.disable();
        let records = index.find_by_ids(&store, &[RecordId::new(1)]).unwrap();
        assert_eq!(records[0].id().unwrap(), RecordId::new(1));
    }

    #[test]
    fn find_by_ids_caches_negative_lookups() {
        let (entries, _) = entry_store();
        let index = Index::new("Pet", IndexSpec::new(["id"]).full_record(), entries);
        let store = StubStore::new("Pet", vec![pet(1, 9, "f")]);

        let records = index
            .find_by_ids(&store, &[RecordId::new(1), RecordId::new(99)])
            .unwrap();
        assert_eq!(records.len(), 1);

        store.disable();
        // The not-found fact is cached too.
        let records = index.find_by_ids(&store, &[RecordId::new(99)]).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn find_map_takes_first_and_omits_empty() {
        let (entries, _) = entry_store();
        let index = ids_index(entries);
        let store = StubStore::new("Pet", vec![pet(1, 9, "f"), pet(2, 9, "m")]);

        let map = index
            .find_map(&store, &[IndexKey::from(9i64), IndexKey::from(42i64)])
            .unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map[&IndexKey::from(9i64)], RecordId::new(1));
    }

    #[test]
    fn save_invalidates_new_key_immediately() {
        let (entries, _) = entry_store();
        let index = ids_index(Arc::clone(&entries));
        let store = StubStore::new("Pet", vec![pet(1, 9, "f")]);

        index.lookup(&store, &IndexKey::from(9i64)).unwrap();
        index.lookup(&store, &IndexKey::from(10i64)).unwrap();

        let change =
            RecordChange::updated(&pet(1, 10, "f"), &pet(1, 9, "f")).unwrap();
        let staged = index.stage_record(&change, false).unwrap();

        // New key deleted now; old key corrected only via the staged op.
        assert!(entries.read("Pet", "by_color_id:10").unwrap().is_none());
        assert!(entries.read("Pet", "by_color_id:9").unwrap().is_some());

        let staged = staged.unwrap();
        assert_eq!(staged.key, IndexKey::from(9i64));
        assert_eq!(staged.action, CorrectionAction::RemoveId);

        index.apply_staged(&staged, change.id()).unwrap();
        let entry = entries.read("Pet", "by_color_id:9").unwrap().unwrap();
        assert_eq!(entry.ids(), Some(&[][..]));
    }

    #[test]
    fn unchanged_ids_only_update_stages_nothing() {
        let (entries, _) = entry_store();
        let index = ids_index(Arc::clone(&entries));
        let store = StubStore::new("Pet", vec![pet(1, 9, "f")]);
        index.lookup(&store, &IndexKey::from(9i64)).unwrap();

        let renamed = pet(1, 9, "f").with("name", "Molly");
        let change = RecordChange::updated(&renamed, &pet(1, 9, "f")).unwrap();
        let staged = index.stage_record(&change, false).unwrap();

        assert!(staged.is_none());
        assert!(entries.read("Pet", "by_color_id:9").unwrap().is_some());
    }

    #[test]
    fn write_ahead_adds_in_place() {
        let (entries, _) = entry_store();
        let index = Index::new(
            "Pet",
            IndexSpec::new(["color_id"]).write_ahead(),
            Arc::clone(&entries),
        );
        let store = StubStore::new("Pet", vec![pet(1, 9, "f")]);
        index.lookup(&store, &IndexKey::from(9i64)).unwrap();

        let change = RecordChange::created(&pet(2, 9, "m")).unwrap();
        let staged = index.stage_record(&change, false).unwrap();
        assert!(staged.is_none());

        let entry = entries.read("Pet", "by_color_id:9").unwrap().unwrap();
        assert_eq!(entry.ids(), Some(&[RecordId::new(1), RecordId::new(2)][..]));
    }

    #[test]
    fn write_ahead_into_uncached_key_leaves_marker() {
        let (entries, _) = entry_store();
        let index = Index::new(
            "Pet",
            IndexSpec::new(["color_id"]).write_ahead(),
            Arc::clone(&entries),
        );

        let change = RecordChange::created(&pet(2, 7, "m")).unwrap();
        index.stage_record(&change, false).unwrap();

        let entry = entries.read("Pet", "by_color_id:7").unwrap().unwrap();
        assert!(entry.is_unknown());
    }

    #[test]
    fn scoped_index_ignores_records_outside_scope() {
        let (entries, _) = entry_store();
        let index = Index::new(
            "Pet",
            IndexSpec::new(["color_id"])
                .scoped(Scope::none().eq("sex", "m"))
                .prefixed("male"),
            Arc::clone(&entries),
        );
        let store = StubStore::new("Pet", vec![pet(2, 9, "m")]);
        index.lookup(&store, &IndexKey::from(9i64)).unwrap();

        // A female pet changing color touches nothing in the male index.
        let change =
            RecordChange::updated(&pet(1, 9, "f"), &pet(1, 3, "f")).unwrap();
        let staged = index.stage_record(&change, false).unwrap();
        assert!(staged.is_none());
        assert!(entries.read("Pet", "male_by_color_id:9").unwrap().is_some());
    }

    #[test]
    fn leaving_scope_stages_removal() {
        let (entries, _) = entry_store();
        let index = Index::new(
            "Pet",
            IndexSpec::new(["color_id"])
                .scoped(Scope::none().eq("sex", "m"))
                .prefixed("male"),
            Arc::clone(&entries),
        );
        let store = StubStore::new("Pet", vec![pet(2, 9, "m")]);
        index.lookup(&store, &IndexKey::from(9i64)).unwrap();

        let change =
            RecordChange::updated(&pet(2, 9, "f"), &pet(2, 9, "m")).unwrap();
        let staged = index.stage_record(&change, false).unwrap().unwrap();
        assert_eq!(staged.key, IndexKey::from(9i64));

        index.apply_staged(&staged, change.id()).unwrap();
        let entry = entries.read("Pet", "male_by_color_id:9").unwrap().unwrap();
        assert_eq!(entry.ids(), Some(&[][..]));
    }

    #[test]
    fn destroy_removes_membership() {
        let (entries, _) = entry_store();
        let index = ids_index(Arc::clone(&entries));
        let store = StubStore::new("Pet", vec![pet(1, 9, "f"), pet(2, 9, "m")]);
        index.lookup(&store, &IndexKey::from(9i64)).unwrap();

        let change = RecordChange::destroyed(&pet(1, 9, "f")).unwrap();
        let staged = index.stage_record(&change, true).unwrap();

        let entry = entries.read("Pet", "by_color_id:9").unwrap().unwrap();
        assert_eq!(entry.ids(), Some(&[RecordId::new(2)][..]));

        // The staged correction is an idempotent re-removal.
        index.apply_staged(&staged.unwrap(), change.id()).unwrap();
        let entry = entries.read("Pet", "by_color_id:9").unwrap().unwrap();
        assert_eq!(entry.ids(), Some(&[RecordId::new(2)][..]));
    }

    #[test]
    fn null_indexed_field_occupies_no_key() {
        let (entries, _) = entry_store();
        let index = ids_index(Arc::clone(&entries));

        let change = RecordChange::created(&RawRecord::new(RecordId::new(5))).unwrap();
        let staged = index.stage_record(&change, false).unwrap();
        assert!(staged.is_none());
    }

    #[test]
    fn degraded_backend_serves_from_store_without_caching() {
        struct DownBackend;
        impl CacheBackend for DownBackend {
            fn get(&self, _: &str) -> rowcache_backend::BackendResult<Option<Vec<u8>>> {
                Err(rowcache_backend::BackendError::unavailable("down"))
            }
            fn set(
                &self,
                _: &str,
                _: &[u8],
                _: Duration,
            ) -> rowcache_backend::BackendResult<()> {
                Err(rowcache_backend::BackendError::unavailable("down"))
            }
            fn delete(&self, _: &str) -> rowcache_backend::BackendResult<bool> {
                Err(rowcache_backend::BackendError::unavailable("down"))
            }
            fn incr(&self, _: &str, _: u64) -> rowcache_backend::BackendResult<u64> {
                Err(rowcache_backend::BackendError::unavailable("down"))
            }
            fn flush(&self) -> rowcache_backend::BackendResult<()> {
                Err(rowcache_backend::BackendError::unavailable("down"))
            }
        }

        let backend: Arc<dyn CacheBackend> = Arc::new(DownBackend);
        let versions = Arc::new(VersionStore::new(Arc::clone(&backend), "t"));
        let entries = Arc::new(EntryStore::new(
            backend,
            versions,
            "t",
            Duration::from_secs(60),
        ));
        let index = ids_index(entries);
        let store = StubStore::new("Pet", vec![pet(1, 9, "f")]);

        let resolved = index.lookup(&store, &IndexKey::from(9i64)).unwrap();
        assert_eq!(resolved, Resolved::Ids(vec![RecordId::new(1)]));
        // Every lookup keeps hitting the store while the cache is down.
        index.lookup(&store, &IndexKey::from(9i64)).unwrap();
        assert_eq!(store.query_count(), 2);
    }

    #[test]
    fn populate_write_failure_still_serves_result() {
        struct ReadOnlyBackend {
            inner: MemoryBackend,
        }
        impl CacheBackend for ReadOnlyBackend {
            fn get(&self, key: &str) -> rowcache_backend::BackendResult<Option<Vec<u8>>> {
                self.inner.get(key)
            }
            fn set(
                &self,
                _: &str,
                _: &[u8],
                _: Duration,
            ) -> rowcache_backend::BackendResult<()> {
                Err(rowcache_backend::BackendError::unavailable("read-only"))
            }
            fn delete(&self, key: &str) -> rowcache_backend::BackendResult<bool> {
                self.inner.delete(key)
            }
            fn incr(&self, key: &str, delta: u64) -> rowcache_backend::BackendResult<u64> {
                self.inner.incr(key, delta)
            }
            fn flush(&self) -> rowcache_backend::BackendResult<()> {
                self.inner.flush()
            }
        }

        let backend: Arc<dyn CacheBackend> = Arc::new(ReadOnlyBackend {
            inner: MemoryBackend::new(),
        });
        let versions = Arc::new(VersionStore::new(Arc::clone(&backend), "t"));
        let entries = Arc::new(EntryStore::new(
            backend,
            versions,
            "t",
            Duration::from_secs(60),
        ));
        let index = ids_index(entries);
        let store = StubStore::new("Pet", vec![pet(1, 9, "f")]);

        let resolved = index.lookup(&store, &IndexKey::from(9i64)).unwrap();
        assert_eq!(resolved, Resolved::Ids(vec![RecordId::new(1)]));
    }
}
