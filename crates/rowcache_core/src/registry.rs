//! Per-entity-type index registries and query dispatch.
//!
//! A registry owns the indexes registered for one entity type and the
//! entry-point table generated from them. Subtype registries hold a
//! reference to their base type's registry and merge lookups, so
//! subtypes share the base type's indexes while adding their own.

use crate::entry::EntryStore;
use crate::error::{CacheError, CacheResult};
use crate::index::{FindMode, Index, IndexKey, IndexSpec, Resolved, StorageMode};
use crate::record::RawRecord;
use crate::store::{Condition, RecordStore};
use crate::types::RecordId;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// What an entry point resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryPointKind {
    Find(FindMode),
    Map,
    MapAll,
}

#[derive(Clone)]
struct EntryPoint {
    index: Arc<Index>,
    kind: EntryPointKind,
}

/// Result of calling a generated entry point.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// First matching record, if any.
    First(Option<RawRecord>),
    /// All matching records.
    All(Vec<RawRecord>),
    /// Matching identifiers.
    Ids(Vec<RecordId>),
    /// Raw rows, without subtype filtering.
    Raw(Vec<RawRecord>),
    /// Key → first matching identifier.
    Map(BTreeMap<IndexKey, RecordId>),
    /// Key → all matching identifiers.
    MapAll(BTreeMap<IndexKey, Vec<RecordId>>),
}

/// Result of routing a typed query condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// An index answered the query.
    Hit(Vec<RawRecord>),
    /// No index applies; the caller runs the query against the record
    /// store untouched.
    Passthrough,
}

/// The set of indexes registered for one entity type.
///
/// Registries are built at startup and immutable afterwards, except
/// for the runtime cache entries their indexes own and the descendant
/// set maintained as subtypes register.
pub struct IndexRegistry {
    entity: String,
    parent: Option<Arc<IndexRegistry>>,
    indexes: Vec<Arc<Index>>,
    by_name: HashMap<String, Arc<Index>>,
    entry_points: HashMap<String, EntryPoint>,
    descendants: RwLock<HashSet<String>>,
}

impl IndexRegistry {
    /// Creates an empty registry for a base entity type.
    #[must_use]
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            parent: None,
            indexes: Vec::new(),
            by_name: HashMap::new(),
            entry_points: HashMap::new(),
            descendants: RwLock::new(HashSet::new()),
        }
    }

    /// Creates a registry for a subtype, delegating to its base type's
    /// registry for shared indexes.
    #[must_use]
    pub fn with_parent(entity: impl Into<String>, parent: Arc<IndexRegistry>) -> Self {
        Self {
            entity: entity.into(),
            parent: Some(parent),
            indexes: Vec::new(),
            by_name: HashMap::new(),
            entry_points: HashMap::new(),
            descendants: RwLock::new(HashSet::new()),
        }
    }

    /// The entity type this registry serves.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// The base type's registry, for subtypes.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<IndexRegistry>> {
        self.parent.as_ref()
    }

    /// The root entity type of this registry's delegation chain.
    #[must_use]
    pub fn base_entity(&self) -> &str {
        match &self.parent {
            Some(parent) => parent.base_entity(),
            None => &self.entity,
        }
    }

    /// Records a (transitive) subtype of this registry's entity type.
    pub fn note_descendant(&self, entity: &str) {
        self.descendants.write().insert(entity.to_string());
    }

    /// The entity types registered as (transitive) subtypes of this one.
    #[must_use]
    pub fn descendants(&self) -> Vec<String> {
        self.descendants.read().iter().cloned().collect()
    }

    /// True if a record of the given concrete type belongs to this
    /// registry's entity type.
    ///
    /// Records without a type discriminator always belong.
    #[must_use]
    pub fn covers_kind(&self, kind: Option<&str>) -> bool {
        match kind {
            Some(kind) => kind == self.entity || self.descendants.read().contains(kind),
            None => true,
        }
    }

    /// Registers an index for this registry's entity type.
    ///
    /// Generates the index's query entry points:
    /// `find_<name>`, `find_all_<name>`, `find_raw_<name>`, and (for
    /// non-identifier indexes) `find_ids_<name>`; ids-only indexes
    /// additionally get `map_<name>` and `map_all_<name>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index name or one of the generated
    /// entry points is already taken for this entity type.
    pub fn register(
        &mut self,
        spec: IndexSpec,
        entries: Arc<EntryStore>,
    ) -> CacheResult<Arc<Index>> {
        let index = Arc::new(Index::new(self.entity.clone(), spec, entries));
        let name = index.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(CacheError::DuplicateIndex {
                entity: self.entity.clone(),
                name,
            });
        }

        let mut generated: Vec<(String, EntryPointKind)> = vec![
            (format!("find_{name}"), EntryPointKind::Find(FindMode::First)),
            (
                format!("find_all_{name}"),
                EntryPointKind::Find(FindMode::All),
            ),
            (
                format!("find_raw_{name}"),
                EntryPointKind::Find(FindMode::Raw),
            ),
        ];
        if !index.is_identifier() {
            generated.push((
                format!("find_ids_{name}"),
                EntryPointKind::Find(FindMode::Ids),
            ));
        }
        if index.storage() == StorageMode::IdsOnly {
            generated.push((format!("map_{name}"), EntryPointKind::Map));
            generated.push((format!("map_all_{name}"), EntryPointKind::MapAll));
        }

        for (entry_point, _) in &generated {
            if self.entry_points.contains_key(entry_point) {
                return Err(CacheError::EntryPointCollision {
                    entity: self.entity.clone(),
                    entry_point: entry_point.clone(),
                });
            }
        }
        for (entry_point, kind) in generated {
            self.entry_points.insert(
                entry_point,
                EntryPoint {
                    index: Arc::clone(&index),
                    kind,
                },
            );
        }

        self.by_name.insert(name, Arc::clone(&index));
        self.indexes.push(Arc::clone(&index));
        Ok(index)
    }

    /// Looks up an index by name, consulting the base type's registry
    /// when this type doesn't define it.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<Arc<Index>> {
        match self.by_name.get(name) {
            Some(index) => Some(Arc::clone(index)),
            None => self.parent.as_ref().and_then(|parent| parent.index(name)),
        }
    }

    /// Every index visible to this entity type: its own, then the base
    /// type's, with own names shadowing inherited ones.
    #[must_use]
    pub fn indexes(&self) -> Vec<Arc<Index>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut all = Vec::new();
        let mut registry = Some(self);
        while let Some(current) = registry {
            for index in &current.indexes {
                if seen.insert(index.name().to_string()) {
                    all.push(Arc::clone(index));
                }
            }
            registry = current.parent.as_deref();
        }
        all
    }

    /// The full-record identifier index, if one is registered.
    #[must_use]
    pub fn identifier_index(&self) -> Option<Arc<Index>> {
        self.indexes()
            .into_iter()
            .find(|index| index.is_identifier())
    }

    /// Primary-key lookup.
    ///
    /// Every requested identifier must resolve to a record of this
    /// registry's entity type (or a subtype); otherwise the result is
    /// [`CacheError::RecordNotFound`], exactly as an uncached
    /// primary-key query would fail. Duplicate identifiers are
    /// collapsed.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` for a missing or foreign-typed id, or
    /// the store/backend error underneath.
    pub fn find(&self, store: &dyn RecordStore, ids: &[RecordId]) -> CacheResult<Vec<RawRecord>> {
        let mut unique: Vec<RecordId> = Vec::new();
        for &id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }

        let mut records = self.materialize(store, &unique)?;
        records.retain(|record| self.covers_kind(record.kind()));

        for &id in &unique {
            if !records.iter().any(|record| record.id().ok() == Some(id)) {
                return Err(CacheError::not_found(&self.entity, id));
            }
        }
        Ok(records)
    }

    /// First record matching any of the keys of the named index.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` if no such index exists.
    pub fn find_first(
        &self,
        store: &dyn RecordStore,
        name: &str,
        keys: &[IndexKey],
    ) -> CacheResult<Option<RawRecord>> {
        Ok(self.find_all(store, name, keys)?.into_iter().next())
    }

    /// All records matching the keys of the named index, in input key
    /// order, filtered to this registry's entity type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` if no such index exists.
    pub fn find_all(
        &self,
        store: &dyn RecordStore,
        name: &str,
        keys: &[IndexKey],
    ) -> CacheResult<Vec<RawRecord>> {
        let mut records = self.resolve_records(store, name, keys)?;
        records.retain(|record| self.covers_kind(record.kind()));
        Ok(records)
    }

    /// Identifiers matching the keys of the named index.
    ///
    /// Identifiers are served as cached, without subtype filtering -
    /// filtering would force materialization and defeat the point of
    /// an ids-only read.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` if no such index exists.
    pub fn find_ids(
        &self,
        store: &dyn RecordStore,
        name: &str,
        keys: &[IndexKey],
    ) -> CacheResult<Vec<RecordId>> {
        self.named(name)?.resolve(store, keys)?.to_ids()
    }

    /// Raw rows matching the keys of the named index, skipping subtype
    /// filtering.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` if no such index exists.
    pub fn find_raw(
        &self,
        store: &dyn RecordStore,
        name: &str,
        keys: &[IndexKey],
    ) -> CacheResult<Vec<RawRecord>> {
        self.resolve_records(store, name, keys)
    }

    /// Key → first identifier for the named index.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` if no such index exists.
    pub fn find_map(
        &self,
        store: &dyn RecordStore,
        name: &str,
        keys: &[IndexKey],
    ) -> CacheResult<BTreeMap<IndexKey, RecordId>> {
        self.named(name)?.find_map(store, keys)
    }

    /// Key → all identifiers for the named index.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` if no such index exists.
    pub fn find_all_map(
        &self,
        store: &dyn RecordStore,
        name: &str,
        keys: &[IndexKey],
    ) -> CacheResult<BTreeMap<IndexKey, Vec<RecordId>>> {
        self.named(name)?.find_all_map(store, keys)
    }

    /// Calls a generated entry point from the dispatch table.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` if no entry point with that identifier
    /// exists for this entity type or its base types.
    pub fn call(
        &self,
        store: &dyn RecordStore,
        entry_point: &str,
        keys: &[IndexKey],
    ) -> CacheResult<QueryResult> {
        let point = self.entry_point(entry_point).ok_or_else(|| {
            CacheError::unknown_index(&self.entity, entry_point)
        })?;
        let name = point.index.name();
        match point.kind {
            EntryPointKind::Find(FindMode::First) => {
                Ok(QueryResult::First(self.find_first(store, name, keys)?))
            }
            EntryPointKind::Find(FindMode::All) => {
                Ok(QueryResult::All(self.find_all(store, name, keys)?))
            }
            EntryPointKind::Find(FindMode::Ids) => {
                Ok(QueryResult::Ids(self.find_ids(store, name, keys)?))
            }
            EntryPointKind::Find(FindMode::Raw) => {
                Ok(QueryResult::Raw(self.find_raw(store, name, keys)?))
            }
            EntryPointKind::Map => Ok(QueryResult::Map(self.find_map(store, name, keys)?)),
            EntryPointKind::MapAll => {
                Ok(QueryResult::MapAll(self.find_all_map(store, name, keys)?))
            }
        }
    }

    /// Routes a typed query condition to a matching index.
    ///
    /// Primary-key conditions route to the identifier index;
    /// single-field equality and IN-list conditions route to the
    /// auto-named `by_<field>` index. Everything else - and any shape
    /// with no matching index - is a passthrough.
    ///
    /// # Errors
    ///
    /// Propagates lookup errors from the matched index, including
    /// `RecordNotFound` for primary-key conditions.
    pub fn dispatch(
        &self,
        store: &dyn RecordStore,
        condition: &Condition,
    ) -> CacheResult<Dispatch> {
        match condition {
            Condition::Ids(ids) => {
                if self.identifier_index().is_some() {
                    Ok(Dispatch::Hit(self.find(store, ids)?))
                } else {
                    Ok(Dispatch::Passthrough)
                }
            }
            Condition::Eq { field, value } => {
                self.dispatch_field(store, field, std::slice::from_ref(value))
            }
            Condition::In { field, values } => self.dispatch_field(store, field, values),
            Condition::All => Ok(Dispatch::Passthrough),
        }
    }

    fn dispatch_field(
        &self,
        store: &dyn RecordStore,
        field: &str,
        values: &[crate::value::FieldValue],
    ) -> CacheResult<Dispatch> {
        let name = format!("by_{field}");
        if self.index(&name).is_none() {
            return Ok(Dispatch::Passthrough);
        }
        let keys: Vec<IndexKey> = values.iter().cloned().map(IndexKey::from).collect();
        Ok(Dispatch::Hit(self.find_all(store, &name, &keys)?))
    }

    /// Materializes records for the given identifiers, through the
    /// identifier index's cache when one exists.
    ///
    /// Results are in input id order; duplicate ids yield duplicate
    /// records.
    ///
    /// # Errors
    ///
    /// Returns the store or backend error underneath.
    pub fn materialize(
        &self,
        store: &dyn RecordStore,
        ids: &[RecordId],
    ) -> CacheResult<Vec<RawRecord>> {
        if let Some(identifier) = self.identifier_index() {
            return identifier.find_by_ids(store, ids);
        }
        let rows = store.fetch_by_ids(self.base_entity(), ids)?;
        let mut by_id: BTreeMap<RecordId, Vec<RawRecord>> = BTreeMap::new();
        for row in rows {
            by_id.entry(row.id()?).or_default().push(row);
        }
        let mut result = Vec::new();
        for id in ids {
            if let Some(records) = by_id.get(id) {
                result.extend(records.iter().cloned());
            }
        }
        Ok(result)
    }

    fn resolve_records(
        &self,
        store: &dyn RecordStore,
        name: &str,
        keys: &[IndexKey],
    ) -> CacheResult<Vec<RawRecord>> {
        let index = self.named(name)?;
        match index.resolve(store, keys)? {
            Resolved::Records(records) => Ok(records),
            Resolved::Ids(ids) => self.materialize(store, &ids),
        }
    }

    fn named(&self, name: &str) -> CacheResult<Arc<Index>> {
        self.index(name)
            .ok_or_else(|| CacheError::unknown_index(&self.entity, name))
    }

    fn entry_point(&self, identifier: &str) -> Option<EntryPoint> {
        match self.entry_points.get(identifier) {
            Some(point) => Some(point.clone()),
            None => self
                .parent
                .as_ref()
                .and_then(|parent| parent.entry_point(identifier)),
        }
    }
}

impl std::fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRegistry")
            .field("entity", &self.entity)
            .field("indexes", &self.indexes.len())
            .field("entry_points", &self.entry_points.len())
            .finish_non_exhaustive()
    }
}
