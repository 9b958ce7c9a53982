//! Top-level cache composition.

use crate::config::CacheConfig;
use crate::coordinator::InvalidationCoordinator;
use crate::entry::EntryStore;
use crate::error::{CacheError, CacheResult};
use crate::index::IndexSpec;
use crate::registry::IndexRegistry;
use crate::version::VersionStore;
use parking_lot::RwLock;
use rowcache_backend::CacheBackend;
use std::collections::HashMap;
use std::sync::Arc;

/// The caching layer for one distributed cache backend.
///
/// Owns the version store and entry store, and the registry per
/// registered entity type. Entity types are registered once at process
/// startup and the registries are immutable afterwards; everything
/// that changes at runtime lives in the cache backend.
///
/// # Example
///
/// ```rust
/// use rowcache_core::{CacheConfig, IndexSpec, RecordCache, Scope};
/// use rowcache_backend::MemoryBackend;
/// use std::sync::Arc;
///
/// let cache = RecordCache::new(Arc::new(MemoryBackend::new()), CacheConfig::default());
/// cache
///     .register_entity(
///         "Pet",
///         vec![
///             IndexSpec::new(["id"]).full_record(),
///             IndexSpec::new(["breed_id"]),
///             IndexSpec::new(["color_id"])
///                 .scoped(Scope::none().eq("sex", "m"))
///                 .prefixed("male"),
///         ],
///     )
///     .unwrap();
/// cache.register_subtype("Dog", "Pet", vec![]).unwrap();
/// ```
pub struct RecordCache {
    config: CacheConfig,
    backend: Arc<dyn CacheBackend>,
    versions: Arc<VersionStore>,
    entries: Arc<EntryStore>,
    registries: RwLock<HashMap<String, Arc<IndexRegistry>>>,
}

impl RecordCache {
    /// Creates a cache layer over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        let versions = Arc::new(VersionStore::new(
            Arc::clone(&backend),
            config.namespace.clone(),
        ));
        let entries = Arc::new(EntryStore::new(
            Arc::clone(&backend),
            Arc::clone(&versions),
            config.namespace.clone(),
            config.ttl,
        ));
        Self {
            config,
            backend,
            versions,
            entries,
            registries: RwLock::new(HashMap::new()),
        }
    }

    /// The configuration this cache was built with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The cache backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// The version store.
    #[must_use]
    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    /// The entry store.
    #[must_use]
    pub fn entries(&self) -> &Arc<EntryStore> {
        &self.entries
    }

    /// Registers a base entity type with its indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is already registered or a spec's
    /// name or entry points collide.
    pub fn register_entity(
        &self,
        entity: &str,
        specs: Vec<IndexSpec>,
    ) -> CacheResult<Arc<IndexRegistry>> {
        let registry = self.build_registry(IndexRegistry::new(entity), specs)?;
        self.insert_registry(entity, registry)
    }

    /// Registers a subtype of an already-registered entity type.
    ///
    /// The subtype shares the base type's indexes by delegation; its
    /// own specs (if any) are additionally consulted.
    ///
    /// # Errors
    ///
    /// Returns an error if the base type is unknown, the subtype is
    /// already registered, or a spec collides.
    pub fn register_subtype(
        &self,
        entity: &str,
        base: &str,
        specs: Vec<IndexSpec>,
    ) -> CacheResult<Arc<IndexRegistry>> {
        let parent = self.entity(base)?;
        let registry =
            self.build_registry(IndexRegistry::with_parent(entity, Arc::clone(&parent)), specs)?;

        // Every ancestor learns about the new subtype so base-type
        // queries accept its records.
        let mut ancestor = Some(parent);
        while let Some(registry) = ancestor {
            registry.note_descendant(entity);
            ancestor = registry.parent().cloned();
        }

        self.insert_registry(entity, registry)
    }

    /// The registry for an entity type.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownEntity`] if the type was never
    /// registered.
    pub fn entity(&self, name: &str) -> CacheResult<Arc<IndexRegistry>> {
        self.registries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::unknown_entity(name))
    }

    /// An invalidation coordinator for an entity type.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownEntity`] if the type was never
    /// registered.
    pub fn coordinator(&self, name: &str) -> CacheResult<InvalidationCoordinator> {
        Ok(InvalidationCoordinator::new(
            self.entity(name)?,
            Arc::clone(&self.versions),
        ))
    }

    fn build_registry(
        &self,
        mut registry: IndexRegistry,
        specs: Vec<IndexSpec>,
    ) -> CacheResult<Arc<IndexRegistry>> {
        for spec in specs {
            registry.register(spec, Arc::clone(&self.entries))?;
        }
        Ok(Arc::new(registry))
    }

    fn insert_registry(
        &self,
        entity: &str,
        registry: Arc<IndexRegistry>,
    ) -> CacheResult<Arc<IndexRegistry>> {
        let mut registries = self.registries.write();
        if registries.contains_key(entity) {
            return Err(CacheError::DuplicateEntity {
                name: entity.to_string(),
            });
        }
        registries.insert(entity.to_string(), Arc::clone(&registry));
        Ok(registry)
    }
}

impl std::fmt::Debug for RecordCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCache")
            .field("namespace", &self.config.namespace)
            .field("entities", &self.registries.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowcache_backend::MemoryBackend;

    fn cache() -> RecordCache {
        RecordCache::new(Arc::new(MemoryBackend::new()), CacheConfig::default())
    }

    #[test]
    fn register_and_look_up_entity() {
        let cache = cache();
        cache
            .register_entity("Pet", vec![IndexSpec::new(["color_id"])])
            .unwrap();

        let registry = cache.entity("Pet").unwrap();
        assert!(registry.index("by_color_id").is_some());
    }

    #[test]
    fn unknown_entity_is_an_error() {
        let cache = cache();
        assert!(matches!(
            cache.entity("Pet"),
            Err(CacheError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn duplicate_entity_is_an_error() {
        let cache = cache();
        cache.register_entity("Pet", vec![]).unwrap();
        assert!(matches!(
            cache.register_entity("Pet", vec![]),
            Err(CacheError::DuplicateEntity { .. })
        ));
    }

    #[test]
    fn subtype_requires_registered_base() {
        let cache = cache();
        assert!(matches!(
            cache.register_subtype("Dog", "Pet", vec![]),
            Err(CacheError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn subtype_chain_propagates_descendants() {
        let cache = cache();
        cache.register_entity("Pet", vec![]).unwrap();
        cache.register_subtype("Dog", "Pet", vec![]).unwrap();
        cache.register_subtype("Puppy", "Dog", vec![]).unwrap();

        let pets = cache.entity("Pet").unwrap();
        assert!(pets.covers_kind(Some("Dog")));
        assert!(pets.covers_kind(Some("Puppy")));
        let dogs = cache.entity("Dog").unwrap();
        assert!(dogs.covers_kind(Some("Puppy")));
        assert!(!dogs.covers_kind(Some("Cat")));
    }

    #[test]
    fn coordinator_for_registered_entity() {
        let cache = cache();
        cache.register_entity("Pet", vec![]).unwrap();
        assert!(cache.coordinator("Pet").is_ok());
        assert!(cache.coordinator("Rock").is_err());
    }
}
