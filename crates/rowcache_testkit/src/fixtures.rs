//! The Pet/Breed/Color fixture schema.
//!
//! One wired-up cache layer over an instrumented record store, with
//! the index set the integration suite exercises: an identifier index,
//! plain and write-ahead field indexes, and three scoped variants over
//! the same field.

use crate::store::MemoryRecordStore;
use rowcache_backend::{CacheBackend, MemoryBackend};
use rowcache_core::{
    CacheConfig, CacheResult, FieldValue, IndexRegistry, IndexSpec, RawRecord, RecordCache,
    RecordChange, RecordId, Scope,
};
use std::sync::Arc;

/// A fully wired Pet schema: cache, record store, and registries.
///
/// Pets carry `breed_id`, `color_id`, `sex`, and a `type`
/// discriminator for the `Dog` and `Cat` subtypes. Registered indexes:
///
/// | name | keyed on | notes |
/// |---|---|---|
/// | `by_id` | `id` | full records |
/// | `by_breed_id` | `breed_id` | ids |
/// | `by_color_id` | `color_id` | ids, write-ahead |
/// | `male_by_color_id` | `color_id` | scope `sex = 'm'` |
/// | `female_by_color_id` | `color_id` | scope `sex = 'f'` |
/// | `all_colors` | `color_id` | scope `sex IN ('m','f')` |
pub struct PetFixture {
    /// The cache layer under test.
    pub cache: RecordCache,
    /// The instrumented record store behind it.
    pub store: MemoryRecordStore,
}

impl Default for PetFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl PetFixture {
    /// Builds the fixture over a fresh in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    /// Builds the fixture over the given backend.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        let cache = RecordCache::new(backend, CacheConfig::default().namespace("testkit"));

        cache
            .register_entity(
                "Pet",
                vec![
                    IndexSpec::new(["id"]).full_record(),
                    IndexSpec::new(["breed_id"]),
                    IndexSpec::new(["color_id"]).write_ahead(),
                    IndexSpec::new(["color_id"])
                        .scoped(Scope::none().eq("sex", "m"))
                        .prefixed("male"),
                    IndexSpec::new(["color_id"])
                        .scoped(Scope::none().eq("sex", "f"))
                        .prefixed("female"),
                    IndexSpec::new(["color_id"])
                        .scoped(Scope::none().any("sex", ["m", "f"]))
                        .named("all_colors"),
                ],
            )
            .expect("pet registration");
        cache
            .register_subtype("Dog", "Pet", vec![])
            .expect("dog registration");
        cache
            .register_subtype("Cat", "Pet", vec![])
            .expect("cat registration");
        cache
            .register_entity("Breed", vec![IndexSpec::new(["id"]).full_record()])
            .expect("breed registration");
        cache
            .register_entity("Color", vec![IndexSpec::new(["id"]).full_record()])
            .expect("color registration");

        let store = MemoryRecordStore::new();
        store.register_table("Pet");
        store.register_subtype("Dog", "Pet");
        store.register_subtype("Cat", "Pet");
        store.register_table("Breed");
        store.register_table("Color");

        Self { cache, store }
    }

    /// The registry for an entity type.
    #[must_use]
    pub fn registry(&self, entity: &str) -> Arc<IndexRegistry> {
        self.cache.entity(entity).expect("registered entity")
    }

    /// Creates a record and runs the full save-commit invalidation
    /// sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if staging or committing invalidation fails.
    pub fn create(
        &self,
        entity: &str,
        fields: Vec<(&str, FieldValue)>,
    ) -> CacheResult<RawRecord> {
        let fields = fields
            .into_iter()
            .map(|(field, value)| (field.to_string(), value))
            .collect();
        let record = self.store.create(entity, fields);

        let coordinator = self.cache.coordinator(entity)?;
        let pending = coordinator.stage_save(&RecordChange::created(&record)?)?;
        pending.commit()?;
        Ok(record)
    }

    /// Applies an update and commits its invalidation.
    ///
    /// # Errors
    ///
    /// Returns an error if staging or committing invalidation fails.
    pub fn save(&self, entity: &str, updated: &RawRecord) -> CacheResult<()> {
        let id = updated.id()?;
        let prior = self
            .store
            .row(entity, id)
            .expect("updating a record that exists");

        let coordinator = self.cache.coordinator(entity)?;
        let pending = coordinator.stage_save(&RecordChange::updated(updated, &prior)?)?;
        self.store.apply(entity, updated);
        pending.commit()?;
        Ok(())
    }

    /// Stages an update, then rolls it back: the store is never
    /// written and the staged corrections are discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if staging fails.
    pub fn save_rollback(&self, entity: &str, updated: &RawRecord) -> CacheResult<()> {
        let id = updated.id()?;
        let prior = self
            .store
            .row(entity, id)
            .expect("updating a record that exists");

        let coordinator = self.cache.coordinator(entity)?;
        let pending = coordinator.stage_save(&RecordChange::updated(updated, &prior)?)?;
        pending.discard();
        Ok(())
    }

    /// Destroys a record and commits its invalidation.
    ///
    /// # Errors
    ///
    /// Returns an error if staging or committing invalidation fails.
    pub fn destroy(&self, entity: &str, record: &RawRecord) -> CacheResult<()> {
        let coordinator = self.cache.coordinator(entity)?;
        let pending = coordinator.stage_destroy(&RecordChange::destroyed(record)?)?;
        self.store.remove(entity, record.id()?);
        pending.commit()?;
        Ok(())
    }

    /// Creates a breed row.
    ///
    /// # Errors
    ///
    /// Returns an error if invalidation fails.
    pub fn create_breed(&self, name: &str) -> CacheResult<RecordId> {
        let record = self.create("Breed", vec![("name", FieldValue::from(name))])?;
        record.id()
    }

    /// Creates a color row.
    ///
    /// # Errors
    ///
    /// Returns an error if invalidation fails.
    pub fn create_color(&self, name: &str) -> CacheResult<RecordId> {
        let record = self.create("Color", vec![("name", FieldValue::from(name))])?;
        record.id()
    }
}
