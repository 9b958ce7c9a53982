//! The deferred invalidation coordinator.
//!
//! Writes enter the cache layer here. Single-record writes are staged:
//! the record's new position is invalidated immediately, and a
//! [`PendingInvalidation`] unit-of-work carries the prior-position
//! corrections until the caller commits or rolls back. Bulk writes
//! either bump the version counters (condition-less) or freeze the
//! matched identifier set and invalidate around the underlying write.

use crate::error::CacheResult;
use crate::index::{Index, IndexKey, Staged};
use crate::record::RecordChange;
use crate::registry::IndexRegistry;
use crate::store::{Condition, RecordStore};
use crate::types::RecordId;
use crate::value::FieldValue;
use crate::version::VersionStore;
use std::sync::Arc;

/// Pending prior-key corrections for one staged record write.
///
/// Returned by [`InvalidationCoordinator::stage_save`] and
/// [`InvalidationCoordinator::stage_destroy`]. The caller applies it
/// with [`commit`](Self::commit) once the write is durably committed,
/// or drops it with [`discard`](Self::discard) on rollback - the prior
/// position's cache entries must stay valid for a write that never
/// took effect.
#[must_use = "apply with commit() after the write commits, or discard() on rollback"]
#[derive(Debug)]
pub struct PendingInvalidation {
    id: RecordId,
    corrections: Vec<(Arc<Index>, Staged)>,
}

impl PendingInvalidation {
    /// Applies the staged corrections: the record leaves its prior
    /// position in every affected index.
    ///
    /// # Errors
    ///
    /// Returns an error if a correction cannot complete even by
    /// version bump.
    pub fn commit(self) -> CacheResult<()> {
        for (index, staged) in &self.corrections {
            index.apply_staged(staged, self.id)?;
        }
        Ok(())
    }

    /// Discards the staged corrections without applying them.
    pub fn discard(self) {}

    /// Number of staged corrections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.corrections.len()
    }

    /// True if nothing was staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty()
    }
}

/// Orchestrates cache invalidation around record-store writes.
pub struct InvalidationCoordinator {
    registry: Arc<IndexRegistry>,
    versions: Arc<VersionStore>,
}

impl InvalidationCoordinator {
    /// Creates a coordinator for one entity type's registry.
    pub fn new(registry: Arc<IndexRegistry>, versions: Arc<VersionStore>) -> Self {
        Self { registry, versions }
    }

    /// The registry this coordinator invalidates against.
    #[must_use]
    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    /// Stages invalidation for a single-record save (create or
    /// update).
    ///
    /// Call *before* the store write commits, with the record's
    /// in-memory values: every index's entry for the record's new
    /// position is invalidated immediately (readers in this process
    /// may already see the uncommitted write), and the prior-position
    /// corrections come back as a unit-of-work for commit time.
    ///
    /// # Errors
    ///
    /// Returns an error if an immediate invalidation cannot complete
    /// even by version bump.
    pub fn stage_save(&self, change: &RecordChange) -> CacheResult<PendingInvalidation> {
        self.stage(change, false)
    }

    /// Stages invalidation for a single-record destroy.
    ///
    /// # Errors
    ///
    /// Returns an error if an immediate invalidation cannot complete
    /// even by version bump.
    pub fn stage_destroy(&self, change: &RecordChange) -> CacheResult<PendingInvalidation> {
        self.stage(change, true)
    }

    /// Runs a bulk update with correct invalidation.
    ///
    /// Without a condition the write proceeds and every related entity
    /// type's version is bumped - coarse, but it avoids enumerating the
    /// table. With a condition the matched identifier set is resolved
    /// once and frozen; the pre-write field values are snapshotted per
    /// index, the write executes, the pre-write keys are invalidated,
    /// and a post-write pass invalidates the keys the records now
    /// occupy.
    ///
    /// # Errors
    ///
    /// Returns the store error if the underlying write fails, or a
    /// cache error if invalidation cannot complete even by version
    /// bump.
    pub fn bulk_update(
        &self,
        store: &dyn RecordStore,
        condition: &Condition,
        changes: &[(String, FieldValue)],
    ) -> CacheResult<usize> {
        let entity = self.registry.entity();
        if matches!(condition, Condition::All) {
            let updated = store.update_all(entity, changes)?;
            self.bump_related()?;
            return Ok(updated);
        }

        // Freeze the matched ids: the condition cannot be re-evaluated
        // after the update, the rows no longer match it.
        let ids = store.resolve_ids(entity, condition)?;
        if ids.is_empty() {
            return Ok(0);
        }

        let (indexes, captured) = self.capture(store, &ids)?;
        let updated = store.update_by_ids(entity, &ids, changes)?;
        for (index, keys) in &captured {
            index.invalidate_keys(keys)?;
        }

        // The frozen ids now hold new field values that may belong
        // under different cache keys.
        let current_rows = store.fetch_by_ids(entity, &ids)?;
        for index in &indexes {
            index.invalidate_rows(&current_rows)?;
        }
        Ok(updated)
    }

    /// Runs a bulk delete with correct invalidation.
    ///
    /// Mirrors [`bulk_update`](Self::bulk_update) without the
    /// post-write pass: deleted rows have no new position.
    ///
    /// # Errors
    ///
    /// Returns the store error if the underlying write fails, or a
    /// cache error if invalidation cannot complete even by version
    /// bump.
    pub fn bulk_delete(
        &self,
        store: &dyn RecordStore,
        condition: &Condition,
    ) -> CacheResult<usize> {
        let entity = self.registry.entity();
        if matches!(condition, Condition::All) {
            let deleted = store.delete_all(entity)?;
            self.bump_related()?;
            return Ok(deleted);
        }

        let ids = store.resolve_ids(entity, condition)?;
        if ids.is_empty() {
            return Ok(0);
        }

        let (_, captured) = self.capture(store, &ids)?;
        let deleted = store.delete_by_ids(entity, &ids)?;
        for (index, keys) in &captured {
            index.invalidate_keys(keys)?;
        }
        Ok(deleted)
    }

    fn stage(&self, change: &RecordChange, destroyed: bool) -> CacheResult<PendingInvalidation> {
        let mut corrections = Vec::new();
        for index in self.registry.indexes() {
            if let Some(staged) = index.stage_record(change, destroyed)? {
                corrections.push((index, staged));
            }
        }
        Ok(PendingInvalidation {
            id: change.id(),
            corrections,
        })
    }

    /// Snapshots, per index, the keys the frozen ids occupy before the
    /// write. One shared fetch feeds every index's snapshot.
    fn capture(
        &self,
        store: &dyn RecordStore,
        ids: &[RecordId],
    ) -> CacheResult<(Vec<Arc<Index>>, Vec<(Arc<Index>, Vec<IndexKey>)>)> {
        let rows = store.fetch_by_ids(self.registry.entity(), ids)?;
        let indexes = self.registry.indexes();
        let captured = indexes
            .iter()
            .map(|index| (Arc::clone(index), index.capture_keys(&rows)))
            .collect();
        Ok((indexes, captured))
    }

    /// Bumps the version of every entity type whose entries a bulk
    /// write through this registry can affect: the type itself, its
    /// base types (shared indexes live there), and its subtypes.
    fn bump_related(&self) -> CacheResult<()> {
        let mut entities = vec![self.registry.entity().to_string()];
        let mut parent = self.registry.parent().cloned();
        while let Some(registry) = parent {
            entities.push(registry.entity().to_string());
            parent = registry.parent().cloned();
        }
        entities.extend(self.registry.descendants());
        entities.dedup();
        for entity in entities {
            self.versions.bump(&entity)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for InvalidationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationCoordinator")
            .field("entity", &self.registry.entity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexSpec;
    use crate::record::RawRecord;
    use crate::scope::Scope;
    use crate::testing::{entry_store, StubStore};

    struct Fixture {
        registry: Arc<IndexRegistry>,
        coordinator: InvalidationCoordinator,
        store: StubStore,
    }

    fn pet(id: i64, breed: i64, color: i64, sex: &str) -> RawRecord {
        RawRecord::new(RecordId::new(id))
            .with("breed_id", breed)
            .with("color_id", color)
            .with("sex", sex)
    }

    fn fixture(rows: Vec<RawRecord>) -> Fixture {
        let (entries, versions) = entry_store();
        let mut registry = IndexRegistry::new("Pet");
        registry
            .register(IndexSpec::new(["id"]).full_record(), Arc::clone(&entries))
            .unwrap();
        registry
            .register(IndexSpec::new(["breed_id"]), Arc::clone(&entries))
            .unwrap();
        registry
            .register(IndexSpec::new(["color_id"]), Arc::clone(&entries))
            .unwrap();
        registry
            .register(
                IndexSpec::new(["color_id"])
                    .scoped(Scope::none().eq("sex", "f"))
                    .prefixed("female"),
                Arc::clone(&entries),
            )
            .unwrap();
        let registry = Arc::new(registry);
        let coordinator = InvalidationCoordinator::new(Arc::clone(&registry), versions);
        Fixture {
            registry,
            coordinator,
            store: StubStore::new("Pet", rows),
        }
    }

    fn color_ids(f: &Fixture, color: i64) -> Vec<RecordId> {
        f.registry
            .find_ids(&f.store, "by_color_id", &[IndexKey::from(color)])
            .unwrap()
    }

    #[test]
    fn committed_save_moves_record_between_keys() {
        let f = fixture(vec![pet(1, 1, 9, "f")]);
        assert_eq!(color_ids(&f, 9), vec![RecordId::new(1)]);
        assert_eq!(color_ids(&f, 10), vec![]);

        let before = pet(1, 1, 9, "f");
        let after = pet(1, 1, 10, "f");
        let pending = f
            .coordinator
            .stage_save(&RecordChange::updated(&after, &before).unwrap())
            .unwrap();
        f.store.put(after);
        pending.commit().unwrap();

        assert_eq!(color_ids(&f, 9), vec![]);
        assert_eq!(color_ids(&f, 10), vec![RecordId::new(1)]);
    }

    #[test]
    fn rolled_back_save_leaves_prior_view() {
        let f = fixture(vec![pet(1, 1, 9, "f")]);
        assert_eq!(color_ids(&f, 9), vec![RecordId::new(1)]);

        let before = pet(1, 1, 9, "f");
        let after = pet(1, 1, 10, "f");
        let pending = f
            .coordinator
            .stage_save(&RecordChange::updated(&after, &before).unwrap())
            .unwrap();
        pending.discard();

        // The store was never written; every index still sees the
        // record at its old position.
        f.store.disable();
        assert_eq!(color_ids(&f, 9), vec![RecordId::new(1)]);
    }

    #[test]
    fn committed_destroy_removes_record_everywhere() {
        let f = fixture(vec![pet(1, 1, 9, "f"), pet(2, 1, 9, "m")]);
        assert_eq!(color_ids(&f, 9).len(), 2);
        let females = f
            .registry
            .find_ids(&f.store, "female_by_color_id", &[IndexKey::from(9i64)])
            .unwrap();
        assert_eq!(females, vec![RecordId::new(1)]);

        let victim = pet(1, 1, 9, "f");
        let pending = f
            .coordinator
            .stage_destroy(&RecordChange::destroyed(&victim).unwrap())
            .unwrap();
        f.store.delete_by_ids("Pet", &[RecordId::new(1)]).unwrap();
        pending.commit().unwrap();

        f.store.disable();
        assert_eq!(color_ids(&f, 9), vec![RecordId::new(2)]);
        let females = f
            .registry
            .find_ids(&f.store, "female_by_color_id", &[IndexKey::from(9i64)])
            .unwrap();
        assert_eq!(females, vec![]);
    }

    #[test]
    fn created_record_stages_nothing_for_commit() {
        let f = fixture(vec![]);
        let pending = f
            .coordinator
            .stage_save(&RecordChange::created(&pet(1, 1, 9, "f")).unwrap())
            .unwrap();
        assert!(pending.is_empty());
        pending.commit().unwrap();
    }

    #[test]
    fn bulk_update_with_condition_invalidates_old_and_new_keys() {
        let f = fixture(vec![pet(1, 1, 9, "f"), pet(2, 2, 9, "m")]);
        assert_eq!(color_ids(&f, 9).len(), 2);
        assert_eq!(color_ids(&f, 10), vec![]);

        let updated = f
            .coordinator
            .bulk_update(
                &f.store,
                &Condition::eq("sex", "m"),
                &[("color_id".to_string(), FieldValue::Int(10))],
            )
            .unwrap();
        assert_eq!(updated, 1);

        assert_eq!(color_ids(&f, 9), vec![RecordId::new(1)]);
        assert_eq!(color_ids(&f, 10), vec![RecordId::new(2)]);
    }

    #[test]
    fn bulk_update_without_condition_bumps_version() {
        let f = fixture(vec![pet(1, 1, 9, "f")]);
        assert_eq!(color_ids(&f, 9).len(), 1);
        let queries_before = f.store.query_count();

        f.coordinator
            .bulk_update(
                &f.store,
                &Condition::All,
                &[("color_id".to_string(), FieldValue::Int(10))],
            )
            .unwrap();

        // Every previously cached key re-queries the store.
        assert_eq!(color_ids(&f, 9), vec![]);
        assert!(f.store.query_count() > queries_before + 1);
    }

    #[test]
    fn bulk_update_matching_nothing_is_a_noop() {
        let f = fixture(vec![pet(1, 1, 9, "f")]);
        let updated = f
            .coordinator
            .bulk_update(
                &f.store,
                &Condition::eq("sex", "x"),
                &[("color_id".to_string(), FieldValue::Int(10))],
            )
            .unwrap();
        assert_eq!(updated, 0);
    }

    #[test]
    fn bulk_delete_with_condition_invalidates_prior_keys() {
        let f = fixture(vec![pet(1, 1, 9, "f"), pet(2, 2, 10, "m")]);
        assert_eq!(color_ids(&f, 9).len(), 1);
        assert_eq!(color_ids(&f, 10).len(), 1);

        let deleted = f
            .coordinator
            .bulk_delete(&f.store, &Condition::eq("color_id", 9i64))
            .unwrap();
        assert_eq!(deleted, 1);

        assert_eq!(color_ids(&f, 9), vec![]);
        // Unmatched keys keep their entries.
        f.store.disable();
        assert_eq!(color_ids(&f, 10), vec![RecordId::new(2)]);
    }

    #[test]
    fn bulk_delete_without_condition_bumps_version() {
        let f = fixture(vec![pet(1, 1, 9, "f")]);
        assert_eq!(color_ids(&f, 9).len(), 1);

        f.coordinator.bulk_delete(&f.store, &Condition::All).unwrap();
        assert_eq!(color_ids(&f, 9), vec![]);
    }
}
