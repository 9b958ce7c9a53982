//! Shared helpers for in-crate unit tests.

use crate::entry::EntryStore;
use crate::record::RawRecord;
use crate::store::{Condition, RecordStore, StoreError, StoreResult};
use crate::types::RecordId;
use crate::value::FieldValue;
use crate::version::VersionStore;
use parking_lot::Mutex;
use rowcache_backend::{CacheBackend, MemoryBackend};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Builds an entry store over a fresh in-memory backend.
pub(crate) fn entry_store() -> (Arc<EntryStore>, Arc<VersionStore>) {
    let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new());
    let versions = Arc::new(VersionStore::new(Arc::clone(&backend), "t"));
    let entries = Arc::new(EntryStore::new(
        backend,
        Arc::clone(&versions),
        "t",
        Duration::from_secs(60),
    ));
    (entries, versions)
}

/// A single-entity record store stub with a query counter and an
/// on/off switch for asserting cache-hit transparency.
pub(crate) struct StubStore {
    entity: String,
    rows: Mutex<Vec<RawRecord>>,
    queries: AtomicUsize,
    enabled: AtomicBool,
}

impl StubStore {
    pub(crate) fn new(entity: &str, rows: Vec<RawRecord>) -> Self {
        Self {
            entity: entity.to_string(),
            rows: Mutex::new(rows),
            queries: AtomicUsize::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    pub(crate) fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub(crate) fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub(crate) fn put(&self, row: RawRecord) {
        let mut rows = self.rows.lock();
        if let Ok(id) = row.id() {
            rows.retain(|existing| existing.id().ok() != Some(id));
        }
        rows.push(row);
    }

    fn touch(&self) -> StoreResult<()> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("store disabled"));
        }
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn check_entity(&self, entity: &str) -> StoreResult<()> {
        if entity != self.entity {
            return Err(StoreError::query(format!("unknown entity {entity}")));
        }
        Ok(())
    }
}

impl RecordStore for StubStore {
    fn fetch_by_ids(&self, entity: &str, ids: &[RecordId]) -> StoreResult<Vec<RawRecord>> {
        self.check_entity(entity)?;
        self.touch()?;
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| row.id().map(|id| ids.contains(&id)).unwrap_or(false))
            .cloned()
            .collect())
    }

    fn fetch_matching(
        &self,
        entity: &str,
        criteria: &[(String, FieldValue)],
    ) -> StoreResult<Vec<RawRecord>> {
        self.check_entity(entity)?;
        self.touch()?;
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| {
                criteria
                    .iter()
                    .all(|(field, value)| row.value(field) == *value)
            })
            .cloned()
            .collect())
    }

    fn resolve_ids(&self, entity: &str, condition: &Condition) -> StoreResult<Vec<RecordId>> {
        self.check_entity(entity)?;
        self.touch()?;
        let rows = self.rows.lock();
        let matching = rows.iter().filter(|row| match condition {
            Condition::All => true,
            Condition::Ids(ids) => row.id().map(|id| ids.contains(&id)).unwrap_or(false),
            Condition::Eq { field, value } => row.value(field) == *value,
            Condition::In { field, values } => values.contains(&row.value(field)),
        });
        matching.map(|row| row.id().map_err(|_| StoreError::query("row without id"))).collect()
    }

    fn update_by_ids(
        &self,
        entity: &str,
        ids: &[RecordId],
        changes: &[(String, FieldValue)],
    ) -> StoreResult<usize> {
        self.check_entity(entity)?;
        self.touch()?;
        let mut rows = self.rows.lock();
        let mut updated = 0;
        for row in rows.iter_mut() {
            if row.id().map(|id| ids.contains(&id)).unwrap_or(false) {
                let mut next = row.clone();
                for (field, value) in changes {
                    next = next.with(field.clone(), value.clone());
                }
                *row = next;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn delete_by_ids(&self, entity: &str, ids: &[RecordId]) -> StoreResult<usize> {
        self.check_entity(entity)?;
        self.touch()?;
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|row| row.id().map(|id| !ids.contains(&id)).unwrap_or(true));
        Ok(before - rows.len())
    }

    fn update_all(&self, entity: &str, changes: &[(String, FieldValue)]) -> StoreResult<usize> {
        self.check_entity(entity)?;
        self.touch()?;
        let mut rows = self.rows.lock();
        for row in rows.iter_mut() {
            let mut next = row.clone();
            for (field, value) in changes {
                next = next.with(field.clone(), value.clone());
            }
            *row = next;
        }
        Ok(rows.len())
    }

    fn delete_all(&self, entity: &str) -> StoreResult<usize> {
        self.check_entity(entity)?;
        self.touch()?;
        let mut rows = self.rows.lock();
        let count = rows.len();
        rows.clear();
        Ok(count)
    }
}
