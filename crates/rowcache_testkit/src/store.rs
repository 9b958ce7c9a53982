//! Instrumented in-memory record store.

use parking_lot::Mutex;
use rowcache_core::{
    Condition, FieldValue, RawRecord, RecordId, RecordStore, StoreError, StoreResult, TYPE_FIELD,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct Table {
    rows: Vec<RawRecord>,
    next_id: i64,
}

impl Table {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            next_id: 1,
        }
    }
}

struct EntityInfo {
    table: String,
    /// The discriminator value for subtypes; `None` for base types.
    kind: Option<String>,
}

struct Inner {
    tables: HashMap<String, Table>,
    entities: HashMap<String, EntityInfo>,
}

/// An in-memory record store with the instrumentation the integration
/// suite needs:
///
/// - an on/off switch - while disabled, every [`RecordStore`] call
///   fails, which is how cache-hit transparency is asserted
/// - a read counter for "no new query was issued" assertions
/// - direct row mutation helpers that bypass the switch, standing in
///   for the application's own write path (the cache layer never sees
///   those writes except through the invalidation coordinator)
///
/// Subtypes share their base type's table and are discriminated by the
/// `type` field, so a base-type fetch sees every subtype's rows.
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
    enabled: AtomicBool,
    reads: AtomicUsize,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tables: HashMap::new(),
                entities: HashMap::new(),
            }),
            enabled: AtomicBool::new(true),
            reads: AtomicUsize::new(0),
        }
    }

    /// Registers a base entity type with its own table.
    pub fn register_table(&self, entity: &str) {
        let mut inner = self.inner.lock();
        inner.tables.insert(entity.to_string(), Table::new());
        inner.entities.insert(
            entity.to_string(),
            EntityInfo {
                table: entity.to_string(),
                kind: None,
            },
        );
    }

    /// Registers a subtype stored in its base type's table.
    pub fn register_subtype(&self, entity: &str, base: &str) {
        let mut inner = self.inner.lock();
        let table = inner
            .entities
            .get(base)
            .map(|info| info.table.clone())
            .unwrap_or_else(|| base.to_string());
        inner.entities.insert(
            entity.to_string(),
            EntityInfo {
                table,
                kind: Some(entity.to_string()),
            },
        );
    }

    /// Makes every [`RecordStore`] call fail until re-enabled.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Re-enables [`RecordStore`] calls.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Number of reads served through the [`RecordStore`] interface.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Creates a row for the entity type, assigning the next id (and
    /// the type discriminator for subtypes). Bypasses the switch: this
    /// is the application's write path, not a cache-layer read.
    #[must_use]
    pub fn create(&self, entity: &str, fields: Vec<(String, FieldValue)>) -> RawRecord {
        let mut inner = self.inner.lock();
        let (table_name, kind) = {
            let info = inner.entities.get(entity).expect("unregistered entity");
            (info.table.clone(), info.kind.clone())
        };
        let table = inner.tables.get_mut(&table_name).expect("missing table");
        let id = table.next_id;
        table.next_id += 1;

        let mut record = RawRecord::new(RecordId::new(id));
        if let Some(kind) = kind {
            record = record.with(TYPE_FIELD, kind);
        }
        for (field, value) in fields {
            record = record.with(field, value);
        }
        table.rows.push(record.clone());
        record
    }

    /// Replaces the row with the record's id. Bypasses the switch.
    pub fn apply(&self, entity: &str, record: &RawRecord) {
        let mut inner = self.inner.lock();
        let table_name = inner.entities.get(entity).expect("unregistered entity").table.clone();
        let table = inner.tables.get_mut(&table_name).expect("missing table");
        let id = record.id().expect("record without id");
        for row in table.rows.iter_mut() {
            if row.id().ok() == Some(id) {
                *row = record.clone();
                return;
            }
        }
        table.rows.push(record.clone());
    }

    /// Removes the row with the given id. Bypasses the switch.
    pub fn remove(&self, entity: &str, id: RecordId) {
        let mut inner = self.inner.lock();
        let table_name = inner.entities.get(entity).expect("unregistered entity").table.clone();
        let table = inner.tables.get_mut(&table_name).expect("missing table");
        table.rows.retain(|row| row.id().ok() != Some(id));
    }

    /// Reads a row directly, bypassing the switch.
    #[must_use]
    pub fn row(&self, entity: &str, id: RecordId) -> Option<RawRecord> {
        let inner = self.inner.lock();
        let info = inner.entities.get(entity)?;
        inner
            .tables
            .get(&info.table)?
            .rows
            .iter()
            .find(|row| row.id().ok() == Some(id))
            .cloned()
    }

    fn read_access(&self) -> StoreResult<()> {
        self.check_enabled()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn check_enabled(&self) -> StoreResult<()> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("record store disabled"));
        }
        Ok(())
    }

    fn select<F>(&self, entity: &str, filter: F) -> StoreResult<Vec<RawRecord>>
    where
        F: Fn(&RawRecord) -> bool,
    {
        let inner = self.inner.lock();
        let info = inner
            .entities
            .get(entity)
            .ok_or_else(|| StoreError::query(format!("unknown entity {entity}")))?;
        let table = inner
            .tables
            .get(&info.table)
            .ok_or_else(|| StoreError::query(format!("missing table {}", info.table)))?;
        Ok(table
            .rows
            .iter()
            .filter(|row| match &info.kind {
                Some(kind) => row.kind() == Some(kind.as_str()),
                None => true,
            })
            .filter(|row| filter(row))
            .cloned()
            .collect())
    }

    fn matches(row: &RawRecord, condition: &Condition) -> bool {
        match condition {
            Condition::All => true,
            Condition::Ids(ids) => row.id().map(|id| ids.contains(&id)).unwrap_or(false),
            Condition::Eq { field, value } => row.value(field) == *value,
            Condition::In { field, values } => values.contains(&row.value(field)),
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn fetch_by_ids(&self, entity: &str, ids: &[RecordId]) -> StoreResult<Vec<RawRecord>> {
        self.read_access()?;
        self.select(entity, |row| {
            row.id().map(|id| ids.contains(&id)).unwrap_or(false)
        })
    }

    fn fetch_matching(
        &self,
        entity: &str,
        criteria: &[(String, FieldValue)],
    ) -> StoreResult<Vec<RawRecord>> {
        self.read_access()?;
        self.select(entity, |row| {
            criteria
                .iter()
                .all(|(field, value)| row.value(field) == *value)
        })
    }

    fn resolve_ids(&self, entity: &str, condition: &Condition) -> StoreResult<Vec<RecordId>> {
        self.read_access()?;
        let rows = self.select(entity, |row| Self::matches(row, condition))?;
        rows.iter()
            .map(|row| row.id().map_err(|_| StoreError::query("row without id")))
            .collect()
    }

    fn update_by_ids(
        &self,
        entity: &str,
        ids: &[RecordId],
        changes: &[(String, FieldValue)],
    ) -> StoreResult<usize> {
        self.check_enabled()?;
        let targets = self.select(entity, |row| {
            row.id().map(|id| ids.contains(&id)).unwrap_or(false)
        })?;
        for row in &targets {
            let mut updated = row.clone();
            for (field, value) in changes {
                updated = updated.with(field.clone(), value.clone());
            }
            self.apply(entity, &updated);
        }
        Ok(targets.len())
    }

    fn delete_by_ids(&self, entity: &str, ids: &[RecordId]) -> StoreResult<usize> {
        self.check_enabled()?;
        let targets = self.select(entity, |row| {
            row.id().map(|id| ids.contains(&id)).unwrap_or(false)
        })?;
        for row in &targets {
            self.remove(entity, row.id().expect("selected row has id"));
        }
        Ok(targets.len())
    }

    fn update_all(&self, entity: &str, changes: &[(String, FieldValue)]) -> StoreResult<usize> {
        self.check_enabled()?;
        let targets = self.select(entity, |_| true)?;
        for row in &targets {
            let mut updated = row.clone();
            for (field, value) in changes {
                updated = updated.with(field.clone(), value.clone());
            }
            self.apply(entity, &updated);
        }
        Ok(targets.len())
    }

    fn delete_all(&self, entity: &str) -> StoreResult<usize> {
        self.check_enabled()?;
        let targets = self.select(entity, |_| true)?;
        for row in &targets {
            self.remove(entity, row.id().expect("selected row has id"));
        }
        Ok(targets.len())
    }
}
