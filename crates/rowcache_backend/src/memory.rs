//! In-memory cache backend.

use crate::backend::{CacheBackend, MAX_KEY_LEN};
use crate::error::{BackendError, BackendResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A stored value with its optional expiry instant.
#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

/// An in-memory cache backend.
///
/// This backend stores all data in a process-local map and is suitable
/// for:
/// - Unit tests
/// - Integration tests
/// - Single-process deployments that don't need a shared cache
///
/// Counter semantics match memcached: counters are decimal ASCII
/// strings and `incr` on a non-numeric value is an error.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use rowcache_backend::{CacheBackend, MemoryBackend};
/// use std::time::Duration;
///
/// let backend = MemoryBackend::new();
/// backend.set("greeting", b"hello", Duration::ZERO).unwrap();
/// assert_eq!(backend.get("greeting").unwrap(), Some(b"hello".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slots: RwLock<HashMap<String, Slot>>,
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live keys.
    ///
    /// Expired entries that have not yet been evicted are not counted.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.read().values().filter(|s| s.live(now)).count()
    }

    /// Returns true if the backend holds no live keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_key(key: &str) -> BackendResult<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(BackendError::KeyTooLong {
                len: key.len(),
                limit: MAX_KEY_LEN,
            });
        }
        Ok(())
    }
}

impl CacheBackend for MemoryBackend {
    fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let slots = self.slots.read();
        Ok(slots
            .get(key)
            .filter(|slot| slot.live(now))
            .map(|slot| slot.value.clone()))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> BackendResult<()> {
        Self::check_key(key)?;
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.slots.write().insert(
            key.to_string(),
            Slot {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> BackendResult<bool> {
        let now = Instant::now();
        match self.slots.write().remove(key) {
            Some(slot) => Ok(slot.live(now)),
            None => Ok(false),
        }
    }

    fn incr(&self, key: &str, delta: u64) -> BackendResult<u64> {
        Self::check_key(key)?;
        let mut slots = self.slots.write();
        let next = match slots.get(key) {
            Some(slot) => {
                let text = std::str::from_utf8(&slot.value)
                    .map_err(|_| BackendError::counter_corrupt(key, "not UTF-8"))?;
                let current: u64 = text
                    .parse()
                    .map_err(|_| BackendError::counter_corrupt(key, "not a decimal integer"))?;
                current.saturating_add(delta)
            }
            None => delta,
        };
        slots.insert(
            key.to_string(),
            Slot {
                value: next.to_string().into_bytes(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    fn flush(&self) -> BackendResult<()> {
        self.slots.write().clear();
        Ok(())
    }
}
