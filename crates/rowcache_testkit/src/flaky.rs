//! Fault-injecting cache backend.

use rowcache_backend::{BackendError, BackendResult, CacheBackend, MemoryBackend};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A cache backend that can be taken down mid-test.
///
/// While down, every operation fails with
/// [`BackendError::Unavailable`]; the stored data survives and is
/// served again once restored. Used to exercise the degradation rules:
/// reads fall through to the record store, invalidation escalates to a
/// version bump.
pub struct FlakyBackend {
    inner: MemoryBackend,
    down: AtomicBool,
}

impl Default for FlakyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyBackend {
    /// Creates a healthy backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            down: AtomicBool::new(false),
        }
    }

    /// Makes every operation fail until restored.
    pub fn take_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    /// Restores normal operation.
    pub fn restore(&self) {
        self.down.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> BackendResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("injected outage"));
        }
        Ok(())
    }
}

impl CacheBackend for FlakyBackend {
    fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> BackendResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> BackendResult<bool> {
        self.check()?;
        self.inner.delete(key)
    }

    fn incr(&self, key: &str, delta: u64) -> BackendResult<u64> {
        self.check()?;
        self.inner.incr(key, delta)
    }

    fn flush(&self) -> BackendResult<()> {
        self.check()?;
        self.inner.flush()
    }
}
