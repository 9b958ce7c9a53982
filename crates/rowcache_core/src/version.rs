//! Per-entity-type version counters.

use crate::error::CacheResult;
use crate::types::Version;
use rowcache_backend::CacheBackend;
use std::sync::Arc;

/// Process-shared monotonic version counter per entity type.
///
/// Every cache entry is stamped with the version current at write time
/// and is stale once the stamp no longer matches. Bumping the counter
/// is the coarse invalidation used when a bulk write cannot enumerate
/// the cache keys it affects.
///
/// Counters live in the cache backend so a bump is immediately visible
/// to every process sharing the cache. Both reads and bumps go through
/// the backend's atomic increment primitive - never read-modify-write -
/// so concurrent bulk operations cannot lose increments.
///
/// # Failure
///
/// If the backend is unreachable, [`current`](Self::current) fails
/// loudly instead of returning a stale value: a wrong version turns
/// into incorrect cache hits.
pub struct VersionStore {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
}

impl VersionStore {
    /// Creates a version store over the given backend.
    pub fn new(backend: Arc<dyn CacheBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    /// Returns the current version for an entity type.
    ///
    /// A counter that does not exist yet reads as version zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    pub fn current(&self, entity: &str) -> CacheResult<Version> {
        // Zero-delta increment: atomic read that also creates the
        // counter on first touch.
        Ok(Version::new(self.backend.incr(&self.key(entity), 0)?))
    }

    /// Atomically increments the version for an entity type,
    /// invalidating every entry stamped with an older version.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    pub fn bump(&self, entity: &str) -> CacheResult<Version> {
        Ok(Version::new(self.backend.incr(&self.key(entity), 1)?))
    }

    fn key(&self, entity: &str) -> String {
        format!("{}:v:{}", self.namespace, entity)
    }
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowcache_backend::MemoryBackend;

    fn store() -> VersionStore {
        VersionStore::new(Arc::new(MemoryBackend::new()), "test")
    }

    #[test]
    fn fresh_counter_reads_zero() {
        let versions = store();
        assert_eq!(versions.current("Pet").unwrap(), Version::new(0));
    }

    #[test]
    fn bump_increments() {
        let versions = store();
        assert_eq!(versions.bump("Pet").unwrap(), Version::new(1));
        assert_eq!(versions.bump("Pet").unwrap(), Version::new(2));
        assert_eq!(versions.current("Pet").unwrap(), Version::new(2));
    }

    #[test]
    fn counters_are_per_entity_type() {
        let versions = store();
        versions.bump("Pet").unwrap();
        assert_eq!(versions.current("Pet").unwrap(), Version::new(1));
        assert_eq!(versions.current("Breed").unwrap(), Version::new(0));
    }

    #[test]
    fn current_is_stable_without_bumps() {
        let versions = store();
        versions.bump("Pet").unwrap();
        assert_eq!(versions.current("Pet").unwrap(), Version::new(1));
        assert_eq!(versions.current("Pet").unwrap(), Version::new(1));
    }
}
