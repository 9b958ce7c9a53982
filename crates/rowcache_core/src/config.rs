//! Cache layer configuration.

use std::time::Duration;

/// Configuration for a [`crate::RecordCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix for every key this cache writes to the backend.
    ///
    /// Lets several deployments (or test runs) share one backend
    /// without colliding.
    pub namespace: String,

    /// Default time-to-live for cache entries.
    ///
    /// Individual indexes may override this at registration. Zero
    /// means entries never expire; version bumps and explicit
    /// invalidation are then the only eviction paths.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "rowcache".to_string(),
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the default entry TTL.
    #[must_use]
    pub const fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.namespace, "rowcache");
        assert_eq!(config.ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn builder_pattern() {
        let config = CacheConfig::new()
            .namespace("app")
            .ttl(Duration::from_secs(300));
        assert_eq!(config.namespace, "app");
        assert_eq!(config.ttl, Duration::from_secs(300));
    }
}
