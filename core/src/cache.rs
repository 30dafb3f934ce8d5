use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::clock::Clock;
use crate::config::SharedConfig;
use crate::launch::{CanonicalKey, LaunchSpec};
use crate::protocol::{CapabilityDescriptor, ServerIdentity};

/// One discovery result, replaced wholesale on re-discovery
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CanonicalKey,
    pub capabilities: Vec<CapabilityDescriptor>,
    pub server: ServerIdentity,
    pub cached_at: DateTime<Utc>,
}

/// Discovery results keyed by canonical launch spec.
///
/// Expired entries are never purged; they read as misses until the next
/// `store` for the same key supersedes them. TTL and the enable flag are
/// read from the shared configuration on every call.
#[derive(Debug)]
pub struct CapabilityCache {
    entries: DashMap<CanonicalKey, CacheEntry>,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
}

impl CapabilityCache {
    pub fn new(config: SharedConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock,
        }
    }

    pub async fn lookup(&self, spec: &LaunchSpec) -> Option<CacheEntry> {
        let (enabled, ttl) = {
            let config = self.config.read().await;
            (config.cache_enabled, config.cache_ttl())
        };
        if !enabled {
            return None;
        }

        let key = spec.canonical_key();
        let entry = self.entries.get(&key).map(|e| e.clone())?;
        let now = self.clock.now();

        if now.signed_duration_since(entry.cached_at) < ttl {
            debug!(target: "capability_cache", server = %spec.name, "Cache hit");
            Some(entry)
        } else {
            debug!(target: "capability_cache", server = %spec.name, "Cache entry expired");
            None
        }
    }

    /// Record a discovery result. Empty capability lists are never stored.
    pub async fn store(
        &self,
        spec: &LaunchSpec,
        capabilities: Vec<CapabilityDescriptor>,
        server: ServerIdentity,
    ) -> bool {
        if capabilities.is_empty() || !self.config.read().await.cache_enabled {
            return false;
        }

        let key = spec.canonical_key();
        let entry = CacheEntry {
            key: key.clone(),
            capabilities,
            server,
            cached_at: self.clock.now(),
        };
        debug!(
            target: "capability_cache",
            server = %spec.name,
            tool_count = entry.capabilities.len(),
            "Cached capabilities"
        );
        self.entries.insert(key, entry);
        true
    }

    /// Number of stored capability sets, stale ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RunnerConfig;

    fn cache_with(clock: &ManualClock, ttl_secs: u64) -> CapabilityCache {
        let config = RunnerConfig {
            cache_ttl_secs: ttl_secs,
            ..RunnerConfig::default()
        };
        CapabilityCache::new(SharedConfig::new(config), Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_entry_expires_exactly_at_ttl() {
        let clock = ManualClock::default();
        let cache = cache_with(&clock, 10);
        let spec = LaunchSpec::new("fs", "npx");

        assert!(
            cache
                .store(
                    &spec,
                    vec![CapabilityDescriptor::new("read", "")],
                    ServerIdentity::new("fs", "1")
                )
                .await
        );

        clock.advance(chrono::Duration::seconds(9));
        assert!(cache.lookup(&spec).await.is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.lookup(&spec).await.is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_list_not_stored() {
        let clock = ManualClock::default();
        let cache = cache_with(&clock, 60);
        let spec = LaunchSpec::new("fs", "npx");

        assert!(!cache.store(&spec, vec![], ServerIdentity::new("fs", "1")).await);
        assert!(cache.is_empty());
    }
}
