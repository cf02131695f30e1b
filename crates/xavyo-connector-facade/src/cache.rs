//! Facade cache
//!
//! Facades are expensive to build and hold pooled connections, so the
//! runtime shares one facade per configuration fingerprint. Equal
//! configurations get the same `Arc<ConnectorFacade>`; at most one
//! construction runs per fingerprint at a time.
//!
//! Callers should fetch a facade for each unit of work rather than keep it:
//! an evicted facade is disposed and rejects further calls.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ApiConfiguration;
use crate::error::{ConnectorError, ConnectorResult};
use crate::facade::{ConnectorFacade, FacadeFactory};
use crate::ids::Fingerprint;

struct CacheSlot {
    facade: OnceCell<Arc<ConnectorFacade>>,
    last_access: Mutex<Instant>,
}

impl CacheSlot {
    fn new() -> Self {
        Self {
            facade: OnceCell::new(),
            last_access: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// Constructed and not accessed for longer than `threshold`.
    fn is_idle(&self, now: Instant, threshold: Duration) -> bool {
        self.facade.initialized()
            && now.saturating_duration_since(*self.last_access.lock()) > threshold
    }
}

/// Cache of facades keyed by configuration fingerprint.
pub struct FacadeCache {
    factory: FacadeFactory,
    entries: DashMap<Fingerprint, Arc<CacheSlot>>,
}

impl FacadeCache {
    /// Create an empty cache building facades with `factory`.
    #[must_use]
    pub fn new(factory: FacadeFactory) -> Self {
        Self {
            factory,
            entries: DashMap::new(),
        }
    }

    /// Factory used for construction.
    #[must_use]
    pub fn factory(&self) -> &FacadeFactory {
        &self.factory
    }

    /// Get the facade for `configuration`, building it on first use.
    ///
    /// Invalid configurations fail with
    /// [`ConnectorError::InvalidConfiguration`]. Other construction failures
    /// come back as [`ConnectorError::FacadeConstructionFailed`] and are not
    /// cached, so the next call tries again.
    pub async fn get_or_create(
        &self,
        configuration: &ApiConfiguration,
    ) -> ConnectorResult<Arc<ConnectorFacade>> {
        configuration.validate()?;
        let fingerprint = configuration.fingerprint()?;

        // Touch under the shard lock so a concurrent eviction sees it.
        let slot = {
            let entry = self
                .entries
                .entry(fingerprint.clone())
                .or_insert_with(|| Arc::new(CacheSlot::new()));
            entry.touch();
            Arc::clone(entry.value())
        };

        let result = slot
            .facade
            .get_or_try_init(|| async {
                let facade = self.factory.new_instance(configuration)?;
                info!(
                    fingerprint = fingerprint.short(),
                    facade_id = %facade.id(),
                    "Facade cache entry created"
                );
                Ok::<_, ConnectorError>(Arc::new(facade))
            })
            .await;

        match result {
            Ok(facade) => Ok(Arc::clone(facade)),
            Err(e) => {
                self.entries.remove_if(&fingerprint, |_, current| {
                    Arc::ptr_eq(current, &slot) && !current.facade.initialized()
                });
                warn!(
                    fingerprint = fingerprint.short(),
                    error = %e,
                    "Facade construction failed"
                );
                Err(ConnectorError::FacadeConstructionFailed {
                    fingerprint,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Look up a constructed facade without touching its access time.
    #[must_use]
    pub fn find(&self, fingerprint: &Fingerprint) -> Option<Arc<ConnectorFacade>> {
        self.entries
            .get(fingerprint)
            .and_then(|slot| slot.facade.get().cloned())
    }

    /// Remove and dispose every facade idle for longer than `idle_threshold`.
    ///
    /// Entries still under construction are skipped. Returns the number of
    /// facades evicted.
    pub async fn evict_idle(&self, idle_threshold: Duration) -> usize {
        let now = Instant::now();
        let candidates: Vec<Fingerprint> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_idle(now, idle_threshold))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = Vec::with_capacity(candidates.len());
        for fingerprint in candidates {
            // Re-check: the entry may have been touched since the scan.
            if let Some((fingerprint, slot)) = self
                .entries
                .remove_if(&fingerprint, |_, slot| slot.is_idle(now, idle_threshold))
            {
                evicted.push((fingerprint, slot));
            }
        }

        let count = evicted.len();
        for (fingerprint, slot) in evicted {
            if let Some(facade) = slot.facade.get() {
                facade.dispose().await;
                info!(
                    fingerprint = fingerprint.short(),
                    facade_id = %facade.id(),
                    "Evicted idle facade"
                );
            }
        }
        if count > 0 {
            debug!(evicted = count, remaining = self.entries.len(), "Idle eviction finished");
        }
        count
    }

    /// Remove and dispose every facade. Returns the number removed.
    pub async fn dispose_all(&self) -> usize {
        let fingerprints: Vec<Fingerprint> =
            self.entries.iter().map(|entry| entry.key().clone()).collect();

        let mut removed = 0;
        for fingerprint in fingerprints {
            if let Some((_, slot)) = self.entries.remove(&fingerprint) {
                removed += 1;
                if let Some(facade) = slot.facade.get() {
                    facade.dispose().await;
                }
            }
        }
        info!(removed, "Disposed all cached facades");
        removed
    }

    /// Number of entries, including ones under construction.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fingerprints currently cached, sorted.
    #[must_use]
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        let mut fingerprints: Vec<Fingerprint> =
            self.entries.iter().map(|entry| entry.key().clone()).collect();
        fingerprints.sort();
        fingerprints
    }

    /// Start a background task evicting idle facades every `interval`.
    ///
    /// The task stops when `shutdown` is cancelled or the cache is dropped.
    #[must_use]
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        idle_threshold: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let evicted = cache.evict_idle(idle_threshold).await;
                if evicted > 0 {
                    info!(
                        evicted,
                        idle_threshold_secs = idle_threshold.as_secs(),
                        "Idle facade sweep completed"
                    );
                }
            }
            debug!("Idle facade sweeper stopped");
        })
    }
}

impl std::fmt::Debug for FacadeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacadeCache")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigurationProperties, ConfigurationProperty, PropertyType};
    use crate::ids::ConnectorKey;
    use crate::registry::{ConnectorInfo, ConnectorInfoRegistry};
    use crate::traits::{Connector, OperationSet, TestOp};
    use crate::types::ApiOperation;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Connector for Echo {
        fn display_name(&self) -> &str {
            "echo"
        }

        async fn dispose(&self) -> ConnectorResult<()> {
            Ok(())
        }

        fn operations(self: Arc<Self>) -> OperationSet {
            OperationSet::new().with::<dyn TestOp, _>(&self)
        }
    }

    #[async_trait]
    impl TestOp for Echo {
        async fn test(&self) -> ConnectorResult<()> {
            Ok(())
        }
    }

    fn key() -> ConnectorKey {
        ConnectorKey::new("xavyo-connector-test", "1.0.0", "Echo")
    }

    fn cache() -> FacadeCache {
        let registry = ConnectorInfoRegistry::new();
        registry.register(
            ConnectorInfo::new(key(), |_props: ConfigurationProperties| async {
                Ok::<_, ConnectorError>(Arc::new(Echo) as Arc<dyn Connector>)
            })
            .with_operations([ApiOperation::Test]),
        );
        FacadeCache::new(FacadeFactory::new(Arc::new(registry)))
    }

    fn configuration(host: &str) -> ApiConfiguration {
        let properties = ConfigurationProperties::new()
            .with_property(ConfigurationProperty::new("host", PropertyType::String).with_value(host));
        ApiConfiguration::new(key(), properties)
            .with_supported_operations([ApiOperation::Test, ApiOperation::Validate])
    }

    #[tokio::test]
    async fn test_equal_configurations_share_a_facade() {
        let cache = cache();
        let first = cache.get_or_create(&configuration("ldap-1")).await.unwrap();
        let second = cache.get_or_create(&configuration("ldap-1")).await.unwrap();
        let other = cache.get_or_create(&configuration("ldap-2")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(cache.len(), 2);
        assert!(cache.find(first.fingerprint()).is_some());
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_not_wrapped() {
        let cache = cache();
        let mut invalid = configuration("ldap-1");
        invalid.pool.max_objects = 0;

        let err = cache.get_or_create(&invalid).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_construction_failure_is_not_cached() {
        let cache = cache();
        let unknown = ApiConfiguration::new(
            ConnectorKey::new("xavyo-connector-test", "9.9.9", "Missing"),
            ConfigurationProperties::new(),
        );

        let err = cache.get_or_create(&unknown).await.unwrap_err();
        match err {
            ConnectorError::FacadeConstructionFailed { source, .. } => {
                assert_eq!(source.error_code(), "CONNECTOR_NOT_FOUND");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_uses_strict_threshold() {
        let cache = cache();
        let facade = cache.get_or_create(&configuration("ldap-1")).await.unwrap();
        let threshold = Duration::from_secs(60);

        tokio::time::advance(threshold).await;
        assert_eq!(cache.evict_idle(threshold).await, 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.evict_idle(threshold).await, 1);
        assert!(facade.is_disposed());
        assert!(cache.find(facade.fingerprint()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_resets_idle_clock() {
        let cache = cache();
        let threshold = Duration::from_secs(60);
        cache.get_or_create(&configuration("ldap-1")).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        cache.get_or_create(&configuration("ldap-1")).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;

        assert_eq!(cache.evict_idle(threshold).await, 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_and_stops() {
        let cache = Arc::new(cache());
        let facade = cache.get_or_create(&configuration("ldap-1")).await.unwrap();
        let shutdown = CancellationToken::new();
        let sweeper = cache.spawn_idle_sweeper(
            Duration::from_secs(10),
            Duration::from_secs(30),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(cache.is_empty());
        assert!(facade.is_disposed());

        shutdown.cancel();
        sweeper.await.unwrap();
    }
}
