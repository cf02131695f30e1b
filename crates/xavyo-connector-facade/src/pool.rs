//! Connector instance pool
//!
//! Bounded pool of connector instances for one facade. A semaphore with
//! `max_objects` permits bounds how many instances are in use; idle
//! instances are reused most-recently-returned first.
//!
//! Lifecycle of an instance:
//! - created by the factory when no idle instance is available
//! - checked with [`Connector::check_alive`] before reuse, disposed if dead
//! - returned to the idle queue when its lease drops, or disposed when the
//!   queue already holds `max_idle` instances or the pool is closed
//! - evicted once idle longer than `min_evictable_idle_millis`, keeping at
//!   least `min_idle` instances
//!
//! Closing the pool disposes idle instances at once. Instances still leased
//! are disposed when their lease drops, never while in use.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::capability::Capability;
use crate::config::{ConfigurationProperties, PoolConfiguration};
use crate::error::{ConnectorError, ConnectorResult};
use crate::traits::{Connector, ConnectorFactory, OperationSet};

/// A connector together with the capabilities it published at creation.
pub struct ConnectorInstance {
    connector: Arc<dyn Connector>,
    operations: OperationSet,
}

impl ConnectorInstance {
    /// Create an instance through `factory`.
    pub async fn create(
        factory: &dyn ConnectorFactory,
        properties: &ConfigurationProperties,
    ) -> ConnectorResult<Self> {
        let connector = factory.create(properties).await?;
        let operations = Arc::clone(&connector).operations();
        debug!(
            connector = connector.display_name(),
            operations = ?operations,
            "Connector instance created"
        );
        Ok(Self {
            connector,
            operations,
        })
    }

    /// The connector.
    #[must_use]
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    /// Published capabilities.
    #[must_use]
    pub fn operations(&self) -> &OperationSet {
        &self.operations
    }

    /// Implementation of capability `T`, if published.
    #[must_use]
    pub fn get<T: ?Sized + Capability>(&self) -> Option<Arc<T>> {
        self.operations.get::<T>()
    }

    /// Dispose the connector, logging failures.
    pub async fn dispose(self) {
        let name = self.connector.display_name().to_string();
        match self.connector.dispose().await {
            Ok(()) => debug!(connector = %name, "Connector instance disposed"),
            Err(e) => warn!(
                connector = %name,
                error = %e,
                "Failed to dispose connector instance"
            ),
        }
    }
}

impl fmt::Debug for ConnectorInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorInstance")
            .field("connector", &self.connector.display_name())
            .field("operations", &self.operations)
            .finish()
    }
}

struct IdleConnector {
    instance: ConnectorInstance,
    idle_since: Instant,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Instances waiting in the idle queue.
    pub idle: usize,
    /// Instances currently leased.
    pub active: usize,
    /// Instances created since the pool was built.
    pub created: u64,
    /// Instances disposed since the pool was built.
    pub disposed: u64,
}

/// Bounded pool of connector instances.
pub struct ConnectorPool {
    name: String,
    factory: Arc<dyn ConnectorFactory>,
    properties: ConfigurationProperties,
    config: PoolConfiguration,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnector>>,
    closed: AtomicBool,
    created: AtomicU64,
    disposed: Arc<AtomicU64>,
}

impl ConnectorPool {
    /// Create an empty pool. Instances are created on first borrow.
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn ConnectorFactory>,
        properties: ConfigurationProperties,
        config: PoolConfiguration,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_objects as usize));
        Self {
            name: name.into(),
            factory,
            properties,
            config,
            permits,
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            created: AtomicU64::new(0),
            disposed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Pool parameters.
    #[must_use]
    pub fn config(&self) -> &PoolConfiguration {
        &self.config
    }

    /// Check whether the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.lock().len(),
            active: (self.config.max_objects as usize)
                .saturating_sub(self.permits.available_permits()),
            created: self.created.load(Ordering::SeqCst),
            disposed: self.disposed.load(Ordering::SeqCst),
        }
    }

    /// Lease an instance, waiting up to `max_wait_millis` for one to free up.
    pub async fn borrow(self: &Arc<Self>) -> ConnectorResult<PooledConnector> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let permit = self.acquire_permit().await?;

        for expired in self.take_expired() {
            self.dispose_instance(expired).await;
        }

        while let Some(idle) = self.take_idle() {
            match idle.connector.check_alive().await {
                Ok(()) => return Ok(self.lease(idle, permit)),
                Err(e) => {
                    warn!(
                        pool = %self.name,
                        error = %e,
                        "Idle connector failed liveness check, discarding"
                    );
                    self.dispose_instance(idle).await;
                }
            }
        }

        let instance = ConnectorInstance::create(self.factory.as_ref(), &self.properties).await?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.lease(instance, permit))
    }

    /// Close the pool and dispose idle instances.
    ///
    /// Leased instances are disposed when returned. Closing twice is a no-op.
    pub async fn close(&self) {
        // Flag and drain under the idle lock so a concurrent return either
        // lands in the drained queue or sees the flag.
        let drained: Vec<ConnectorInstance> = {
            let mut idle = self.idle.lock();
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            idle.drain(..).map(|idle| idle.instance).collect()
        };
        self.permits.close();
        debug!(pool = %self.name, idle = drained.len(), "Closing connector pool");
        for instance in drained {
            self.dispose_instance(instance).await;
        }
    }

    async fn acquire_permit(&self) -> ConnectorResult<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        let acquired = match self.config.max_wait() {
            Some(max_wait) => match tokio::time::timeout(max_wait, acquire).await {
                Ok(acquired) => acquired,
                Err(_) => {
                    warn!(
                        pool = %self.name,
                        max_objects = self.config.max_objects,
                        waited_ms = self.config.max_wait_millis,
                        "Connector pool exhausted"
                    );
                    return Err(ConnectorError::PoolExhausted {
                        max_objects: self.config.max_objects,
                        waited_ms: self.config.max_wait_millis,
                    });
                }
            },
            None => acquire.await,
        };
        acquired.map_err(|_| self.closed_error())
    }

    fn take_idle(&self) -> Option<ConnectorInstance> {
        self.idle.lock().pop_back().map(|idle| idle.instance)
    }

    fn take_expired(&self) -> Vec<ConnectorInstance> {
        let threshold = self.config.min_evictable_idle();
        let keep = self.config.min_idle as usize;
        let mut idle = self.idle.lock();
        let mut expired = Vec::new();
        while idle.len() > keep {
            match idle.front() {
                Some(oldest) if oldest.idle_since.elapsed() >= threshold => {
                    if let Some(oldest) = idle.pop_front() {
                        expired.push(oldest.instance);
                    }
                }
                _ => break,
            }
        }
        if !expired.is_empty() {
            debug!(pool = %self.name, evicted = expired.len(), "Evicting idle connectors");
        }
        expired
    }

    fn lease(self: &Arc<Self>, instance: ConnectorInstance, permit: OwnedSemaphorePermit) -> PooledConnector {
        PooledConnector {
            instance: Some(instance),
            pool: Arc::clone(self),
            _permit: permit,
        }
    }

    async fn dispose_instance(&self, instance: ConnectorInstance) {
        instance.dispose().await;
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, instance: ConnectorInstance) {
        {
            let mut idle = self.idle.lock();
            if !self.is_closed() && idle.len() < self.config.max_idle as usize {
                idle.push_back(IdleConnector {
                    instance,
                    idle_since: Instant::now(),
                });
                return;
            }
        }

        let disposed = Arc::clone(&self.disposed);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    instance.dispose().await;
                    disposed.fetch_add(1, Ordering::SeqCst);
                });
            }
            Err(_) => warn!(
                pool = %self.name,
                "No runtime available, dropping connector without dispose"
            ),
        }
    }

    fn closed_error(&self) -> ConnectorError {
        ConnectorError::internal(format!("connector pool '{}' is closed", self.name))
    }
}

impl fmt::Debug for ConnectorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorPool")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Lease of a pooled instance. Returns the instance to the pool on drop.
pub struct PooledConnector {
    instance: Option<ConnectorInstance>,
    pool: Arc<ConnectorPool>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnector {
    type Target = ConnectorInstance;

    fn deref(&self) -> &ConnectorInstance {
        // Only `drop` takes the instance out.
        match &self.instance {
            Some(instance) => instance,
            None => unreachable!("pooled connector used after release"),
        }
    }
}

impl Drop for PooledConnector {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.release(instance);
        }
    }
}

impl fmt::Debug for PooledConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnector")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}
