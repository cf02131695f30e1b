//! Connector metadata registry
//!
//! [`ConnectorInfo`] is the static description of a connector implementation:
//! its key, which operations it implements, its default properties, and the
//! factory creating its instances. Facades are built against the registry.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::config::{ApiConfiguration, ConfigurationProperties};
use crate::error::{ConnectorError, ConnectorResult};
use crate::ids::ConnectorKey;
use crate::traits::ConnectorFactory;
use crate::types::ApiOperation;

/// Static metadata of one connector implementation.
#[derive(Clone)]
pub struct ConnectorInfo {
    key: ConnectorKey,
    display_name: String,
    implemented: BTreeSet<ApiOperation>,
    self_provided: BTreeSet<ApiOperation>,
    default_properties: ConfigurationProperties,
    poolable: bool,
    factory: Arc<dyn ConnectorFactory>,
}

impl ConnectorInfo {
    /// Create metadata implementing only the runtime-provided `Validate`.
    pub fn new(key: ConnectorKey, factory: impl ConnectorFactory + 'static) -> Self {
        Self::with_factory(key, Arc::new(factory))
    }

    /// Create metadata from a shared factory.
    pub fn with_factory(key: ConnectorKey, factory: Arc<dyn ConnectorFactory>) -> Self {
        let display_name = key.connector_name.clone();
        let mut info = Self {
            key,
            display_name,
            implemented: BTreeSet::new(),
            self_provided: BTreeSet::new(),
            default_properties: ConfigurationProperties::new(),
            poolable: false,
            factory,
        };
        info.normalize_operations();
        info
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Declare the operations the connector's instances publish.
    ///
    /// `Validate` is always added, and `Get` is added when `Search` is present.
    /// Declaring `Validate` means instances publish their own [`ValidateOp`],
    /// consulted after the runtime's configuration check.
    ///
    /// [`ValidateOp`]: crate::traits::ValidateOp
    #[must_use]
    pub fn with_operations(mut self, operations: impl IntoIterator<Item = ApiOperation>) -> Self {
        for operation in operations {
            if operation.is_runtime_provided() {
                self.self_provided.insert(operation);
            }
            self.implemented.insert(operation);
        }
        self.normalize_operations();
        self
    }

    /// Set the default properties.
    #[must_use]
    pub fn with_default_properties(mut self, properties: ConfigurationProperties) -> Self {
        self.default_properties = properties;
        self
    }

    /// Mark instances as safe to pool.
    #[must_use]
    pub fn poolable(mut self, poolable: bool) -> Self {
        self.poolable = poolable;
        self
    }

    fn normalize_operations(&mut self) {
        self.implemented.insert(ApiOperation::Validate);
        if self.implemented.contains(&ApiOperation::Search) {
            self.implemented.insert(ApiOperation::Get);
        }
    }

    /// Connector key.
    #[must_use]
    pub fn key(&self) -> &ConnectorKey {
        &self.key
    }

    /// Display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Implemented operations, including the runtime-provided ones.
    #[must_use]
    pub fn implemented_operations(&self) -> &BTreeSet<ApiOperation> {
        &self.implemented
    }

    /// Check whether an operation is implemented.
    #[must_use]
    pub fn implements(&self, operation: ApiOperation) -> bool {
        self.implemented.contains(&operation)
    }

    /// Check whether the connector implements a runtime-provided operation itself.
    #[must_use]
    pub fn provides_itself(&self, operation: ApiOperation) -> bool {
        self.self_provided.contains(&operation)
    }

    /// Default properties.
    #[must_use]
    pub fn default_properties(&self) -> &ConfigurationProperties {
        &self.default_properties
    }

    /// Whether instances may be pooled.
    #[must_use]
    pub fn is_poolable(&self) -> bool {
        self.poolable
    }

    /// Factory creating connector instances.
    #[must_use]
    pub fn factory(&self) -> Arc<dyn ConnectorFactory> {
        Arc::clone(&self.factory)
    }

    /// Default configuration: default properties, every implemented operation
    /// supported, no timeouts, pooling on when the connector is poolable.
    #[must_use]
    pub fn create_default_api_configuration(&self) -> ApiConfiguration {
        ApiConfiguration::new(self.key.clone(), self.default_properties.clone())
            .with_supported_operations(self.implemented.iter().copied())
            .with_connector_pooling(self.poolable)
    }
}

impl fmt::Debug for ConnectorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorInfo")
            .field("key", &self.key)
            .field("display_name", &self.display_name)
            .field("implemented", &self.implemented)
            .field("self_provided", &self.self_provided)
            .field("poolable", &self.poolable)
            .finish_non_exhaustive()
    }
}

/// Registry of connector metadata keyed by [`ConnectorKey`].
#[derive(Debug, Default)]
pub struct ConnectorInfoRegistry {
    infos: RwLock<HashMap<ConnectorKey, Arc<ConnectorInfo>>>,
}

impl ConnectorInfoRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register metadata, returning what was registered under the same key before.
    pub fn register(&self, info: ConnectorInfo) -> Option<Arc<ConnectorInfo>> {
        let key = info.key().clone();
        tracing::debug!(connector_key = %key, "Registering connector");
        self.infos.write().insert(key, Arc::new(info))
    }

    /// Find metadata by key.
    #[must_use]
    pub fn find(&self, key: &ConnectorKey) -> Option<Arc<ConnectorInfo>> {
        self.infos.read().get(key).cloned()
    }

    /// Get metadata by key, failing with `ConnectorNotFound`.
    pub fn get(&self, key: &ConnectorKey) -> ConnectorResult<Arc<ConnectorInfo>> {
        self.find(key)
            .ok_or_else(|| ConnectorError::ConnectorNotFound { key: key.clone() })
    }

    /// Remove metadata. Facades already built keep their copy.
    pub fn unregister(&self, key: &ConnectorKey) -> Option<Arc<ConnectorInfo>> {
        self.infos.write().remove(key)
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<ConnectorKey> {
        let mut keys: Vec<ConnectorKey> = self.infos.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered connectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.read().len()
    }

    /// Check if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.read().is_empty()
    }
}
