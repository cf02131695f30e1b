//! # Connector Facade Runtime
//!
//! Host-side runtime that exposes provisioning operations of external
//! connectors through capability-typed facades.
//!
//! Callers never see whether a connector instance is pooled, nor how a
//! per-operation deadline is enforced. They ask the [`FacadeCache`] for the
//! facade matching a configuration and call typed methods on it.
//!
//! ## Architecture
//!
//! - [`CapabilityToken`] - Type-level identifier of one capability trait
//! - [`create_proxy`] - Builds an `Arc<dyn Op>` forwarding every call to an
//!   [`InvocationHandler`]
//! - [`TimeoutHandler`], [`LoggingHandler`] - Composable handlers
//! - [`ConnectorFacade`] - Per-configuration entry point
//! - [`FacadeCache`] - One facade per configuration fingerprint, idle eviction
//!
//! ## Example
//!
//! ```ignore
//! use xavyo_connector_facade::prelude::*;
//!
//! let registry = Arc::new(ConnectorInfoRegistry::new());
//! registry.register(
//!     ConnectorInfo::new(key.clone(), ldap_factory)
//!         .with_operations([ApiOperation::Create, ApiOperation::Search])
//!         .poolable(true),
//! );
//!
//! let cache = FacadeCache::new(FacadeFactory::new(registry));
//! let configuration = ApiConfiguration::new(key, properties)
//!     .with_supported_operations([ApiOperation::Create, ApiOperation::Search])
//!     .with_timeout(ApiOperation::Create, 5_000);
//!
//! let facade = cache.get_or_create(&configuration).await?;
//! let uid = facade
//!     .create("user", AttributeSet::new().with("cn", "jdoe"), &OperationOptions::new())
//!     .await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`types`] - Operation identifiers
//! - [`ids`] - Facade ids, connector keys, configuration fingerprints
//! - [`error`] - Error types with transient/permanent classification
//! - [`capability`] - Capability tokens
//! - [`traits`] - Capability traits and the connector SPI
//! - [`operation`], [`schema`] - Data passed through operations
//! - [`config`] - Configuration model
//! - [`registry`] - Static connector metadata
//! - [`proxy`], [`logging`], [`timeout`], [`dispatch`] - Invocation chain
//! - [`pool`] - Connector instance pool
//! - [`facade`], [`cache`] - Facades and the facade cache
//! - [`settings`] - Environment-driven runtime settings

pub mod cache;
pub mod capability;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod facade;
pub mod ids;
pub mod logging;
pub mod operation;
pub mod pool;
pub mod proxy;
pub mod registry;
pub mod schema;
pub mod settings;
pub mod timeout;
pub mod traits;
pub mod types;

pub use cache::FacadeCache;
pub use capability::{AnyCapability, Capability, CapabilityToken, Implements};
pub use facade::{ConnectorFacade, FacadeFactory};
pub use logging::LoggingHandler;
pub use proxy::{create_proxy, InvocationHandler};
pub use timeout::TimeoutHandler;

/// Prelude module for convenient imports.
///
/// ```
/// use xavyo_connector_facade::prelude::*;
/// ```
pub mod prelude {
    // IDs
    pub use crate::ids::{ConnectorKey, FacadeId, Fingerprint};

    // Types
    pub use crate::types::ApiOperation;

    // Error handling
    pub use crate::error::{ConnectorError, ConnectorResult};

    // Capabilities
    pub use crate::capability::{AnyCapability, Capability, CapabilityToken, Implements};

    // Traits
    pub use crate::traits::{
        AuthenticateOp, Connector, ConnectorFactory, CreateOp, DeleteOp, GetOp, OperationSet,
        ResolveUsernameOp, ResultsHandler, SchemaOp, ScriptOnConnectorOp, ScriptOnResourceOp,
        SearchOp, SyncOp, SyncResultsHandler, TestOp, UpdateOp, ValidateOp,
    };

    // Operations
    pub use crate::operation::{
        AttributeSet, AttributeValue, ConnectorObject, Filter, GuardedString, OperationOptions,
        ScriptContext, SearchResult, SearchScope, SyncDelta, SyncDeltaType, SyncToken, Uid,
    };

    // Schema
    pub use crate::schema::{AttributeDataType, ObjectClass, Schema, SchemaAttribute};

    // Configuration
    pub use crate::config::{
        ApiConfiguration, ConfigurationProperties, ConfigurationProperty, PoolConfiguration,
        PropertyType,
    };

    // Registry
    pub use crate::registry::{ConnectorInfo, ConnectorInfoRegistry};

    // Invocation chain
    pub use crate::dispatch::ConnectorDispatcher;
    pub use crate::logging::{logging_proxy_enabled, set_logging_proxy_enabled, LoggingHandler};
    pub use crate::proxy::{
        create_proxy, CapabilityProxy, Invocation, InvocationHandler, InvocationOutput,
        MethodDescriptor,
    };
    pub use crate::timeout::{current_cancellation, TimeoutHandler};

    // Pooling
    pub use crate::pool::{ConnectorInstance, ConnectorPool, PoolStats};

    // Facades
    pub use crate::cache::FacadeCache;
    pub use crate::facade::{ConnectorFacade, FacadeFactory};
    pub use crate::settings::RuntimeSettings;
}

// Re-export async_trait for connector implementors
pub use async_trait::async_trait;
