//! Connector facade traits
//!
//! Capability traits, one per operation family, and the connector SPI.
//!
//! A connector implements [`Connector`] plus whichever capability traits it
//! supports, and publishes them through [`Connector::operations`]. The
//! runtime never calls a capability that is not in the published
//! [`OperationSet`].

use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::capability::{Capability, CapabilityToken, Implements};
use crate::config::ConfigurationProperties;
use crate::error::ConnectorResult;
use crate::operation::{
    AttributeSet, ConnectorObject, Filter, GuardedString, OperationOptions, ScriptContext,
    SearchResult, SyncDelta, SyncToken, Uid,
};
use crate::schema::Schema;
use crate::types::ApiOperation;

/// Receives search results one at a time.
///
/// Returning `false` asks the producer to stop; nothing is delivered after that.
pub trait ResultsHandler: Send {
    /// Handle one object. Return `false` to stop the search.
    fn handle(&mut self, object: ConnectorObject) -> bool;
}

impl<F> ResultsHandler for F
where
    F: FnMut(ConnectorObject) -> bool + Send,
{
    fn handle(&mut self, object: ConnectorObject) -> bool {
        self(object)
    }
}

/// Receives sync deltas one at a time.
pub trait SyncResultsHandler: Send {
    /// Handle one delta. Return `false` to stop the sync.
    fn handle(&mut self, delta: SyncDelta) -> bool;
}

impl<F> SyncResultsHandler for F
where
    F: FnMut(SyncDelta) -> bool + Send,
{
    fn handle(&mut self, delta: SyncDelta) -> bool {
        self(delta)
    }
}

/// Capability for retrieving the schema of a target system.
#[async_trait]
pub trait SchemaOp: Send + Sync {
    /// Describe the object classes and attributes of the target system.
    async fn schema(&self) -> ConnectorResult<Schema>;
}

/// Capability for creating objects in the target system.
#[async_trait]
pub trait CreateOp: Send + Sync {
    /// Create a new object in the target system.
    ///
    /// # Arguments
    /// * `object_class` - The type of object to create (e.g., "user", "group")
    /// * `attributes` - The attributes for the new object
    /// * `options` - Operation options
    ///
    /// # Returns
    /// The unique identifier (UID) of the created object in the target system.
    async fn create(
        &self,
        object_class: &str,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid>;
}

/// Capability for updating objects in the target system.
#[async_trait]
pub trait UpdateOp: Send + Sync {
    /// Replace the values of the given attributes.
    ///
    /// # Returns
    /// The UID of the updated object (may change for some systems).
    async fn update(
        &self,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid>;

    /// Add values to multi-valued attributes.
    async fn add_attribute_values(
        &self,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid>;

    /// Remove values from multi-valued attributes.
    async fn remove_attribute_values(
        &self,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid>;
}

/// Capability for deleting objects from the target system.
#[async_trait]
pub trait DeleteOp: Send + Sync {
    /// Delete an object from the target system.
    async fn delete(
        &self,
        object_class: &str,
        uid: &Uid,
        options: &OperationOptions,
    ) -> ConnectorResult<()>;
}

/// Capability for searching objects in the target system.
///
/// Results are pushed to `handler` in target-system order. The connector
/// stops producing once the handler returns `false` and then returns the
/// terminal [`SearchResult`].
#[async_trait]
pub trait SearchOp: Send + Sync {
    /// Search for objects, streaming them into `handler`.
    async fn search(
        &self,
        object_class: &str,
        filter: Option<&Filter>,
        handler: &mut dyn ResultsHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<SearchResult>;
}

/// Capability for incremental synchronization.
#[async_trait]
pub trait SyncOp: Send + Sync {
    /// Stream changes after `token` into `handler`.
    ///
    /// A `None` token starts from the beginning of the change log. Returns
    /// the position to resume from, if the connector tracks one beyond the
    /// last delivered delta.
    async fn sync(
        &self,
        object_class: &str,
        token: Option<&SyncToken>,
        handler: &mut dyn SyncResultsHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<SyncToken>>;

    /// Current end of the change log.
    async fn get_latest_sync_token(&self, object_class: &str)
        -> ConnectorResult<Option<SyncToken>>;
}

/// Capability for verifying credentials against the target system.
#[async_trait]
pub trait AuthenticateOp: Send + Sync {
    /// Authenticate `username` and return the UID of the matching account.
    async fn authenticate(
        &self,
        object_class: &str,
        username: &str,
        password: &GuardedString,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid>;
}

/// Capability for mapping a username to a UID without a password.
#[async_trait]
pub trait ResolveUsernameOp: Send + Sync {
    /// Resolve `username` to the UID of the matching account.
    async fn resolve_username(
        &self,
        object_class: &str,
        username: &str,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid>;
}

/// Capability for reading a single object by UID.
///
/// Provided by the runtime on top of [`SearchOp`] when the connector does not
/// publish its own implementation.
#[async_trait]
pub trait GetOp: Send + Sync {
    /// Read one object. Returns `None` if it does not exist.
    async fn get_object(
        &self,
        object_class: &str,
        uid: &Uid,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<ConnectorObject>>;
}

/// Capability for running a script inside the connector process.
#[async_trait]
pub trait ScriptOnConnectorOp: Send + Sync {
    /// Run the script and return its result.
    async fn run_script_on_connector(
        &self,
        script: ScriptContext,
        options: &OperationOptions,
    ) -> ConnectorResult<serde_json::Value>;
}

/// Capability for running a script on the target resource.
#[async_trait]
pub trait ScriptOnResourceOp: Send + Sync {
    /// Run the script on the resource and return its result.
    async fn run_script_on_resource(
        &self,
        script: ScriptContext,
        options: &OperationOptions,
    ) -> ConnectorResult<serde_json::Value>;
}

/// Capability for testing the connection to the target system.
#[async_trait]
pub trait TestOp: Send + Sync {
    /// Test the connection.
    ///
    /// Returns `Ok(())` if the connection is successful, or an error describing
    /// what went wrong.
    async fn test(&self) -> ConnectorResult<()>;
}

/// Capability for validating the configuration.
///
/// Always provided by the runtime.
#[async_trait]
pub trait ValidateOp: Send + Sync {
    /// Validate the configuration the facade was built from.
    async fn validate(&self) -> ConnectorResult<()>;
}

macro_rules! capability {
    ($($op:ident => $variant:ident),* $(,)?) => {
        $(
            impl Capability for dyn $op {
                const OPERATION: ApiOperation = ApiOperation::$variant;
            }

            impl<C: $op + 'static> Implements<dyn $op> for C {
                fn upcast(self: Arc<Self>) -> Arc<dyn $op> {
                    self
                }
            }
        )*
    };
}

capability! {
    SchemaOp => Schema,
    CreateOp => Create,
    UpdateOp => Update,
    DeleteOp => Delete,
    SearchOp => Search,
    SyncOp => Sync,
    AuthenticateOp => Authenticate,
    ResolveUsernameOp => ResolveUsername,
    GetOp => Get,
    ScriptOnConnectorOp => ScriptOnConnector,
    ScriptOnResourceOp => ScriptOnResource,
    TestOp => Test,
    ValidateOp => Validate,
}

/// Capability table published by a connector instance.
///
/// Maps each capability to its implementation as an `Arc<dyn Op>`.
#[derive(Default)]
pub struct OperationSet {
    entries: HashMap<ApiOperation, Box<dyn Any + Send + Sync>>,
}

impl OperationSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `implementation` as capability `T`.
    pub fn register<T: ?Sized + Capability>(
        &mut self,
        _token: CapabilityToken<T>,
        implementation: Arc<T>,
    ) {
        self.entries.insert(T::OPERATION, Box::new(implementation));
    }

    /// Register a shared implementation as capability `T` using builder pattern.
    #[must_use]
    pub fn with<T, U>(mut self, implementation: &Arc<U>) -> Self
    where
        T: ?Sized + Capability,
        U: Implements<T>,
    {
        self.register(CapabilityToken::<T>::new(), Arc::clone(implementation).upcast());
        self
    }

    /// Look up the implementation of capability `T`.
    #[must_use]
    pub fn get<T: ?Sized + Capability>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&T::OPERATION)
            .and_then(|entry| entry.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Check whether an operation is published.
    #[must_use]
    pub fn contains(&self, operation: ApiOperation) -> bool {
        self.entries.contains_key(&operation)
    }

    /// Published operations, sorted.
    #[must_use]
    pub fn operations(&self) -> Vec<ApiOperation> {
        let mut ops: Vec<ApiOperation> = self.entries.keys().copied().collect();
        ops.sort_unstable();
        ops
    }

    /// Number of published operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for OperationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.operations()).finish()
    }
}

/// Base trait for all connectors.
///
/// A connector instance holds the connection to one target system. The
/// runtime creates instances through a [`ConnectorFactory`], optionally pools
/// them, and disposes each instance exactly once.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Get the display name for this connector instance.
    fn display_name(&self) -> &str;

    /// Lightweight liveness check before a pooled instance is reused.
    ///
    /// Instances failing the check are disposed and replaced.
    async fn check_alive(&self) -> ConnectorResult<()> {
        Ok(())
    }

    /// Dispose of connector resources.
    ///
    /// Implementations should close connections, release handles, etc.
    async fn dispose(&self) -> ConnectorResult<()>;

    /// Publish the capabilities this instance implements.
    fn operations(self: Arc<Self>) -> OperationSet;
}

/// Creates connector instances from configuration properties.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    /// Create and initialize a new connector instance.
    async fn create(
        &self,
        properties: &ConfigurationProperties,
    ) -> ConnectorResult<Arc<dyn Connector>>;
}

#[async_trait]
impl<F, Fut> ConnectorFactory for F
where
    F: Fn(ConfigurationProperties) -> Fut + Send + Sync,
    Fut: Future<Output = ConnectorResult<Arc<dyn Connector>>> + Send + 'static,
{
    async fn create(
        &self,
        properties: &ConfigurationProperties,
    ) -> ConnectorResult<Arc<dyn Connector>> {
        self(properties.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;
    use std::sync::atomic::{AtomicBool, Ordering};

    // Mock connector for testing
    struct MockConnector {
        name: String,
        healthy: AtomicBool,
    }

    impl MockConnector {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                healthy: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        fn display_name(&self) -> &str {
            &self.name
        }

        async fn check_alive(&self) -> ConnectorResult<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ConnectorError::connection_failed("not healthy"))
            }
        }

        async fn dispose(&self) -> ConnectorResult<()> {
            Ok(())
        }

        fn operations(self: Arc<Self>) -> OperationSet {
            OperationSet::new()
                .with::<dyn CreateOp, _>(&self)
                .with::<dyn TestOp, _>(&self)
        }
    }

    #[async_trait]
    impl CreateOp for MockConnector {
        async fn create(
            &self,
            _object_class: &str,
            attributes: AttributeSet,
            _options: &OperationOptions,
        ) -> ConnectorResult<Uid> {
            let name = attributes.get_string("name").unwrap_or("anonymous");
            Ok(Uid::from_value(name))
        }
    }

    #[async_trait]
    impl TestOp for MockConnector {
        async fn test(&self) -> ConnectorResult<()> {
            self.check_alive().await
        }
    }

    #[tokio::test]
    async fn test_operation_set_resolves_published_capabilities() {
        let connector = Arc::new(MockConnector::new("mock"));
        let ops = Arc::clone(&connector).operations();

        assert_eq!(ops.operations(), vec![ApiOperation::Create, ApiOperation::Test]);
        assert!(ops.get::<dyn SearchOp>().is_none());

        let create = ops.get::<dyn CreateOp>().unwrap();
        let uid = create
            .create(
                "user",
                AttributeSet::new().with("name", "jdoe"),
                &OperationOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(uid.value(), "jdoe");
    }

    #[tokio::test]
    async fn test_unhealthy_connector() {
        let connector = Arc::new(MockConnector::new("mock"));
        connector.healthy.store(false, Ordering::SeqCst);
        let test = Arc::clone(&connector).operations().get::<dyn TestOp>().unwrap();
        assert!(test.test().await.is_err());
    }

    #[tokio::test]
    async fn test_closure_factory() {
        let factory = |_props: ConfigurationProperties| async {
            Ok::<_, ConnectorError>(Arc::new(MockConnector::new("from-closure")) as Arc<dyn Connector>)
        };
        let connector = factory
            .create(&ConfigurationProperties::new())
            .await
            .unwrap();
        assert_eq!(connector.display_name(), "from-closure");
    }

    #[test]
    fn test_closures_are_results_handlers() {
        let mut seen = Vec::new();
        let mut handler = |object: ConnectorObject| {
            seen.push(object.uid.value().to_string());
            seen.len() < 2
        };
        let handler: &mut dyn ResultsHandler = &mut handler;
        assert!(handler.handle(ConnectorObject::new("user", Uid::from_value("a"))));
        assert!(!handler.handle(ConnectorObject::new("user", Uid::from_value("b"))));
        assert_eq!(seen, vec!["a", "b"]);
    }
}
