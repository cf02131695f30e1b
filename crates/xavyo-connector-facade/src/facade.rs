//! Connector facade
//!
//! A [`ConnectorFacade`] is the caller-facing object for one configuration.
//! It owns a clone of the [`ApiConfiguration`] it was built from and one
//! resolved handler chain per supported capability:
//!
//! ```text
//! proxy -> LoggingHandler? -> TimeoutHandler? -> ConnectorDispatcher
//! ```
//!
//! Chains are fixed at construction. Typed methods reject unsupported
//! capabilities before anything is dispatched.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::capability::{Capability, CapabilityToken, Implements};
use crate::config::ApiConfiguration;
use crate::dispatch::ConnectorDispatcher;
use crate::error::{ConnectorError, ConnectorResult};
use crate::ids::{ConnectorKey, FacadeId, Fingerprint};
use crate::logging::{logging_proxy_enabled, LoggingHandler};
use crate::operation::{
    AttributeSet, ConnectorObject, Filter, GuardedString, OperationOptions, ScriptContext,
    SearchResult, SyncDelta, SyncToken, Uid,
};
use crate::pool::PoolStats;
use crate::proxy::{create_proxy, CapabilityProxy, InvocationHandler};
use crate::registry::{ConnectorInfo, ConnectorInfoRegistry};
use crate::schema::Schema;
use crate::timeout::TimeoutHandler;
use crate::traits::{
    AuthenticateOp, CreateOp, DeleteOp, GetOp, OperationSet, ResolveUsernameOp, ResultsHandler,
    SchemaOp, ScriptOnConnectorOp, ScriptOnResourceOp, SearchOp, SyncOp, SyncResultsHandler,
    TestOp, UpdateOp, ValidateOp,
};
use crate::types::ApiOperation;

/// Forwards search results until the caller's handler first declines one.
struct SearchStopGuard<'a> {
    inner: &'a mut dyn ResultsHandler,
    stopped: bool,
}

impl ResultsHandler for SearchStopGuard<'_> {
    fn handle(&mut self, object: ConnectorObject) -> bool {
        if self.stopped {
            return false;
        }
        self.stopped = !self.inner.handle(object);
        !self.stopped
    }
}

/// Like [`SearchStopGuard`], also remembering the last delivered token.
struct SyncStopGuard<'a> {
    inner: &'a mut dyn SyncResultsHandler,
    stopped: bool,
    last_token: Option<SyncToken>,
}

impl SyncResultsHandler for SyncStopGuard<'_> {
    fn handle(&mut self, delta: SyncDelta) -> bool {
        if self.stopped {
            return false;
        }
        self.last_token = Some(delta.token.clone());
        self.stopped = !self.inner.handle(delta);
        !self.stopped
    }
}

fn register<T>(operations: &mut OperationSet, handler: Arc<dyn InvocationHandler>)
where
    T: ?Sized + Capability,
    CapabilityProxy<T>: Implements<T>,
{
    let token = CapabilityToken::<T>::new();
    operations.register(token, create_proxy(token, handler));
}

fn register_operation(
    operations: &mut OperationSet,
    operation: ApiOperation,
    handler: Arc<dyn InvocationHandler>,
) {
    match operation {
        ApiOperation::Schema => register::<dyn SchemaOp>(operations, handler),
        ApiOperation::Create => register::<dyn CreateOp>(operations, handler),
        ApiOperation::Update => register::<dyn UpdateOp>(operations, handler),
        ApiOperation::Delete => register::<dyn DeleteOp>(operations, handler),
        ApiOperation::Search => register::<dyn SearchOp>(operations, handler),
        ApiOperation::Sync => register::<dyn SyncOp>(operations, handler),
        ApiOperation::Authenticate => register::<dyn AuthenticateOp>(operations, handler),
        ApiOperation::ResolveUsername => register::<dyn ResolveUsernameOp>(operations, handler),
        ApiOperation::Get => register::<dyn GetOp>(operations, handler),
        ApiOperation::ScriptOnConnector => {
            register::<dyn ScriptOnConnectorOp>(operations, handler);
        }
        ApiOperation::ScriptOnResource => {
            register::<dyn ScriptOnResourceOp>(operations, handler);
        }
        ApiOperation::Test => register::<dyn TestOp>(operations, handler),
        ApiOperation::Validate => register::<dyn ValidateOp>(operations, handler),
    }
}

/// Caller-facing entry point to one configured connector.
pub struct ConnectorFacade {
    id: FacadeId,
    created_at: DateTime<Utc>,
    info: Arc<ConnectorInfo>,
    configuration: ApiConfiguration,
    fingerprint: Fingerprint,
    operations: OperationSet,
    dispatcher: Arc<ConnectorDispatcher>,
}

impl ConnectorFacade {
    /// Build a facade for `configuration`.
    ///
    /// The configuration is validated and cloned; later changes to the
    /// caller's copy do not affect the facade. Every supported operation must
    /// be implemented by the connector.
    pub fn new(info: Arc<ConnectorInfo>, configuration: &ApiConfiguration) -> ConnectorResult<Self> {
        configuration.validate()?;
        if configuration.connector_key != *info.key() {
            return Err(ConnectorError::invalid_configuration(format!(
                "configuration targets connector '{}' but was given '{}'",
                configuration.connector_key,
                info.key()
            )));
        }
        if let Some(missing) = configuration
            .supported_operations
            .iter()
            .find(|op| !info.implements(**op))
        {
            return Err(ConnectorError::invalid_configuration(format!(
                "operation '{missing}' is not implemented by connector '{}'",
                info.key()
            )));
        }

        let configuration = configuration.clone();
        let fingerprint = configuration.fingerprint()?;
        let id = FacadeId::new();
        let shared = Arc::new(configuration.clone());
        let dispatcher = Arc::new(ConnectorDispatcher::new(id, &info, shared));
        let logging = logging_proxy_enabled();

        let mut operations = OperationSet::new();
        for &operation in &configuration.supported_operations {
            let mut handler: Arc<dyn InvocationHandler> = dispatcher.clone();
            if let Some(timeout) = configuration.timeout(operation) {
                if operation.is_streaming() {
                    debug!(
                        facade_id = %id,
                        operation = %operation,
                        "Timeout applies to single-result methods only, not streamed results"
                    );
                }
                handler = Arc::new(TimeoutHandler::new(handler, timeout));
            }
            if logging {
                handler = Arc::new(LoggingHandler::new(handler, id, info.key().to_string()));
            }
            register_operation(&mut operations, operation, handler);
        }

        info!(
            facade_id = %id,
            connector = %info.key(),
            fingerprint = fingerprint.short(),
            operations = operations.len(),
            pooled = dispatcher.pool().is_some(),
            logging,
            "Connector facade created"
        );

        Ok(Self {
            id,
            created_at: Utc::now(),
            info,
            configuration,
            fingerprint,
            operations,
            dispatcher,
        })
    }

    /// Unique id of this facade.
    #[must_use]
    pub fn id(&self) -> FacadeId {
        self.id
    }

    /// When the facade was built.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Key of the connector behind this facade.
    #[must_use]
    pub fn connector_key(&self) -> &ConnectorKey {
        self.info.key()
    }

    /// Static metadata of the connector.
    #[must_use]
    pub fn connector_info(&self) -> &Arc<ConnectorInfo> {
        &self.info
    }

    /// The facade's own copy of its configuration.
    #[must_use]
    pub fn configuration(&self) -> &ApiConfiguration {
        &self.configuration
    }

    /// Fingerprint of the configuration.
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Capabilities callers may invoke.
    #[must_use]
    pub fn supported_operations(&self) -> &BTreeSet<ApiOperation> {
        &self.configuration.supported_operations
    }

    /// Resolved handler chain for a capability, if supported.
    #[must_use]
    pub fn get_operation<T: ?Sized + Capability>(&self, _token: CapabilityToken<T>) -> Option<Arc<T>> {
        self.operations.get::<T>()
    }

    /// Pool statistics, when instances are pooled.
    #[must_use]
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.dispatcher.pool().map(|pool| pool.stats())
    }

    /// Check whether the facade has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.dispatcher.is_disposed()
    }

    /// Dispose the facade.
    ///
    /// Later calls fail with [`ConnectorError::FacadeDisposed`]. Idle pooled
    /// instances are disposed now; borrowed ones when their call returns.
    /// Returns `false` if the facade was already disposed.
    pub async fn dispose(&self) -> bool {
        let disposed = self.dispatcher.dispose().await;
        if disposed {
            info!(
                facade_id = %self.id,
                connector = %self.info.key(),
                "Connector facade disposed"
            );
        }
        disposed
    }

    fn operation<T: ?Sized + Capability>(&self) -> ConnectorResult<Arc<T>> {
        self.operations.get::<T>().ok_or_else(|| {
            debug!(
                facade_id = %self.id,
                operation = %T::OPERATION,
                "Rejected unsupported operation"
            );
            ConnectorError::UnsupportedOperation {
                operation: T::OPERATION,
            }
        })
    }

    /// Retrieve the target system's schema.
    pub async fn schema(&self) -> ConnectorResult<Schema> {
        self.operation::<dyn SchemaOp>()?.schema().await
    }

    /// Create an object.
    pub async fn create(
        &self,
        object_class: &str,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        self.operation::<dyn CreateOp>()?
            .create(object_class, attributes, options)
            .await
    }

    /// Replace attribute values.
    pub async fn update(
        &self,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        self.operation::<dyn UpdateOp>()?
            .update(object_class, uid, attributes, options)
            .await
    }

    /// Add values to multi-valued attributes.
    pub async fn add_attribute_values(
        &self,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        self.operation::<dyn UpdateOp>()?
            .add_attribute_values(object_class, uid, attributes, options)
            .await
    }

    /// Remove values from multi-valued attributes.
    pub async fn remove_attribute_values(
        &self,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        self.operation::<dyn UpdateOp>()?
            .remove_attribute_values(object_class, uid, attributes, options)
            .await
    }

    /// Delete an object.
    pub async fn delete(
        &self,
        object_class: &str,
        uid: &Uid,
        options: &OperationOptions,
    ) -> ConnectorResult<()> {
        self.operation::<dyn DeleteOp>()?
            .delete(object_class, uid, options)
            .await
    }

    /// Search, streaming matches to `handler`.
    ///
    /// Once `handler` returns `false` it receives nothing more, even if the
    /// connector keeps producing.
    pub async fn search(
        &self,
        object_class: &str,
        filter: Option<&Filter>,
        handler: &mut dyn ResultsHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<SearchResult> {
        let op = self.operation::<dyn SearchOp>()?;
        let mut guard = SearchStopGuard {
            inner: handler,
            stopped: false,
        };
        op.search(object_class, filter, &mut guard, options).await
    }

    /// Stream changes since `token` to `handler`.
    ///
    /// Returns the token to resume from: the connector's final token, or the
    /// token of the last delivered delta when the handler stopped early or the
    /// connector reported none.
    pub async fn sync(
        &self,
        object_class: &str,
        token: Option<&SyncToken>,
        handler: &mut dyn SyncResultsHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<SyncToken>> {
        let op = self.operation::<dyn SyncOp>()?;
        let mut guard = SyncStopGuard {
            inner: handler,
            stopped: false,
            last_token: None,
        };
        let final_token = op.sync(object_class, token, &mut guard, options).await?;
        if guard.stopped {
            Ok(guard.last_token)
        } else {
            Ok(final_token.or(guard.last_token))
        }
    }

    /// Latest sync token of the target system.
    pub async fn get_latest_sync_token(&self, object_class: &str) -> ConnectorResult<Option<SyncToken>> {
        self.operation::<dyn SyncOp>()?
            .get_latest_sync_token(object_class)
            .await
    }

    /// Authenticate an account.
    pub async fn authenticate(
        &self,
        object_class: &str,
        username: &str,
        password: &GuardedString,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        self.operation::<dyn AuthenticateOp>()?
            .authenticate(object_class, username, password, options)
            .await
    }

    /// Resolve a username to a UID.
    pub async fn resolve_username(
        &self,
        object_class: &str,
        username: &str,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        self.operation::<dyn ResolveUsernameOp>()?
            .resolve_username(object_class, username, options)
            .await
    }

    /// Fetch one object by UID.
    pub async fn get_object(
        &self,
        object_class: &str,
        uid: &Uid,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<ConnectorObject>> {
        self.operation::<dyn GetOp>()?
            .get_object(object_class, uid, options)
            .await
    }

    /// Run a script inside the connector.
    pub async fn run_script_on_connector(
        &self,
        script: ScriptContext,
        options: &OperationOptions,
    ) -> ConnectorResult<Value> {
        self.operation::<dyn ScriptOnConnectorOp>()?
            .run_script_on_connector(script, options)
            .await
    }

    /// Run a script on the target system.
    pub async fn run_script_on_resource(
        &self,
        script: ScriptContext,
        options: &OperationOptions,
    ) -> ConnectorResult<Value> {
        self.operation::<dyn ScriptOnResourceOp>()?
            .run_script_on_resource(script, options)
            .await
    }

    /// Test connectivity to the target system.
    pub async fn test(&self) -> ConnectorResult<()> {
        self.operation::<dyn TestOp>()?.test().await
    }

    /// Validate the facade's configuration.
    pub async fn validate(&self) -> ConnectorResult<()> {
        self.operation::<dyn ValidateOp>()?.validate().await
    }
}

impl fmt::Debug for ConnectorFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorFacade")
            .field("id", &self.id)
            .field("connector", &self.info.key().to_string())
            .field("fingerprint", &self.fingerprint.short())
            .field("operations", &self.operations.operations())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Builds facades from configurations using a connector registry.
#[derive(Debug, Clone)]
pub struct FacadeFactory {
    registry: Arc<ConnectorInfoRegistry>,
}

impl FacadeFactory {
    /// Create a factory resolving connectors in `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectorInfoRegistry>) -> Self {
        Self { registry }
    }

    /// Registry used to resolve connector keys.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectorInfoRegistry> {
        &self.registry
    }

    /// Build a new, uncached facade.
    pub fn new_instance(&self, configuration: &ApiConfiguration) -> ConnectorResult<ConnectorFacade> {
        let info = self.registry.get(&configuration.connector_key)?;
        ConnectorFacade::new(info, configuration)
    }
}
