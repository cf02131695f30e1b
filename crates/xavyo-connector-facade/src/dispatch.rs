//! Terminal invocation handler
//!
//! [`ConnectorDispatcher`] sits at the end of every facade's handler chain.
//! For each invocation it leases a connector instance (from the pool, or a
//! fresh one per call when pooling is off), resolves the capability from the
//! instance's [`OperationSet`](crate::traits::OperationSet), and runs it.
//!
//! `Validate` checks the configuration first and consults the connector's
//! own [`ValidateOp`] only when its metadata declares one. `Get` falls back
//! to a UID search when the connector does not publish its own [`GetOp`].

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::capability::Capability;
use crate::config::{ApiConfiguration, ConfigurationProperties};
use crate::error::{ConnectorError, ConnectorResult};
use crate::ids::FacadeId;
use crate::operation::{ConnectorObject, Filter, OperationOptions, Uid};
use crate::pool::{ConnectorInstance, ConnectorPool, PooledConnector};
use crate::proxy::{
    CallArgs, Invocation, InvocationArgs, InvocationHandler, InvocationOutput, MethodDescriptor,
    StreamArgs, UpdateMode,
};
use crate::registry::ConnectorInfo;
use crate::traits::{
    AuthenticateOp, ConnectorFactory, CreateOp, DeleteOp, GetOp, ResolveUsernameOp, SchemaOp,
    ScriptOnConnectorOp, ScriptOnResourceOp, SearchOp, SyncOp, TestOp, UpdateOp, ValidateOp,
};
use crate::types::ApiOperation;

enum ConnectorSource {
    Pooled(Arc<ConnectorPool>),
    Transient {
        factory: Arc<dyn ConnectorFactory>,
        properties: ConfigurationProperties,
    },
}

/// Instance created for a single call, disposed when the call ends.
struct TransientLease {
    instance: Option<ConnectorInstance>,
}

impl TransientLease {
    async fn release(mut self) {
        if let Some(instance) = self.instance.take() {
            instance.dispose().await;
        }
    }
}

impl Drop for TransientLease {
    fn drop(&mut self) {
        // Reached only when the call was abandoned before `release`.
        if let Some(instance) = self.instance.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(instance.dispose());
            }
        }
    }
}

enum Lease {
    Pooled(PooledConnector),
    Transient(TransientLease),
}

impl Lease {
    fn instance(&self) -> ConnectorResult<&ConnectorInstance> {
        match self {
            Lease::Pooled(pooled) => Ok(pooled),
            Lease::Transient(lease) => lease
                .instance
                .as_ref()
                .ok_or_else(|| ConnectorError::internal("connector lease already released")),
        }
    }

    async fn release(self) {
        match self {
            Lease::Pooled(pooled) => drop(pooled),
            Lease::Transient(lease) => lease.release().await,
        }
    }
}

fn require<T: ?Sized + Capability>(instance: &ConnectorInstance) -> ConnectorResult<Arc<T>> {
    instance
        .get::<T>()
        .ok_or(ConnectorError::UnsupportedOperation {
            operation: T::OPERATION,
        })
}

async fn get_via_search(
    search: Arc<dyn SearchOp>,
    object_class: &str,
    uid: &Uid,
    options: &OperationOptions,
) -> ConnectorResult<Option<ConnectorObject>> {
    let filter = Filter::uid(uid);
    let mut found = None;
    let mut first = |object: ConnectorObject| {
        if found.is_none() {
            found = Some(object);
        }
        false
    };
    search
        .search(object_class, Some(&filter), &mut first, options)
        .await?;
    Ok(found)
}

/// Handler running invocations against real connector instances.
pub struct ConnectorDispatcher {
    facade_id: FacadeId,
    connector: String,
    configuration: Arc<ApiConfiguration>,
    source: ConnectorSource,
    connector_validates: bool,
    disposed: AtomicBool,
}

impl ConnectorDispatcher {
    /// Create a dispatcher for one facade.
    ///
    /// Instances are pooled when the configuration enables pooling and the
    /// connector is poolable.
    pub fn new(facade_id: FacadeId, info: &ConnectorInfo, configuration: Arc<ApiConfiguration>) -> Self {
        let connector = info.key().to_string();
        let source = if configuration.connector_pooling_supported && info.is_poolable() {
            ConnectorSource::Pooled(Arc::new(ConnectorPool::new(
                connector.clone(),
                info.factory(),
                configuration.properties.clone(),
                configuration.pool.clone(),
            )))
        } else {
            ConnectorSource::Transient {
                factory: info.factory(),
                properties: configuration.properties.clone(),
            }
        };
        Self {
            facade_id,
            connector,
            configuration,
            source,
            connector_validates: info.provides_itself(ApiOperation::Validate),
            disposed: AtomicBool::new(false),
        }
    }

    /// Pool backing this dispatcher, if pooling is on.
    #[must_use]
    pub fn pool(&self) -> Option<&Arc<ConnectorPool>> {
        match &self.source {
            ConnectorSource::Pooled(pool) => Some(pool),
            ConnectorSource::Transient { .. } => None,
        }
    }

    /// Check whether the dispatcher has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stop accepting invocations and close the pool.
    ///
    /// Returns `false` if the dispatcher was already disposed.
    pub async fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let ConnectorSource::Pooled(pool) = &self.source {
            pool.close().await;
        }
        true
    }

    fn disposed_error(&self) -> ConnectorError {
        ConnectorError::FacadeDisposed {
            facade_id: self.facade_id,
        }
    }

    async fn lease(&self) -> ConnectorResult<Lease> {
        match &self.source {
            ConnectorSource::Pooled(pool) => match pool.borrow().await {
                Ok(pooled) => Ok(Lease::Pooled(pooled)),
                Err(_) if self.is_disposed() => Err(self.disposed_error()),
                Err(e) => Err(e),
            },
            ConnectorSource::Transient {
                factory,
                properties,
            } => {
                let instance = ConnectorInstance::create(factory.as_ref(), properties).await?;
                Ok(Lease::Transient(TransientLease {
                    instance: Some(instance),
                }))
            }
        }
    }

    async fn call(
        &self,
        instance: &ConnectorInstance,
        method: MethodDescriptor,
        args: CallArgs,
    ) -> ConnectorResult<InvocationOutput> {
        let output = match args {
            CallArgs::Schema => InvocationOutput::Schema(require::<dyn SchemaOp>(instance)?.schema().await?),
            CallArgs::Create {
                object_class,
                attributes,
                options,
            } => InvocationOutput::Uid(
                require::<dyn CreateOp>(instance)?
                    .create(&object_class, attributes, &options)
                    .await?,
            ),
            CallArgs::Update {
                mode,
                object_class,
                uid,
                attributes,
                options,
            } => {
                let op = require::<dyn UpdateOp>(instance)?;
                let uid = match mode {
                    UpdateMode::Replace => op.update(&object_class, &uid, attributes, &options).await?,
                    UpdateMode::AddValues => {
                        op.add_attribute_values(&object_class, &uid, attributes, &options)
                            .await?
                    }
                    UpdateMode::RemoveValues => {
                        op.remove_attribute_values(&object_class, &uid, attributes, &options)
                            .await?
                    }
                };
                InvocationOutput::Uid(uid)
            }
            CallArgs::Delete {
                object_class,
                uid,
                options,
            } => {
                require::<dyn DeleteOp>(instance)?
                    .delete(&object_class, &uid, &options)
                    .await?;
                InvocationOutput::Unit
            }
            CallArgs::Authenticate {
                object_class,
                username,
                password,
                options,
            } => InvocationOutput::Uid(
                require::<dyn AuthenticateOp>(instance)?
                    .authenticate(&object_class, &username, &password, &options)
                    .await?,
            ),
            CallArgs::ResolveUsername {
                object_class,
                username,
                options,
            } => InvocationOutput::Uid(
                require::<dyn ResolveUsernameOp>(instance)?
                    .resolve_username(&object_class, &username, &options)
                    .await?,
            ),
            CallArgs::Get {
                object_class,
                uid,
                options,
            } => {
                let object = match instance.get::<dyn GetOp>() {
                    Some(op) => op.get_object(&object_class, &uid, &options).await?,
                    None => {
                        let search = require::<dyn SearchOp>(instance).map_err(|_| {
                            ConnectorError::UnsupportedOperation {
                                operation: ApiOperation::Get,
                            }
                        })?;
                        get_via_search(search, &object_class, &uid, &options).await?
                    }
                };
                InvocationOutput::Object(object)
            }
            CallArgs::GetLatestSyncToken { object_class } => InvocationOutput::SyncToken(
                require::<dyn SyncOp>(instance)?
                    .get_latest_sync_token(&object_class)
                    .await?,
            ),
            CallArgs::RunScriptOnConnector { script, options } => InvocationOutput::Value(
                require::<dyn ScriptOnConnectorOp>(instance)?
                    .run_script_on_connector(script, &options)
                    .await?,
            ),
            CallArgs::RunScriptOnResource { script, options } => InvocationOutput::Value(
                require::<dyn ScriptOnResourceOp>(instance)?
                    .run_script_on_resource(script, &options)
                    .await?,
            ),
            CallArgs::Test => {
                require::<dyn TestOp>(instance)?.test().await?;
                InvocationOutput::Unit
            }
            CallArgs::Validate => {
                require::<dyn ValidateOp>(instance)?.validate().await?;
                InvocationOutput::Unit
            }
        };
        debug!(facade_id = %self.facade_id, method = %method, "Dispatched invocation");
        Ok(output)
    }

    async fn stream(
        &self,
        instance: &ConnectorInstance,
        method: MethodDescriptor,
        args: StreamArgs<'_>,
    ) -> ConnectorResult<InvocationOutput> {
        let output = match args {
            StreamArgs::Search {
                object_class,
                filter,
                handler,
                options,
            } => InvocationOutput::SearchResult(
                require::<dyn SearchOp>(instance)?
                    .search(&object_class, filter.as_ref(), handler, &options)
                    .await?,
            ),
            StreamArgs::Sync {
                object_class,
                token,
                handler,
                options,
            } => InvocationOutput::SyncToken(
                require::<dyn SyncOp>(instance)?
                    .sync(&object_class, token.as_ref(), handler, &options)
                    .await?,
            ),
        };
        debug!(facade_id = %self.facade_id, method = %method, "Dispatched streaming invocation");
        Ok(output)
    }
}

#[async_trait]
impl InvocationHandler for ConnectorDispatcher {
    async fn invoke(&self, invocation: Invocation<'_>) -> ConnectorResult<InvocationOutput> {
        if self.is_disposed() {
            return Err(self.disposed_error());
        }

        let method = invocation.method;
        if let InvocationArgs::Call(CallArgs::Validate) = invocation.args {
            self.configuration.validate()?;
            if !self.connector_validates {
                return Ok(InvocationOutput::Unit);
            }
        }

        let lease = self.lease().await?;
        let result = match lease.instance() {
            Ok(instance) => match invocation.args {
                InvocationArgs::Call(args) => self.call(instance, method, args).await,
                InvocationArgs::Stream(args) => self.stream(instance, method, args).await,
            },
            Err(e) => Err(e),
        };
        lease.release().await;

        if let Err(e) = &result {
            if !e.is_transient() {
                warn!(
                    facade_id = %self.facade_id,
                    connector = %self.connector,
                    method = %method,
                    error = %e,
                    "Connector invocation failed"
                );
            }
        }
        result
    }
}

impl fmt::Debug for ConnectorDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorDispatcher")
            .field("facade_id", &self.facade_id)
            .field("connector", &self.connector)
            .field("pooled", &self.pool().is_some())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityToken;
    use crate::ids::ConnectorKey;
    use crate::operation::{AttributeSet, SearchResult};
    use crate::proxy::create_proxy;
    use crate::traits::{Connector, OperationSet, ResultsHandler};
    use std::sync::atomic::AtomicUsize;

    struct Directory {
        disposed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for Directory {
        fn display_name(&self) -> &str {
            "directory"
        }

        async fn dispose(&self) -> ConnectorResult<()> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn operations(self: Arc<Self>) -> OperationSet {
            OperationSet::new().with::<dyn SearchOp, _>(&self)
        }
    }

    #[async_trait]
    impl SearchOp for Directory {
        async fn search(
            &self,
            object_class: &str,
            filter: Option<&Filter>,
            handler: &mut dyn ResultsHandler,
            _options: &OperationOptions,
        ) -> ConnectorResult<SearchResult> {
            for id in ["alice", "bob", "carol"] {
                let uid = Uid::from_value(id);
                if filter.is_some_and(|f| *f != Filter::uid(&uid)) {
                    continue;
                }
                if !handler.handle(ConnectorObject::new(object_class, uid)) {
                    break;
                }
            }
            Ok(SearchResult::complete())
        }
    }

    fn dispatcher(pooling: bool) -> (Arc<ConnectorDispatcher>, Arc<AtomicUsize>) {
        let disposed = Arc::new(AtomicUsize::new(0));
        let factory_disposed = Arc::clone(&disposed);
        let info = ConnectorInfo::new(
            ConnectorKey::new("xavyo-connector-test", "1.0.0", "Directory"),
            move |_props: ConfigurationProperties| {
                let disposed = Arc::clone(&factory_disposed);
                async move {
                    Ok::<_, ConnectorError>(Arc::new(Directory { disposed }) as Arc<dyn Connector>)
                }
            },
        )
        .with_operations([ApiOperation::Search])
        .poolable(true);
        let configuration = Arc::new(
            info.create_default_api_configuration()
                .with_connector_pooling(pooling),
        );
        (
            Arc::new(ConnectorDispatcher::new(FacadeId::new(), &info, configuration)),
            disposed,
        )
    }

    #[tokio::test]
    async fn test_get_falls_back_to_uid_search() {
        let (dispatcher, _) = dispatcher(true);
        let get: Arc<dyn GetOp> = create_proxy(CapabilityToken::new(), dispatcher);

        let found = get
            .get_object("user", &Uid::from_value("bob"), &OperationOptions::new())
            .await
            .unwrap();
        assert_eq!(found.map(|o| o.uid), Some(Uid::from_value("bob")));

        let missing = get
            .get_object("user", &Uid::from_value("mallory"), &OperationOptions::new())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_unpublished_capability_is_unsupported() {
        let (dispatcher, _) = dispatcher(true);
        let create: Arc<dyn CreateOp> = create_proxy(CapabilityToken::new(), dispatcher);

        let err = create
            .create("user", AttributeSet::new(), &OperationOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectorError::UnsupportedOperation {
                operation: ApiOperation::Create
            }
        ));
    }

    #[tokio::test]
    async fn test_transient_instances_are_disposed_per_call() {
        let (dispatcher, disposed) = dispatcher(false);
        assert!(dispatcher.pool().is_none());
        let get: Arc<dyn GetOp> = create_proxy(CapabilityToken::new(), dispatcher);

        for _ in 0..3 {
            get.get_object("user", &Uid::from_value("alice"), &OperationOptions::new())
                .await
                .unwrap();
        }
        assert_eq!(disposed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validate_does_not_create_instances() {
        let (dispatcher, disposed) = dispatcher(false);
        let validate: Arc<dyn ValidateOp> =
            create_proxy(CapabilityToken::new(), Arc::clone(&dispatcher) as Arc<dyn InvocationHandler>);

        validate.validate().await.unwrap();
        assert_eq!(disposed.load(Ordering::SeqCst), 0);
    }

    struct StrictDirectory;

    #[async_trait]
    impl Connector for StrictDirectory {
        fn display_name(&self) -> &str {
            "strict-directory"
        }

        async fn dispose(&self) -> ConnectorResult<()> {
            Ok(())
        }

        fn operations(self: Arc<Self>) -> OperationSet {
            OperationSet::new().with::<dyn ValidateOp, _>(&self)
        }
    }

    #[async_trait]
    impl ValidateOp for StrictDirectory {
        async fn validate(&self) -> ConnectorResult<()> {
            Err(ConnectorError::invalid_configuration("port out of range"))
        }
    }

    #[tokio::test]
    async fn test_validate_delegates_to_declared_connector_check() {
        let created = Arc::new(AtomicUsize::new(0));
        let factory_created = Arc::clone(&created);
        let info = ConnectorInfo::new(
            ConnectorKey::new("xavyo-connector-test", "1.0.0", "StrictDirectory"),
            move |_props: ConfigurationProperties| {
                factory_created.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok::<_, ConnectorError>(Arc::new(StrictDirectory) as Arc<dyn Connector>)
                }
            },
        )
        .with_operations([ApiOperation::Validate]);
        let configuration = Arc::new(info.create_default_api_configuration());
        let dispatcher = Arc::new(ConnectorDispatcher::new(FacadeId::new(), &info, configuration));
        let validate: Arc<dyn ValidateOp> = create_proxy(CapabilityToken::new(), dispatcher);

        let err = validate.validate().await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
        assert!(err.to_string().contains("port out of range"));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disposed_dispatcher_rejects_calls() {
        let (dispatcher, _) = dispatcher(true);
        let get: Arc<dyn GetOp> =
            create_proxy(CapabilityToken::new(), Arc::clone(&dispatcher) as Arc<dyn InvocationHandler>);

        assert!(dispatcher.dispose().await);
        assert!(!dispatcher.dispose().await);

        let err = get
            .get_object("user", &Uid::from_value("alice"), &OperationOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FACADE_DISPOSED");
    }
}
