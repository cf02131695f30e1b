//! Integration test helpers for xavyo-connector-facade.
//!
//! Provides a spy connector recording every call that reaches it, and
//! helpers to register it and build configurations for it.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use xavyo_connector_facade::prelude::*;

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// State shared by every spy instance built from one factory.
#[derive(Default)]
pub struct SpyState {
    /// Method names in call order.
    pub calls: Mutex<Vec<String>>,
    /// Instances created by the factory.
    pub created: AtomicUsize,
    /// Instances disposed.
    pub disposed: AtomicUsize,
    /// Create calls that ran to completion.
    pub creates_completed: AtomicUsize,
    /// Create calls that saw their cancellation token fired when done.
    pub creates_cancelled: AtomicUsize,
    /// Delay before `create` returns.
    pub create_delay: Mutex<Duration>,
    /// Delay before each search result.
    pub result_delay: Mutex<Duration>,
    /// Delay before `get_latest_sync_token` returns.
    pub sync_delay: Mutex<Duration>,
    /// Objects returned by `search`.
    pub objects: Mutex<Vec<ConnectorObject>>,
    /// Hosts whose instances fail to dispose.
    pub failing_dispose_hosts: Mutex<Vec<String>>,
    /// Error message returned by the connector's own `validate`, if any.
    pub validation_error: Mutex<Option<String>>,
}

impl SpyState {
    pub fn new() -> Arc<Self> {
        let state = Arc::new(Self::default());
        *state.objects.lock() = ["alice", "bob", "carol"]
            .into_iter()
            .map(|name| {
                ConnectorObject::new("user", Uid::from_value(name))
                    .with_attributes(AttributeSet::new().with("cn", name))
            })
            .collect();
        state
    }

    pub fn with_create_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.create_delay.lock() = delay;
        self
    }

    pub fn with_result_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.result_delay.lock() = delay;
        self
    }

    pub fn with_sync_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.sync_delay.lock() = delay;
        self
    }

    pub fn with_failing_dispose(self: Arc<Self>, host: &str) -> Arc<Self> {
        self.failing_dispose_hosts.lock().push(host.to_string());
        self
    }

    pub fn with_validation_error(self: Arc<Self>, message: &str) -> Arc<Self> {
        *self.validation_error.lock() = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, method: &str) {
        self.calls.lock().push(method.to_string());
    }
}

/// Connector implementing create, delete, search, sync, test and validate.
pub struct SpyConnector {
    host: String,
    state: Arc<SpyState>,
}

#[async_trait]
impl Connector for SpyConnector {
    fn display_name(&self) -> &str {
        "spy"
    }

    async fn dispose(&self) -> ConnectorResult<()> {
        self.state.disposed.fetch_add(1, Ordering::SeqCst);
        if self.state.failing_dispose_hosts.lock().contains(&self.host) {
            return Err(ConnectorError::connection_failed(format!(
                "lost connection to {} while closing",
                self.host
            )));
        }
        Ok(())
    }

    fn operations(self: Arc<Self>) -> OperationSet {
        OperationSet::new()
            .with::<dyn CreateOp, _>(&self)
            .with::<dyn DeleteOp, _>(&self)
            .with::<dyn SearchOp, _>(&self)
            .with::<dyn SyncOp, _>(&self)
            .with::<dyn TestOp, _>(&self)
            .with::<dyn ValidateOp, _>(&self)
    }
}

#[async_trait]
impl CreateOp for SpyConnector {
    async fn create(
        &self,
        _object_class: &str,
        attributes: AttributeSet,
        _options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        self.state.record("create");
        let delay = *self.state.create_delay.lock();
        tokio::time::sleep(delay).await;

        if current_cancellation().is_some_and(|token| token.is_cancelled()) {
            self.state.creates_cancelled.fetch_add(1, Ordering::SeqCst);
        }
        self.state.creates_completed.fetch_add(1, Ordering::SeqCst);
        let name = attributes.get_string("cn").unwrap_or("created").to_string();
        Ok(Uid::from_value(name))
    }
}

#[async_trait]
impl DeleteOp for SpyConnector {
    async fn delete(
        &self,
        _object_class: &str,
        _uid: &Uid,
        _options: &OperationOptions,
    ) -> ConnectorResult<()> {
        self.state.record("delete");
        Ok(())
    }
}

#[async_trait]
impl SearchOp for SpyConnector {
    async fn search(
        &self,
        _object_class: &str,
        filter: Option<&Filter>,
        handler: &mut dyn ResultsHandler,
        _options: &OperationOptions,
    ) -> ConnectorResult<SearchResult> {
        self.state.record("search");
        let delay = *self.state.result_delay.lock();
        let objects = self.state.objects.lock().clone();

        for object in objects {
            if filter.is_some_and(|f| *f != Filter::uid(&object.uid)) {
                continue;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !handler.handle(object) {
                break;
            }
        }
        Ok(SearchResult::complete())
    }
}

#[async_trait]
impl SyncOp for SpyConnector {
    async fn sync(
        &self,
        _object_class: &str,
        token: Option<&SyncToken>,
        _handler: &mut dyn SyncResultsHandler,
        _options: &OperationOptions,
    ) -> ConnectorResult<Option<SyncToken>> {
        self.state.record("sync");
        Ok(token.cloned())
    }

    async fn get_latest_sync_token(
        &self,
        _object_class: &str,
    ) -> ConnectorResult<Option<SyncToken>> {
        self.state.record("get_latest_sync_token");
        let delay = *self.state.sync_delay.lock();
        tokio::time::sleep(delay).await;
        Ok(Some(SyncToken::new(42)))
    }
}

#[async_trait]
impl TestOp for SpyConnector {
    async fn test(&self) -> ConnectorResult<()> {
        self.state.record("test");
        Ok(())
    }
}

#[async_trait]
impl ValidateOp for SpyConnector {
    async fn validate(&self) -> ConnectorResult<()> {
        self.state.record("validate");
        match self.state.validation_error.lock().clone() {
            Some(message) => Err(ConnectorError::invalid_configuration(message)),
            None => Ok(()),
        }
    }
}

pub fn spy_key() -> ConnectorKey {
    ConnectorKey::new("xavyo-connector-spy", "1.0.0", "SpyConnector")
}

/// Connector metadata building spies over `state`.
pub fn spy_info(state: &Arc<SpyState>) -> ConnectorInfo {
    let state = Arc::clone(state);
    ConnectorInfo::new(spy_key(), move |props: ConfigurationProperties| {
        let state = Arc::clone(&state);
        let host = props.get_string("host").unwrap_or_default().to_string();
        async move {
            state.created.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ConnectorError>(Arc::new(SpyConnector { host, state }) as Arc<dyn Connector>)
        }
    })
    .with_display_name("Spy Connector")
    .with_operations([
        ApiOperation::Create,
        ApiOperation::Delete,
        ApiOperation::Search,
        ApiOperation::Sync,
        ApiOperation::Test,
    ])
    .with_default_properties(
        ConfigurationProperties::new()
            .with_property(ConfigurationProperty::new("host", PropertyType::String).required())
            .with_property(ConfigurationProperty::new("password", PropertyType::GuardedString)),
    )
    .poolable(true)
}

/// Cache resolving the spy connector.
pub fn spy_cache(state: &Arc<SpyState>) -> Arc<FacadeCache> {
    cache_for(spy_info(state))
}

/// Cache resolving the given connector metadata.
pub fn cache_for(info: ConnectorInfo) -> Arc<FacadeCache> {
    let registry = ConnectorInfoRegistry::new();
    registry.register(info);
    Arc::new(FacadeCache::new(FacadeFactory::new(Arc::new(registry))))
}

/// Configuration for the spy with `host` set and the given operations supported.
pub fn spy_configuration(
    host: &str,
    operations: impl IntoIterator<Item = ApiOperation>,
) -> ApiConfiguration {
    let mut properties = ConfigurationProperties::new()
        .with_property(ConfigurationProperty::new("host", PropertyType::String).required())
        .with_property(ConfigurationProperty::new("password", PropertyType::GuardedString));
    properties
        .set_value("host", host)
        .expect("host property is declared");
    ApiConfiguration::new(spy_key(), properties)
        .with_supported_operations(operations)
        .with_connector_pooling(true)
}

/// Results handler answering from a script, counting invocations.
pub fn scripted(answers: &'static [bool], seen: &Arc<Mutex<Vec<String>>>) -> impl ResultsHandler {
    let seen = Arc::clone(seen);
    move |object: ConnectorObject| {
        let mut seen = seen.lock();
        seen.push(object.uid.value().to_string());
        answers.get(seen.len() - 1).copied().unwrap_or(true)
    }
}
