//! Dynamic dispatch proxy
//!
//! [`create_proxy`] returns an `Arc<dyn Op>` whose every method packs its
//! arguments into an [`Invocation`] and forwards it to an
//! [`InvocationHandler`]. Handlers wrap other handlers, so cross-cutting
//! behavior (logging, timeouts) is added without touching the capability
//! traits.
//!
//! Single-result methods carry owned arguments ([`CallArgs`]) and may be moved
//! to another task. Streaming methods borrow the caller's results handler
//! ([`StreamArgs`]) and always run on the caller's task.
//!
//! Errors returned by a handler reach the caller unchanged.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::capability::{Capability, CapabilityToken, Implements};
use crate::error::{ConnectorError, ConnectorResult};
use crate::operation::{
    AttributeSet, ConnectorObject, Filter, GuardedString, OperationOptions, ScriptContext,
    SearchResult, SyncToken, Uid,
};
use crate::schema::Schema;
use crate::traits::{
    AuthenticateOp, CreateOp, DeleteOp, GetOp, ResolveUsernameOp, ResultsHandler, SchemaOp,
    ScriptOnConnectorOp, ScriptOnResourceOp, SearchOp, SyncOp, SyncResultsHandler, TestOp,
    UpdateOp, ValidateOp,
};
use crate::types::ApiOperation;

/// Identifies the trait method an invocation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Capability the method belongs to.
    pub operation: ApiOperation,
    /// Method name (e.g., "add_attribute_values").
    pub name: &'static str,
}

impl MethodDescriptor {
    /// Create a descriptor.
    #[must_use]
    pub const fn new(operation: ApiOperation, name: &'static str) -> Self {
        Self { operation, name }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.operation, self.name)
    }
}

/// How an update changes attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateMode {
    /// Replace the values.
    Replace,
    /// Add values to multi-valued attributes.
    AddValues,
    /// Remove values from multi-valued attributes.
    RemoveValues,
}

/// Owned arguments of a single-result method.
#[derive(Debug, Clone)]
pub enum CallArgs {
    Schema,
    Create {
        object_class: String,
        attributes: AttributeSet,
        options: OperationOptions,
    },
    Update {
        mode: UpdateMode,
        object_class: String,
        uid: Uid,
        attributes: AttributeSet,
        options: OperationOptions,
    },
    Delete {
        object_class: String,
        uid: Uid,
        options: OperationOptions,
    },
    Authenticate {
        object_class: String,
        username: String,
        password: GuardedString,
        options: OperationOptions,
    },
    ResolveUsername {
        object_class: String,
        username: String,
        options: OperationOptions,
    },
    Get {
        object_class: String,
        uid: Uid,
        options: OperationOptions,
    },
    GetLatestSyncToken {
        object_class: String,
    },
    RunScriptOnConnector {
        script: ScriptContext,
        options: OperationOptions,
    },
    RunScriptOnResource {
        script: ScriptContext,
        options: OperationOptions,
    },
    Test,
    Validate,
}

/// Arguments of a streaming method, borrowing the caller's results handler.
pub enum StreamArgs<'a> {
    Search {
        object_class: String,
        filter: Option<Filter>,
        handler: &'a mut dyn ResultsHandler,
        options: OperationOptions,
    },
    Sync {
        object_class: String,
        token: Option<SyncToken>,
        handler: &'a mut dyn SyncResultsHandler,
        options: OperationOptions,
    },
}

impl fmt::Debug for StreamArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamArgs::Search {
                object_class,
                filter,
                options,
                ..
            } => f
                .debug_struct("Search")
                .field("object_class", object_class)
                .field("filter", filter)
                .field("options", options)
                .finish_non_exhaustive(),
            StreamArgs::Sync {
                object_class,
                token,
                options,
                ..
            } => f
                .debug_struct("Sync")
                .field("object_class", object_class)
                .field("token", token)
                .field("options", options)
                .finish_non_exhaustive(),
        }
    }
}

/// Arguments of an invocation.
#[derive(Debug)]
pub enum InvocationArgs<'a> {
    /// Single-result method.
    Call(CallArgs),
    /// Streaming method.
    Stream(StreamArgs<'a>),
}

/// One method call captured by a proxy.
#[derive(Debug)]
pub struct Invocation<'a> {
    /// Method being called.
    pub method: MethodDescriptor,
    /// Its arguments.
    pub args: InvocationArgs<'a>,
}

impl<'a> Invocation<'a> {
    /// Build a single-result invocation.
    #[must_use]
    pub fn call(method: MethodDescriptor, args: CallArgs) -> Self {
        Self {
            method,
            args: InvocationArgs::Call(args),
        }
    }

    /// Build a streaming invocation.
    #[must_use]
    pub fn stream(method: MethodDescriptor, args: StreamArgs<'a>) -> Self {
        Self {
            method,
            args: InvocationArgs::Stream(args),
        }
    }

    /// Capability the invocation belongs to.
    #[must_use]
    pub fn operation(&self) -> ApiOperation {
        self.method.operation
    }

    /// Check whether the invocation streams results.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self.args, InvocationArgs::Stream(_))
    }
}

/// Result of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutput {
    Schema(Schema),
    Uid(Uid),
    Unit,
    Object(Option<ConnectorObject>),
    SyncToken(Option<SyncToken>),
    SearchResult(SearchResult),
    Value(Value),
}

impl InvocationOutput {
    fn kind(&self) -> &'static str {
        match self {
            InvocationOutput::Schema(_) => "schema",
            InvocationOutput::Uid(_) => "uid",
            InvocationOutput::Unit => "unit",
            InvocationOutput::Object(_) => "object",
            InvocationOutput::SyncToken(_) => "sync_token",
            InvocationOutput::SearchResult(_) => "search_result",
            InvocationOutput::Value(_) => "value",
        }
    }

    fn mismatch(&self, method: MethodDescriptor) -> ConnectorError {
        ConnectorError::internal(format!(
            "invocation handler returned {} output for {method}",
            self.kind()
        ))
    }

    /// Expect a schema.
    pub fn into_schema(self, method: MethodDescriptor) -> ConnectorResult<Schema> {
        match self {
            InvocationOutput::Schema(schema) => Ok(schema),
            other => Err(other.mismatch(method)),
        }
    }

    /// Expect a UID.
    pub fn into_uid(self, method: MethodDescriptor) -> ConnectorResult<Uid> {
        match self {
            InvocationOutput::Uid(uid) => Ok(uid),
            other => Err(other.mismatch(method)),
        }
    }

    /// Expect no value.
    pub fn into_unit(self, method: MethodDescriptor) -> ConnectorResult<()> {
        match self {
            InvocationOutput::Unit => Ok(()),
            other => Err(other.mismatch(method)),
        }
    }

    /// Expect an optional object.
    pub fn into_object(self, method: MethodDescriptor) -> ConnectorResult<Option<ConnectorObject>> {
        match self {
            InvocationOutput::Object(object) => Ok(object),
            other => Err(other.mismatch(method)),
        }
    }

    /// Expect an optional sync token.
    pub fn into_sync_token(self, method: MethodDescriptor) -> ConnectorResult<Option<SyncToken>> {
        match self {
            InvocationOutput::SyncToken(token) => Ok(token),
            other => Err(other.mismatch(method)),
        }
    }

    /// Expect a search completion.
    pub fn into_search_result(self, method: MethodDescriptor) -> ConnectorResult<SearchResult> {
        match self {
            InvocationOutput::SearchResult(result) => Ok(result),
            other => Err(other.mismatch(method)),
        }
    }

    /// Expect a JSON value.
    pub fn into_value(self, method: MethodDescriptor) -> ConnectorResult<Value> {
        match self {
            InvocationOutput::Value(value) => Ok(value),
            other => Err(other.mismatch(method)),
        }
    }
}

/// Receives every invocation made through a proxy.
#[async_trait]
pub trait InvocationHandler: Send + Sync {
    /// Handle one invocation.
    async fn invoke(&self, invocation: Invocation<'_>) -> ConnectorResult<InvocationOutput>;
}

/// Proxy implementing capability `T` by forwarding to an [`InvocationHandler`].
///
/// `Debug`, `Display`, `PartialEq` and `Hash` are answered by the proxy
/// itself: two proxies are equal when they expose the same capability over
/// the same handler instance.
pub struct CapabilityProxy<T: ?Sized + Capability> {
    token: CapabilityToken<T>,
    handler: Arc<dyn InvocationHandler>,
}

impl<T: ?Sized + Capability> CapabilityProxy<T> {
    /// Create a proxy.
    #[must_use]
    pub fn new(token: CapabilityToken<T>, handler: Arc<dyn InvocationHandler>) -> Self {
        Self { token, handler }
    }

    /// Capability this proxy implements.
    #[must_use]
    pub fn token(&self) -> CapabilityToken<T> {
        self.token
    }

    /// Handler invocations are forwarded to.
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn InvocationHandler> {
        &self.handler
    }

    fn handler_addr(&self) -> *const () {
        Arc::as_ptr(&self.handler).cast::<()>()
    }

    async fn call(&self, method: MethodDescriptor, args: CallArgs) -> ConnectorResult<InvocationOutput> {
        self.handler.invoke(Invocation::call(method, args)).await
    }

    async fn stream(
        &self,
        method: MethodDescriptor,
        args: StreamArgs<'_>,
    ) -> ConnectorResult<InvocationOutput> {
        self.handler.invoke(Invocation::stream(method, args)).await
    }
}

impl<T: ?Sized + Capability> fmt::Debug for CapabilityProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityProxy")
            .field("operation", &self.token.operation())
            .field("handler", &self.handler_addr())
            .finish()
    }
}

impl<T: ?Sized + Capability> fmt::Display for CapabilityProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilityProxy({})", self.token)
    }
}

impl<T: ?Sized + Capability> PartialEq for CapabilityProxy<T> {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token && std::ptr::eq(self.handler_addr(), other.handler_addr())
    }
}

impl<T: ?Sized + Capability> Eq for CapabilityProxy<T> {}

impl<T: ?Sized + Capability> Hash for CapabilityProxy<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
        self.handler_addr().hash(state);
    }
}

/// Create a proxy implementing capability `T` over `handler`.
pub fn create_proxy<T>(token: CapabilityToken<T>, handler: Arc<dyn InvocationHandler>) -> Arc<T>
where
    T: ?Sized + Capability,
    CapabilityProxy<T>: Implements<T>,
{
    Arc::new(CapabilityProxy::new(token, handler)).upcast()
}

const SCHEMA: MethodDescriptor = MethodDescriptor::new(ApiOperation::Schema, "schema");
const CREATE: MethodDescriptor = MethodDescriptor::new(ApiOperation::Create, "create");
const UPDATE: MethodDescriptor = MethodDescriptor::new(ApiOperation::Update, "update");
const ADD_ATTRIBUTE_VALUES: MethodDescriptor =
    MethodDescriptor::new(ApiOperation::Update, "add_attribute_values");
const REMOVE_ATTRIBUTE_VALUES: MethodDescriptor =
    MethodDescriptor::new(ApiOperation::Update, "remove_attribute_values");
const DELETE: MethodDescriptor = MethodDescriptor::new(ApiOperation::Delete, "delete");
const SEARCH: MethodDescriptor = MethodDescriptor::new(ApiOperation::Search, "search");
const SYNC: MethodDescriptor = MethodDescriptor::new(ApiOperation::Sync, "sync");
const GET_LATEST_SYNC_TOKEN: MethodDescriptor =
    MethodDescriptor::new(ApiOperation::Sync, "get_latest_sync_token");
const AUTHENTICATE: MethodDescriptor =
    MethodDescriptor::new(ApiOperation::Authenticate, "authenticate");
const RESOLVE_USERNAME: MethodDescriptor =
    MethodDescriptor::new(ApiOperation::ResolveUsername, "resolve_username");
const GET_OBJECT: MethodDescriptor = MethodDescriptor::new(ApiOperation::Get, "get_object");
const RUN_SCRIPT_ON_CONNECTOR: MethodDescriptor =
    MethodDescriptor::new(ApiOperation::ScriptOnConnector, "run_script_on_connector");
const RUN_SCRIPT_ON_RESOURCE: MethodDescriptor =
    MethodDescriptor::new(ApiOperation::ScriptOnResource, "run_script_on_resource");
const TEST: MethodDescriptor = MethodDescriptor::new(ApiOperation::Test, "test");
const VALIDATE: MethodDescriptor = MethodDescriptor::new(ApiOperation::Validate, "validate");

#[async_trait]
impl SchemaOp for CapabilityProxy<dyn SchemaOp> {
    async fn schema(&self) -> ConnectorResult<Schema> {
        self.call(SCHEMA, CallArgs::Schema).await?.into_schema(SCHEMA)
    }
}

#[async_trait]
impl CreateOp for CapabilityProxy<dyn CreateOp> {
    async fn create(
        &self,
        object_class: &str,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        let args = CallArgs::Create {
            object_class: object_class.to_string(),
            attributes,
            options: options.clone(),
        };
        self.call(CREATE, args).await?.into_uid(CREATE)
    }
}

impl CapabilityProxy<dyn UpdateOp> {
    async fn update_with(
        &self,
        method: MethodDescriptor,
        mode: UpdateMode,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        let args = CallArgs::Update {
            mode,
            object_class: object_class.to_string(),
            uid: uid.clone(),
            attributes,
            options: options.clone(),
        };
        self.call(method, args).await?.into_uid(method)
    }
}

#[async_trait]
impl UpdateOp for CapabilityProxy<dyn UpdateOp> {
    async fn update(
        &self,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        self.update_with(UPDATE, UpdateMode::Replace, object_class, uid, attributes, options)
            .await
    }

    async fn add_attribute_values(
        &self,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        self.update_with(
            ADD_ATTRIBUTE_VALUES,
            UpdateMode::AddValues,
            object_class,
            uid,
            attributes,
            options,
        )
        .await
    }

    async fn remove_attribute_values(
        &self,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        self.update_with(
            REMOVE_ATTRIBUTE_VALUES,
            UpdateMode::RemoveValues,
            object_class,
            uid,
            attributes,
            options,
        )
        .await
    }
}

#[async_trait]
impl DeleteOp for CapabilityProxy<dyn DeleteOp> {
    async fn delete(
        &self,
        object_class: &str,
        uid: &Uid,
        options: &OperationOptions,
    ) -> ConnectorResult<()> {
        let args = CallArgs::Delete {
            object_class: object_class.to_string(),
            uid: uid.clone(),
            options: options.clone(),
        };
        self.call(DELETE, args).await?.into_unit(DELETE)
    }
}

#[async_trait]
impl SearchOp for CapabilityProxy<dyn SearchOp> {
    async fn search(
        &self,
        object_class: &str,
        filter: Option<&Filter>,
        handler: &mut dyn ResultsHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<SearchResult> {
        let args = StreamArgs::Search {
            object_class: object_class.to_string(),
            filter: filter.cloned(),
            handler,
            options: options.clone(),
        };
        self.stream(SEARCH, args).await?.into_search_result(SEARCH)
    }
}

#[async_trait]
impl SyncOp for CapabilityProxy<dyn SyncOp> {
    async fn sync(
        &self,
        object_class: &str,
        token: Option<&SyncToken>,
        handler: &mut dyn SyncResultsHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<SyncToken>> {
        let args = StreamArgs::Sync {
            object_class: object_class.to_string(),
            token: token.cloned(),
            handler,
            options: options.clone(),
        };
        self.stream(SYNC, args).await?.into_sync_token(SYNC)
    }

    async fn get_latest_sync_token(
        &self,
        object_class: &str,
    ) -> ConnectorResult<Option<SyncToken>> {
        let args = CallArgs::GetLatestSyncToken {
            object_class: object_class.to_string(),
        };
        self.call(GET_LATEST_SYNC_TOKEN, args)
            .await?
            .into_sync_token(GET_LATEST_SYNC_TOKEN)
    }
}

#[async_trait]
impl AuthenticateOp for CapabilityProxy<dyn AuthenticateOp> {
    async fn authenticate(
        &self,
        object_class: &str,
        username: &str,
        password: &GuardedString,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        let args = CallArgs::Authenticate {
            object_class: object_class.to_string(),
            username: username.to_string(),
            password: password.clone(),
            options: options.clone(),
        };
        self.call(AUTHENTICATE, args).await?.into_uid(AUTHENTICATE)
    }
}

#[async_trait]
impl ResolveUsernameOp for CapabilityProxy<dyn ResolveUsernameOp> {
    async fn resolve_username(
        &self,
        object_class: &str,
        username: &str,
        options: &OperationOptions,
    ) -> ConnectorResult<Uid> {
        let args = CallArgs::ResolveUsername {
            object_class: object_class.to_string(),
            username: username.to_string(),
            options: options.clone(),
        };
        self.call(RESOLVE_USERNAME, args)
            .await?
            .into_uid(RESOLVE_USERNAME)
    }
}

#[async_trait]
impl GetOp for CapabilityProxy<dyn GetOp> {
    async fn get_object(
        &self,
        object_class: &str,
        uid: &Uid,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<ConnectorObject>> {
        let args = CallArgs::Get {
            object_class: object_class.to_string(),
            uid: uid.clone(),
            options: options.clone(),
        };
        self.call(GET_OBJECT, args).await?.into_object(GET_OBJECT)
    }
}

#[async_trait]
impl ScriptOnConnectorOp for CapabilityProxy<dyn ScriptOnConnectorOp> {
    async fn run_script_on_connector(
        &self,
        script: ScriptContext,
        options: &OperationOptions,
    ) -> ConnectorResult<Value> {
        let args = CallArgs::RunScriptOnConnector {
            script,
            options: options.clone(),
        };
        self.call(RUN_SCRIPT_ON_CONNECTOR, args)
            .await?
            .into_value(RUN_SCRIPT_ON_CONNECTOR)
    }
}

#[async_trait]
impl ScriptOnResourceOp for CapabilityProxy<dyn ScriptOnResourceOp> {
    async fn run_script_on_resource(
        &self,
        script: ScriptContext,
        options: &OperationOptions,
    ) -> ConnectorResult<Value> {
        let args = CallArgs::RunScriptOnResource {
            script,
            options: options.clone(),
        };
        self.call(RUN_SCRIPT_ON_RESOURCE, args)
            .await?
            .into_value(RUN_SCRIPT_ON_RESOURCE)
    }
}

#[async_trait]
impl TestOp for CapabilityProxy<dyn TestOp> {
    async fn test(&self) -> ConnectorResult<()> {
        self.call(TEST, CallArgs::Test).await?.into_unit(TEST)
    }
}

#[async_trait]
impl ValidateOp for CapabilityProxy<dyn ValidateOp> {
    async fn validate(&self) -> ConnectorResult<()> {
        self.call(VALIDATE, CallArgs::Validate).await?.into_unit(VALIDATE)
    }
}
