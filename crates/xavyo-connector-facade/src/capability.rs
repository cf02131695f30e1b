//! Capability tokens
//!
//! A [`CapabilityToken`] names one capability trait object type
//! (`dyn CreateOp`, `dyn SearchOp`, ...) as a value. Tokens are zero-sized,
//! compare and hash by the [`TypeId`] of the trait object type, and are what
//! facades and operation sets are keyed by.
//!
//! [`AnyCapability`] is the erased runtime handle. Converting it back into a
//! typed token checks that both denote the same capability.
//!
//! # Example
//!
//! ```ignore
//! use xavyo_connector_facade::prelude::*;
//!
//! let token = CapabilityToken::<dyn CreateOp>::new();
//! assert_eq!(token.operation(), ApiOperation::Create);
//!
//! let erased = token.erase();
//! let back = CapabilityToken::<dyn CreateOp>::from_any(erased)?;
//! assert_eq!(token, back);
//!
//! // A handle for a different capability is rejected.
//! assert!(CapabilityToken::<dyn SearchOp>::from_any(erased).is_err());
//! ```

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{ConnectorError, ConnectorResult};
use crate::traits::{
    AuthenticateOp, CreateOp, DeleteOp, GetOp, ResolveUsernameOp, SchemaOp, ScriptOnConnectorOp,
    ScriptOnResourceOp, SearchOp, SyncOp, TestOp, UpdateOp, ValidateOp,
};
use crate::types::ApiOperation;

/// Marker implemented by every capability trait object type.
pub trait Capability: Send + Sync + 'static {
    /// Runtime identifier of the capability.
    const OPERATION: ApiOperation;
}

/// Conversion from a concrete implementation to a capability trait object.
///
/// Blanket-implemented for every type that implements the capability trait,
/// so `U: Implements<dyn CreateOp>` reads as "U is a create implementation".
pub trait Implements<T: ?Sized + Capability>: Send + Sync + 'static {
    /// Upcast a shared implementation to the capability trait object.
    fn upcast(self: Arc<Self>) -> Arc<T>;
}

/// Typed identifier of a capability trait.
pub struct CapabilityToken<T: ?Sized + Capability> {
    _capability: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Capability> CapabilityToken<T> {
    /// Token for capability `T`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _capability: PhantomData,
        }
    }

    /// Token bound from an implementing type, checked at compile time.
    #[must_use]
    pub fn of<U: Implements<T>>() -> Self {
        Self::new()
    }

    /// Convert an erased handle back into a typed token.
    pub fn from_any(handle: AnyCapability) -> ConnectorResult<Self> {
        if handle.type_id == TypeId::of::<T>() {
            Ok(Self::new())
        } else {
            Err(ConnectorError::InvalidCapability {
                expected: Self::new().to_string(),
                actual: handle.to_string(),
            })
        }
    }

    /// Convert a runtime operation identifier into a typed token.
    pub fn from_operation(operation: ApiOperation) -> ConnectorResult<Self> {
        Self::from_any(AnyCapability::for_operation(operation))
    }

    /// Convert an operation name (e.g., "create") into a typed token.
    pub fn from_name(name: &str) -> ConnectorResult<Self> {
        match name.parse::<ApiOperation>() {
            Ok(operation) => Self::from_operation(operation),
            Err(_) => Err(ConnectorError::InvalidCapability {
                expected: Self::new().to_string(),
                actual: name.to_string(),
            }),
        }
    }

    /// Runtime operation identifier.
    #[must_use]
    pub fn operation(&self) -> ApiOperation {
        T::OPERATION
    }

    /// Rust type name of the capability trait object.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    /// [`TypeId`] of the capability trait object.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    /// Erase the static type.
    #[must_use]
    pub fn erase(&self) -> AnyCapability {
        AnyCapability::of::<T>()
    }
}

impl<T: ?Sized + Capability> Default for CapabilityToken<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + Capability> Clone for CapabilityToken<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized + Capability> Copy for CapabilityToken<T> {}

impl<T, U> PartialEq<CapabilityToken<U>> for CapabilityToken<T>
where
    T: ?Sized + Capability,
    U: ?Sized + Capability,
{
    fn eq(&self, _other: &CapabilityToken<U>) -> bool {
        TypeId::of::<T>() == TypeId::of::<U>()
    }
}

impl<T: ?Sized + Capability> Eq for CapabilityToken<T> {}

impl<T: ?Sized + Capability> PartialEq<AnyCapability> for CapabilityToken<T> {
    fn eq(&self, other: &AnyCapability) -> bool {
        TypeId::of::<T>() == other.type_id
    }
}

impl<T: ?Sized + Capability> Hash for CapabilityToken<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        TypeId::of::<T>().hash(state);
    }
}

impl<T: ?Sized + Capability> fmt::Debug for CapabilityToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityToken")
            .field("operation", &T::OPERATION)
            .field("type_name", &self.type_name())
            .finish()
    }
}

impl<T: ?Sized + Capability> fmt::Display for CapabilityToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", T::OPERATION)
    }
}

/// Erased runtime handle of a capability.
///
/// Equality and hashing use the trait object's [`TypeId`], which is
/// consistent with [`CapabilityToken`].
#[derive(Clone, Copy)]
pub struct AnyCapability {
    operation: ApiOperation,
    type_id: TypeId,
    type_name: &'static str,
}

impl AnyCapability {
    /// Handle for capability `T`.
    #[must_use]
    pub fn of<T: ?Sized + Capability>() -> Self {
        Self {
            operation: T::OPERATION,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Handle for the capability trait bound to `operation`.
    #[must_use]
    pub fn for_operation(operation: ApiOperation) -> Self {
        match operation {
            ApiOperation::Schema => Self::of::<dyn SchemaOp>(),
            ApiOperation::Create => Self::of::<dyn CreateOp>(),
            ApiOperation::Update => Self::of::<dyn UpdateOp>(),
            ApiOperation::Delete => Self::of::<dyn DeleteOp>(),
            ApiOperation::Search => Self::of::<dyn SearchOp>(),
            ApiOperation::Sync => Self::of::<dyn SyncOp>(),
            ApiOperation::Authenticate => Self::of::<dyn AuthenticateOp>(),
            ApiOperation::ResolveUsername => Self::of::<dyn ResolveUsernameOp>(),
            ApiOperation::Get => Self::of::<dyn GetOp>(),
            ApiOperation::ScriptOnConnector => Self::of::<dyn ScriptOnConnectorOp>(),
            ApiOperation::ScriptOnResource => Self::of::<dyn ScriptOnResourceOp>(),
            ApiOperation::Test => Self::of::<dyn TestOp>(),
            ApiOperation::Validate => Self::of::<dyn ValidateOp>(),
        }
    }

    /// Runtime operation identifier.
    #[must_use]
    pub fn operation(&self) -> ApiOperation {
        self.operation
    }

    /// [`TypeId`] of the capability trait object.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name of the capability trait object.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Check whether this handle denotes capability `T`.
    #[must_use]
    pub fn is<T: ?Sized + Capability>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl PartialEq for AnyCapability {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for AnyCapability {}

impl Hash for AnyCapability {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl<T: ?Sized + Capability> From<CapabilityToken<T>> for AnyCapability {
    fn from(token: CapabilityToken<T>) -> Self {
        token.erase()
    }
}

impl fmt::Debug for AnyCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyCapability")
            .field("operation", &self.operation)
            .field("type_name", &self.type_name)
            .finish()
    }
}

impl fmt::Display for AnyCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tokens_of_same_capability_are_equal() {
        let a = CapabilityToken::<dyn CreateOp>::new();
        let b = CapabilityToken::<dyn CreateOp>::default();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn test_tokens_of_different_capabilities_differ() {
        let create = CapabilityToken::<dyn CreateOp>::new();
        let search = CapabilityToken::<dyn SearchOp>::new();
        assert!(create != search);
        assert_ne!(create.erase(), search.erase());
        assert_ne!(create.type_id(), search.type_id());
    }

    #[test]
    fn test_erase_and_recover() {
        let token = CapabilityToken::<dyn SyncOp>::new();
        let erased = token.erase();
        assert_eq!(erased.operation(), ApiOperation::Sync);
        assert!(erased.is::<dyn SyncOp>());
        assert!(token == erased);

        let recovered = CapabilityToken::<dyn SyncOp>::from_any(erased).unwrap();
        assert_eq!(recovered, token);
    }

    #[test]
    fn test_from_any_rejects_other_capability() {
        let erased = CapabilityToken::<dyn DeleteOp>::new().erase();
        let err = CapabilityToken::<dyn CreateOp>::from_any(erased).unwrap_err();
        match err {
            ConnectorError::InvalidCapability { expected, actual } => {
                assert_eq!(expected, "create");
                assert_eq!(actual, "delete");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_every_operation_maps_to_its_token() {
        for op in ApiOperation::all() {
            let handle = AnyCapability::for_operation(*op);
            assert_eq!(handle.operation(), *op);
        }
        assert!(CapabilityToken::<dyn SearchOp>::from_operation(ApiOperation::Search).is_ok());
        assert!(CapabilityToken::<dyn SearchOp>::from_operation(ApiOperation::Get).is_err());
    }

    #[test]
    fn test_from_name() {
        let token = CapabilityToken::<dyn ResolveUsernameOp>::from_name("resolve_username");
        assert!(token.is_ok());

        let err = CapabilityToken::<dyn CreateOp>::from_name("launch").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CAPABILITY");
    }

    #[test]
    fn test_type_name_mentions_trait() {
        let token = CapabilityToken::<dyn TestOp>::new();
        assert!(token.type_name().contains("TestOp"));
        assert_eq!(token.to_string(), "test");
    }
}
