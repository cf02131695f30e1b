//! Connector facade type definitions
//!
//! Runtime identifiers for the operation families a facade can expose.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Runtime identifier of a capability (operation family).
///
/// Every capability trait in [`crate::traits`] maps to exactly one variant.
/// The variant is what configurations store in their supported-operation set
/// and timeout table; the typed [`crate::capability::CapabilityToken`] is what
/// code uses to resolve an implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiOperation {
    /// Schema retrieval.
    Schema,
    /// Object creation.
    Create,
    /// Object update, including add/remove attribute values.
    Update,
    /// Object deletion.
    Delete,
    /// Streaming search.
    Search,
    /// Streaming synchronization and latest sync token lookup.
    Sync,
    /// Credential authentication.
    Authenticate,
    /// Username resolution.
    ResolveUsername,
    /// Single object retrieval by UID.
    Get,
    /// Script execution inside the connector.
    ScriptOnConnector,
    /// Script execution on the target resource.
    ScriptOnResource,
    /// Connection test.
    Test,
    /// Configuration validation.
    Validate,
}

impl ApiOperation {
    /// Get all operation identifiers.
    #[must_use]
    pub fn all() -> &'static [ApiOperation] {
        &[
            ApiOperation::Schema,
            ApiOperation::Create,
            ApiOperation::Update,
            ApiOperation::Delete,
            ApiOperation::Search,
            ApiOperation::Sync,
            ApiOperation::Authenticate,
            ApiOperation::ResolveUsername,
            ApiOperation::Get,
            ApiOperation::ScriptOnConnector,
            ApiOperation::ScriptOnResource,
            ApiOperation::Test,
            ApiOperation::Validate,
        ]
    }

    /// Get the string representation used in configurations.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiOperation::Schema => "schema",
            ApiOperation::Create => "create",
            ApiOperation::Update => "update",
            ApiOperation::Delete => "delete",
            ApiOperation::Search => "search",
            ApiOperation::Sync => "sync",
            ApiOperation::Authenticate => "authenticate",
            ApiOperation::ResolveUsername => "resolve_username",
            ApiOperation::Get => "get",
            ApiOperation::ScriptOnConnector => "script_on_connector",
            ApiOperation::ScriptOnResource => "script_on_resource",
            ApiOperation::Test => "test",
            ApiOperation::Validate => "validate",
        }
    }

    /// Check if this capability delivers results through a caller-supplied handler.
    ///
    /// Streaming capabilities are never subject to a forced timeout.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self, ApiOperation::Search | ApiOperation::Sync)
    }

    /// Check if the runtime implements this capability itself instead of
    /// delegating it to a dedicated connector trait.
    #[must_use]
    pub fn is_runtime_provided(&self) -> bool {
        matches!(self, ApiOperation::Get | ApiOperation::Validate)
    }
}

impl fmt::Display for ApiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ApiOperation {
    type Err = ParseApiOperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        ApiOperation::all()
            .iter()
            .copied()
            .find(|op| op.as_str() == normalized)
            .ok_or_else(|| ParseApiOperationError(s.to_string()))
    }
}

/// Error parsing an operation identifier from string.
#[derive(Debug, Clone)]
pub struct ParseApiOperationError(String);

impl fmt::Display for ParseApiOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid operation '{}', expected one of: ", self.0)?;
        let names: Vec<&str> = ApiOperation::all().iter().map(|op| op.as_str()).collect();
        write!(f, "{}", names.join(", "))
    }
}

impl std::error::Error for ParseApiOperationError {}
