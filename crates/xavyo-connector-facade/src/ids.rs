//! Connector facade ID types
//!
//! Newtype wrappers for type-safe identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a facade instance.
///
/// Two facades built from equal configurations by separate factories get
/// different ids; the id is what log lines use to tell instances apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FacadeId(Uuid);

impl FacadeId {
    /// Create a new random FacadeId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a FacadeId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parse from a string representation.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for FacadeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FacadeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FacadeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for FacadeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifies the static metadata of a connector implementation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectorKey {
    /// Name of the bundle that ships the connector (e.g., "xavyo-connector-ldap").
    pub bundle_name: String,
    /// Version of the bundle.
    pub bundle_version: String,
    /// Name of the connector inside the bundle.
    pub connector_name: String,
}

impl ConnectorKey {
    /// Create a new connector key.
    pub fn new(
        bundle_name: impl Into<String>,
        bundle_version: impl Into<String>,
        connector_name: impl Into<String>,
    ) -> Self {
        Self {
            bundle_name: bundle_name.into(),
            bundle_version: bundle_version.into(),
            connector_name: connector_name.into(),
        }
    }
}

impl fmt::Display for ConnectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.bundle_name, self.bundle_version, self.connector_name
        )
    }
}

/// Deterministic digest of a configuration, used as the facade cache key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already computed digest.
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Get the digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(digest: String) -> Self {
        Self(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facade_id_roundtrip() {
        let id = FacadeId::new();
        let parsed: FacadeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_facade_ids_are_unique() {
        assert_ne!(FacadeId::new(), FacadeId::new());
    }

    #[test]
    fn test_connector_key_display() {
        let key = ConnectorKey::new("xavyo-connector-ldap", "1.2.0", "LdapConnector");
        assert_eq!(key.to_string(), "xavyo-connector-ldap:1.2.0:LdapConnector");
    }

    #[test]
    fn test_fingerprint_short() {
        let fp = Fingerprint::new("0123456789abcdef0123");
        assert_eq!(fp.short(), "0123456789ab");
        assert_eq!(Fingerprint::new("abc").short(), "abc");
    }
}
