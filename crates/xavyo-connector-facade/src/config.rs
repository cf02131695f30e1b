//! Connector facade configuration types
//!
//! [`ApiConfiguration`] is everything a facade is built from: the typed
//! connector properties, which operations are exposed, per-operation
//! timeouts, and pooling parameters. Its [`fingerprint`](ApiConfiguration::fingerprint)
//! is the facade cache key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::error::{ConnectorError, ConnectorResult};
use crate::ids::{ConnectorKey, Fingerprint};
use crate::types::ApiOperation;

const REDACTED: &str = "***REDACTED***";

/// Declared type of a configuration property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    /// UTF-8 string.
    String,
    /// Signed integer.
    Integer,
    /// Floating-point number (integers are accepted).
    Float,
    /// Boolean flag.
    Boolean,
    /// Secret string, redacted in logs.
    GuardedString,
    /// Array of strings.
    StringArray,
    /// Any JSON value.
    Json,
}

impl PropertyType {
    /// Check whether `value` has this type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            PropertyType::String | PropertyType::GuardedString => value.is_string(),
            PropertyType::Integer => value.is_i64() || value.is_u64(),
            PropertyType::Float => value.is_number(),
            PropertyType::Boolean => value.is_boolean(),
            PropertyType::StringArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            PropertyType::Json => true,
        }
    }

    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Float => "float",
            PropertyType::Boolean => "boolean",
            PropertyType::GuardedString => "guarded_string",
            PropertyType::StringArray => "string_array",
            PropertyType::Json => "json",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One typed connector property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationProperty {
    /// Property name, unique within the connector.
    pub name: String,

    /// Current value. `None` means unset.
    #[serde(default)]
    pub value: Option<Value>,

    /// Declared value type.
    pub property_type: PropertyType,

    /// Whether a value must be present.
    #[serde(default)]
    pub required: bool,

    /// Whether the value is a secret.
    #[serde(default)]
    pub confidential: bool,

    /// Message key for the display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_message_key: Option<String>,

    /// Message key for the help text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_message_key: Option<String>,

    /// Message key for the property group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_message_key: Option<String>,

    /// Display order.
    #[serde(default)]
    pub order: u32,
}

impl ConfigurationProperty {
    /// Create an optional, unset property.
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            value: None,
            property_type,
            required: false,
            confidential: property_type == PropertyType::GuardedString,
            display_message_key: None,
            help_message_key: None,
            group_message_key: None,
            order: 0,
        }
    }

    /// Set the value.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Mark as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as confidential.
    #[must_use]
    pub fn confidential(mut self) -> Self {
        self.confidential = true;
        self
    }

    /// Set the display order.
    #[must_use]
    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    /// Set the display, help and group message keys.
    #[must_use]
    pub fn with_message_keys(
        mut self,
        display: impl Into<String>,
        help: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        self.display_message_key = Some(display.into());
        self.help_message_key = Some(help.into());
        self.group_message_key = Some(group.into());
        self
    }

    /// Check whether a non-empty value is set.
    #[must_use]
    pub fn has_value(&self) -> bool {
        match &self.value {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// Validate presence and type.
    pub fn validate(&self) -> ConnectorResult<()> {
        if !self.has_value() {
            if self.required {
                return Err(ConnectorError::invalid_configuration(format!(
                    "property '{}' is required",
                    self.name
                )));
            }
            return Ok(());
        }
        match &self.value {
            Some(value) if !self.property_type.accepts(value) => {
                Err(ConnectorError::invalid_configuration(format!(
                    "property '{}' must be of type {}",
                    self.name, self.property_type
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Ordered list of connector properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigurationProperties {
    properties: Vec<ConfigurationProperty>,
}

impl ConfigurationProperties {
    /// Create an empty property list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a property, replacing one with the same name in place.
    pub fn add(&mut self, property: ConfigurationProperty) {
        match self.property_mut(&property.name) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
    }

    /// Append a property using builder pattern.
    #[must_use]
    pub fn with_property(mut self, property: ConfigurationProperty) -> Self {
        self.add(property);
        self
    }

    /// Find a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&ConfigurationProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Find a property by name for modification.
    pub fn property_mut(&mut self, name: &str) -> Option<&mut ConfigurationProperty> {
        self.properties.iter_mut().find(|p| p.name == name)
    }

    /// Set the value of a declared property.
    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) -> ConnectorResult<()> {
        let property = self.property_mut(name).ok_or_else(|| {
            ConnectorError::invalid_configuration(format!("unknown property '{name}'"))
        })?;
        property.value = Some(value.into());
        Ok(())
    }

    /// Get the value of a property.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.property(name).and_then(|p| p.value.as_ref())
    }

    /// Get a string value.
    #[must_use]
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(Value::as_str)
    }

    /// Get an integer value.
    #[must_use]
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(Value::as_i64)
    }

    /// Get a boolean value.
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.value(name).and_then(Value::as_bool)
    }

    /// Property names in declaration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.properties.iter().map(|p| p.name.as_str()).collect()
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ConfigurationProperty> {
        self.properties.iter()
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Check if there are no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Validate every property, stopping at the first violation.
    pub fn validate(&self) -> ConnectorResult<()> {
        self.properties.iter().try_for_each(ConfigurationProperty::validate)
    }

    /// Copy with confidential values replaced, for logging.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let properties = self
            .properties
            .iter()
            .map(|p| {
                let mut p = p.clone();
                if p.confidential && p.value.is_some() {
                    p.value = Some(Value::String(REDACTED.to_string()));
                }
                p
            })
            .collect();
        Self { properties }
    }
}

impl FromIterator<ConfigurationProperty> for ConfigurationProperties {
    fn from_iter<T: IntoIterator<Item = ConfigurationProperty>>(iter: T) -> Self {
        let mut properties = Self::new();
        for property in iter {
            properties.add(property);
        }
        properties
    }
}

/// Connector pooling parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolConfiguration {
    /// Maximum number of live instances, idle and borrowed.
    #[serde(default = "default_max_objects")]
    pub max_objects: u32,

    /// Maximum number of idle instances kept after return.
    #[serde(default = "default_max_idle")]
    pub max_idle: u32,

    /// Number of idle instances kept even when they expire.
    #[serde(default = "default_min_idle")]
    pub min_idle: u32,

    /// Maximum time to wait for an instance, in milliseconds (0 = unbounded).
    #[serde(default = "default_max_wait_millis")]
    pub max_wait_millis: u64,

    /// Idle time after which an instance may be evicted, in milliseconds.
    #[serde(default = "default_min_evictable_idle_millis")]
    pub min_evictable_idle_millis: u64,
}

fn default_max_objects() -> u32 {
    10
}

fn default_max_idle() -> u32 {
    10
}

fn default_min_idle() -> u32 {
    1
}

fn default_max_wait_millis() -> u64 {
    150_000
}

fn default_min_evictable_idle_millis() -> u64 {
    120_000
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_objects: default_max_objects(),
            max_idle: default_max_idle(),
            min_idle: default_min_idle(),
            max_wait_millis: default_max_wait_millis(),
            min_evictable_idle_millis: default_min_evictable_idle_millis(),
        }
    }
}

impl PoolConfiguration {
    /// Maximum wait as a duration, `None` when unbounded.
    #[must_use]
    pub fn max_wait(&self) -> Option<Duration> {
        (self.max_wait_millis > 0).then(|| Duration::from_millis(self.max_wait_millis))
    }

    /// Idle eviction threshold as a duration.
    #[must_use]
    pub fn min_evictable_idle(&self) -> Duration {
        Duration::from_millis(self.min_evictable_idle_millis)
    }

    /// Check `min_idle <= max_idle <= max_objects` and `max_objects >= 1`.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.max_objects == 0 {
            return Err(ConnectorError::invalid_configuration(
                "pool max_objects must be at least 1",
            ));
        }
        if self.max_idle > self.max_objects {
            return Err(ConnectorError::invalid_configuration(format!(
                "pool max_idle ({}) must not exceed max_objects ({})",
                self.max_idle, self.max_objects
            )));
        }
        if self.min_idle > self.max_idle {
            return Err(ConnectorError::invalid_configuration(format!(
                "pool min_idle ({}) must not exceed max_idle ({})",
                self.min_idle, self.max_idle
            )));
        }
        Ok(())
    }
}

/// Complete configuration of one facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfiguration {
    /// Static connector metadata this configuration belongs to.
    pub connector_key: ConnectorKey,

    /// Connector properties.
    #[serde(default)]
    pub properties: ConfigurationProperties,

    /// Operations exposed by the facade.
    #[serde(default)]
    pub supported_operations: BTreeSet<ApiOperation>,

    /// Per-operation timeouts in milliseconds. Absent or 0 means no timeout.
    #[serde(default)]
    pub timeouts: BTreeMap<ApiOperation, u64>,

    /// Pooling parameters.
    #[serde(default)]
    pub pool: PoolConfiguration,

    /// Whether connector instances are pooled.
    #[serde(default)]
    pub connector_pooling_supported: bool,
}

impl ApiConfiguration {
    /// Create a configuration with no supported operations and no timeouts.
    pub fn new(connector_key: ConnectorKey, properties: ConfigurationProperties) -> Self {
        Self {
            connector_key,
            properties,
            supported_operations: BTreeSet::new(),
            timeouts: BTreeMap::new(),
            pool: PoolConfiguration::default(),
            connector_pooling_supported: false,
        }
    }

    /// Replace the supported operation set.
    #[must_use]
    pub fn with_supported_operations(
        mut self,
        operations: impl IntoIterator<Item = ApiOperation>,
    ) -> Self {
        self.supported_operations = operations.into_iter().collect();
        self
    }

    /// Set the timeout of one operation in milliseconds.
    #[must_use]
    pub fn with_timeout(mut self, operation: ApiOperation, timeout_ms: u64) -> Self {
        self.timeouts.insert(operation, timeout_ms);
        self
    }

    /// Set the pooling parameters.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfiguration) -> Self {
        self.pool = pool;
        self
    }

    /// Enable or disable pooling.
    #[must_use]
    pub fn with_connector_pooling(mut self, enabled: bool) -> Self {
        self.connector_pooling_supported = enabled;
        self
    }

    /// Check whether an operation is exposed.
    #[must_use]
    pub fn is_supported(&self, operation: ApiOperation) -> bool {
        self.supported_operations.contains(&operation)
    }

    /// Effective timeout of an operation, `None` when unset or 0.
    #[must_use]
    pub fn timeout(&self, operation: ApiOperation) -> Option<Duration> {
        self.timeouts
            .get(&operation)
            .copied()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Validate properties and pooling parameters.
    pub fn validate(&self) -> ConnectorResult<()> {
        self.properties.validate()?;
        self.pool.validate()
    }

    /// SHA-256 of the canonical JSON form, as lowercase hex.
    ///
    /// Sets and maps serialize sorted and properties keep declaration order,
    /// so equal configurations produce equal fingerprints in any process.
    /// Settings without effect are left out: zero timeouts, timeouts of
    /// unsupported operations, and pool parameters while pooling is off.
    pub fn fingerprint(&self) -> ConnectorResult<Fingerprint> {
        let canonical = serde_json::to_vec(&self.canonical())?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(Fingerprint::new(hex::encode(hasher.finalize())))
    }

    fn canonical(&self) -> Self {
        let mut canonical = self.clone();
        canonical
            .timeouts
            .retain(|op, ms| *ms > 0 && self.supported_operations.contains(op));
        if !canonical.connector_pooling_supported {
            canonical.pool = PoolConfiguration::default();
        }
        canonical
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> ConnectorResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> ConnectorResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Copy with confidential property values replaced, for logging.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            properties: self.properties.redacted(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> ConnectorKey {
        ConnectorKey::new("xavyo-connector-ldap", "1.0.0", "LdapConnector")
    }

    fn properties() -> ConfigurationProperties {
        ConfigurationProperties::new()
            .with_property(
                ConfigurationProperty::new("host", PropertyType::String)
                    .required()
                    .with_value("ldap.example.com")
                    .with_order(1),
            )
            .with_property(
                ConfigurationProperty::new("port", PropertyType::Integer)
                    .with_value(636)
                    .with_order(2),
            )
            .with_property(
                ConfigurationProperty::new("bind_password", PropertyType::GuardedString)
                    .with_value("secret")
                    .with_order(3),
            )
    }

    fn config() -> ApiConfiguration {
        ApiConfiguration::new(key(), properties())
            .with_supported_operations([ApiOperation::Create, ApiOperation::Search])
            .with_timeout(ApiOperation::Create, 50)
    }

    #[test]
    fn test_pool_defaults() {
        let pool = PoolConfiguration::default();
        assert_eq!(pool.max_objects, 10);
        assert_eq!(pool.max_idle, 10);
        assert_eq!(pool.min_idle, 1);
        assert_eq!(pool.max_wait_millis, 150_000);
        assert_eq!(pool.min_evictable_idle_millis, 120_000);

        let parsed: PoolConfiguration = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, pool);
    }

    #[test]
    fn test_pool_validation() {
        assert!(PoolConfiguration::default().validate().is_ok());

        let pool = PoolConfiguration {
            max_objects: 0,
            max_idle: 0,
            min_idle: 0,
            ..Default::default()
        };
        assert!(pool.validate().is_err());

        let pool = PoolConfiguration {
            max_objects: 5,
            max_idle: 6,
            ..Default::default()
        };
        let err = pool.validate().unwrap_err();
        assert!(err.to_string().contains("max_idle (6)"));

        let pool = PoolConfiguration {
            max_objects: 5,
            max_idle: 2,
            min_idle: 3,
            ..Default::default()
        };
        assert!(pool.validate().is_err());
    }

    #[test]
    fn test_required_property_missing() {
        let mut props = properties();
        props.property_mut("host").unwrap().value = None;
        let err = props.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: property 'host' is required");

        props.set_value("host", "").unwrap();
        assert!(props.validate().is_err());
    }

    #[test]
    fn test_property_type_mismatch() {
        let mut props = properties();
        props.set_value("port", "not-a-number").unwrap();
        let err = props.validate().unwrap_err();
        assert!(err.to_string().contains("must be of type integer"));
    }

    #[test]
    fn test_set_unknown_property() {
        let mut props = properties();
        assert!(props.set_value("nope", 1).is_err());
    }

    #[test]
    fn test_property_order_is_kept() {
        let props = properties();
        assert_eq!(props.names(), vec!["host", "port", "bind_password"]);
        assert_eq!(props.get_i64("port"), Some(636));
    }

    #[test]
    fn test_redacted_hides_confidential_values() {
        let redacted = config().redacted();
        assert_eq!(
            redacted.properties.get_string("bind_password"),
            Some("***REDACTED***")
        );
        assert_eq!(redacted.properties.get_string("host"), Some("ldap.example.com"));
    }

    #[test]
    fn test_timeout_lookup() {
        let config = config().with_timeout(ApiOperation::Delete, 0);
        assert_eq!(
            config.timeout(ApiOperation::Create),
            Some(Duration::from_millis(50))
        );
        assert_eq!(config.timeout(ApiOperation::Delete), None);
        assert_eq!(config.timeout(ApiOperation::Search), None);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = config().fingerprint().unwrap();
        let b = config().fingerprint().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order_of_sets() {
        let a = ApiConfiguration::new(key(), properties())
            .with_supported_operations([ApiOperation::Search, ApiOperation::Create]);
        let b = ApiConfiguration::new(key(), properties())
            .with_supported_operations([ApiOperation::Create, ApiOperation::Search]);
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_fingerprint_changes_with_configuration() {
        let base = config();
        let other = config().with_timeout(ApiOperation::Create, 51);
        assert_ne!(base.fingerprint().unwrap(), other.fingerprint().unwrap());

        let mut other = config();
        other.properties.set_value("port", 389).unwrap();
        assert_ne!(base.fingerprint().unwrap(), other.fingerprint().unwrap());
    }

    #[test]
    fn test_fingerprint_ignores_settings_without_effect() {
        let base = config();

        let zero = config().with_timeout(ApiOperation::Search, 0);
        assert_eq!(base.fingerprint().unwrap(), zero.fingerprint().unwrap());

        let unsupported = config().with_timeout(ApiOperation::Delete, 500);
        assert_eq!(base.fingerprint().unwrap(), unsupported.fingerprint().unwrap());

        let pool = PoolConfiguration {
            max_objects: 3,
            max_idle: 3,
            ..Default::default()
        };
        let unpooled = config().with_pool(pool.clone());
        assert_eq!(base.fingerprint().unwrap(), unpooled.fingerprint().unwrap());

        let pooled = config().with_connector_pooling(true);
        assert_ne!(
            pooled.fingerprint().unwrap(),
            pooled.clone().with_pool(pool).fingerprint().unwrap()
        );
    }

    #[test]
    fn test_json_round_trip() {
        let config = config().with_connector_pooling(true);
        let json = config.to_json().unwrap();
        let parsed = ApiConfiguration::from_json(&json).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.fingerprint().unwrap(), config.fingerprint().unwrap());
    }

    #[test]
    fn test_timeouts_serialize_by_operation_name() {
        let value = serde_json::to_value(config()).unwrap();
        assert_eq!(value["timeouts"], json!({ "create": 50 }));
        assert_eq!(value["supported_operations"], json!(["create", "search"]));
    }

    #[test]
    fn test_validate_checks_pool() {
        let config = config().with_pool(PoolConfiguration {
            max_objects: 1,
            max_idle: 2,
            ..Default::default()
        });
        assert_eq!(config.validate().unwrap_err().error_code(), "INVALID_CONFIG");
    }
}
