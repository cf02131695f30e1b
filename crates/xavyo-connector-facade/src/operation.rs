//! Connector facade operation types
//!
//! Argument and result types shared by the capability traits: UIDs, attribute
//! sets, filters, options, search completion, sync deltas and script requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Unique identifier for an object in a target system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uid {
    /// The attribute name used as the identifier (e.g., "dn", "id", "uid").
    attribute_name: String,
    /// The actual value of the identifier.
    value: String,
}

impl Uid {
    /// Create a new UID with the given attribute name and value.
    pub fn new(attribute_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            value: value.into(),
        }
    }

    /// Create a UID using the default "uid" attribute name.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self::new("uid", value)
    }

    /// Get the attribute name.
    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    /// Get the value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attribute_name, self.value)
    }
}

/// A set of attributes for create/update operations or search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    #[serde(flatten)]
    attributes: HashMap<String, AttributeValue>,
}

impl AttributeSet {
    /// Create a new empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Set an attribute using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Get an attribute value.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Get a single-valued string attribute.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_string())
    }

    /// Check if an attribute exists.
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    /// Get all attribute names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.attributes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Get the number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }
}

impl FromIterator<(String, AttributeValue)> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// A value for an attribute, which may be single or multi-valued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// No value (null).
    Null,
    /// A single string value.
    String(String),
    /// A single integer value.
    Integer(i64),
    /// A single boolean value.
    Boolean(bool),
    /// A single floating-point value.
    Float(f64),
    /// Multiple values.
    Array(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Get as a string if this is a single string value.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as strings (works for both single and multi-valued).
    pub fn as_strings(&self) -> Vec<&str> {
        match self {
            AttributeValue::String(s) => vec![s.as_str()],
            AttributeValue::Array(arr) => arr.iter().filter_map(|v| v.as_string()).collect(),
            _ => vec![],
        }
    }

    /// Get as an integer if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as a boolean if this is a boolean value.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Float(f)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(vec: Vec<T>) -> Self {
        AttributeValue::Array(vec.into_iter().map(Into::into).collect())
    }
}

/// An object read from a target system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorObject {
    /// The object class (e.g., "user", "group").
    pub object_class: String,
    /// Identifier of the object in the target system.
    pub uid: Uid,
    /// Naming attribute value, when the system distinguishes it from the UID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Attributes returned for the object.
    #[serde(default)]
    pub attributes: AttributeSet,
}

impl ConnectorObject {
    /// Create a new object with no attributes.
    pub fn new(object_class: impl Into<String>, uid: Uid) -> Self {
        Self {
            object_class: object_class.into(),
            uid,
            name: None,
            attributes: AttributeSet::new(),
        }
    }

    /// Set the naming attribute value.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: AttributeSet) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Filter for search operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Match objects where attribute equals value.
    Equals { attribute: String, value: String },

    /// Match objects where attribute contains value (substring).
    Contains { attribute: String, value: String },

    /// Match objects where attribute starts with value.
    StartsWith { attribute: String, value: String },

    /// Match objects where attribute exists (has any value).
    Present { attribute: String },

    /// Logical AND of multiple filters.
    And { filters: Vec<Filter> },

    /// Logical OR of multiple filters.
    Or { filters: Vec<Filter> },

    /// Logical NOT of a filter.
    Not { filter: Box<Filter> },
}

impl Filter {
    /// Create an equals filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create an equals filter matching a UID.
    pub fn uid(uid: &Uid) -> Self {
        Filter::eq(uid.attribute_name(), uid.value())
    }

    /// Create a contains filter.
    pub fn contains(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Contains {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a present (attribute exists) filter.
    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Create a NOT filter (negation).
    pub fn negate(filter: Filter) -> Self {
        Filter::Not {
            filter: Box::new(filter),
        }
    }

    /// Combine this filter with another using AND.
    pub fn and_with(self, other: Filter) -> Self {
        match self {
            Filter::And { mut filters } => {
                filters.push(other);
                Filter::And { filters }
            }
            _ => Filter::And {
                filters: vec![self, other],
            },
        }
    }

    /// Combine this filter with another using OR.
    pub fn or_with(self, other: Filter) -> Self {
        match self {
            Filter::Or { mut filters } => {
                filters.push(other);
                Filter::Or { filters }
            }
            _ => Filter::Or {
                filters: vec![self, other],
            },
        }
    }
}

/// Search scope relative to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// Only the container itself.
    Object,
    /// Direct children of the container.
    OneLevel,
    /// The whole subtree below the container.
    Subtree,
}

/// A secret value that never shows up in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct GuardedString(String);

impl GuardedString {
    /// Wrap a secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Access the clear-text secret.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for GuardedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GuardedString(***REDACTED***)")
    }
}

impl fmt::Display for GuardedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***REDACTED***")
    }
}

impl From<&str> for GuardedString {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

/// Options that modify how an operation runs.
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    /// Attributes to return; `None` returns the defaults of the object class.
    pub attributes_to_get: Option<Vec<String>>,
    /// Page size for paged searches.
    pub page_size: Option<u32>,
    /// Cookie returned by the previous page.
    pub paged_results_cookie: Option<String>,
    /// Offset for offset-based paging.
    pub paged_results_offset: Option<u32>,
    /// Search scope.
    pub scope: Option<SearchScope>,
    /// Container to search in.
    pub container: Option<String>,
    /// Run the operation as this user, when the connector supports it.
    pub run_as_user: Option<String>,
    /// Password for `run_as_user`.
    pub run_with_password: Option<GuardedString>,
    /// Connector-specific options.
    pub extra: BTreeMap<String, Value>,
}

impl OperationOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the returned attributes.
    #[must_use]
    pub fn with_attributes_to_get<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes_to_get = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Set the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Set the paged results cookie.
    #[must_use]
    pub fn with_paged_results_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.paged_results_cookie = Some(cookie.into());
        self
    }

    /// Set the search scope.
    #[must_use]
    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Set the container.
    #[must_use]
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Run the operation as another user.
    #[must_use]
    pub fn with_run_as(mut self, user: impl Into<String>, password: GuardedString) -> Self {
        self.run_as_user = Some(user.into());
        self.run_with_password = Some(password);
        self
    }

    /// Set a connector-specific option.
    #[must_use]
    pub fn with_option(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }
}

/// Terminal signal of a search: returned exactly once after the last result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Cookie to request the next page, if paging was used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paged_results_cookie: Option<String>,
    /// Estimated number of remaining results, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_paged_results: Option<i64>,
    /// Whether every matching result was delivered.
    #[serde(default = "default_true")]
    pub all_results_returned: bool,
}

fn default_true() -> bool {
    true
}

impl SearchResult {
    /// A completion with every result returned and no paging state.
    pub fn complete() -> Self {
        Self {
            paged_results_cookie: None,
            remaining_paged_results: None,
            all_results_returned: true,
        }
    }

    /// Set the cookie for the next page.
    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.paged_results_cookie = Some(cookie.into());
        self
    }

    /// Mark the result as partial.
    #[must_use]
    pub fn partial(mut self) -> Self {
        self.all_results_returned = false;
        self
    }
}

/// Opaque synchronization position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncToken(Value);

impl SyncToken {
    /// Wrap a token value.
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    /// Get the token value.
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type of change reported by a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDeltaType {
    /// The object was created or updated.
    CreateOrUpdate,
    /// The object was deleted.
    Delete,
}

impl fmt::Display for SyncDeltaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDeltaType::CreateOrUpdate => write!(f, "create_or_update"),
            SyncDeltaType::Delete => write!(f, "delete"),
        }
    }
}

/// A single change delivered by a sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDelta {
    /// Position of this change; resuming from it skips everything up to and including it.
    pub token: SyncToken,
    /// Type of change.
    pub delta_type: SyncDeltaType,
    /// Identifier of the changed object.
    pub uid: Uid,
    /// Current state of the object, for create/update deltas.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<ConnectorObject>,
}

impl SyncDelta {
    /// A create-or-update delta carrying the current object.
    pub fn create_or_update(token: SyncToken, object: ConnectorObject) -> Self {
        Self {
            token,
            delta_type: SyncDeltaType::CreateOrUpdate,
            uid: object.uid.clone(),
            object: Some(object),
        }
    }

    /// A delete delta.
    pub fn delete(token: SyncToken, uid: Uid) -> Self {
        Self {
            token,
            delta_type: SyncDeltaType::Delete,
            uid,
            object: None,
        }
    }
}

/// A script to run through a script capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptContext {
    /// Script language (e.g., "rhai", "powershell").
    pub language: String,
    /// Script text.
    pub text: String,
    /// Named arguments bound into the script.
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
}

impl ScriptContext {
    /// Create a script request with no arguments.
    pub fn new(language: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            text: text.into(),
            arguments: BTreeMap::new(),
        }
    }

    /// Bind an argument.
    #[must_use]
    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_uid_display() {
        let uid = Uid::new("dn", "cn=john,ou=users,dc=example,dc=com");
        assert_eq!(uid.to_string(), "dn=cn=john,ou=users,dc=example,dc=com");
    }

    #[test]
    fn test_attribute_set() {
        let attrs = AttributeSet::new()
            .with("email", "john@example.com")
            .with("age", 30i64)
            .with("active", true)
            .with("groups", vec!["admins", "users"]);

        assert_eq!(attrs.get_string("email"), Some("john@example.com"));
        assert_eq!(attrs.get("age").and_then(|v| v.as_integer()), Some(30));
        assert_eq!(attrs.get("active").and_then(|v| v.as_boolean()), Some(true));
        assert_eq!(
            attrs.get("groups").map(|v| v.as_strings()),
            Some(vec!["admins", "users"])
        );
        assert_eq!(attrs.names(), vec!["active", "age", "email", "groups"]);
    }

    #[test]
    fn test_uid_filter() {
        let filter = Filter::uid(&Uid::from_value("jdoe"));
        assert_eq!(filter, Filter::eq("uid", "jdoe"));
    }

    #[test]
    fn test_filter_construction() {
        let filter = Filter::eq("email", "john@example.com")
            .and_with(Filter::present("active"))
            .and_with(Filter::negate(Filter::eq("status", "deleted")));

        if let Filter::And { filters } = filter {
            assert_eq!(filters.len(), 3);
        } else {
            panic!("Expected AND filter");
        }
    }

    #[test]
    fn test_guarded_string_is_redacted() {
        let secret = GuardedString::new("hunter2");
        assert_eq!(format!("{secret:?}"), "GuardedString(***REDACTED***)");
        assert_eq!(secret.to_string(), "***REDACTED***");
        assert_eq!(secret.expose(), "hunter2");

        let options = OperationOptions::new().with_run_as("admin", secret);
        assert!(!format!("{options:?}").contains("hunter2"));
    }

    #[test]
    fn test_sync_delta_takes_uid_from_object() {
        let object = ConnectorObject::new("user", Uid::from_value("42"));
        let delta = SyncDelta::create_or_update(SyncToken::new(7), object);
        assert_eq!(delta.uid, Uid::from_value("42"));
        assert_eq!(delta.token.value(), &json!(7));
    }

    #[test]
    fn test_search_result_defaults_to_complete() {
        let parsed: SearchResult = serde_json::from_str("{}").unwrap();
        assert!(parsed.all_results_returned);
        assert_eq!(parsed, SearchResult::complete());
    }
}
