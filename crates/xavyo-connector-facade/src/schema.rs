//! Connector facade schema types
//!
//! Types describing what a target system exposes: object classes, their
//! attributes, and which operations accept which object classes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::ApiOperation;

/// Schema representing the structure of a target system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// The object classes available in this schema.
    pub object_classes: Vec<ObjectClass>,

    /// Object classes accepted per operation.
    ///
    /// An operation missing from the map accepts every object class.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub supported_object_classes_by_operation: BTreeMap<ApiOperation, BTreeSet<String>>,
}

impl Schema {
    /// Create a new empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a schema with the given object classes.
    #[must_use]
    pub fn with_object_classes(object_classes: Vec<ObjectClass>) -> Self {
        Self {
            object_classes,
            supported_object_classes_by_operation: BTreeMap::new(),
        }
    }

    /// Restrict an operation to the given object classes.
    #[must_use]
    pub fn restrict_operation<I, S>(mut self, operation: ApiOperation, object_classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_object_classes_by_operation
            .insert(operation, object_classes.into_iter().map(Into::into).collect());
        self
    }

    /// Add an object class to the schema.
    pub fn add_object_class(&mut self, object_class: ObjectClass) {
        self.object_classes.push(object_class);
    }

    /// Find an object class by name.
    #[must_use]
    pub fn get_object_class(&self, name: &str) -> Option<&ObjectClass> {
        self.object_classes.iter().find(|oc| oc.name == name)
    }

    /// Check if an object class exists.
    #[must_use]
    pub fn has_object_class(&self, name: &str) -> bool {
        self.get_object_class(name).is_some()
    }

    /// Get all object class names.
    #[must_use]
    pub fn object_class_names(&self) -> Vec<&str> {
        self.object_classes
            .iter()
            .map(|oc| oc.name.as_str())
            .collect()
    }

    /// Check whether `operation` accepts `object_class`.
    #[must_use]
    pub fn supports(&self, operation: ApiOperation, object_class: &str) -> bool {
        match self.supported_object_classes_by_operation.get(&operation) {
            Some(classes) => classes.contains(object_class),
            None => self.has_object_class(object_class),
        }
    }
}

/// An object class in a target system schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectClass {
    /// Canonical name for this object class.
    pub name: String,

    /// Native name in the target system (e.g., "inetOrgPerson" for LDAP).
    pub native_name: String,

    /// Description of this object class.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Attributes belonging to this object class.
    pub attributes: Vec<SchemaAttribute>,

    /// Whether this is a container class (e.g., an organizational unit).
    #[serde(default)]
    pub container: bool,
}

impl ObjectClass {
    /// Create a new object class with the given name.
    pub fn new(name: impl Into<String>, native_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_name: native_name.into(),
            description: None,
            attributes: Vec::new(),
            container: false,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add an attribute using builder pattern.
    #[must_use]
    pub fn with_attribute(mut self, attribute: SchemaAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Find an attribute by name.
    #[must_use]
    pub fn get_attribute(&self, name: &str) -> Option<&SchemaAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Get all required attributes.
    #[must_use]
    pub fn required_attributes(&self) -> Vec<&SchemaAttribute> {
        self.attributes.iter().filter(|a| a.required).collect()
    }
}

/// An attribute of an object class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaAttribute {
    /// Canonical name for this attribute.
    pub name: String,

    /// Native name in the target system (e.g., "givenName" for LDAP).
    pub native_name: String,

    /// Data type of this attribute.
    pub data_type: AttributeDataType,

    /// Whether this attribute can have multiple values.
    #[serde(default)]
    pub multi_valued: bool,

    /// Whether this attribute is required for create operations.
    #[serde(default)]
    pub required: bool,

    /// Whether this attribute can be read.
    #[serde(default = "default_true")]
    pub readable: bool,

    /// Whether this attribute can be written.
    #[serde(default = "default_true")]
    pub writable: bool,

    /// Whether this attribute is returned by default in search results.
    #[serde(default = "default_true")]
    pub returned_by_default: bool,
}

fn default_true() -> bool {
    true
}

impl SchemaAttribute {
    /// Create a new single-valued, optional, read-write attribute.
    pub fn new(
        name: impl Into<String>,
        native_name: impl Into<String>,
        data_type: AttributeDataType,
    ) -> Self {
        Self {
            name: name.into(),
            native_name: native_name.into(),
            data_type,
            multi_valued: false,
            required: false,
            readable: true,
            writable: true,
            returned_by_default: true,
        }
    }

    /// Mark as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as multi-valued.
    #[must_use]
    pub fn multi_valued(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    /// Mark as read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }
}

/// Data type of a schema attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeDataType {
    /// String/text value.
    String,
    /// Integer value.
    Integer,
    /// Long integer value.
    Long,
    /// Boolean value.
    Boolean,
    /// Binary data (bytes).
    Binary,
    /// Date/time value.
    DateTime,
    /// Decimal/float value.
    Decimal,
    /// Secret value, never returned in clear text.
    GuardedString,
    /// JSON object.
    Json,
}

impl AttributeDataType {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeDataType::String => "string",
            AttributeDataType::Integer => "integer",
            AttributeDataType::Long => "long",
            AttributeDataType::Boolean => "boolean",
            AttributeDataType::Binary => "binary",
            AttributeDataType::DateTime => "datetime",
            AttributeDataType::Decimal => "decimal",
            AttributeDataType::GuardedString => "guardedstring",
            AttributeDataType::Json => "json",
        }
    }
}

impl std::fmt::Display for AttributeDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        let user = ObjectClass::new("user", "inetOrgPerson")
            .with_attribute(
                SchemaAttribute::new("uid", "uid", AttributeDataType::String).required(),
            )
            .with_attribute(
                SchemaAttribute::new("memberOf", "memberOf", AttributeDataType::String)
                    .multi_valued()
                    .read_only(),
            );
        let group = ObjectClass::new("group", "groupOfNames");
        Schema::with_object_classes(vec![user, group])
    }

    #[test]
    fn test_schema_lookup() {
        let schema = sample_schema();
        assert!(schema.has_object_class("user"));
        assert!(!schema.has_object_class("device"));
        assert_eq!(schema.object_class_names(), vec!["user", "group"]);

        let user = schema.get_object_class("user").unwrap();
        assert_eq!(user.required_attributes().len(), 1);
        assert!(!user.get_attribute("memberOf").unwrap().writable);
    }

    #[test]
    fn test_operation_restrictions() {
        let schema = sample_schema().restrict_operation(ApiOperation::Delete, ["user"]);
        assert!(schema.supports(ApiOperation::Delete, "user"));
        assert!(!schema.supports(ApiOperation::Delete, "group"));
        // Unrestricted operations accept every known object class.
        assert!(schema.supports(ApiOperation::Create, "group"));
        assert!(!schema.supports(ApiOperation::Create, "device"));
    }

    #[test]
    fn test_schema_serde_omits_empty_restrictions() {
        let json = serde_json::to_value(sample_schema()).unwrap();
        assert!(json.get("supported_object_classes_by_operation").is_none());
        let parsed: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, sample_schema());
    }
}
