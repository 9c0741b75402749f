//! Per-collection schema configuration.

use crate::document::Document;
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// An index definition within a collection schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    /// Unique name of the index within its collection.
    pub name: String,
    /// Field paths indexed, in declaration order.
    pub fields: Vec<String>,
    /// Whether the encoded key maps to at most one document.
    #[serde(default)]
    pub unique: bool,
    /// Whether this is the collection's primary index.
    #[serde(default)]
    pub primary: bool,
    /// Whether the indexed fields are fed to the full-text engine.
    #[serde(default)]
    pub full_text: bool,
}

impl IndexSpec {
    /// Creates a non-unique secondary index over `fields`.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            name: name.into(),
            fields,
            unique: false,
            primary: false,
            full_text: false,
        }
    }

    /// Marks this index as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks this index as full-text.
    #[must_use]
    pub fn full_text(mut self) -> Self {
        self.full_text = true;
        self
    }
}

/// Expected JSON type of a document field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// A JSON string.
    String,
    /// A JSON number.
    Number,
    /// A JSON boolean.
    Boolean,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// Structural validation rules applied to every document write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    /// Field paths that must be present and non-null.
    #[serde(default)]
    pub required: Vec<String>,
    /// Expected types by field path. Absent fields are not checked.
    #[serde(default)]
    pub types: BTreeMap<String, FieldType>,
}

/// Schema for one collection.
///
/// # Invariants
///
/// - Exactly one index is marked primary and its field list is
///   `[primary_key]`.
/// - Index names are unique within the collection.
///
/// [`CollectionSchema::validate`] checks these invariants; the registry
/// refuses to publish a schema that fails them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,
    /// Field path holding the document's primary key.
    pub primary_key: String,
    /// Whether caller-initiated writes are rejected.
    #[serde(default)]
    pub read_only: bool,
    /// Index definitions, in declaration order.
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    /// Optional structural validation rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRules>,
}

impl CollectionSchema {
    /// Creates a schema with the implicit primary index.
    #[must_use]
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let name = name.into();
        let primary_key = primary_key.into();
        let primary = IndexSpec {
            name: format!("{name}_primary"),
            fields: vec![primary_key.clone()],
            unique: true,
            primary: true,
            full_text: false,
        };
        Self {
            name,
            primary_key,
            read_only: false,
            indexes: vec![primary],
            validation: None,
        }
    }

    /// Adds an index, returning `self` for chaining.
    #[must_use]
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Sets validation rules, returning `self` for chaining.
    #[must_use]
    pub fn with_validation(mut self, rules: ValidationRules) -> Self {
        self.validation = Some(rules);
        self
    }

    /// Deserializes a schema from a JSON or YAML byte blob.
    ///
    /// # Errors
    ///
    /// Fails with `Validation` if the bytes parse under neither encoding.
    pub fn from_bytes(bytes: &[u8]) -> DbResult<Self> {
        if let Ok(schema) = serde_json::from_slice::<Self>(bytes) {
            return Ok(schema);
        }
        serde_yaml::from_slice(bytes)
            .map_err(|err| DbError::validation(format!("invalid schema blob: {err}")))
    }

    /// Serializes the schema to JSON bytes.
    ///
    /// # Errors
    ///
    /// Fails with `Serialization` if encoding fails.
    pub fn to_bytes(&self) -> DbResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Serializes the schema to YAML bytes.
    ///
    /// # Errors
    ///
    /// Fails with `Validation` if encoding fails.
    pub fn to_yaml_bytes(&self) -> DbResult<Vec<u8>> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|err| DbError::validation(format!("schema yaml encoding: {err}")))
    }

    /// Checks the schema's structural invariants.
    ///
    /// # Errors
    ///
    /// Fails with `Validation` on: empty collection name or primary key,
    /// duplicate index names, an index with no fields, zero or multiple
    /// primary indexes, a primary index whose fields differ from
    /// `[primary_key]`, or a primary index also marked full-text.
    pub fn validate(&self) -> DbResult<()> {
        if self.name.is_empty() {
            return Err(DbError::validation("collection name must not be empty"));
        }
        if self.primary_key.is_empty() {
            return Err(DbError::validation("primary key field must not be empty"));
        }
        let mut names = HashSet::new();
        let mut primaries = 0usize;
        for index in &self.indexes {
            if index.name.is_empty() {
                return Err(DbError::validation("index name must not be empty"));
            }
            if !names.insert(index.name.as_str()) {
                return Err(DbError::validation(format!(
                    "duplicate index name '{}' in collection '{}'",
                    index.name, self.name
                )));
            }
            if index.fields.is_empty() {
                return Err(DbError::validation(format!(
                    "index '{}' must declare at least one field",
                    index.name
                )));
            }
            if index.primary {
                primaries += 1;
                if index.fields != [self.primary_key.clone()] {
                    return Err(DbError::validation(format!(
                        "primary index '{}' must index exactly [{}]",
                        index.name, self.primary_key
                    )));
                }
                if index.full_text {
                    return Err(DbError::validation(format!(
                        "primary index '{}' cannot be full-text",
                        index.name
                    )));
                }
            }
        }
        if primaries != 1 {
            return Err(DbError::validation(format!(
                "collection '{}' must have exactly one primary index, found {primaries}",
                self.name
            )));
        }
        Ok(())
    }

    /// Looks up an index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Returns the primary index.
    ///
    /// # Errors
    ///
    /// Fails with `Internal` if the schema has no primary index; a
    /// validated schema always has one.
    pub fn primary_index(&self) -> DbResult<&IndexSpec> {
        self.indexes
            .iter()
            .find(|index| index.primary)
            .ok_or_else(|| {
                DbError::internal(format!("collection '{}' has no primary index", self.name))
            })
    }

    /// Extracts the document's primary key value as a string.
    #[must_use]
    pub fn primary_key_of(&self, document: &Document) -> Option<String> {
        match document.get(&self.primary_key)? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Validates a document against the schema's rules.
    ///
    /// # Errors
    ///
    /// Fails with `Validation` if a required field is absent or null, or
    /// a typed field holds a value of the wrong JSON type.
    pub fn validate_document(&self, document: &Document) -> DbResult<()> {
        let Some(rules) = &self.validation else {
            return Ok(());
        };
        for path in &rules.required {
            match document.get(path) {
                None | Some(Value::Null) => {
                    return Err(DbError::validation(format!(
                        "required field '{path}' is missing in collection '{}'",
                        self.name
                    )));
                }
                Some(_) => {}
            }
        }
        for (path, expected) in &rules.types {
            if let Some(value) = document.get(path) {
                if !value.is_null() && !expected.matches(value) {
                    return Err(DbError::validation(format!(
                        "field '{path}' has wrong type in collection '{}'",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_schema() -> CollectionSchema {
        CollectionSchema::new("user", "id")
            .with_index(IndexSpec::new("email_idx", vec!["contact.email".into()]).unique())
    }

    #[test]
    fn new_schema_has_primary_index() {
        let schema = CollectionSchema::new("user", "id");
        schema.validate().unwrap();
        let primary = schema.primary_index().unwrap();
        assert!(primary.unique);
        assert_eq!(primary.fields, vec!["id"]);
    }

    #[test]
    fn duplicate_index_names_rejected() {
        let schema = user_schema()
            .with_index(IndexSpec::new("email_idx", vec!["contact.email".into()]));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn missing_primary_index_rejected() {
        let mut schema = user_schema();
        schema.indexes.retain(|index| !index.primary);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn primary_index_field_mismatch_rejected() {
        let mut schema = user_schema();
        schema.indexes[0].fields = vec!["other".into()];
        assert!(schema.validate().is_err());
    }

    #[test]
    fn json_and_yaml_blobs_decode() {
        let schema = user_schema();
        let json_bytes = schema.to_bytes().unwrap();
        assert_eq!(CollectionSchema::from_bytes(&json_bytes).unwrap(), schema);

        let yaml_bytes = schema.to_yaml_bytes().unwrap();
        assert_eq!(CollectionSchema::from_bytes(&yaml_bytes).unwrap(), schema);
    }

    #[test]
    fn yaml_blob_with_defaults() {
        let blob = b"name: task\nprimaryKey: id\nindexes:\n  - name: task_primary\n    fields: [id]\n    unique: true\n    primary: true\n";
        let schema = CollectionSchema::from_bytes(blob).unwrap();
        schema.validate().unwrap();
        assert!(!schema.read_only);
        assert!(!schema.indexes[0].full_text);
    }

    #[test]
    fn malformed_blob_rejected() {
        let err = CollectionSchema::from_bytes(b"{{{not a schema").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[test]
    fn primary_key_extraction() {
        let schema = user_schema();
        let doc = Document::from_value(json!({"id": "u-1"})).unwrap();
        assert_eq!(schema.primary_key_of(&doc), Some("u-1".into()));

        let numeric = Document::from_value(json!({"id": 42})).unwrap();
        assert_eq!(schema.primary_key_of(&numeric), Some("42".into()));

        let missing = Document::new();
        assert_eq!(schema.primary_key_of(&missing), None);
    }

    #[test]
    fn required_and_typed_fields_enforced() {
        let schema = user_schema().with_validation(ValidationRules {
            required: vec!["name".into()],
            types: [("age".to_string(), FieldType::Number)].into(),
        });

        let ok = Document::from_value(json!({"id": "u-1", "name": "ada", "age": 30})).unwrap();
        schema.validate_document(&ok).unwrap();

        let missing = Document::from_value(json!({"id": "u-1", "age": 30})).unwrap();
        assert!(schema.validate_document(&missing).is_err());

        let wrong_type =
            Document::from_value(json!({"id": "u-1", "name": "ada", "age": "old"})).unwrap();
        assert!(schema.validate_document(&wrong_type).is_err());
    }
}
