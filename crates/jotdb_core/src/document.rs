//! Dynamic JSON document model.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The type of change made to a document field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldOp {
    /// A field value was added.
    Add,
    /// A field value was replaced.
    Replace,
    /// A field value was removed.
    Remove,
}

/// A change to a single document field, in dotted-path form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    /// The kind of change.
    pub op: FieldOp,
    /// Dotted path to the field.
    pub path: String,
    /// New value (absent for removals).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Previous value (absent for additions).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_value: Option<Value>,
}

/// A JSON document: an ordered JSON object with dotted-path field access.
///
/// Documents are plain values - they carry no collection identity of
/// their own. The owning schema determines which field is the primary
/// key. Field order is preserved through serialization round-trips.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    body: Map<String, Value>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a document from a JSON value.
    ///
    /// # Errors
    ///
    /// Fails with `Validation` if the value is not a JSON object.
    pub fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::Object(body) => Ok(Self { body }),
            other => Err(DbError::validation(format!(
                "document must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Creates a document from raw JSON bytes.
    ///
    /// # Errors
    ///
    /// Fails with `Validation` on malformed JSON or a non-object root.
    pub fn from_bytes(bytes: &[u8]) -> DbResult<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|err| DbError::validation(format!("invalid json: {err}")))?;
        Self::from_value(value)
    }

    /// Serializes the document to JSON bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.body).unwrap_or_default()
    }

    /// Serializes the document to YAML bytes.
    #[must_use]
    pub fn to_yaml_bytes(&self) -> Vec<u8> {
        serde_yaml::to_string(&self.body)
            .map(String::into_bytes)
            .unwrap_or_default()
    }

    /// Returns the document as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }

    /// Returns true if the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Gets a field by dotted path. Returns `None` if any path segment
    /// is absent or a non-object intermediate is encountered.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.body.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Gets a string field by dotted path.
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Gets a numeric field by dotted path.
    #[must_use]
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    /// Sets a field by dotted path, creating intermediate objects as
    /// needed. Non-object intermediates are replaced with objects.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let value = value.into();
        let segments: Vec<&str> = path.split('.').collect();
        let mut current = &mut self.body;
        for segment in &segments[..segments.len() - 1] {
            let entry = current
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = entry.as_object_mut().unwrap_or_else(|| unreachable!());
        }
        if let Some(last) = segments.last() {
            current.insert((*last).to_string(), value);
        }
    }

    /// Deletes a field by dotted path. Returns the removed value, if any.
    pub fn del(&mut self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut current = &mut self.body;
        for segment in &segments[..segments.len() - 1] {
            current = current.get_mut(*segment)?.as_object_mut()?;
        }
        current.remove(*segments.last()?)
    }

    /// Deep-merges `with` into this document: nested objects are merged
    /// field by field, all other values are replaced.
    pub fn merge(&mut self, with: &Document) {
        merge_objects(&mut self.body, &with.body);
    }

    /// Returns the dotted paths of all leaf fields, in document order.
    #[must_use]
    pub fn field_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_paths(&self.body, String::new(), &mut paths);
        paths
    }

    /// Computes the field-level changes from `before` to this document.
    #[must_use]
    pub fn diff(&self, before: &Document) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        for path in before.field_paths() {
            match self.get(&path) {
                None => changes.push(FieldChange {
                    op: FieldOp::Remove,
                    path: path.clone(),
                    value: None,
                    before_value: before.get(&path).cloned(),
                }),
                Some(after_value) => {
                    let before_value = before.get(&path);
                    if before_value != Some(after_value) {
                        changes.push(FieldChange {
                            op: FieldOp::Replace,
                            path: path.clone(),
                            value: Some(after_value.clone()),
                            before_value: before_value.cloned(),
                        });
                    }
                }
            }
        }
        for path in self.field_paths() {
            if before.get(&path).is_none() {
                changes.push(FieldChange {
                    op: FieldOp::Add,
                    path: path.clone(),
                    value: self.get(&path).cloned(),
                    before_value: None,
                });
            }
        }
        changes
    }
}

impl std::fmt::Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(&self.body) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn merge_objects(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_objects(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn collect_paths(object: &Map<String, Value>, prefix: String, paths: &mut Vec<String>) {
    for (key, value) in object {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => {
                collect_paths(nested, path, paths);
            }
            _ => paths.push(path),
        }
    }
}
