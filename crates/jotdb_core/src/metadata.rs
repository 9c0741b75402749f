//! Request-scoped metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key marking an operation as engine-internal. Internal operations may
/// write to read-only collections (index backfill, system writes).
pub const METADATA_KEY_INTERNAL: &str = "_internal";

/// A request-scoped mapping of string keys to JSON values.
///
/// Metadata is propagated through the operation call chain so hooks and
/// observability code can tag context (user id, namespace, trace id). It
/// is never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    entries: BTreeMap<String, Value>,
}

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key to a value, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Sets a key to a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Gets the value stored at `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns true if this metadata marks an engine-internal operation.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.get(METADATA_KEY_INTERNAL)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Creates metadata marking an engine-internal operation, which may
    /// write to read-only collections.
    #[must_use]
    pub fn internal() -> Self {
        Self::new().with(METADATA_KEY_INTERNAL, true)
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }
}
