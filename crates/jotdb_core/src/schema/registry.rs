//! Runtime registry of published collection schemas.

use super::CollectionSchema;
use crate::error::{DbError, DbResult};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Registry of the currently published schema per collection.
///
/// Readers snapshot an `Arc<CollectionSchema>` under a short read lock
/// and operate on it without holding the lock. Publishing replaces the
/// pointer under the write lock, so a reader sees either the old or the
/// new schema, never a partially updated one.
///
/// Indexes still being backfilled are tracked separately: the planner
/// skips them until [`SchemaRegistry::clear_building`] runs, so queries
/// never observe a partially populated index.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    collections: RwLock<HashMap<String, Arc<CollectionSchema>>>,
    building: RwLock<HashSet<(String, String)>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots the published schema for `collection`.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if the collection is not configured.
    pub fn get(&self, collection: &str) -> DbResult<Arc<CollectionSchema>> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .ok_or_else(|| DbError::not_found(format!("collection '{collection}'")))
    }

    /// Returns true if `collection` is configured.
    #[must_use]
    pub fn exists(&self, collection: &str) -> bool {
        self.collections.read().contains_key(collection)
    }

    /// Publishes `schema` as the current snapshot for its collection.
    ///
    /// # Errors
    ///
    /// Fails with `Validation` if the schema's invariants do not hold.
    pub fn publish(&self, schema: CollectionSchema) -> DbResult<Arc<CollectionSchema>> {
        schema.validate()?;
        let schema = Arc::new(schema);
        self.collections
            .write()
            .insert(schema.name.clone(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Removes a collection's schema. Returns the removed snapshot, if any.
    pub fn remove(&self, collection: &str) -> Option<Arc<CollectionSchema>> {
        self.building
            .write()
            .retain(|(owner, _)| owner != collection);
        self.collections.write().remove(collection)
    }

    /// Returns the configured collection names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Marks an index as still backfilling.
    pub fn mark_building(&self, collection: &str, index: &str) {
        self.building
            .write()
            .insert((collection.to_string(), index.to_string()));
    }

    /// Clears the backfilling mark for an index.
    pub fn clear_building(&self, collection: &str, index: &str) {
        self.building
            .write()
            .remove(&(collection.to_string(), index.to_string()));
    }

    /// Returns true if the index is still backfilling.
    #[must_use]
    pub fn is_building(&self, collection: &str, index: &str) -> bool {
        self.building
            .read()
            .contains(&(collection.to_string(), index.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexSpec;

    #[test]
    fn publish_and_get() {
        let registry = SchemaRegistry::new();
        registry
            .publish(CollectionSchema::new("user", "id"))
            .unwrap();
        let snapshot = registry.get("user").unwrap();
        assert_eq!(snapshot.primary_key, "id");
        assert!(registry.exists("user"));
    }

    #[test]
    fn get_unknown_collection_is_not_found() {
        let registry = SchemaRegistry::new();
        let err = registry.get("missing").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[test]
    fn publish_rejects_invalid_schema() {
        let registry = SchemaRegistry::new();
        let mut schema = CollectionSchema::new("user", "id");
        schema.indexes.push(IndexSpec::new("user_primary", vec!["id".into()]));
        assert!(registry.publish(schema).is_err());
        assert!(!registry.exists("user"));
    }

    #[test]
    fn snapshots_outlive_republish() {
        let registry = SchemaRegistry::new();
        registry
            .publish(CollectionSchema::new("user", "id"))
            .unwrap();
        let old = registry.get("user").unwrap();

        let updated = CollectionSchema::new("user", "id")
            .with_index(IndexSpec::new("email_idx", vec!["contact.email".into()]));
        registry.publish(updated).unwrap();

        assert_eq!(old.indexes.len(), 1);
        assert_eq!(registry.get("user").unwrap().indexes.len(), 2);
    }

    #[test]
    fn building_marks() {
        let registry = SchemaRegistry::new();
        registry.mark_building("user", "email_idx");
        assert!(registry.is_building("user", "email_idx"));
        registry.clear_building("user", "email_idx");
        assert!(!registry.is_building("user", "email_idx"));
    }

    #[test]
    fn remove_clears_building_marks() {
        let registry = SchemaRegistry::new();
        registry
            .publish(CollectionSchema::new("user", "id"))
            .unwrap();
        registry.mark_building("user", "email_idx");
        registry.remove("user");
        assert!(!registry.exists("user"));
        assert!(!registry.is_building("user", "email_idx"));
    }

    #[test]
    fn names_are_sorted() {
        let registry = SchemaRegistry::new();
        registry
            .publish(CollectionSchema::new("task", "id"))
            .unwrap();
        registry
            .publish(CollectionSchema::new("account", "id"))
            .unwrap();
        assert_eq!(registry.names(), vec!["account", "task"]);
    }
}
