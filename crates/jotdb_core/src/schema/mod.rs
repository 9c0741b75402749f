//! Collection schemas and the runtime schema registry.
//!
//! A [`CollectionSchema`] configures one collection: its primary key
//! field, secondary indexes, optional validation rules and a read-only
//! flag. Schemas are runtime values, serialized as JSON or YAML blobs,
//! and are swapped atomically through the [`SchemaRegistry`] so readers
//! always observe a complete schema snapshot.

mod collection;
mod registry;

pub use collection::{CollectionSchema, FieldType, IndexSpec, ValidationRules};
pub use registry::SchemaRegistry;
