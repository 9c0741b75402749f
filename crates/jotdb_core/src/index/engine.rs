//! Applies index mutations in lock-step with document writes.

use super::encoding::encode_value;
use super::keys;
use crate::document::Document;
use crate::error::{DbError, DbResult};
use crate::schema::{CollectionSchema, IndexSpec};
use jotdb_kv::{KvTx, ScanOpts};
use serde_json::Value;

/// A deferred full-text engine mutation.
///
/// The key-value store's transaction cannot cover the full-text engine,
/// so full-text mutations are collected during the store transaction and
/// applied only after it commits.
#[derive(Debug, Clone)]
pub enum FtsOp {
    /// Index the document's designated fields.
    Index {
        /// Owning collection.
        collection: String,
        /// Document primary key.
        doc_id: String,
        /// Field paths fed to the full-text engine.
        fields: Vec<String>,
        /// The committed document state.
        document: Document,
    },
    /// Remove the document from the full-text index.
    Remove {
        /// Owning collection.
        collection: String,
        /// Document primary key.
        doc_id: String,
    },
}

/// Translates indexed field values into ordered byte encodings and keeps
/// index entries synchronized with document writes.
///
/// # Invariants
///
/// - Every mutation runs inside the caller's store transaction, so index
///   and document state commit or roll back together.
/// - A unique index's encoding maps to at most one primary key at any
///   committed state.
#[derive(Debug, Default)]
pub struct IndexEngine;

impl IndexEngine {
    /// Creates an index engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Encodes a document's values for `index`, in field declaration
    /// order. Absent fields encode as null.
    #[must_use]
    pub fn encode_fields(index: &IndexSpec, document: &Document) -> Vec<Vec<u8>> {
        index
            .fields
            .iter()
            .map(|field| encode_value(document.get(field).unwrap_or(&Value::Null)))
            .collect()
    }

    /// Applies index maintenance for one document write.
    ///
    /// For each secondary index: computes the old entry (when updating)
    /// and the new entry, probes unique indexes for a colliding owner,
    /// deletes the stale entry and inserts the new one. Full-text index
    /// work is appended to `fts_ops` for post-commit application.
    ///
    /// # Errors
    ///
    /// Fails with `Conflict` if a unique index already maps the new
    /// encoding to a different document.
    pub fn apply_write(
        &self,
        tx: &mut dyn KvTx,
        schema: &CollectionSchema,
        before: Option<&Document>,
        after: &Document,
        doc_id: &str,
        fts_ops: &mut Vec<FtsOp>,
    ) -> DbResult<()> {
        let mut pending = Vec::new();
        for index in &schema.indexes {
            if index.primary {
                continue;
            }
            if index.full_text {
                fts_ops.push(FtsOp::Index {
                    collection: schema.name.clone(),
                    doc_id: doc_id.to_string(),
                    fields: index.fields.clone(),
                    document: after.clone(),
                });
                continue;
            }
            let new_encoded = Self::encode_fields(index, after);
            let old_encoded = before.map(|doc| Self::encode_fields(index, doc));
            let unchanged = old_encoded.as_ref() == Some(&new_encoded);
            pending.push((index, new_encoded, old_encoded, unchanged));
        }

        // probe every unique index before mutating anything, so a
        // conflict leaves no partial entries behind
        for (index, new_encoded, _, unchanged) in &pending {
            if index.unique && !*unchanged {
                self.probe_unique(tx, schema, index, new_encoded, doc_id)?;
            }
        }

        for (index, new_encoded, old_encoded, unchanged) in pending {
            if let Some(old) = old_encoded {
                if !unchanged {
                    tx.delete(&keys::index_entry_key(
                        &schema.name,
                        &index.name,
                        &old,
                        doc_id,
                    ))
                    .map_err(DbError::from)?;
                }
            }
            tx.set(
                &keys::index_entry_key(&schema.name, &index.name, &new_encoded, doc_id),
                doc_id.as_bytes(),
            )
            .map_err(DbError::from)?;
        }
        Ok(())
    }

    /// Removes every index entry for a deleted document.
    pub fn apply_delete(
        &self,
        tx: &mut dyn KvTx,
        schema: &CollectionSchema,
        document: &Document,
        doc_id: &str,
        fts_ops: &mut Vec<FtsOp>,
    ) -> DbResult<()> {
        let mut removed_fts = false;
        for index in &schema.indexes {
            if index.primary {
                continue;
            }
            if index.full_text {
                if !removed_fts {
                    fts_ops.push(FtsOp::Remove {
                        collection: schema.name.clone(),
                        doc_id: doc_id.to_string(),
                    });
                    removed_fts = true;
                }
                continue;
            }
            let encoded = Self::encode_fields(index, document);
            tx.delete(&keys::index_entry_key(
                &schema.name,
                &index.name,
                &encoded,
                doc_id,
            ))
            .map_err(DbError::from)?;
        }
        Ok(())
    }

    /// Inserts entries for `index` from every existing document in the
    /// collection.
    ///
    /// # Errors
    ///
    /// Fails with `Conflict` if a unique index finds two existing
    /// documents with the same encoding.
    pub fn backfill(
        &self,
        tx: &mut dyn KvTx,
        schema: &CollectionSchema,
        index: &IndexSpec,
        fts_ops: &mut Vec<FtsOp>,
    ) -> DbResult<()> {
        let docs = tx
            .scan(ScanOpts::prefix(keys::document_prefix(&schema.name)))
            .map_err(DbError::from)?;
        for (_, bytes) in docs {
            let document = Document::from_bytes(&bytes)?;
            let doc_id = schema.primary_key_of(&document).ok_or_else(|| {
                DbError::internal(format!(
                    "stored document in '{}' lacks its primary key",
                    schema.name
                ))
            })?;
            if index.full_text {
                fts_ops.push(FtsOp::Index {
                    collection: schema.name.clone(),
                    doc_id,
                    fields: index.fields.clone(),
                    document,
                });
                continue;
            }
            let encoded = Self::encode_fields(index, &document);
            if index.unique {
                self.probe_unique(tx, schema, index, &encoded, &doc_id)?;
            }
            tx.set(
                &keys::index_entry_key(&schema.name, &index.name, &encoded, &doc_id),
                doc_id.as_bytes(),
            )
            .map_err(DbError::from)?;
        }
        Ok(())
    }

    /// Deletes every entry of `index_name` in `collection`.
    pub fn purge(&self, tx: &mut dyn KvTx, collection: &str, index_name: &str) -> DbResult<()> {
        let entries = tx
            .scan(ScanOpts::prefix(keys::index_prefix(collection, index_name)))
            .map_err(DbError::from)?;
        for (key, _) in entries {
            tx.delete(&key).map_err(DbError::from)?;
        }
        Ok(())
    }

    /// Checks whether another document already owns `encoded` in a
    /// unique index.
    ///
    /// Entry keys are never parsed (encodings may contain the key
    /// separator); an exact match is an entry whose key is the value
    /// prefix followed by the owner id stored in the entry's value.
    fn probe_unique(
        &self,
        tx: &mut dyn KvTx,
        schema: &CollectionSchema,
        index: &IndexSpec,
        encoded: &[Vec<u8>],
        doc_id: &str,
    ) -> DbResult<()> {
        let prefix = keys::index_value_prefix(&schema.name, &index.name, encoded);
        let entries = tx
            .scan(ScanOpts::prefix(prefix.clone()))
            .map_err(DbError::from)?;
        for (key, owner) in entries {
            let exact = key.len() == prefix.len() + owner.len() && key.ends_with(&owner);
            if exact && owner != doc_id.as_bytes() {
                return Err(DbError::conflict(format!(
                    "unique index '{}' on ({}) already contains this value",
                    index.name,
                    index.fields.join(", ")
                )));
            }
        }
        Ok(())
    }
}
