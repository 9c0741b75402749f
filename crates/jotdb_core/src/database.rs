//! The database facade: schema administration, reads, and transaction
//! entry points.

use crate::change_stream::{ChangeStream, DocumentChange, Subscriber};
use crate::config::DatabaseConfig;
use crate::document::Document;
use crate::error::{DbError, DbResult};
use crate::hooks::{HookPipeline, Interceptor};
use crate::index::{keys, FtsOp, FullTextEngine, IndexEngine, MemoryFullText};
use crate::metadata::Metadata;
use crate::query::executor::Executor;
use crate::query::{AggregateRequest, Page, Query, Scan};
use crate::schema::{CollectionSchema, IndexSpec, SchemaRegistry};
use crate::transaction::{Action, Operation, Transaction, TxMode};
use jotdb_kv::{KvStore, KvTx, ScanOpts};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds a [`Database`] with custom configuration, interceptors and a
/// full-text engine.
pub struct DatabaseBuilder {
    config: DatabaseConfig,
    hooks: HookPipeline,
    fts: Option<Arc<dyn FullTextEngine>>,
}

impl DatabaseBuilder {
    fn new() -> Self {
        Self {
            config: DatabaseConfig::default(),
            hooks: HookPipeline::new(),
            fts: None,
        }
    }

    /// Replaces the default configuration.
    #[must_use]
    pub fn config(mut self, config: DatabaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers an interceptor; the first registered is the outermost.
    #[must_use]
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.hooks.register(interceptor);
        self
    }

    /// Replaces the in-memory full-text engine.
    #[must_use]
    pub fn full_text_engine(mut self, fts: Arc<dyn FullTextEngine>) -> Self {
        self.fts = Some(fts);
        self
    }

    /// Opens a database over `kv`, republishing any schemas persisted by
    /// earlier runs.
    ///
    /// # Errors
    ///
    /// Fails if persisted schema blobs cannot be read or no longer
    /// validate.
    pub fn open(self, kv: Arc<dyn KvStore>) -> DbResult<Database> {
        let db = Database {
            kv,
            registry: SchemaRegistry::new(),
            indexes: IndexEngine::new(),
            fts: self.fts.unwrap_or_else(|| Arc::new(MemoryFullText::new())),
            hooks: self.hooks,
            changes: ChangeStream::new(self.config.change_stream_capacity),
            config: self.config,
        };
        db.load_persisted_schemas()?;
        Ok(db)
    }
}

/// An embeddable JSON document database over an ordered key-value store.
pub struct Database {
    kv: Arc<dyn KvStore>,
    registry: SchemaRegistry,
    indexes: IndexEngine,
    fts: Arc<dyn FullTextEngine>,
    hooks: HookPipeline,
    changes: ChangeStream,
    config: DatabaseConfig,
}

impl Database {
    /// Opens a database with default configuration.
    ///
    /// # Errors
    ///
    /// Fails if persisted schema blobs cannot be read.
    pub fn open(kv: Arc<dyn KvStore>) -> DbResult<Self> {
        Self::builder().open(kv)
    }

    /// Returns a builder for customized construction.
    #[must_use]
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    pub(crate) fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }

    pub(crate) fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    fn load_persisted_schemas(&self) -> DbResult<()> {
        let mut tx = self.kv.begin(false).map_err(DbError::from)?;
        let blobs = tx
            .scan(ScanOpts::prefix(keys::schema_prefix()))
            .map_err(DbError::from)?;
        let count = blobs.len();
        for (_, blob) in blobs {
            let schema = CollectionSchema::from_bytes(&blob)?;
            self.registry.publish(schema)?;
        }
        if count > 0 {
            info!(collections = count, "republished persisted schemas");
        }
        Ok(())
    }

    /// Creates a new collection from a typed schema.
    ///
    /// # Errors
    ///
    /// Fails with `Conflict` if the collection already exists, or with
    /// `Validation` on a structurally invalid schema.
    pub fn create_collection(&self, schema: CollectionSchema) -> DbResult<Arc<CollectionSchema>> {
        if self.registry.exists(&schema.name) {
            return Err(DbError::conflict(format!(
                "collection '{}' already exists",
                schema.name
            )));
        }
        self.apply_schema(schema)
    }

    /// Atomically replaces a collection's schema from a JSON or YAML
    /// blob, creating the collection if it does not exist.
    ///
    /// Indexes dropped by the new schema have their entries purged;
    /// indexes it adds are backfilled from existing documents before
    /// they become visible to the planner. On any failure the previous
    /// schema remains published and no entries change.
    ///
    /// # Errors
    ///
    /// Fails with `Validation` on a malformed or structurally invalid
    /// schema, and with `Conflict` if backfill races a concurrent
    /// commit; retrying the call is safe.
    pub fn configure_collection(&self, blob: &[u8]) -> DbResult<Arc<CollectionSchema>> {
        let schema = CollectionSchema::from_bytes(blob)?;
        self.apply_schema(schema)
    }

    /// Adds or replaces an index on an existing collection.
    ///
    /// # Errors
    ///
    /// Fails like [`Database::configure_collection`].
    pub fn set_index(&self, collection: &str, index: IndexSpec) -> DbResult<Arc<CollectionSchema>> {
        let mut schema = (*self.registry.get(collection)?).clone();
        schema.indexes.retain(|existing| existing.name != index.name);
        schema.indexes.push(index);
        self.apply_schema(schema)
    }

    /// Drops an index from an existing collection and purges its
    /// entries.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if the index does not exist, or with
    /// `Validation` when dropping the primary index.
    pub fn del_index(&self, collection: &str, name: &str) -> DbResult<Arc<CollectionSchema>> {
        let mut schema = (*self.registry.get(collection)?).clone();
        let Some(index) = schema.index(name) else {
            return Err(DbError::not_found(format!(
                "index '{name}' in collection '{collection}'"
            )));
        };
        if index.primary {
            return Err(DbError::validation("the primary index cannot be dropped"));
        }
        schema.indexes.retain(|existing| existing.name != name);
        self.apply_schema(schema)
    }

    fn apply_schema(&self, schema: CollectionSchema) -> DbResult<Arc<CollectionSchema>> {
        schema.validate()?;
        let old = self.registry.get(&schema.name).ok();

        let old_indexes: &[IndexSpec] = old.as_ref().map(|o| o.indexes.as_slice()).unwrap_or(&[]);
        let added: Vec<IndexSpec> = schema
            .indexes
            .iter()
            .filter(|index| !index.primary && !old_indexes.contains(*index))
            .cloned()
            .collect();
        let dropped: Vec<IndexSpec> = old_indexes
            .iter()
            .filter(|index| !index.primary && !schema.indexes.contains(*index))
            .cloned()
            .collect();

        // Publish first so concurrent writes maintain the new indexes.
        // Added and dropped indexes are both marked in-flux: the planner
        // routes around them until the storage swap commits, so a query
        // never reads a half-backfilled or half-purged index.
        for index in added.iter().chain(&dropped) {
            self.registry.mark_building(&schema.name, &index.name);
        }
        let published = self.registry.publish(schema)?;

        let result = self.reconfigure_storage(&published, &added, &dropped);
        match result {
            Ok(fts_ops) => {
                for index in added.iter().chain(&dropped) {
                    self.registry.clear_building(&published.name, &index.name);
                }
                self.finish_commit(fts_ops, Vec::new());
                debug!(
                    collection = %published.name,
                    added = added.len(),
                    dropped = dropped.len(),
                    "collection reconfigured"
                );
                Ok(published)
            }
            Err(err) => {
                for index in added.iter().chain(&dropped) {
                    self.registry.clear_building(&published.name, &index.name);
                }
                match old {
                    Some(old) => {
                        let _ = self.registry.publish((*old).clone());
                    }
                    None => {
                        self.registry.remove(&published.name);
                    }
                }
                Err(err)
            }
        }
    }

    /// Purges dropped indexes, backfills added ones and persists the
    /// schema blob, all in one store transaction.
    fn reconfigure_storage(
        &self,
        schema: &CollectionSchema,
        added: &[IndexSpec],
        dropped: &[IndexSpec],
    ) -> DbResult<Vec<FtsOp>> {
        let mut fts_ops = Vec::new();
        let mut tx = self.kv.begin(true).map_err(DbError::from)?;

        for index in dropped {
            self.indexes.purge(tx.as_mut(), &schema.name, &index.name)?;
            if index.full_text && !schema.indexes.iter().any(|i| i.full_text) {
                let docs = tx
                    .scan(ScanOpts::prefix(keys::document_prefix(&schema.name)))
                    .map_err(DbError::from)?;
                for (_, bytes) in docs {
                    let document = Document::from_bytes(&bytes)?;
                    if let Some(doc_id) = schema.primary_key_of(&document) {
                        fts_ops.push(FtsOp::Remove {
                            collection: schema.name.clone(),
                            doc_id,
                        });
                    }
                }
            }
        }
        for index in added {
            // stray entries can remain from an earlier aborted
            // reconfigure; start clean so backfill is idempotent
            self.indexes.purge(tx.as_mut(), &schema.name, &index.name)?;
            self.indexes
                .backfill(tx.as_mut(), schema, index, &mut fts_ops)?;
        }
        tx.set(&keys::schema_key(&schema.name), &schema.to_bytes()?)
            .map_err(DbError::from)?;
        tx.commit().map_err(DbError::from)?;
        Ok(fts_ops)
    }

    /// Snapshots a collection's published schema.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if the collection is not configured.
    pub fn get_schema(&self, collection: &str) -> DbResult<Arc<CollectionSchema>> {
        self.registry.get(collection)
    }

    /// Serializes a collection's published schema to JSON bytes.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if the collection is not configured.
    pub fn schema_bytes(&self, collection: &str) -> DbResult<Vec<u8>> {
        self.registry.get(collection)?.to_bytes()
    }

    /// Returns the configured collection names, sorted.
    #[must_use]
    pub fn collections(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot open a write transaction.
    pub fn transaction(&self, mode: TxMode) -> DbResult<Transaction<'_>> {
        Transaction::new(self, mode, Metadata::new())
    }

    /// Opens a transaction carrying request metadata for hooks.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot open a write transaction.
    pub fn transaction_with(&self, mode: TxMode, metadata: Metadata) -> DbResult<Transaction<'_>> {
        Transaction::new(self, mode, metadata)
    }

    /// Runs `f` inside a transaction, committing on success and rolling
    /// back on error.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or the commit error.
    pub fn tx_fn<T>(
        &self,
        mode: TxMode,
        f: impl FnOnce(&mut Transaction<'_>) -> DbResult<T>,
    ) -> DbResult<T> {
        let mut tx = self.transaction(mode)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    /// Fetches a document by primary key.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if the collection or document is missing.
    pub fn get(&self, collection: &str, doc_id: &str) -> DbResult<Document> {
        let mut tx = self.kv.begin(false).map_err(DbError::from)?;
        self.get_in_tx(tx.as_mut(), collection, doc_id)?
            .ok_or_else(|| DbError::not_found(format!("document '{doc_id}' in '{collection}'")))
    }

    /// Executes a query through the hook pipeline.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` for an unknown collection and `Validation`
    /// for a malformed query.
    pub fn query(&self, metadata: &Metadata, collection: &str, query: Query) -> DbResult<Page> {
        self.registry.get(collection)?;
        let mut terminal = |_md: &Metadata, q: Query| {
            let mut tx = self.kv.begin(false).map_err(DbError::from)?;
            self.query_in_tx(tx.as_mut(), collection, &q)
        };
        self.hooks.query(metadata, collection, query, &mut terminal)
    }

    /// Computes aggregates through the hook pipeline.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` for an unknown collection and `Validation`
    /// for a malformed request.
    pub fn aggregate(
        &self,
        metadata: &Metadata,
        collection: &str,
        request: AggregateRequest,
    ) -> DbResult<Document> {
        let schema = self.registry.get(collection)?;
        let mut terminal = |_md: &Metadata, r: AggregateRequest| {
            let mut tx = self.kv.begin(false).map_err(DbError::from)?;
            let executor = Executor {
                schema: &schema,
                registry: &self.registry,
                fts: self.fts.as_ref(),
                config: &self.config,
            };
            executor.aggregate(tx.as_mut(), &r)
        };
        self.hooks
            .aggregate(metadata, collection, request, &mut terminal)
    }

    /// Traverses a collection through the hook pipeline. The
    /// cancellation flag is polled between document reads; when set, the
    /// scan fails with `Canceled` and returns no partial result.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` for an unknown collection or `Canceled`.
    pub fn scan(
        &self,
        metadata: &Metadata,
        collection: &str,
        scan: Scan,
        cancel: &AtomicBool,
    ) -> DbResult<Vec<Document>> {
        let schema = self.registry.get(collection)?;
        let mut terminal = |_md: &Metadata, s: Scan| {
            let mut tx = self.kv.begin(false).map_err(DbError::from)?;
            let executor = Executor {
                schema: &schema,
                registry: &self.registry,
                fts: self.fts.as_ref(),
                config: &self.config,
            };
            executor.scan(tx.as_mut(), &s, cancel)
        };
        self.hooks.scan(metadata, collection, scan, &mut terminal)
    }

    /// Registers a change stream subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Subscriber {
        self.changes.subscribe()
    }

    pub(crate) fn get_in_tx(
        &self,
        tx: &mut dyn KvTx,
        collection: &str,
        doc_id: &str,
    ) -> DbResult<Option<Document>> {
        self.registry.get(collection)?;
        let bytes = tx
            .get(&keys::document_key(collection, doc_id))
            .map_err(DbError::from)?;
        bytes.map(|bytes| Document::from_bytes(&bytes)).transpose()
    }

    pub(crate) fn query_in_tx(
        &self,
        tx: &mut dyn KvTx,
        collection: &str,
        query: &Query,
    ) -> DbResult<Page> {
        let schema = self.registry.get(collection)?;
        let executor = Executor {
            schema: &schema,
            registry: &self.registry,
            fts: self.fts.as_ref(),
            config: &self.config,
        };
        executor.execute(tx, query)
    }

    /// Runs one document operation through the persist hook chain, into
    /// the given store transaction.
    pub(crate) fn persist_with_hooks(
        &self,
        tx: &mut dyn KvTx,
        metadata: &Metadata,
        operation: Operation,
        fts_ops: &mut Vec<FtsOp>,
        events: &mut Vec<DocumentChange>,
    ) -> DbResult<Document> {
        let mut terminal = |md: &Metadata, op: Operation| {
            self.apply_operation(&mut *tx, md, op, &mut *fts_ops, &mut *events)
        };
        self.hooks.persist(metadata, operation, &mut terminal)
    }

    fn apply_operation(
        &self,
        tx: &mut dyn KvTx,
        metadata: &Metadata,
        operation: Operation,
        fts_ops: &mut Vec<FtsOp>,
        events: &mut Vec<DocumentChange>,
    ) -> DbResult<Document> {
        let schema = self.registry.get(&operation.collection)?;
        if schema.read_only && !metadata.is_internal() {
            return Err(DbError::validation(format!(
                "collection '{}' is read-only",
                schema.name
            )));
        }
        let doc_id = operation
            .doc_id
            .ok_or_else(|| DbError::internal("operation lost its primary key"))?;
        let existing = tx
            .get(&keys::document_key(&schema.name, &doc_id))
            .map_err(DbError::from)?
            .map(|bytes| Document::from_bytes(&bytes))
            .transpose()?;

        match operation.action {
            Action::Create => {
                let document = operation
                    .document
                    .ok_or_else(|| DbError::validation("create requires a document"))?;
                if existing.is_some() {
                    return Err(DbError::conflict(format!(
                        "document '{doc_id}' already exists in '{}'",
                        schema.name
                    )));
                }
                self.write_document(
                    tx, &schema, Action::Create, None, document, &doc_id, fts_ops, events,
                )
            }
            Action::Set => {
                let document = operation
                    .document
                    .ok_or_else(|| DbError::validation("set requires a document"))?;
                self.write_document(
                    tx, &schema, Action::Set, existing, document, &doc_id, fts_ops, events,
                )
            }
            Action::Update => {
                let patch = operation
                    .document
                    .ok_or_else(|| DbError::validation("update requires a patch document"))?;
                let before = existing.ok_or_else(|| {
                    DbError::not_found(format!("document '{doc_id}' in '{}'", schema.name))
                })?;
                let mut after = before.clone();
                after.merge(&patch);
                if schema.primary_key_of(&after).as_deref() != Some(doc_id.as_str()) {
                    return Err(DbError::validation(format!(
                        "primary key '{}' is immutable",
                        schema.primary_key
                    )));
                }
                self.write_document(
                    tx,
                    &schema,
                    Action::Update,
                    Some(before),
                    after,
                    &doc_id,
                    fts_ops,
                    events,
                )
            }
            Action::Delete => {
                let before = existing.ok_or_else(|| {
                    DbError::not_found(format!("document '{doc_id}' in '{}'", schema.name))
                })?;
                self.indexes
                    .apply_delete(tx, &schema, &before, &doc_id, fts_ops)?;
                tx.delete(&keys::document_key(&schema.name, &doc_id))
                    .map_err(DbError::from)?;
                events.push(DocumentChange {
                    collection: schema.name.clone(),
                    doc_id,
                    action: Action::Delete,
                    before: Some(before.clone()),
                    after: None,
                    diff: Vec::new(),
                });
                Ok(before)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_document(
        &self,
        tx: &mut dyn KvTx,
        schema: &CollectionSchema,
        action: Action,
        before: Option<Document>,
        after: Document,
        doc_id: &str,
        fts_ops: &mut Vec<FtsOp>,
        events: &mut Vec<DocumentChange>,
    ) -> DbResult<Document> {
        schema.validate_document(&after)?;
        self.indexes
            .apply_write(tx, schema, before.as_ref(), &after, doc_id, fts_ops)?;
        tx.set(
            &keys::document_key(&schema.name, doc_id),
            &after.to_bytes(),
        )
        .map_err(DbError::from)?;
        let diff = match &before {
            Some(before) => after.diff(before),
            None => after.diff(&Document::new()),
        };
        events.push(DocumentChange {
            collection: schema.name.clone(),
            doc_id: doc_id.to_string(),
            action,
            before,
            after: Some(after.clone()),
            diff,
        });
        Ok(after)
    }

    /// Applies deferred full-text mutations and publishes change
    /// notifications for a committed transaction. Neither can fail the
    /// commit they follow.
    pub(crate) fn finish_commit(&self, fts_ops: Vec<FtsOp>, events: Vec<DocumentChange>) {
        for op in fts_ops {
            let result = match op {
                FtsOp::Index {
                    collection,
                    doc_id,
                    fields,
                    document,
                } => self
                    .fts
                    .index_document(&collection, &fields, &doc_id, &document),
                FtsOp::Remove { collection, doc_id } => {
                    self.fts.remove_document(&collection, &doc_id)
                }
            };
            if let Err(err) = result {
                warn!(%err, "full-text engine update failed after commit");
            }
        }
        for event in events {
            self.changes.publish(&event);
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("collections", &self.collections())
            .field("hooks", &self.hooks)
            .finish()
    }
}
