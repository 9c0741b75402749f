//! Buffered, atomically committed document transactions.
//!
//! A [`Transaction`] sequences Create/Set/Update/Delete operations
//! against one store transaction. `interactive` mode applies validation
//! and index maintenance as each operation is issued, so errors surface
//! at the call that caused them; `batch` mode defers all of that to
//! commit time for bulk-load throughput. Either way the document and
//! index mutations of the whole transaction commit atomically, and
//! nothing is visible to other transactions before commit.

mod protocol;

pub use protocol::{serve, TxAction, TxRequest, TxResponse};

use crate::change_stream::DocumentChange;
use crate::database::Database;
use crate::document::Document;
use crate::error::{DbError, DbResult};
use crate::index::FtsOp;
use crate::metadata::Metadata;
use crate::query::{Page, Query};
use jotdb_kv::KvTx;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a document operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Insert a new document; fails if the primary key already exists.
    Create,
    /// Insert or fully replace a document.
    Set,
    /// Deep-merge a patch into an existing document.
    Update,
    /// Remove an existing document.
    Delete,
}

/// Isolation/throughput mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxMode {
    /// Validation and index maintenance run per operation.
    Interactive,
    /// Validation and index maintenance are deferred to commit.
    Batch,
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Accepting operations.
    Open,
    /// Committed; terminal.
    Committed,
    /// Rolled back; terminal.
    RolledBack,
}

/// One buffered document operation.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Operation kind.
    pub action: Action,
    /// Target collection.
    pub collection: String,
    /// Target primary key; always set for update/delete.
    pub doc_id: Option<String>,
    /// Payload document or patch; absent for delete.
    pub document: Option<Document>,
}

/// An open unit of work against a [`Database`].
///
/// Operations are applied to the store in submission order. No effect
/// is visible to other transactions until [`Transaction::commit`]
/// succeeds. After commit or rollback, further operations fail with
/// `Internal`.
pub struct Transaction<'db> {
    db: &'db Database,
    metadata: Metadata,
    mode: TxMode,
    state: TxState,
    kv_tx: Option<Box<dyn KvTx + 'db>>,
    buffer: Vec<Operation>,
    fts_ops: Vec<FtsOp>,
    events: Vec<DocumentChange>,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(db: &'db Database, mode: TxMode, metadata: Metadata) -> DbResult<Self> {
        let kv_tx = match mode {
            TxMode::Interactive => Some(db.kv().begin(true).map_err(DbError::from)?),
            TxMode::Batch => None,
        };
        Ok(Self {
            db,
            metadata,
            mode,
            state: TxState::Open,
            kv_tx,
            buffer: Vec::new(),
            fts_ops: Vec::new(),
            events: Vec::new(),
        })
    }

    /// Returns the transaction's mode.
    #[must_use]
    pub fn mode(&self) -> TxMode {
        self.mode
    }

    /// Returns the transaction's lifecycle state.
    #[must_use]
    pub fn state(&self) -> TxState {
        self.state
    }

    fn ensure_open(&self) -> DbResult<()> {
        match self.state {
            TxState::Open => Ok(()),
            TxState::Committed => Err(DbError::internal("transaction already committed")),
            TxState::RolledBack => Err(DbError::internal("transaction already rolled back")),
        }
    }

    /// Inserts a new document, generating a primary key if the document
    /// lacks one. Returns the primary key.
    ///
    /// # Errors
    ///
    /// In interactive mode, fails with `Conflict` if the key exists and
    /// with `Validation` on schema violations; batch mode defers those
    /// to commit.
    pub fn create(&mut self, collection: &str, mut document: Document) -> DbResult<String> {
        self.ensure_open()?;
        let schema = self.db.registry().get(collection)?;
        let needs_key = matches!(
            document.get(&schema.primary_key),
            None | Some(serde_json::Value::Null)
        );
        if needs_key {
            document.set(&schema.primary_key, Uuid::new_v4().to_string());
        }
        let doc_id = schema.primary_key_of(&document).ok_or_else(|| {
            DbError::validation(format!(
                "document primary key '{}' is not a scalar",
                schema.primary_key
            ))
        })?;
        self.submit(Operation {
            action: Action::Create,
            collection: collection.to_string(),
            doc_id: Some(doc_id.clone()),
            document: Some(document),
        })?;
        Ok(doc_id)
    }

    /// Inserts or fully replaces a document. The document must carry its
    /// primary key.
    pub fn set(&mut self, collection: &str, document: Document) -> DbResult<()> {
        self.ensure_open()?;
        let schema = self.db.registry().get(collection)?;
        let doc_id = schema.primary_key_of(&document).ok_or_else(|| {
            DbError::validation(format!(
                "set requires the primary key '{}' to be present",
                schema.primary_key
            ))
        })?;
        self.submit(Operation {
            action: Action::Set,
            collection: collection.to_string(),
            doc_id: Some(doc_id),
            document: Some(document),
        })
    }

    /// Deep-merges a patch into an existing document.
    pub fn update(&mut self, collection: &str, doc_id: &str, patch: Document) -> DbResult<()> {
        self.ensure_open()?;
        self.submit(Operation {
            action: Action::Update,
            collection: collection.to_string(),
            doc_id: Some(doc_id.to_string()),
            document: Some(patch),
        })
    }

    /// Removes an existing document.
    pub fn delete(&mut self, collection: &str, doc_id: &str) -> DbResult<()> {
        self.ensure_open()?;
        self.submit(Operation {
            action: Action::Delete,
            collection: collection.to_string(),
            doc_id: Some(doc_id.to_string()),
            document: None,
        })
    }

    fn submit(&mut self, operation: Operation) -> DbResult<()> {
        match self.mode {
            TxMode::Interactive => {
                let tx = self
                    .kv_tx
                    .as_mut()
                    .ok_or_else(|| DbError::internal("interactive transaction lost its store handle"))?;
                self.db.persist_with_hooks(
                    tx.as_mut(),
                    &self.metadata,
                    operation,
                    &mut self.fts_ops,
                    &mut self.events,
                )?;
            }
            TxMode::Batch => self.buffer.push(operation),
        }
        Ok(())
    }

    /// Reads a document, observing this transaction's own uncommitted
    /// writes in interactive mode.
    pub fn get(&mut self, collection: &str, doc_id: &str) -> DbResult<Option<Document>> {
        self.ensure_open()?;
        match self.kv_tx.as_mut() {
            Some(tx) => self.db.get_in_tx(tx.as_mut(), collection, doc_id),
            None => {
                let mut tx = self.db.kv().begin(false).map_err(DbError::from)?;
                self.db.get_in_tx(tx.as_mut(), collection, doc_id)
            }
        }
    }

    /// Runs a query, observing this transaction's own uncommitted writes
    /// in interactive mode.
    pub fn query(&mut self, collection: &str, query: &Query) -> DbResult<Page> {
        self.ensure_open()?;
        match self.kv_tx.as_mut() {
            Some(tx) => self.db.query_in_tx(tx.as_mut(), collection, query),
            None => {
                let mut tx = self.db.kv().begin(false).map_err(DbError::from)?;
                self.db.query_in_tx(tx.as_mut(), collection, query)
            }
        }
    }

    /// Atomically applies the transaction's operations.
    ///
    /// # Errors
    ///
    /// Fails with `Conflict` on a write-write conflict with a
    /// concurrently committed transaction, or with the first operation
    /// error in batch mode. Any failure rolls the transaction back;
    /// nothing is partially applied.
    pub fn commit(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        let result = self.commit_inner();
        match result {
            Ok(()) => {
                self.state = TxState::Committed;
                self.db
                    .finish_commit(std::mem::take(&mut self.fts_ops), std::mem::take(&mut self.events));
                Ok(())
            }
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    fn commit_inner(&mut self) -> DbResult<()> {
        match self.mode {
            TxMode::Interactive => {
                let mut tx = self
                    .kv_tx
                    .take()
                    .ok_or_else(|| DbError::internal("interactive transaction lost its store handle"))?;
                tx.commit().map_err(DbError::from)
            }
            TxMode::Batch => {
                let mut tx = self.db.kv().begin(true).map_err(DbError::from)?;
                for operation in std::mem::take(&mut self.buffer) {
                    self.db.persist_with_hooks(
                        tx.as_mut(),
                        &self.metadata,
                        operation,
                        &mut self.fts_ops,
                        &mut self.events,
                    )?;
                }
                tx.commit().map_err(DbError::from)
            }
        }
    }

    /// Discards the transaction. Safe to call at any time and idempotent
    /// after the first invocation.
    pub fn rollback(&mut self) {
        if self.state == TxState::Open {
            self.abort();
        }
    }

    fn abort(&mut self) {
        if let Some(mut tx) = self.kv_tx.take() {
            tx.rollback();
        }
        self.buffer.clear();
        self.fts_ops.clear();
        self.events.clear();
        self.state = TxState::RolledBack;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
