//! Streaming transaction protocol over a pair of channels.
//!
//! Each request is acknowledged with a [`TxResponse`]; a `commit` or
//! `rollback` request, or the request channel closing, terminates the
//! exchange. A closed channel rolls the transaction back.

use super::{Transaction, TxMode};
use crate::database::Database;
use crate::document::Document;
use crate::error::{DbError, DbResult};
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::mpsc::{Receiver, Sender};

/// Action carried by a [`TxRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxAction {
    /// Insert a new document.
    Create,
    /// Insert or replace a document.
    Set,
    /// Merge a patch into a document.
    Update,
    /// Remove a document.
    Delete,
    /// Commit the transaction and terminate.
    Commit,
    /// Roll the transaction back and terminate.
    Rollback,
}

/// One message of the transaction protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRequest {
    /// Requested action.
    pub action: TxAction,
    /// Target collection; ignored by commit/rollback.
    #[serde(default)]
    pub collection: String,
    /// Target primary key, for update/delete.
    #[serde(default, rename = "docID")]
    pub doc_id: Option<String>,
    /// Payload document or patch.
    #[serde(default)]
    pub value: Option<Document>,
}

/// Acknowledgement of one [`TxRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxResponse {
    /// Result value: the generated primary key for create, null
    /// otherwise.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    /// Error message, when the request failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TxResponse {
    fn ok(value: Value) -> Self {
        Self { value, error: None }
    }

    fn err(err: &DbError) -> Self {
        Self {
            value: Value::Null,
            error: Some(err.to_string()),
        }
    }
}

fn handle(tx: &mut Transaction<'_>, request: TxRequest) -> DbResult<Value> {
    let missing_doc = || DbError::validation("request is missing a document value");
    let missing_id = || DbError::validation("request is missing a docID");
    match request.action {
        TxAction::Create => {
            let document = request.value.ok_or_else(missing_doc)?;
            let doc_id = tx.create(&request.collection, document)?;
            Ok(Value::String(doc_id))
        }
        TxAction::Set => {
            let document = request.value.ok_or_else(missing_doc)?;
            tx.set(&request.collection, document)?;
            Ok(Value::Null)
        }
        TxAction::Update => {
            let document = request.value.ok_or_else(missing_doc)?;
            let doc_id = request.doc_id.ok_or_else(missing_id)?;
            tx.update(&request.collection, &doc_id, document)?;
            Ok(Value::Null)
        }
        TxAction::Delete => {
            let doc_id = request.doc_id.ok_or_else(missing_id)?;
            tx.delete(&request.collection, &doc_id)?;
            Ok(Value::Null)
        }
        TxAction::Commit | TxAction::Rollback => Ok(Value::Null),
    }
}

/// Serves one transaction over a request/response channel pair.
///
/// Per-operation failures are reported in the acknowledgement and leave
/// the transaction open; the caller decides whether to continue. The
/// loop ends on commit, rollback, or a closed request channel (which
/// rolls back).
///
/// # Errors
///
/// Fails with the commit error when the terminal `commit` request
/// cannot be applied, or with `Internal` when opening the transaction
/// fails.
pub fn serve(
    db: &Database,
    mode: TxMode,
    requests: &Receiver<TxRequest>,
    responses: &Sender<TxResponse>,
) -> DbResult<()> {
    let mut tx = Transaction::new(db, mode, Metadata::new())?;
    while let Ok(request) = requests.recv() {
        let action = request.action;
        match action {
            TxAction::Commit => {
                let result = tx.commit();
                let response = match &result {
                    Ok(()) => TxResponse::ok(Value::Null),
                    Err(err) => TxResponse::err(err),
                };
                let _ = responses.send(response);
                return result;
            }
            TxAction::Rollback => {
                tx.rollback();
                let _ = responses.send(TxResponse::ok(Value::Null));
                return Ok(());
            }
            _ => {
                let response = match handle(&mut tx, request) {
                    Ok(value) => TxResponse::ok(value),
                    Err(err) => TxResponse::err(&err),
                };
                if responses.send(response).is_err() {
                    tx.rollback();
                    return Ok(());
                }
            }
        }
    }
    tx.rollback();
    Ok(())
}
