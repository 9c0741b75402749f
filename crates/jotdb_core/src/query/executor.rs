//! Query execution against a store transaction.

use super::planner::{self, Plan};
use super::{
    filter, AggregateFunc, AggregateRequest, Direction, Page, PageCursor, Query, QueryStats, Scan,
    WhereOp,
};
use crate::config::DatabaseConfig;
use crate::document::Document;
use crate::error::{DbError, DbResult};
use crate::index::{encode_value, keys, FullTextEngine};
use crate::schema::{CollectionSchema, SchemaRegistry};
use jotdb_kv::{KvTx, ScanOpts};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::warn;

/// Runs queries, scans and aggregations for one collection against a
/// schema snapshot and an open store transaction.
pub(crate) struct Executor<'a> {
    pub schema: &'a CollectionSchema,
    pub registry: &'a SchemaRegistry,
    pub fts: &'a dyn FullTextEngine,
    pub config: &'a DatabaseConfig,
}

impl Executor<'_> {
    /// Executes a query: plans, gathers candidates, applies residual
    /// predicates, sorts, paginates and projects.
    pub(crate) fn execute(&self, tx: &mut dyn KvTx, query: &Query) -> DbResult<Page> {
        let started = Instant::now();
        filter::validate(&query.wheres)?;
        let plan = planner::plan(self.schema, self.registry, &query.wheres)?;

        let (mut candidates, scanned) = self.collect(tx, &plan)?;
        candidates.retain(|doc| filter::matches(doc, &query.wheres));

        let relevance_ordered = query.order_by.is_none() && plan.access_path() == super::AccessPath::FullText;
        if !relevance_ordered {
            let field = query.order_by.as_ref().map(|order| order.field.clone());
            let descending = query
                .order_by
                .as_ref()
                .is_some_and(|order| order.direction == Direction::Desc);
            candidates.sort_by(|a, b| {
                let cmp = self
                    .sort_tuple(a, field.as_deref())
                    .cmp(&self.sort_tuple(b, field.as_deref()));
                if descending {
                    cmp.reverse()
                } else {
                    cmp
                }
            });
        }

        if let Some(cursor) = &query.start_at {
            let cursor = PageCursor::decode(cursor)?;
            self.skip_past_cursor(&mut candidates, &cursor, query, relevance_ordered);
        }

        let mut next_page = None;
        if let Some(limit) = query.limit {
            if candidates.len() > limit {
                candidates.truncate(limit);
                if let Some(last) = candidates.last() {
                    let sort = query
                        .order_by
                        .as_ref()
                        .and_then(|order| last.get(&order.field).cloned())
                        .unwrap_or(Value::Null);
                    let id = self.schema.primary_key_of(last).unwrap_or_default();
                    next_page = Some(PageCursor { sort, id }.encode()?);
                }
            }
        }

        let documents = self.project(candidates, query);
        let returned = documents.len();
        Ok(Page {
            documents,
            next_page,
            stats: QueryStats {
                access_path: plan.access_path(),
                index: plan.index_name().map(str::to_string),
                scanned,
                returned,
                elapsed: started.elapsed(),
            },
        })
    }

    /// Computes aggregates over the filtered document set.
    pub(crate) fn aggregate(
        &self,
        tx: &mut dyn KvTx,
        request: &AggregateRequest,
    ) -> DbResult<Document> {
        filter::validate(&request.wheres)?;
        if request.aggregates.is_empty() {
            return Err(DbError::validation("aggregate request has no aggregates"));
        }
        let plan = planner::plan(self.schema, self.registry, &request.wheres)?;
        let (mut candidates, _) = self.collect(tx, &plan)?;
        candidates.retain(|doc| filter::matches(doc, &request.wheres));

        let mut result = Document::new();
        for aggregate in &request.aggregates {
            let value = match aggregate.function {
                AggregateFunc::Count => Value::from(candidates.len()),
                AggregateFunc::Sum => {
                    let sum: f64 = candidates
                        .iter()
                        .filter_map(|doc| doc.get_f64(&aggregate.field))
                        .sum();
                    Value::from(sum)
                }
                AggregateFunc::Min => self.extremum(&candidates, &aggregate.field, false),
                AggregateFunc::Max => self.extremum(&candidates, &aggregate.field, true),
            };
            result.set(&aggregate.alias, value);
        }
        Ok(result)
    }

    /// Traverses the whole collection, invoking the filter per document.
    /// The cancellation flag is checked between document reads; on
    /// cancellation no partial result is returned.
    pub(crate) fn scan(
        &self,
        tx: &mut dyn KvTx,
        scan: &Scan,
        cancel: &AtomicBool,
    ) -> DbResult<Vec<Document>> {
        filter::validate(&scan.wheres)?;
        if scan.wheres.iter().any(|clause| clause.op == WhereOp::Text) {
            return Err(DbError::validation("'text' predicates are not supported in scans"));
        }
        let mut opts = ScanOpts::prefix(keys::document_prefix(&self.schema.name));
        opts.reverse = scan.reverse;
        let entries = tx.scan(opts).map_err(DbError::from)?;

        let mut matched = Vec::new();
        for (_, bytes) in entries {
            if cancel.load(Ordering::Relaxed) {
                return Err(DbError::Canceled);
            }
            let document = Document::from_bytes(&bytes)?;
            if filter::matches(&document, &scan.wheres) {
                matched.push(document);
            }
        }
        Ok(matched)
    }

    /// Gathers candidate documents for a plan, returning them with the
    /// number of store entries examined.
    fn collect(&self, tx: &mut dyn KvTx, plan: &Plan) -> DbResult<(Vec<Document>, usize)> {
        match plan {
            Plan::PrimaryLookup { doc_id } => {
                let candidates = self.fetch(tx, doc_id)?.into_iter().collect::<Vec<_>>();
                let scanned = candidates.len();
                Ok((candidates, scanned))
            }
            Plan::UniqueLookup { index, encoded } => {
                let prefix = keys::index_value_prefix(&self.schema.name, index, encoded);
                let entries = tx
                    .scan(ScanOpts::prefix(prefix.clone()))
                    .map_err(DbError::from)?;
                let scanned = entries.len();
                let mut candidates = Vec::new();
                for (key, owner) in entries {
                    let exact = key.len() == prefix.len() + owner.len() && key.ends_with(&owner);
                    if !exact {
                        continue;
                    }
                    let doc_id = String::from_utf8(owner).map_err(|_| {
                        DbError::internal("index entry value is not valid UTF-8")
                    })?;
                    candidates.extend(self.fetch(tx, &doc_id)?);
                }
                Ok((candidates, scanned))
            }
            Plan::IndexScan {
                index,
                encoded_prefix,
            } => {
                let prefix = keys::index_value_prefix(&self.schema.name, index, encoded_prefix);
                let entries = tx.scan(ScanOpts::prefix(prefix)).map_err(DbError::from)?;
                let scanned = entries.len();
                let mut candidates = Vec::new();
                for (_, owner) in entries {
                    let doc_id = String::from_utf8(owner).map_err(|_| {
                        DbError::internal("index entry value is not valid UTF-8")
                    })?;
                    candidates.extend(self.fetch(tx, &doc_id)?);
                }
                Ok((candidates, scanned))
            }
            Plan::FullText { query, .. } => {
                let ids = self.fts.search(&self.schema.name, query)?;
                let scanned = ids.len();
                let mut candidates = Vec::new();
                for doc_id in ids {
                    candidates.extend(self.fetch(tx, &doc_id)?);
                }
                Ok((candidates, scanned))
            }
            Plan::FullScan => {
                let entries = tx
                    .scan(ScanOpts::prefix(keys::document_prefix(&self.schema.name)))
                    .map_err(DbError::from)?;
                let scanned = entries.len();
                if scanned > self.config.scan_warning_threshold {
                    warn!(
                        collection = %self.schema.name,
                        scanned,
                        "query fell back to a full collection scan"
                    );
                }
                let candidates = entries
                    .into_iter()
                    .map(|(_, bytes)| Document::from_bytes(&bytes))
                    .collect::<DbResult<Vec<_>>>()?;
                Ok((candidates, scanned))
            }
        }
    }

    fn fetch(&self, tx: &mut dyn KvTx, doc_id: &str) -> DbResult<Option<Document>> {
        let bytes = tx
            .get(&keys::document_key(&self.schema.name, doc_id))
            .map_err(DbError::from)?;
        bytes.map(|bytes| Document::from_bytes(&bytes)).transpose()
    }

    /// Sort key: the order-by field's index encoding, then the primary
    /// key for determinism.
    fn sort_tuple(&self, document: &Document, field: Option<&str>) -> (Vec<u8>, String) {
        let sort = field
            .map(|field| encode_value(document.get(field).unwrap_or(&Value::Null)))
            .unwrap_or_default();
        let id = self.schema.primary_key_of(document).unwrap_or_default();
        (sort, id)
    }

    fn skip_past_cursor(
        &self,
        candidates: &mut Vec<Document>,
        cursor: &PageCursor,
        query: &Query,
        relevance_ordered: bool,
    ) {
        if relevance_ordered {
            if let Some(pos) = candidates
                .iter()
                .position(|doc| self.schema.primary_key_of(doc).as_deref() == Some(&cursor.id))
            {
                candidates.drain(..=pos);
            }
            return;
        }
        let field = query.order_by.as_ref().map(|order| order.field.as_str());
        let descending = query
            .order_by
            .as_ref()
            .is_some_and(|order| order.direction == Direction::Desc);
        let bound = (encode_value(&cursor.sort), cursor.id.clone());
        candidates.retain(|doc| {
            let tuple = self.sort_tuple(doc, field);
            if descending {
                tuple < bound
            } else {
                tuple > bound
            }
        });
    }

    fn extremum(&self, candidates: &[Document], field: &str, maximum: bool) -> Value {
        let mut best: Option<&Value> = None;
        for doc in candidates {
            let Some(value) = doc.get(field) else { continue };
            if value.is_null() {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => {
                    let cmp = encode_value(value).cmp(&encode_value(current));
                    if maximum {
                        cmp.is_gt()
                    } else {
                        cmp.is_lt()
                    }
                }
            };
            if better {
                best = Some(value);
            }
        }
        best.cloned().unwrap_or(Value::Null)
    }

    fn project(&self, candidates: Vec<Document>, query: &Query) -> Vec<Document> {
        if query.select.is_empty() || query.select.iter().any(|select| select.field == "*") {
            return candidates;
        }
        candidates
            .into_iter()
            .map(|doc| {
                let mut projected = Document::new();
                for select in &query.select {
                    if let Some(value) = doc.get(&select.field) {
                        projected.set(&select.field, value.clone());
                    }
                }
                projected
            })
            .collect()
    }
}
