//! Composable interceptors around the engine's core primitives.
//!
//! Interceptors wrap Persist (the low-level write primitive behind every
//! document operation), Query, Aggregate and Scan. Each interceptor
//! receives the next stage of the chain and may run logic before or
//! after delegating, or short-circuit by not delegating. Registration
//! order forms nested scopes: the first registered interceptor is the
//! outermost.

use crate::document::Document;
use crate::error::DbResult;
use crate::metadata::Metadata;
use crate::query::{AggregateRequest, Page, Query, Scan};
use crate::transaction::Operation;
use std::sync::Arc;

/// The next stage of a persist chain.
pub type PersistNext<'a> = dyn FnMut(&Metadata, Operation) -> DbResult<Document> + 'a;
/// The next stage of a query chain.
pub type QueryNext<'a> = dyn FnMut(&Metadata, Query) -> DbResult<Page> + 'a;
/// The next stage of an aggregate chain.
pub type AggregateNext<'a> = dyn FnMut(&Metadata, AggregateRequest) -> DbResult<Document> + 'a;
/// The next stage of a scan chain.
pub type ScanNext<'a> = dyn FnMut(&Metadata, Scan) -> DbResult<Vec<Document>> + 'a;

/// An interceptor around engine primitives. Every method defaults to
/// pass-through; implementors override the operations they care about.
#[allow(unused_variables)]
pub trait Interceptor: Send + Sync {
    /// Wraps one document write. The returned document is the persisted
    /// state (for deletes, the removed document).
    fn around_persist(
        &self,
        metadata: &Metadata,
        operation: Operation,
        next: &mut PersistNext<'_>,
    ) -> DbResult<Document> {
        next(metadata, operation)
    }

    /// Wraps one query execution.
    fn around_query(
        &self,
        metadata: &Metadata,
        collection: &str,
        query: Query,
        next: &mut QueryNext<'_>,
    ) -> DbResult<Page> {
        next(metadata, query)
    }

    /// Wraps one aggregation.
    fn around_aggregate(
        &self,
        metadata: &Metadata,
        collection: &str,
        request: AggregateRequest,
        next: &mut AggregateNext<'_>,
    ) -> DbResult<Document> {
        next(metadata, request)
    }

    /// Wraps one collection scan.
    fn around_scan(
        &self,
        metadata: &Metadata,
        collection: &str,
        scan: Scan,
        next: &mut ScanNext<'_>,
    ) -> DbResult<Vec<Document>> {
        next(metadata, scan)
    }
}

/// An ordered interceptor chain, built once at startup.
#[derive(Clone, Default)]
pub struct HookPipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl HookPipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an interceptor; it nests inside all previously registered
    /// ones.
    pub fn register(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Returns the number of registered interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns true if no interceptors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs the persist chain down to `terminal`.
    pub(crate) fn persist(
        &self,
        metadata: &Metadata,
        operation: Operation,
        terminal: &mut PersistNext<'_>,
    ) -> DbResult<Document> {
        self.persist_at(0, metadata, operation, terminal)
    }

    fn persist_at(
        &self,
        index: usize,
        metadata: &Metadata,
        operation: Operation,
        terminal: &mut PersistNext<'_>,
    ) -> DbResult<Document> {
        match self.interceptors.get(index) {
            None => terminal(metadata, operation),
            Some(interceptor) => {
                interceptor.around_persist(metadata, operation, &mut |md, op| {
                    self.persist_at(index + 1, md, op, &mut *terminal)
                })
            }
        }
    }

    /// Runs the query chain down to `terminal`.
    pub(crate) fn query(
        &self,
        metadata: &Metadata,
        collection: &str,
        query: Query,
        terminal: &mut QueryNext<'_>,
    ) -> DbResult<Page> {
        self.query_at(0, metadata, collection, query, terminal)
    }

    fn query_at(
        &self,
        index: usize,
        metadata: &Metadata,
        collection: &str,
        query: Query,
        terminal: &mut QueryNext<'_>,
    ) -> DbResult<Page> {
        match self.interceptors.get(index) {
            None => terminal(metadata, query),
            Some(interceptor) => {
                interceptor.around_query(metadata, collection, query, &mut |md, q| {
                    self.query_at(index + 1, md, collection, q, &mut *terminal)
                })
            }
        }
    }

    /// Runs the aggregate chain down to `terminal`.
    pub(crate) fn aggregate(
        &self,
        metadata: &Metadata,
        collection: &str,
        request: AggregateRequest,
        terminal: &mut AggregateNext<'_>,
    ) -> DbResult<Document> {
        self.aggregate_at(0, metadata, collection, request, terminal)
    }

    fn aggregate_at(
        &self,
        index: usize,
        metadata: &Metadata,
        collection: &str,
        request: AggregateRequest,
        terminal: &mut AggregateNext<'_>,
    ) -> DbResult<Document> {
        match self.interceptors.get(index) {
            None => terminal(metadata, request),
            Some(interceptor) => {
                interceptor.around_aggregate(metadata, collection, request, &mut |md, r| {
                    self.aggregate_at(index + 1, md, collection, r, &mut *terminal)
                })
            }
        }
    }

    /// Runs the scan chain down to `terminal`.
    pub(crate) fn scan(
        &self,
        metadata: &Metadata,
        collection: &str,
        scan: Scan,
        terminal: &mut ScanNext<'_>,
    ) -> DbResult<Vec<Document>> {
        self.scan_at(0, metadata, collection, scan, terminal)
    }

    fn scan_at(
        &self,
        index: usize,
        metadata: &Metadata,
        collection: &str,
        scan: Scan,
        terminal: &mut ScanNext<'_>,
    ) -> DbResult<Vec<Document>> {
        match self.interceptors.get(index) {
            None => terminal(metadata, scan),
            Some(interceptor) => {
                interceptor.around_scan(metadata, collection, scan, &mut |md, s| {
                    self.scan_at(index + 1, md, collection, s, &mut *terminal)
                })
            }
        }
    }
}

impl std::fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookPipeline")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}
