//! Query model, planning and execution.
//!
//! A [`Query`] carries a select list, ANDed [`Where`] predicates, an
//! optional sort, a limit and an opaque pagination cursor. The planner
//! picks an access path (point lookup, index scan, full-text query or
//! collection scan) from the collection's schema snapshot; residual
//! predicates are evaluated in-process against each candidate.

pub(crate) mod executor;
mod filter;
mod planner;

use crate::document::Document;
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Comparison operator of a [`Where`] predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhereOp {
    /// Equality.
    Eq,
    /// Inequality.
    Neq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Field value is one of the given array's elements.
    In,
    /// Array field contains the value, or string field contains the
    /// substring.
    Contains,
    /// String field starts with the given prefix.
    HasPrefix,
    /// Full-text match against a field indexed as full-text.
    Text,
}

/// One filter predicate. All predicates of a query are ANDed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Where {
    /// Dotted field path.
    pub field: String,
    /// Comparison operator.
    pub op: WhereOp,
    /// Comparison value.
    pub value: Value,
}

impl Where {
    /// Creates a predicate.
    #[must_use]
    pub fn new(field: impl Into<String>, op: WhereOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// Sort specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    /// Dotted field path to sort on.
    pub field: String,
    /// Sort direction.
    pub direction: Direction,
}

/// One selected output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    /// Dotted field path, or `*` for the whole document.
    pub field: String,
}

/// A filter/select/sort/paginate request against one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Output fields; empty or `*` selects whole documents.
    #[serde(default)]
    pub select: Vec<Select>,
    /// ANDed filter predicates.
    #[serde(default, rename = "where")]
    pub wheres: Vec<Where>,
    /// Optional sort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    /// Maximum number of documents returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Opaque cursor from a previous page's `next_page`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<String>,
}

impl Query {
    /// Creates an empty query matching every document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter predicate.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, op: WhereOp, value: impl Into<Value>) -> Self {
        self.wheres.push(Where::new(field, op, value));
        self
    }

    /// Adds an output field.
    #[must_use]
    pub fn select_field(mut self, field: impl Into<String>) -> Self {
        self.select.push(Select {
            field: field.into(),
        });
        self
    }

    /// Sets the sort field and direction.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Sets the page size.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resumes after a previous page's cursor.
    #[must_use]
    pub fn start_at(mut self, cursor: impl Into<String>) -> Self {
        self.start_at = Some(cursor.into());
        self
    }
}

/// The access strategy chosen for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPath {
    /// Direct document fetch by primary key.
    PrimaryLookup,
    /// Point lookup on a unique index, then the document.
    UniqueLookup,
    /// Ordered range scan over an index.
    IndexScan,
    /// Delegated to the full-text engine.
    FullText,
    /// Full collection scan.
    FullScan,
}

/// Execution statistics attached to every query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStats {
    /// Chosen access path.
    pub access_path: AccessPath,
    /// Name of the index used, for index-backed paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Documents examined.
    pub scanned: usize,
    /// Documents returned.
    pub returned: usize,
    /// Wall-clock execution time.
    pub elapsed: Duration,
}

/// One page of query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Matching documents, in result order.
    pub documents: Vec<Document>,
    /// Cursor resuming after the last document, when more remain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
    /// Execution statistics.
    pub stats: QueryStats,
}

/// A filtered full-collection traversal request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    /// ANDed filter predicates.
    #[serde(default, rename = "where")]
    pub wheres: Vec<Where>,
    /// Traverse in descending primary-key order.
    #[serde(default)]
    pub reverse: bool,
}

/// An aggregation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunc {
    /// Number of matching documents.
    Count,
    /// Sum of a numeric field.
    Sum,
    /// Minimum of a field, by index encoding order.
    Min,
    /// Maximum of a field, by index encoding order.
    Max,
}

/// One aggregate to compute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    /// Aggregation function.
    pub function: AggregateFunc,
    /// Field to aggregate over; ignored by `count`.
    #[serde(default)]
    pub field: String,
    /// Output field name in the result document.
    pub alias: String,
}

/// An aggregation request over filtered documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    /// ANDed filter predicates.
    #[serde(default, rename = "where")]
    pub wheres: Vec<Where>,
    /// Aggregates to compute.
    #[serde(default)]
    pub aggregates: Vec<Aggregate>,
}

/// The position a pagination cursor encodes: the last-seen sort key and
/// primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PageCursor {
    sort: Value,
    id: String,
}

impl PageCursor {
    fn encode(&self) -> DbResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn decode(cursor: &str) -> DbResult<Self> {
        serde_json::from_str(cursor)
            .map_err(|err| DbError::validation(format!("malformed page cursor: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_assembles_request() {
        let query = Query::new()
            .select_field("name")
            .filter("age", WhereOp::Gte, 18)
            .order_by("age", Direction::Desc)
            .limit(10);
        assert_eq!(query.select.len(), 1);
        assert_eq!(query.wheres[0].op, WhereOp::Gte);
        assert_eq!(query.limit, Some(10));
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let query = Query::new()
            .filter("contact.email", WhereOp::Eq, "a@x.com")
            .order_by("age", Direction::Asc)
            .limit(5);
        let wire = serde_json::to_value(&query).unwrap();
        assert_eq!(
            wire["where"][0],
            json!({"field": "contact.email", "op": "eq", "value": "a@x.com"})
        );
        assert_eq!(wire["orderBy"], json!({"field": "age", "direction": "asc"}));

        let decoded: Query = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded, query);
    }

    #[test]
    fn has_prefix_serializes_snake_case() {
        let value = serde_json::to_value(WhereOp::HasPrefix).unwrap();
        assert_eq!(value, json!("has_prefix"));
    }

    #[test]
    fn cursor_roundtrip() {
        let cursor = PageCursor {
            sort: json!(42),
            id: "u-1".into(),
        };
        let encoded = cursor.encode().unwrap();
        let decoded = PageCursor::decode(&encoded).unwrap();
        assert_eq!(decoded.id, "u-1");
        assert_eq!(decoded.sort, json!(42));
    }

    #[test]
    fn malformed_cursor_is_validation_error() {
        let err = PageCursor::decode("not json").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }
}
