//! In-process predicate evaluation.

use super::{Where, WhereOp};
use crate::document::Document;
use crate::error::{DbError, DbResult};
use serde_json::Value;
use std::cmp::Ordering;

/// Checks operator/value combinations up front.
///
/// # Errors
///
/// Fails with `Validation` for `in` without an array value, or `text`
/// and `has_prefix` without a string value.
pub(crate) fn validate(wheres: &[Where]) -> DbResult<()> {
    for clause in wheres {
        match clause.op {
            WhereOp::In if !clause.value.is_array() => {
                return Err(DbError::validation(format!(
                    "'in' on field '{}' requires an array value",
                    clause.field
                )));
            }
            WhereOp::Text | WhereOp::HasPrefix if !clause.value.is_string() => {
                return Err(DbError::validation(format!(
                    "'{}' on field '{}' requires a string value",
                    op_name(clause.op),
                    clause.field
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Evaluates all clauses against a document (AND semantics). Absent
/// fields evaluate as null; `text` clauses are satisfied by the access
/// path and skipped here.
pub(crate) fn matches(document: &Document, wheres: &[Where]) -> bool {
    wheres
        .iter()
        .all(|clause| matches_clause(document, clause))
}

fn op_name(op: WhereOp) -> &'static str {
    match op {
        WhereOp::Eq => "eq",
        WhereOp::Neq => "neq",
        WhereOp::Gt => "gt",
        WhereOp::Gte => "gte",
        WhereOp::Lt => "lt",
        WhereOp::Lte => "lte",
        WhereOp::In => "in",
        WhereOp::Contains => "contains",
        WhereOp::HasPrefix => "has_prefix",
        WhereOp::Text => "text",
    }
}

fn matches_clause(document: &Document, clause: &Where) -> bool {
    let field = document.get(&clause.field).unwrap_or(&Value::Null);
    match clause.op {
        WhereOp::Eq => values_equal(field, &clause.value),
        WhereOp::Neq => !values_equal(field, &clause.value),
        WhereOp::Gt => matches_order(field, &clause.value, Ordering::is_gt),
        WhereOp::Gte => matches_order(field, &clause.value, Ordering::is_ge),
        WhereOp::Lt => matches_order(field, &clause.value, Ordering::is_lt),
        WhereOp::Lte => matches_order(field, &clause.value, Ordering::is_le),
        WhereOp::In => clause
            .value
            .as_array()
            .is_some_and(|options| options.iter().any(|option| values_equal(field, option))),
        WhereOp::Contains => match (field, &clause.value) {
            (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
            _ => false,
        },
        WhereOp::HasPrefix => match (field, &clause.value) {
            (Value::String(s), Value::String(prefix)) => s.starts_with(prefix),
            _ => false,
        },
        WhereOp::Text => true,
    }
}

fn matches_order(field: &Value, value: &Value, accept: fn(Ordering) -> bool) -> bool {
    compare(field, value).is_some_and(accept)
}

/// Equality with numeric values compared numerically, so `2` equals
/// `2.0`.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between same-typed scalar values; `None` for mismatched
/// types and composites, which never satisfy an ordering predicate.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
