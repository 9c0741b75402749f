//! Access-path selection.

use super::{AccessPath, Where, WhereOp};
use crate::error::{DbError, DbResult};
use crate::index::encode_value;
use crate::schema::{CollectionSchema, SchemaRegistry};
use serde_json::Value;

/// The access path chosen for one query, with the inputs its executor
/// needs.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Plan {
    /// Direct fetch by primary key.
    PrimaryLookup { doc_id: String },
    /// Point lookup on a unique index covering all its fields.
    UniqueLookup {
        index: String,
        encoded: Vec<Vec<u8>>,
    },
    /// Ordered scan over an index's equality prefix.
    IndexScan {
        index: String,
        encoded_prefix: Vec<Vec<u8>>,
    },
    /// Delegate to the full-text engine.
    FullText { index: String, query: String },
    /// Scan every document in the collection.
    FullScan,
}

impl Plan {
    pub(crate) fn access_path(&self) -> AccessPath {
        match self {
            Self::PrimaryLookup { .. } => AccessPath::PrimaryLookup,
            Self::UniqueLookup { .. } => AccessPath::UniqueLookup,
            Self::IndexScan { .. } => AccessPath::IndexScan,
            Self::FullText { .. } => AccessPath::FullText,
            Self::FullScan => AccessPath::FullScan,
        }
    }

    pub(crate) fn index_name(&self) -> Option<&str> {
        match self {
            Self::UniqueLookup { index, .. }
            | Self::IndexScan { index, .. }
            | Self::FullText { index, .. } => Some(index),
            _ => None,
        }
    }
}

fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Selects an access path for `wheres` against a schema snapshot.
///
/// Priority: primary-key equality, then a fully covered unique index,
/// then the index with the longest leading equality prefix (declaration
/// order breaks ties), then the full-text engine, then a full scan. A
/// `text` predicate always routes to the full-text engine since no
/// other path can evaluate it. Indexes still backfilling are ignored.
///
/// # Errors
///
/// Fails with `Validation` if a `text` predicate names a field with no
/// full-text index.
pub(crate) fn plan(
    schema: &CollectionSchema,
    registry: &SchemaRegistry,
    wheres: &[Where],
) -> DbResult<Plan> {
    let usable = |index: &&crate::schema::IndexSpec| {
        !index.primary && !registry.is_building(&schema.name, &index.name)
    };

    if let Some(text) = wheres.iter().find(|clause| clause.op == WhereOp::Text) {
        let index = schema
            .indexes
            .iter()
            .filter(usable)
            .find(|index| index.full_text && index.fields.contains(&text.field))
            .ok_or_else(|| {
                DbError::validation(format!(
                    "field '{}' has no full-text index in collection '{}'",
                    text.field, schema.name
                ))
            })?;
        let query = wheres
            .iter()
            .filter(|clause| clause.op == WhereOp::Text)
            .filter_map(|clause| clause.value.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        return Ok(Plan::FullText {
            index: index.name.clone(),
            query,
        });
    }

    let eq_value = |field: &str| {
        wheres
            .iter()
            .find(|clause| clause.op == WhereOp::Eq && clause.field == field)
            .map(|clause| &clause.value)
    };

    if let Some(value) = eq_value(&schema.primary_key) {
        return Ok(Plan::PrimaryLookup {
            doc_id: key_string(value),
        });
    }

    for index in schema.indexes.iter().filter(usable) {
        if index.unique && !index.full_text {
            if let Some(encoded) = index
                .fields
                .iter()
                .map(|field| eq_value(field).map(encode_value))
                .collect::<Option<Vec<_>>>()
            {
                return Ok(Plan::UniqueLookup {
                    index: index.name.clone(),
                    encoded,
                });
            }
        }
    }

    let mut best: Option<(usize, &crate::schema::IndexSpec)> = None;
    for index in schema.indexes.iter().filter(usable) {
        if index.full_text {
            continue;
        }
        let prefix_len = index
            .fields
            .iter()
            .take_while(|field| eq_value(field).is_some())
            .count();
        if prefix_len > 0 && best.map_or(true, |(len, _)| prefix_len > len) {
            best = Some((prefix_len, index));
        }
    }
    if let Some((prefix_len, index)) = best {
        let encoded_prefix = index.fields[..prefix_len]
            .iter()
            .filter_map(|field| eq_value(field).map(encode_value))
            .collect();
        return Ok(Plan::IndexScan {
            index: index.name.clone(),
            encoded_prefix,
        });
    }

    Ok(Plan::FullScan)
}
