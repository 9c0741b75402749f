//! Full-text engine contract and an in-memory reference engine.

use crate::document::Document;
use crate::error::DbResult;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Contract for an external full-text search engine.
///
/// The engine indexes a document's designated fields under a
/// collection-scoped index and answers text queries with matching
/// primary keys ordered by relevance. Mutations are applied after the
/// owning store transaction commits, so implementations need not be
/// transactional.
pub trait FullTextEngine: Send + Sync {
    /// Indexes the document's `fields` under `collection`.
    ///
    /// # Errors
    ///
    /// Implementation-defined; errors are logged, never surfaced to the
    /// committing transaction.
    fn index_document(
        &self,
        collection: &str,
        fields: &[String],
        doc_id: &str,
        document: &Document,
    ) -> DbResult<()>;

    /// Removes the document from `collection`'s full-text index.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn remove_document(&self, collection: &str, doc_id: &str) -> DbResult<()>;

    /// Returns primary keys of documents matching `query`, ordered by
    /// descending relevance. All query terms must match.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn search(&self, collection: &str, query: &str) -> DbResult<Vec<String>>;
}

#[derive(Debug, Default)]
struct FtsInner {
    // collection -> term -> doc_id -> term frequency
    inverted: HashMap<String, HashMap<String, HashMap<String, usize>>>,
    // collection -> doc_id -> terms, for removal
    forward: HashMap<String, HashMap<String, HashSet<String>>>,
}

/// In-memory full-text engine with term-frequency relevance scoring.
#[derive(Debug, Default)]
pub struct MemoryFullText {
    inner: RwLock<FtsInner>,
}

impl MemoryFullText {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn terms_of(document: &Document, fields: &[String]) -> Vec<String> {
    let mut terms = Vec::new();
    for field in fields {
        match document.get(field) {
            Some(Value::String(s)) => terms.extend(tokenize(s)),
            Some(Value::Array(items)) => {
                for item in items {
                    if let Some(s) = item.as_str() {
                        terms.extend(tokenize(s));
                    }
                }
            }
            Some(other) if !other.is_null() => terms.extend(tokenize(&other.to_string())),
            _ => {}
        }
    }
    terms
}

impl FullTextEngine for MemoryFullText {
    fn index_document(
        &self,
        collection: &str,
        fields: &[String],
        doc_id: &str,
        document: &Document,
    ) -> DbResult<()> {
        self.remove_document(collection, doc_id)?;
        let terms = terms_of(document, fields);
        let mut inner = self.inner.write();
        let inverted = inner.inverted.entry(collection.to_string()).or_default();
        for term in &terms {
            *inverted
                .entry(term.clone())
                .or_default()
                .entry(doc_id.to_string())
                .or_insert(0) += 1;
        }
        inner
            .forward
            .entry(collection.to_string())
            .or_default()
            .insert(doc_id.to_string(), terms.into_iter().collect());
        Ok(())
    }

    fn remove_document(&self, collection: &str, doc_id: &str) -> DbResult<()> {
        let mut inner = self.inner.write();
        let Some(terms) = inner
            .forward
            .get_mut(collection)
            .and_then(|docs| docs.remove(doc_id))
        else {
            return Ok(());
        };
        if let Some(inverted) = inner.inverted.get_mut(collection) {
            for term in terms {
                if let Some(postings) = inverted.get_mut(&term) {
                    postings.remove(doc_id);
                    if postings.is_empty() {
                        inverted.remove(&term);
                    }
                }
            }
        }
        Ok(())
    }

    fn search(&self, collection: &str, query: &str) -> DbResult<Vec<String>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read();
        let Some(inverted) = inner.inverted.get(collection) else {
            return Ok(Vec::new());
        };
        let mut scores: HashMap<String, usize> = HashMap::new();
        for (i, term) in terms.iter().enumerate() {
            let Some(postings) = inverted.get(term) else {
                return Ok(Vec::new());
            };
            if i == 0 {
                for (doc_id, tf) in postings {
                    scores.insert(doc_id.clone(), *tf);
                }
            } else {
                scores.retain(|doc_id, score| match postings.get(doc_id) {
                    Some(tf) => {
                        *score += tf;
                        true
                    }
                    None => false,
                });
            }
        }
        let mut ranked: Vec<(String, usize)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked.into_iter().map(|(doc_id, _)| doc_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn body() -> Vec<String> {
        vec!["body".to_string()]
    }

    #[test]
    fn indexed_terms_are_searchable() {
        let fts = MemoryFullText::new();
        fts.index_document("post", &body(), "p-1", &doc(json!({"body": "Hello brave world"})))
            .unwrap();
        assert_eq!(fts.search("post", "hello").unwrap(), vec!["p-1"]);
        assert_eq!(fts.search("post", "WORLD").unwrap(), vec!["p-1"]);
        assert!(fts.search("post", "absent").unwrap().is_empty());
    }

    #[test]
    fn all_terms_must_match() {
        let fts = MemoryFullText::new();
        fts.index_document("post", &body(), "p-1", &doc(json!({"body": "rust database"})))
            .unwrap();
        fts.index_document("post", &body(), "p-2", &doc(json!({"body": "rust compiler"})))
            .unwrap();
        assert_eq!(fts.search("post", "rust database").unwrap(), vec!["p-1"]);
        assert_eq!(
            fts.search("post", "rust").unwrap(),
            vec!["p-1", "p-2"]
        );
    }

    #[test]
    fn higher_term_frequency_ranks_first() {
        let fts = MemoryFullText::new();
        fts.index_document("post", &body(), "p-1", &doc(json!({"body": "cache"})))
            .unwrap();
        fts.index_document("post", &body(), "p-2", &doc(json!({"body": "cache cache cache"})))
            .unwrap();
        assert_eq!(fts.search("post", "cache").unwrap(), vec!["p-2", "p-1"]);
    }

    #[test]
    fn reindex_replaces_previous_terms() {
        let fts = MemoryFullText::new();
        fts.index_document("post", &body(), "p-1", &doc(json!({"body": "old words"})))
            .unwrap();
        fts.index_document("post", &body(), "p-1", &doc(json!({"body": "new words"})))
            .unwrap();
        assert!(fts.search("post", "old").unwrap().is_empty());
        assert_eq!(fts.search("post", "new").unwrap(), vec!["p-1"]);
    }

    #[test]
    fn removal_is_complete_and_idempotent() {
        let fts = MemoryFullText::new();
        fts.index_document("post", &body(), "p-1", &doc(json!({"body": "gone soon"})))
            .unwrap();
        fts.remove_document("post", "p-1").unwrap();
        fts.remove_document("post", "p-1").unwrap();
        assert!(fts.search("post", "gone").unwrap().is_empty());
    }
}
