//! Key layout for documents, index entries and persisted schemas.
//!
//! Namespaces are joined with a `0x00` separator:
//!
//! ```text
//! doc    \0 {collection} \0 {doc_id}
//! index  \0 {collection} \0 {index} \0 enc(f1) \0 enc(f2) ... \0 {doc_id}
//! schema \0 {collection}
//! ```
//!
//! Encoded field values may themselves contain `0x00`, so index keys are
//! never parsed; the entry's value holds the owning document's primary
//! key.

const SEP: u8 = 0x00;
const NS_DOC: &[u8] = b"doc";
const NS_INDEX: &[u8] = b"index";
const NS_SCHEMA: &[u8] = b"schema";

fn join(parts: &[&[u8]]) -> Vec<u8> {
    let len = parts.iter().map(|p| p.len() + 1).sum();
    let mut key = Vec::with_capacity(len);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(SEP);
        }
        key.extend_from_slice(part);
    }
    key
}

/// Storage key of one document.
pub fn document_key(collection: &str, doc_id: &str) -> Vec<u8> {
    join(&[NS_DOC, collection.as_bytes(), doc_id.as_bytes()])
}

/// Prefix covering every document in a collection.
pub fn document_prefix(collection: &str) -> Vec<u8> {
    let mut key = join(&[NS_DOC, collection.as_bytes()]);
    key.push(SEP);
    key
}

/// Storage key of a collection's persisted schema blob.
pub fn schema_key(collection: &str) -> Vec<u8> {
    join(&[NS_SCHEMA, collection.as_bytes()])
}

/// Prefix covering every persisted schema blob.
pub fn schema_prefix() -> Vec<u8> {
    let mut key = NS_SCHEMA.to_vec();
    key.push(SEP);
    key
}

/// Prefix covering every entry of one index.
pub fn index_prefix(collection: &str, index: &str) -> Vec<u8> {
    let mut key = join(&[NS_INDEX, collection.as_bytes(), index.as_bytes()]);
    key.push(SEP);
    key
}

/// Prefix covering every entry whose leading fields encode to
/// `encoded_values`, in declaration order.
pub fn index_value_prefix(collection: &str, index: &str, encoded_values: &[Vec<u8>]) -> Vec<u8> {
    let mut key = index_prefix(collection, index);
    for value in encoded_values {
        key.extend_from_slice(value);
        key.push(SEP);
    }
    key
}

/// Full key of one index entry for one document.
pub fn index_entry_key(
    collection: &str,
    index: &str,
    encoded_values: &[Vec<u8>],
    doc_id: &str,
) -> Vec<u8> {
    let mut key = index_value_prefix(collection, index, encoded_values);
    key.extend_from_slice(doc_id.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_keys_are_prefixed() {
        let key = document_key("user", "u-1");
        assert_eq!(key, b"doc\0user\0u-1");
        assert!(key.starts_with(&document_prefix("user")));
    }

    #[test]
    fn schema_keys_are_prefixed() {
        let key = schema_key("user");
        assert!(key.starts_with(&schema_prefix()));
        assert_eq!(key, b"schema\0user");
    }

    #[test]
    fn index_entry_layout() {
        let encoded = vec![b"a@x.com".to_vec()];
        let key = index_entry_key("user", "email_idx", &encoded, "u-1");
        assert_eq!(key, b"index\0user\0email_idx\0a@x.com\0u-1");
        assert!(key.starts_with(&index_value_prefix("user", "email_idx", &encoded)));
        assert!(key.starts_with(&index_prefix("user", "email_idx")));
    }

    #[test]
    fn value_prefix_orders_entries() {
        let low = index_value_prefix("user", "idx", &[b"aaa".to_vec()]);
        let high = index_value_prefix("user", "idx", &[b"bbb".to_vec()]);
        assert!(low < high);
    }
}
