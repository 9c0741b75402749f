//! End-to-end tests against the in-memory key-value store.

use jotdb_core::hooks::Interceptor;
use jotdb_core::query::{
    AccessPath, Aggregate, AggregateFunc, AggregateRequest, Direction, Query, Scan, Where, WhereOp,
};
use jotdb_core::schema::{CollectionSchema, IndexSpec};
use jotdb_core::transaction::{serve, Action, TxAction, TxMode, TxRequest};
use jotdb_core::{Database, Document, ErrorKind, Metadata};
use jotdb_kv::MemoryKv;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

fn user_db() -> Database {
    let db = Database::open(Arc::new(MemoryKv::new())).unwrap();
    db.configure_collection(
        &CollectionSchema::new("user", "id")
            .with_index(IndexSpec::new("email_idx", vec!["contact.email".into()]).unique())
            .with_index(IndexSpec::new("age_idx", vec!["age".into()]))
            .to_bytes()
            .unwrap(),
    )
    .unwrap();
    db
}

fn user(id: &str, email: &str, age: i64) -> Document {
    Document::from_value(json!({
        "id": id,
        "contact": {"email": email},
        "age": age
    }))
    .unwrap()
}

fn insert(db: &Database, doc: Document) {
    db.tx_fn(TxMode::Interactive, |tx| tx.create("user", doc))
        .unwrap();
}

#[test]
fn unique_email_scenario() {
    let db = user_db();
    insert(&db, user("u-a", "a@x.com", 30));

    // second transaction, same email
    let err = db
        .tx_fn(TxMode::Interactive, |tx| {
            tx.create("user", user("u-b", "a@x.com", 25))
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let page = db
        .query(
            &Metadata::new(),
            "user",
            Query::new().filter("contact.email", WhereOp::Eq, "a@x.com"),
        )
        .unwrap();
    assert_eq!(page.stats.access_path, AccessPath::UniqueLookup);
    assert_eq!(page.stats.index.as_deref(), Some("email_idx"));
    assert_eq!(page.documents.len(), 1);
    assert_eq!(page.documents[0].get_str("id"), Some("u-a"));
    // the index still maps the email to exactly the first document
    assert_eq!(page.stats.scanned, 1);
}

#[test]
fn indexed_equality_avoids_full_scan() {
    let db = user_db();
    for i in 0..50 {
        insert(&db, user(&format!("u-{i:03}"), &format!("{i}@x.com"), i % 5));
    }
    let page = db
        .query(
            &Metadata::new(),
            "user",
            Query::new().filter("age", WhereOp::Eq, 3),
        )
        .unwrap();
    assert_eq!(page.stats.access_path, AccessPath::IndexScan);
    assert_eq!(page.stats.index.as_deref(), Some("age_idx"));
    assert_eq!(page.stats.returned, 10);
    assert!(page.stats.scanned <= page.stats.returned);
}

#[test]
fn drop_and_readd_index_is_idempotent() {
    let db = user_db();
    for i in 0..10 {
        insert(&db, user(&format!("u-{i}"), &format!("{i}@x.com"), 20 + i));
    }
    let query = Query::new().filter("age", WhereOp::Eq, 25);
    let before = db.query(&Metadata::new(), "user", query.clone()).unwrap();
    assert_eq!(before.stats.access_path, AccessPath::IndexScan);

    db.del_index("user", "age_idx").unwrap();
    let without = db.query(&Metadata::new(), "user", query.clone()).unwrap();
    assert_eq!(without.stats.access_path, AccessPath::FullScan);
    assert_eq!(without.documents.len(), before.documents.len());

    db.set_index("user", IndexSpec::new("age_idx", vec!["age".into()]))
        .unwrap();
    let after = db.query(&Metadata::new(), "user", query).unwrap();
    assert_eq!(after.stats.access_path, AccessPath::IndexScan);
    assert_eq!(after.stats.scanned, before.stats.scanned);
    assert_eq!(after.documents, before.documents);
}

#[test]
fn batch_load_commits_atomically() {
    let db = user_db();
    let mut tx = db.transaction(TxMode::Batch).unwrap();
    for i in 0..1000 {
        tx.create("user", user(&format!("u-{i:04}"), &format!("{i}@x.com"), i))
            .unwrap();
    }
    tx.commit().unwrap();

    let count = db
        .aggregate(
            &Metadata::new(),
            "user",
            AggregateRequest {
                wheres: Vec::new(),
                aggregates: vec![Aggregate {
                    function: AggregateFunc::Count,
                    field: String::new(),
                    alias: "n".into(),
                }],
            },
        )
        .unwrap();
    assert_eq!(count.get_f64("n"), Some(1000.0));
}

#[test]
fn rolled_back_batch_leaves_nothing() {
    let db = user_db();
    let mut tx = db.transaction(TxMode::Batch).unwrap();
    for i in 0..1000 {
        tx.create("user", user(&format!("u-{i:04}"), &format!("{i}@x.com"), i))
            .unwrap();
    }
    tx.rollback();

    let page = db.query(&Metadata::new(), "user", Query::new()).unwrap();
    assert!(page.documents.is_empty());
    // no stray index entries either: an indexed lookup finds nothing
    let by_email = db
        .query(
            &Metadata::new(),
            "user",
            Query::new().filter("contact.email", WhereOp::Eq, "0@x.com"),
        )
        .unwrap();
    assert_eq!(by_email.stats.scanned, 0);
}

#[test]
fn sort_limit_and_cursor_paginate_consistently() {
    let db = user_db();
    for i in 0..25 {
        insert(&db, user(&format!("u-{i:02}"), &format!("{i}@x.com"), i));
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let mut query = Query::new().order_by("age", Direction::Desc).limit(7);
        if let Some(cursor) = cursor.take() {
            query = query.start_at(cursor);
        }
        let page = db.query(&Metadata::new(), "user", query).unwrap();
        for doc in &page.documents {
            seen.push(doc.get_f64("age").unwrap() as i64);
        }
        match page.next_page {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(seen, (0..25).rev().collect::<Vec<_>>());
}

#[test]
fn full_text_query_end_to_end() {
    let db = Database::open(Arc::new(MemoryKv::new())).unwrap();
    db.configure_collection(
        &CollectionSchema::new("post", "id")
            .with_index(IndexSpec::new("body_fts", vec!["body".into()]).full_text())
            .to_bytes()
            .unwrap(),
    )
    .unwrap();
    db.tx_fn(TxMode::Interactive, |tx| {
        tx.create(
            "post",
            Document::from_value(json!({"id": "p-1", "body": "embedded rust database"})).unwrap(),
        )?;
        tx.create(
            "post",
            Document::from_value(json!({"id": "p-2", "body": "garden watering schedule"})).unwrap(),
        )
    })
    .unwrap();

    let page = db
        .query(
            &Metadata::new(),
            "post",
            Query::new().filter("body", WhereOp::Text, "rust database"),
        )
        .unwrap();
    assert_eq!(page.stats.access_path, AccessPath::FullText);
    assert_eq!(page.documents.len(), 1);
    assert_eq!(page.documents[0].get_str("id"), Some("p-1"));
}

#[test]
fn concurrent_reindex_and_queries() {
    let db = user_db();
    for i in 0..100 {
        insert(&db, user(&format!("u-{i:03}"), &format!("{i}@x.com"), i % 10));
    }

    std::thread::scope(|scope| {
        let reconfigure = scope.spawn(|| {
            for _ in 0..20 {
                db.del_index("user", "age_idx").unwrap();
                db.set_index("user", IndexSpec::new("age_idx", vec!["age".into()]))
                    .unwrap();
            }
        });
        let querier = scope.spawn(|| {
            for _ in 0..200 {
                let page = db
                    .query(
                        &Metadata::new(),
                        "user",
                        Query::new().filter("age", WhereOp::Eq, 7),
                    )
                    .unwrap();
                // either the old or the new index state, never partial
                assert_eq!(page.documents.len(), 10);
                assert!(matches!(
                    page.stats.access_path,
                    AccessPath::IndexScan | AccessPath::FullScan
                ));
            }
        });
        reconfigure.join().unwrap();
        querier.join().unwrap();
    });
}

#[test]
fn optimistic_commit_conflict_surfaces() {
    let db = user_db();
    insert(&db, user("u-1", "a@x.com", 30));

    let mut t1 = db.transaction(TxMode::Interactive).unwrap();
    let mut t2 = db.transaction(TxMode::Interactive).unwrap();
    t1.update(
        "user",
        "u-1",
        Document::from_value(json!({"age": 31})).unwrap(),
    )
    .unwrap();
    t2.update(
        "user",
        "u-1",
        Document::from_value(json!({"age": 32})).unwrap(),
    )
    .unwrap();

    t1.commit().unwrap();
    let err = t2.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(db.get("user", "u-1").unwrap().get_f64("age"), Some(31.0));
}

#[test]
fn scan_with_cancellation_and_filter() {
    let db = user_db();
    for i in 0..10 {
        insert(&db, user(&format!("u-{i}"), &format!("{i}@x.com"), i));
    }

    let cancel = AtomicBool::new(false);
    let docs = db
        .scan(
            &Metadata::new(),
            "user",
            Scan {
                wheres: vec![Where::new("age", WhereOp::Gte, json!(8))],
                reverse: false,
            },
            &cancel,
        )
        .unwrap();
    assert_eq!(docs.len(), 2);

    cancel.store(true, Ordering::Relaxed);
    let err = db
        .scan(&Metadata::new(), "user", Scan::default(), &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
}

#[test]
fn change_stream_delivers_diffs() {
    let db = user_db();
    let subscriber = db.subscribe();

    db.tx_fn(TxMode::Interactive, |tx| {
        tx.create("user", user("u-1", "a@x.com", 30))
    })
    .unwrap();
    db.tx_fn(TxMode::Interactive, |tx| {
        tx.update(
            "user",
            "u-1",
            Document::from_value(json!({"age": 31})).unwrap(),
        )
    })
    .unwrap();

    let created = subscriber.try_recv().unwrap();
    assert_eq!(created.action, Action::Create);

    let updated = subscriber.try_recv().unwrap();
    assert_eq!(updated.action, Action::Update);
    assert_eq!(updated.before.unwrap().get_f64("age"), Some(30.0));
    assert_eq!(updated.after.unwrap().get_f64("age"), Some(31.0));
    let age_change = updated.diff.iter().find(|c| c.path == "age").unwrap();
    assert_eq!(age_change.before_value, Some(json!(30)));
    assert_eq!(age_change.value, Some(json!(31)));
}

struct StampWrites;

impl Interceptor for StampWrites {
    fn around_persist(
        &self,
        metadata: &Metadata,
        mut operation: jotdb_core::transaction::Operation,
        next: &mut jotdb_core::hooks::PersistNext<'_>,
    ) -> jotdb_core::DbResult<Document> {
        if let Some(document) = operation.document.as_mut() {
            document.set("stamped", true);
        }
        next(metadata, operation)
    }
}

#[test]
fn interceptors_wrap_persist() {
    let db = Database::builder()
        .interceptor(Arc::new(StampWrites))
        .open(Arc::new(MemoryKv::new()))
        .unwrap();
    db.configure_collection(&CollectionSchema::new("user", "id").to_bytes().unwrap())
        .unwrap();

    db.tx_fn(TxMode::Interactive, |tx| {
        tx.create(
            "user",
            Document::from_value(json!({"id": "u-1"})).unwrap(),
        )
    })
    .unwrap();
    let doc = db.get("user", "u-1").unwrap();
    assert_eq!(doc.get("stamped"), Some(&json!(true)));
}

#[test]
fn streaming_protocol_serves_a_transaction() {
    let db = user_db();
    let (request_tx, request_rx) = mpsc::channel::<TxRequest>();
    let (response_tx, response_rx) = mpsc::channel();

    std::thread::scope(|scope| {
        let db = &db;
        let server =
            scope.spawn(move || serve(db, TxMode::Interactive, &request_rx, &response_tx));

        request_tx
            .send(TxRequest {
                action: TxAction::Create,
                collection: "user".into(),
                doc_id: None,
                value: Some(user("u-1", "a@x.com", 30)),
            })
            .unwrap();
        let ack = response_rx.recv().unwrap();
        assert_eq!(ack.error, None);
        assert_eq!(ack.value, json!("u-1"));

        // duplicate email inside the same stream fails but keeps the
        // transaction open
        request_tx
            .send(TxRequest {
                action: TxAction::Create,
                collection: "user".into(),
                doc_id: None,
                value: Some(user("u-2", "a@x.com", 25)),
            })
            .unwrap();
        let ack = response_rx.recv().unwrap();
        assert!(ack.error.is_some());

        request_tx
            .send(TxRequest {
                action: TxAction::Commit,
                collection: String::new(),
                doc_id: None,
                value: None,
            })
            .unwrap();
        let ack = response_rx.recv().unwrap();
        assert_eq!(ack.error, None);

        server.join().unwrap().unwrap();
    });

    assert!(db.get("user", "u-1").is_ok());
    assert_eq!(db.get("user", "u-2").unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn documents_round_trip_through_storage() {
    let db = user_db();
    let original = Document::from_value(json!({
        "id": "u-1",
        "contact": {"email": "a@x.com"},
        "age": 30,
        "pi": 3.25,
        "flags": [true, false],
        "nested": {"deep": {"value": null}}
    }))
    .unwrap();
    db.tx_fn(TxMode::Interactive, |tx| tx.create("user", original.clone()))
        .unwrap();
    assert_eq!(db.get("user", "u-1").unwrap(), original);
}
