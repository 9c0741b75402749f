//! Post-commit change notifications.

use crate::document::{Document, FieldChange};
use crate::transaction::Action;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::warn;

/// A committed document mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChange {
    /// Owning collection.
    pub collection: String,
    /// Document primary key.
    pub doc_id: String,
    /// Operation kind.
    pub action: Action,
    /// Document state before the mutation; absent for creates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Document>,
    /// Document state after the mutation; absent for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Document>,
    /// Field-level changes from `before` to `after`.
    #[serde(default)]
    pub diff: Vec<FieldChange>,
}

#[derive(Debug, Default)]
struct SubscriberShared {
    queue: Mutex<VecDeque<DocumentChange>>,
    available: Condvar,
    capacity: usize,
}

/// Fan-out of committed document changes to subscribers.
///
/// Delivery is best-effort: each subscriber holds a bounded buffer, and
/// when a subscriber falls behind its oldest buffered change is
/// discarded rather than blocking the committing transaction.
#[derive(Debug)]
pub struct ChangeStream {
    subscribers: Mutex<Vec<Weak<SubscriberShared>>>,
    capacity: usize,
}

impl ChangeStream {
    /// Creates a change stream with the given per-subscriber capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new subscriber. It receives changes committed after
    /// this call.
    #[must_use]
    pub fn subscribe(&self) -> Subscriber {
        let shared = Arc::new(SubscriberShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            capacity: self.capacity,
        });
        self.subscribers.lock().push(Arc::downgrade(&shared));
        Subscriber { shared }
    }

    /// Delivers a change to every live subscriber. Never blocks and
    /// never fails; dropped subscribers are pruned here.
    pub fn publish(&self, change: &DocumentChange) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|weak| {
            let Some(shared) = weak.upgrade() else {
                return false;
            };
            let mut queue = shared.queue.lock();
            if queue.len() >= shared.capacity {
                queue.pop_front();
                warn!(
                    collection = %change.collection,
                    "change stream subscriber fell behind, dropped oldest notification"
                );
            }
            queue.push_back(change.clone());
            shared.available.notify_one();
            true
        });
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|weak| weak.strong_count() > 0);
        subscribers.len()
    }
}

/// A consumer of committed document changes.
#[derive(Debug)]
pub struct Subscriber {
    shared: Arc<SubscriberShared>,
}

impl Subscriber {
    /// Takes the next buffered change without waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<DocumentChange> {
        self.shared.queue.lock().pop_front()
    }

    /// Waits up to `timeout` for the next change.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<DocumentChange> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        loop {
            if let Some(change) = queue.pop_front() {
                return Some(change);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let result = self
                .shared
                .available
                .wait_for(&mut queue, deadline - now);
            if result.timed_out() && queue.is_empty() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(doc_id: &str) -> DocumentChange {
        DocumentChange {
            collection: "user".into(),
            doc_id: doc_id.into(),
            action: Action::Create,
            before: None,
            after: Some(Document::from_value(json!({"id": doc_id})).unwrap()),
            diff: Vec::new(),
        }
    }

    #[test]
    fn subscriber_receives_published_changes() {
        let stream = ChangeStream::new(8);
        let subscriber = stream.subscribe();
        stream.publish(&change("u-1"));
        stream.publish(&change("u-2"));

        assert_eq!(subscriber.try_recv().unwrap().doc_id, "u-1");
        assert_eq!(subscriber.try_recv().unwrap().doc_id, "u-2");
        assert!(subscriber.try_recv().is_none());
    }

    #[test]
    fn slow_subscriber_loses_oldest() {
        let stream = ChangeStream::new(2);
        let subscriber = stream.subscribe();
        stream.publish(&change("u-1"));
        stream.publish(&change("u-2"));
        stream.publish(&change("u-3"));

        assert_eq!(subscriber.try_recv().unwrap().doc_id, "u-2");
        assert_eq!(subscriber.try_recv().unwrap().doc_id, "u-3");
        assert!(subscriber.try_recv().is_none());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let stream = ChangeStream::new(8);
        let subscriber = stream.subscribe();
        assert_eq!(stream.subscriber_count(), 1);
        drop(subscriber);
        stream.publish(&change("u-1"));
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn recv_timeout_times_out_when_idle() {
        let stream = ChangeStream::new(8);
        let subscriber = stream.subscribe();
        assert!(subscriber.recv_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn recv_timeout_wakes_on_publish() {
        let stream = Arc::new(ChangeStream::new(8));
        let subscriber = stream.subscribe();
        let publisher = Arc::clone(&stream);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher.publish(&change("u-1"));
        });
        let received = subscriber.recv_timeout(Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(received.unwrap().doc_id, "u-1");
    }
}
