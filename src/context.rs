//! Reactive context: snapshot publication and subscriptions.
//!
//! Decouples "a message arrived" from "a consumer re-rendered". The session
//! loop publishes at most one [`Snapshot`] per batch of mutations; the
//! context fans it out to subscribers in publish order and hands every new
//! subscriber the current snapshot immediately, so late joiners never start
//! from empty state.
//!
//! Delivery is monotonic: snapshots carry a version, and a publish that
//! would rewind the latest version is discarded.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::message::Message;
use crate::session::ConnectionStatus;

/// An immutable, ordered view of a room's messages at a point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Messages in sequence order, pending entries at the tail.
    pub messages: Arc<[Message]>,
    /// Connection status when the snapshot was taken.
    pub status: ConnectionStatus,
    /// Strictly increasing per publish.
    pub version: u64,
}

impl Snapshot {
    /// The empty snapshot every context starts from.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            messages: Arc::from([]),
            status: ConnectionStatus::Connecting,
            version: 0,
        }
    }
}

type Callback = Box<dyn Fn(&Snapshot) + Send + Sync>;

#[derive(Default)]
struct SubscriberMap {
    // BTreeMap so fan-out order is registration order, which keeps
    // notification interleavings deterministic.
    callbacks: BTreeMap<u64, Callback>,
}

struct ContextInner {
    latest: RwLock<Snapshot>,
    // Held across callback invocation so a subscriber registered during a
    // publish cannot observe an older snapshot afterwards. Callbacks must
    // not subscribe re-entrantly.
    subscribers: Mutex<SubscriberMap>,
    next_token: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for ContextInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextInner")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Cloneable reactive handle onto a session's snapshot stream.
#[derive(Debug, Clone)]
pub struct ChatContext {
    inner: Arc<ContextInner>,
}

impl ChatContext {
    /// Create a context holding the initial empty snapshot.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                latest: RwLock::new(Snapshot::initial()),
                subscribers: Mutex::new(SubscriberMap::default()),
                next_token: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The most recently published snapshot. Never blocks on the publisher.
    #[must_use]
    pub fn latest(&self) -> Snapshot {
        self.inner
            .latest
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Register for snapshot updates.
    ///
    /// The callback fires once immediately with the current snapshot, then
    /// on every subsequent publish until the returned guard is dropped (or
    /// its [`SubscriptionGuard::unsubscribe`] is called) or the session
    /// closes.
    pub fn subscribe(
        &self,
        callback: impl Fn(&Snapshot) + Send + Sync + 'static,
    ) -> SubscriptionGuard {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let current = self.latest();
        callback(&current);

        if !self.inner.closed.load(Ordering::Acquire) {
            subscribers.callbacks.insert(token, Box::new(callback));
        }
        drop(subscribers);

        SubscriptionGuard {
            inner: Arc::downgrade(&self.inner),
            token,
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .callbacks
            .len()
    }

    /// Publish a snapshot to all subscribers.
    ///
    /// Ignored after close, and ignored when `snapshot.version` does not
    /// advance the latest (monotonic delivery).
    pub(crate) fn publish(&self, snapshot: Snapshot) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        let subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        {
            let mut latest = self
                .inner
                .latest
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if snapshot.version <= latest.version {
                log::warn!(
                    "Discarding stale snapshot publish (version {} <= {})",
                    snapshot.version,
                    latest.version
                );
                return;
            }
            *latest = snapshot.clone();
        }
        for callback in subscribers.callbacks.values() {
            callback(&snapshot);
        }
    }

    /// Publish one terminal snapshot, then drop every subscription.
    ///
    /// Later publishes and subscriptions are inert; `latest()` keeps
    /// returning the terminal snapshot.
    pub(crate) fn close(&self, terminal: Snapshot) {
        self.publish(terminal);
        self.inner.closed.store(true, Ordering::Release);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .callbacks
            .clear();
    }
}

/// Removes its subscription when dropped.
#[derive(Debug)]
pub struct SubscriptionGuard {
    inner: std::sync::Weak<ContextInner>,
    token: u64,
}

impl SubscriptionGuard {
    /// Explicitly remove the subscription.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .subscribers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .callbacks
                .remove(&self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use std::sync::atomic::AtomicUsize;

    fn snapshot(version: u64, bodies: &[&str], status: ConnectionStatus) -> Snapshot {
        let messages: Vec<Message> = bodies
            .iter()
            .map(|b| Message::pending("alice", *b))
            .collect();
        Snapshot {
            messages: messages.into(),
            status,
            version,
        }
    }

    #[test]
    fn test_subscriber_receives_current_snapshot_immediately() {
        let context = ChatContext::new();
        context.publish(snapshot(1, &["hello"], ConnectionStatus::Open));

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let _guard = context.subscribe(move |snap| {
            assert_eq!(snap.messages.len(), 1);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_notifies_subscribers() {
        let context = ChatContext::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let _guard = context.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        context.publish(snapshot(1, &["a"], ConnectionStatus::Open));
        context.publish(snapshot(2, &["a", "b"], ConnectionStatus::Open));

        // One immediate delivery plus two publishes.
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(context.latest().version, 2);
    }

    #[test]
    fn test_stale_version_is_discarded() {
        let context = ChatContext::new();
        context.publish(snapshot(5, &["a"], ConnectionStatus::Open));
        context.publish(snapshot(3, &[], ConnectionStatus::Open));

        assert_eq!(context.latest().version, 5);
        assert_eq!(context.latest().messages.len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let context = ChatContext::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let guard = context.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(context.subscriber_count(), 1);

        guard.unsubscribe();
        assert_eq!(context.subscriber_count(), 0);

        context.publish(snapshot(1, &["a"], ConnectionStatus::Open));
        assert_eq!(count.load(Ordering::SeqCst), 1); // only the immediate one
    }

    #[test]
    fn test_close_delivers_terminal_then_silences() {
        let context = ChatContext::new();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let statuses_clone = Arc::clone(&statuses);
        let _guard = context.subscribe(move |snap| {
            statuses_clone.lock().unwrap().push(snap.status.clone());
        });

        context.close(snapshot(1, &[], ConnectionStatus::Closed));
        context.publish(snapshot(2, &["late"], ConnectionStatus::Open));

        let seen = statuses.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![ConnectionStatus::Connecting, ConnectionStatus::Closed]
        );
        assert_eq!(context.subscriber_count(), 0);
        // latest() stays at the terminal snapshot.
        assert_eq!(context.latest().status, ConnectionStatus::Closed);
    }

    #[test]
    fn test_subscribe_after_close_fires_once_with_terminal() {
        let context = ChatContext::new();
        context.close(snapshot(1, &["a"], ConnectionStatus::Closed));

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let _guard = context.subscribe(move |snap| {
            assert!(snap.status.is_closed());
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(context.subscriber_count(), 0);
    }
}
