//! Retry ledger for unconfirmed posts.
//!
//! Every optimistic send is tracked here until the backend echoes it back.
//! Unconfirmed posts are retransmitted on the maintenance tick with
//! per-attempt exponential backoff; once the retry budget is exhausted the
//! post is reported failed and dropped from the ledger. A reconnect resets
//! the transmission clocks so everything still unconfirmed goes out again
//! right after the new handshake.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::message::MessageId;
use crate::wire::ClientFrame;

/// Backoff multiplier per transmission attempt.
const BACKOFF_FACTOR: f64 = 1.5;

/// Cap on the per-attempt retransmission delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// A post awaiting confirmation.
#[derive(Debug)]
struct PendingPost {
    body: String,
    /// `None` means "never transmitted on the current connection".
    last_sent_at: Option<Instant>,
    attempts: u32,
}

/// Tracks posts from send until confirmation, rejection, or failure.
#[derive(Debug)]
pub(crate) struct Outbox {
    // BTreeMap for deterministic retransmission order.
    pending: BTreeMap<MessageId, PendingPost>,
    retry_timeout: Duration,
    retry_limit: u32,
    failed: Vec<MessageId>,
}

impl Outbox {
    pub(crate) fn new(retry_timeout: Duration, retry_limit: u32) -> Self {
        Self {
            pending: BTreeMap::new(),
            retry_timeout,
            retry_limit,
            failed: Vec::new(),
        }
    }

    /// Start tracking a post. The first `frames_due` call will emit it.
    pub(crate) fn enqueue(&mut self, id: MessageId, body: String) {
        self.pending.insert(
            id,
            PendingPost {
                body,
                last_sent_at: None,
                attempts: 0,
            },
        );
    }

    /// Collect the frames that should be (re)transmitted now.
    ///
    /// Posts over the retry budget are moved to the failed list instead and
    /// reported via [`Outbox::take_failed`].
    pub(crate) fn frames_due(&mut self, now: Instant) -> Vec<ClientFrame> {
        let mut due = Vec::new();
        let mut exhausted = Vec::new();

        for (id, post) in &mut self.pending {
            if post.attempts >= self.retry_limit {
                log::error!("Post {} exceeded retry budget, marking failed", id);
                exhausted.push(id.clone());
                continue;
            }
            let ready = match post.last_sent_at {
                None => true,
                Some(at) => now.duration_since(at) >= retry_delay(self.retry_timeout, post.attempts),
            };
            if ready {
                post.last_sent_at = Some(now);
                post.attempts += 1;
                due.push(ClientFrame::Post {
                    id: id.clone(),
                    body: post.body.clone(),
                });
            }
        }

        for id in exhausted {
            self.pending.remove(&id);
            self.failed.push(id);
        }

        due
    }

    /// Stop tracking a confirmed post. Returns `false` if it was unknown.
    pub(crate) fn confirm(&mut self, id: &MessageId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Stop tracking a post the server refused.
    pub(crate) fn reject(&mut self, id: &MessageId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Reset transmission clocks after a reconnect so every unconfirmed post
    /// is retransmitted immediately. Attempt counts are kept; a post does
    /// not get a fresh budget per connection.
    pub(crate) fn reset_timers(&mut self) {
        for post in self.pending.values_mut() {
            post.last_sent_at = None;
        }
    }

    /// Take the posts that exhausted their retry budget.
    pub(crate) fn take_failed(&mut self) -> Vec<MessageId> {
        std::mem::take(&mut self.failed)
    }

    /// Drain every tracked post (used on session close).
    pub(crate) fn drain(&mut self) -> Vec<MessageId> {
        let ids = self.pending.keys().cloned().collect();
        self.pending.clear();
        ids
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Delay before attempt `attempts + 1`, with exponential backoff.
fn retry_delay(base: Duration, attempts: u32) -> Duration {
    let base_ms = base.as_millis() as f64;
    let backed_off = base_ms * BACKOFF_FACTOR.powi(attempts.saturating_sub(1) as i32);
    Duration::from_millis(backed_off.min(MAX_RETRY_DELAY.as_millis() as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> Outbox {
        Outbox::new(Duration::from_millis(50), 3)
    }

    #[test]
    fn test_new_post_is_due_immediately() {
        let mut ob = outbox();
        ob.enqueue(MessageId::from("m-1"), "hello".to_string());

        let due = ob.frames_due(Instant::now());
        assert_eq!(due.len(), 1);
        assert!(matches!(&due[0], ClientFrame::Post { id, body }
            if id.as_ref() == "m-1" && body == "hello"));

        // Not due again before the retry timeout.
        assert!(ob.frames_due(Instant::now()).is_empty());
    }

    #[test]
    fn test_retransmit_after_timeout() {
        let mut ob = outbox();
        ob.enqueue(MessageId::from("m-1"), "hello".to_string());

        let start = Instant::now();
        assert_eq!(ob.frames_due(start).len(), 1);
        assert_eq!(ob.frames_due(start + Duration::from_millis(60)).len(), 1);
    }

    #[test]
    fn test_backoff_grows_per_attempt() {
        let mut ob = outbox();
        ob.enqueue(MessageId::from("m-1"), "hello".to_string());

        let t0 = Instant::now();
        assert_eq!(ob.frames_due(t0).len(), 1);
        let t1 = t0 + Duration::from_millis(60);
        assert_eq!(ob.frames_due(t1).len(), 1);
        // Second retry needs 1.5x the base delay: 60ms after t1 is too soon.
        assert!(ob.frames_due(t1 + Duration::from_millis(60)).is_empty());
        assert_eq!(ob.frames_due(t1 + Duration::from_millis(80)).len(), 1);
    }

    #[test]
    fn test_confirm_stops_retransmission() {
        let mut ob = outbox();
        ob.enqueue(MessageId::from("m-1"), "hello".to_string());
        let _ = ob.frames_due(Instant::now());

        assert!(ob.confirm(&MessageId::from("m-1")));
        assert!(!ob.confirm(&MessageId::from("m-1")));
        assert!(ob.is_empty());
        assert!(ob
            .frames_due(Instant::now() + Duration::from_secs(60))
            .is_empty());
    }

    #[test]
    fn test_budget_exhaustion_reports_failure() {
        let mut ob = outbox();
        ob.enqueue(MessageId::from("m-1"), "hello".to_string());

        let mut now = Instant::now();
        for _ in 0..3 {
            assert_eq!(ob.frames_due(now).len(), 1);
            now += Duration::from_secs(60);
        }
        // Fourth pass trips the budget.
        assert!(ob.frames_due(now).is_empty());
        assert_eq!(ob.take_failed(), vec![MessageId::from("m-1")]);
        assert!(ob.take_failed().is_empty());
        assert!(ob.is_empty());
    }

    #[test]
    fn test_reset_timers_makes_everything_due() {
        let mut ob = outbox();
        ob.enqueue(MessageId::from("m-1"), "a".to_string());
        ob.enqueue(MessageId::from("m-2"), "b".to_string());
        assert_eq!(ob.frames_due(Instant::now()).len(), 2);
        assert!(ob.frames_due(Instant::now()).is_empty());

        ob.reset_timers();
        assert_eq!(ob.frames_due(Instant::now()).len(), 2);
        assert_eq!(ob.len(), 2);
    }

    #[test]
    fn test_drain_returns_everything() {
        let mut ob = outbox();
        ob.enqueue(MessageId::from("m-1"), "a".to_string());
        ob.enqueue(MessageId::from("m-2"), "b".to_string());

        let drained = ob.drain();
        assert_eq!(drained.len(), 2);
        assert!(ob.is_empty());
    }
}
