//! Ordered, deduplicating message store for one room.
//!
//! Pure data structure, no I/O. Owned exclusively by the session task;
//! consumers only ever see immutable snapshots.
//!
//! Confirmed messages are ordered by their server-assigned sequence number.
//! Optimistic pending (and failed) messages carry no sequence number yet, so
//! they trail the confirmed range in local send order. Inbound frames are
//! merged through [`MessageStore::apply`], which tolerates out-of-order and
//! duplicate delivery from the transport.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::message::{DeliveryStatus, Message, MessageId};
use crate::wire::Frame;

/// Ordering key for store entries.
///
/// Derived `Ord` places every `Confirmed` key before every `Local` key, so
/// confirmed messages sort by sequence number and unconfirmed ones trail in
/// the order they were sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    /// Confirmed message, ordered by server sequence number.
    Confirmed(u64),
    /// Locally originated message awaiting confirmation, ordered by a local
    /// draft counter.
    Local(u64),
}

/// Outcome of applying an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// New identifier, inserted at its sequence position.
    Inserted,
    /// Known local message promoted to confirmed.
    Confirmed,
    /// Already held with this sequence number; nothing changed.
    Duplicate,
}

/// Append-only, order-preserving, deduplicating buffer of chat messages.
#[derive(Debug, Default)]
pub struct MessageStore {
    /// Entries in snapshot order.
    entries: BTreeMap<SortKey, Message>,
    /// Identifier index for O(1) existence checks and O(log n) updates.
    index: HashMap<MessageId, SortKey>,
    /// Draft counter for `SortKey::Local` keys.
    next_local: u64,
    /// Highest sequence number observed, for reconnect replay requests.
    last_seen_seq: u64,
}

impl MessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an optimistic pending message at the tail.
    ///
    /// Returns `false` (and leaves the store untouched) if the identifier is
    /// already present.
    pub fn insert_pending(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            log::warn!("Ignoring pending insert with duplicate id {}", message.id);
            return false;
        }
        let key = SortKey::Local(self.next_local);
        self.next_local += 1;
        self.index.insert(message.id.clone(), key);
        self.entries.insert(key, message);
        true
    }

    /// Merge an inbound frame (reconciliation).
    ///
    /// - Unknown identifier: inserted at the position given by its sequence
    ///   number, regardless of arrival order.
    /// - Known local (pending or failed) identifier: promoted in place to
    ///   confirmed, adopting the server's sequence number and timestamp.
    /// - Known confirmed identifier: no-op, so duplicate frames are
    ///   idempotent. A duplicate carrying a different sequence number is
    ///   ignored and logged; a confirmed sequence number never changes.
    /// - A frame whose sequence number is already held by a different
    ///   identifier is ignored and logged; it never displaces the entry that
    ///   owns the slot.
    pub fn apply(&mut self, frame: Frame) -> Applied {
        self.last_seen_seq = self.last_seen_seq.max(frame.seq);

        match self.index.get(&frame.id).copied() {
            Some(SortKey::Confirmed(seq)) => {
                if seq != frame.seq {
                    log::warn!(
                        "Frame for {} carries seq {} but message is confirmed at {}; ignoring",
                        frame.id,
                        frame.seq,
                        seq
                    );
                }
                Applied::Duplicate
            }
            Some(key @ SortKey::Local(_)) => {
                if self.seq_taken_by_other(&frame) {
                    return Applied::Duplicate;
                }
                let mut message = self
                    .entries
                    .remove(&key)
                    .unwrap_or_else(|| frame_to_message(&frame));
                if matches!(message.status, DeliveryStatus::Failed { .. }) {
                    log::info!("Late confirmation for {} after local failure", frame.id);
                }
                message.seq = Some(frame.seq);
                message.status = DeliveryStatus::Confirmed;
                message.sent_at = frame.sent_at;
                let new_key = SortKey::Confirmed(frame.seq);
                self.index.insert(frame.id, new_key);
                self.entries.insert(new_key, message);
                Applied::Confirmed
            }
            None => {
                if self.seq_taken_by_other(&frame) {
                    return Applied::Duplicate;
                }
                let key = SortKey::Confirmed(frame.seq);
                self.index.insert(frame.id.clone(), key);
                self.entries.insert(key, frame_to_message(&frame));
                Applied::Inserted
            }
        }
    }

    /// Whether `frame.seq` is already occupied by a different identifier.
    /// Such a frame is anomalous server output and must not displace the
    /// entry that owns the slot.
    fn seq_taken_by_other(&self, frame: &Frame) -> bool {
        match self.entries.get(&SortKey::Confirmed(frame.seq)) {
            Some(existing) if existing.id != frame.id => {
                log::warn!(
                    "Frame for {} reuses seq {} already held by {}; ignoring",
                    frame.id,
                    frame.seq,
                    existing.id
                );
                true
            }
            _ => false,
        }
    }

    /// Mark a local message as failed with the given reason.
    ///
    /// Returns `false` if the identifier is unknown or already confirmed;
    /// confirmed messages never regress.
    pub fn fail(&mut self, id: &MessageId, reason: impl Into<String>) -> bool {
        let Some(key) = self.index.get(id).copied() else {
            return false;
        };
        if matches!(key, SortKey::Confirmed(_)) {
            return false;
        }
        if let Some(message) = self.entries.get_mut(&key) {
            if message.is_pending() {
                message.status = DeliveryStatus::Failed {
                    reason: reason.into(),
                };
                return true;
            }
        }
        false
    }

    /// Mark every pending message as failed. Returns how many were failed.
    pub fn fail_all_pending(&mut self, reason: &str) -> usize {
        let mut count = 0;
        for message in self.entries.values_mut() {
            if message.is_pending() {
                message.status = DeliveryStatus::Failed {
                    reason: reason.to_string(),
                };
                count += 1;
            }
        }
        count
    }

    /// Immutable snapshot of the current history, in order.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[Message]> {
        self.entries.values().cloned().collect()
    }

    /// Highest sequence number observed so far (0 if none).
    #[must_use]
    pub fn last_seen_seq(&self) -> u64 {
        self.last_seen_seq
    }

    /// Whether the identifier is present.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    /// Look up a message by identifier.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).and_then(|key| self.entries.get(key))
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn frame_to_message(frame: &Frame) -> Message {
    Message {
        id: frame.id.clone(),
        author: frame.author.clone(),
        body: frame.body.clone(),
        sent_at: frame.sent_at,
        seq: Some(frame.seq),
        status: DeliveryStatus::Confirmed,
    }
}
