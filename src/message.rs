//! Chat message domain types.
//!
//! A [`Message`] moves through a two-phase lifecycle: locally originated
//! messages enter the store as `Pending` (no sequence number yet) and are
//! promoted to `Confirmed` when the backend echoes them with a
//! server-assigned sequence number, or demoted to `Failed` when the retry
//! budget is exhausted or the session closes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message identifier, unique within a room and stable across reconnects.
///
/// Locally originated messages use a freshly generated UUID so the backend
/// echo can be matched back to the optimistic entry.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a fresh random identifier for a locally originated message.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Delivery status of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Sent optimistically, not yet confirmed by the backend.
    Pending,
    /// Confirmed by the backend with an assigned sequence number.
    Confirmed,
    /// Could not be delivered.
    Failed {
        /// Why delivery failed (retry budget exhausted, rejection, close).
        reason: String,
    },
}

/// A single chat message as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier within the room.
    pub id: MessageId,
    /// Author identity.
    pub author: String,
    /// Message body.
    pub body: String,
    /// Creation timestamp. Replaced by the server's timestamp on confirmation.
    pub sent_at: DateTime<Utc>,
    /// Server-assigned sequence number. `Some` iff the message is confirmed;
    /// never changes once assigned.
    pub seq: Option<u64>,
    /// Delivery status.
    pub status: DeliveryStatus,
}

impl Message {
    /// Build an optimistic pending message with a fresh identifier.
    #[must_use]
    pub fn pending(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            author: author.into(),
            body: body.into(),
            sent_at: Utc::now(),
            seq: None,
            status: DeliveryStatus::Pending,
        }
    }

    /// Whether the message is still awaiting confirmation.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }

    /// Whether the message has been confirmed by the backend.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.status == DeliveryStatus::Confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_message_has_no_seq() {
        let msg = Message::pending("alice", "hello");
        assert!(msg.is_pending());
        assert!(msg.seq.is_none());
        assert_eq!(msg.author, "alice");
        assert_eq!(msg.body, "hello");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_serialization() {
        let failed = DeliveryStatus::Failed {
            reason: "retry budget exhausted".to_string(),
        };
        let json = serde_json::to_string(&failed).unwrap();
        let parsed: DeliveryStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(failed, parsed);
    }
}
