//! Wire protocol for the chat-room backend.
//!
//! All traffic is JSON text frames with a `type` tag. The client announces
//! itself with [`ClientFrame::Join`] (which doubles as the replay request
//! after a reconnect), publishes with [`ClientFrame::Post`], and the server
//! confirms a post by echoing it back as a [`ServerFrame::Message`] carrying
//! the server-assigned sequence number. There is no separate ack frame.
//!
//! ```text
//! Client                                Server
//!   │  Join { room, user, since_seq }     │
//!   │────────────────────────────────────>│
//!   │  Welcome { room }                   │
//!   │<────────────────────────────────────│
//!   │  Message { seq > since_seq } ...    │  (replay of missed history)
//!   │<────────────────────────────────────│
//!   │  Post { id, body }                  │
//!   │────────────────────────────────────>│
//!   │  Message { id, seq, ... }           │  (echo = delivery confirmation)
//!   │<────────────────────────────────────│
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::MessageId;

/// A confirmed room message as broadcast by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Message identifier, unique within the room.
    pub id: MessageId,
    /// Server-assigned monotonic sequence number.
    pub seq: u64,
    /// Author identity.
    pub author: String,
    /// Message body.
    pub body: String,
    /// Server-side creation timestamp.
    pub sent_at: DateTime<Utc>,
}

/// Client → server commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe to a room, requesting replay of every frame with
    /// `seq > since_seq` (0 = full history). Sent on every (re)connect.
    Join {
        /// Room identifier.
        room: String,
        /// User identity.
        user: String,
        /// Last sequence number already held locally.
        since_seq: u64,
    },

    /// Publish a message. The server assigns the sequence number and echoes
    /// the frame back.
    Post {
        /// Client-generated message identifier.
        id: MessageId,
        /// Message body.
        body: String,
    },
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake acknowledgment for a `Join`.
    Welcome {
        /// Room the subscription was accepted for.
        room: String,
    },

    /// A new or replayed room message.
    Message(Frame),

    /// The server refused a specific `Post`.
    Rejected {
        /// Identifier of the refused post.
        id: MessageId,
        /// Human-readable refusal reason.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_serialization() {
        let join = ClientFrame::Join {
            room: "general".to_string(),
            user: "alice".to_string(),
            since_seq: 7,
        };
        let json = serde_json::to_string(&join).unwrap();
        assert!(json.contains("\"type\":\"join\""));
        let parsed: ClientFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(join, parsed);

        let post = ClientFrame::Post {
            id: MessageId::from("m-1"),
            body: "hello".to_string(),
        };
        let json = serde_json::to_string(&post).unwrap();
        let parsed: ClientFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(post, parsed);
    }

    #[test]
    fn test_server_frame_serialization() {
        let frame = ServerFrame::Message(Frame {
            id: MessageId::from("m-1"),
            seq: 3,
            author: "bob".to_string(),
            body: "hi".to_string(),
            sent_at: Utc::now(),
        });
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"message\""));
        let parsed: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, parsed);

        let rejected = ServerFrame::Rejected {
            id: MessageId::from("m-2"),
            reason: "room is read-only".to_string(),
        };
        let json = serde_json::to_string(&rejected).unwrap();
        let parsed: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(rejected, parsed);
    }
}
