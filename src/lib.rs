//! Chatline - chat-room session controller.
//!
//! This crate owns the live connection to a chat-room backend for one
//! `(room, user)` pair, maintains an ordered deduplicated message history,
//! and exposes it to any number of consumers through a reactive context.
//! Rendering, authentication, and socket primitives live outside the crate.
//!
//! # Architecture
//!
//! ```text
//! Transport ──> raw frames ──> ChatController ──> MessageStore
//!                              (parse, order,          │
//!                               dedupe, retry)         ▼
//!                                               ChatContext ──> consumers
//! ```
//!
//! - **Transport** - dials a room-scoped endpoint, yields typed wire frames
//! - **ChatController** - single-writer session loop: reconnect with
//!   backoff, reconciliation, optimistic sends with a retry budget
//! - **MessageStore** - ordered by server sequence number, deduplicated by
//!   message id, pending entries at the tail
//! - **ChatContext** - batched, monotonic snapshot delivery to subscribers
//!
//! # Usage
//!
//! ```ignore
//! let chat = chatline::chat_controller(8080, "general", "alice").await?;
//! let _sub = chat.context().subscribe(|snapshot| {
//!     for message in snapshot.messages.iter() {
//!         println!("{}: {}", message.author, message.body);
//!     }
//! });
//! let pending = chat.send("hello")?;
//! ```

pub mod context;
pub mod message;
pub mod session;
pub mod store;
pub mod transport;
pub mod wire;

use std::sync::Arc;

// Re-export commonly used types
pub use context::{ChatContext, Snapshot, SubscriptionGuard};
pub use message::{DeliveryStatus, Message, MessageId};
pub use session::{ChatController, ConnectionStatus, SessionConfig, SessionError};
pub use store::MessageStore;
pub use transport::{Endpoint, Transport};

/// Open a chat session against the local backend on `port`.
///
/// Convenience wrapper wiring a WebSocket transport to `127.0.0.1:port`
/// with the default [`SessionConfig`]. Returns once the room handshake
/// completes or the open timeout passes; check
/// [`ChatController::status`] rather than assuming readiness.
///
/// # Errors
///
/// - [`SessionError::InvalidRoom`] if `room` is empty.
/// - [`SessionError::Unauthenticated`] if `user` is empty.
pub async fn chat_controller(
    port: u16,
    room: &str,
    user: &str,
) -> Result<ChatController, SessionError> {
    let endpoint = Endpoint {
        host: "127.0.0.1".to_string(),
        port,
        room: room.to_string(),
    };
    ChatController::open(
        Arc::new(transport::websocket::WebSocketTransport::new()),
        endpoint,
        user,
        SessionConfig::default(),
    )
    .await
}
