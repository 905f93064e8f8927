//! Chat-room session controller.
//!
//! A session is the live binding of one user to one room. The
//! [`ChatController`] owns the transport connection and the message store,
//! runs a single-writer event loop (all store mutations serialize through
//! it), reconnects with backoff on transport failure, and publishes
//! immutable snapshots through a [`crate::context::ChatContext`].
//!
//! # State machine
//!
//! ```text
//! Connecting ──> Open ──> Reconnecting ──> Open ──> ... ──> Closed
//!                  │            │                              ▲
//!                  └────────────┴──── close() / fatal ─────────┘
//! ```
//!
//! `Closed` is terminal. Transport failures never surface as errors to
//! consumers; they appear only as status changes on the snapshot. Delivery
//! failures surface narrowly as that message's `Failed` status.

mod controller;
mod outbox;

pub use controller::ChatController;

use std::time::Duration;

/// Configuration for a session controller.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Timeout for one transport dial plus handshake.
    pub connect_timeout: Duration,
    /// How long `open()` waits for the session to reach `Open` before
    /// returning anyway (callers must not assume synchronous readiness).
    pub open_timeout: Duration,
    /// Base reconnect delay; doubles per attempt up to `max_backoff`, with
    /// full jitter applied.
    pub base_backoff: Duration,
    /// Cap on the reconnect delay.
    pub max_backoff: Duration,
    /// Base delay before a post is retransmitted; grows per attempt.
    pub post_retry_timeout: Duration,
    /// Transmission attempts per post before it is marked failed.
    pub post_retry_limit: u32,
    /// Cadence of the maintenance tick (retransmits, stale check).
    pub maintenance_interval: Duration,
    /// Force a reconnect when the server has been silent this long.
    /// `None` disables stale detection.
    pub stale_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            open_timeout: Duration::from_secs(10),
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            post_retry_timeout: Duration::from_secs(3),
            post_retry_limit: 10,
            maintenance_interval: Duration::from_secs(1),
            stale_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Connection status of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Initial connection attempt in progress.
    Connecting,
    /// Connected and joined to the room.
    Open,
    /// Connection lost; retrying with backoff. The full message store is
    /// retained.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
        /// Milliseconds until the next retry.
        next_retry_ms: u64,
    },
    /// Terminal: the session was closed or the controller dropped.
    Closed,
}

impl ConnectionStatus {
    /// Whether the session has reached its terminal state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self == Self::Closed
    }
}

/// Errors surfaced by the session API.
///
/// Connection-level trouble is handled internally by the reconnect loop and
/// never lands here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The room identifier is empty.
    InvalidRoom,
    /// No user identity was supplied.
    Unauthenticated,
    /// The session has been closed.
    Closed,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRoom => write!(f, "Invalid room identifier"),
            Self::Unauthenticated => write!(f, "No user identity"),
            Self::Closed => write!(f, "Session closed"),
        }
    }
}

impl std::error::Error for SessionError {}
