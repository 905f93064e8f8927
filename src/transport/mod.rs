//! Transport abstraction for chat-room endpoints.
//!
//! A [`Transport`] dials a room-scoped [`Endpoint`] and yields a
//! [`Connection`]: a pair of queue-backed halves the session loop can drive
//! independently inside a `tokio::select!` (sending never contends with
//! receiving). Implementations own the underlying socket in a pump task and
//! surface only typed wire frames.
//!
//! Two implementations ship with the crate:
//!
//! - [`websocket::WebSocketTransport`] - production transport over
//!   `tokio-tungstenite`.
//! - [`memory::MemoryTransport`] - in-process transport for tests, driven by
//!   a [`memory::MemoryListener`] standing in for the backend.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::wire::{ClientFrame, ServerFrame};

/// Bounded depth of the per-connection frame queues.
const FRAME_QUEUE_DEPTH: usize = 64;

/// A chat-room endpoint: backend host/port plus the room to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Backend host.
    pub host: String,
    /// Backend port.
    pub port: u16,
    /// Room identifier.
    pub room: String,
}

impl Endpoint {
    /// WebSocket URL for this endpoint.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}:{}/rooms/{}", self.host, self.port, self.room)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.room)
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug)]
pub enum TransportError {
    /// Failed to establish a connection.
    ConnectFailed(String),
    /// Failed to send a frame.
    SendFailed(String),
    /// The connection was closed.
    Closed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::Closed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Handle for sending client frames over a live connection.
///
/// Dropping the sender tears down the underlying connection.
#[derive(Debug)]
pub struct FrameSender {
    tx: mpsc::Sender<ClientFrame>,
}

impl FrameSender {
    /// Queue a frame for transmission.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the connection is gone.
    pub async fn send(&self, frame: ClientFrame) -> Result<(), TransportError> {
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }
}

/// Handle for receiving server frames from a live connection.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::Receiver<ServerFrame>,
}

impl FrameReceiver {
    /// Receive the next frame. Returns `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<ServerFrame> {
        self.rx.recv().await
    }
}

/// A live connection to a chat-room endpoint.
#[derive(Debug)]
pub struct Connection {
    sender: FrameSender,
    receiver: FrameReceiver,
}

impl Connection {
    /// Assemble a connection from raw queue endpoints.
    ///
    /// Used by transport implementations; the counterpart queue halves belong
    /// to the implementation's pump task (or to the test harness).
    #[must_use]
    pub fn from_queues(tx: mpsc::Sender<ClientFrame>, rx: mpsc::Receiver<ServerFrame>) -> Self {
        Self {
            sender: FrameSender { tx },
            receiver: FrameReceiver { rx },
        }
    }

    /// Split into independently usable send/receive halves.
    #[must_use]
    pub fn split(self) -> (FrameSender, FrameReceiver) {
        (self.sender, self.receiver)
    }
}

/// Queue pair used by transport implementations.
///
/// Returns `(connection, client_frame_rx, server_frame_tx)`: the connection
/// goes to the session loop, the other two ends to the pump task.
#[must_use]
pub fn connection_queues() -> (
    Connection,
    mpsc::Receiver<ClientFrame>,
    mpsc::Sender<ServerFrame>,
) {
    let (client_tx, client_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
    let (server_tx, server_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
    (
        Connection::from_queues(client_tx, server_rx),
        client_rx,
        server_tx,
    )
}

/// A factory for connections to chat-room endpoints.
///
/// The session controller owns exactly one transport and redials it through
/// this trait on every reconnection attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection to the endpoint.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectFailed` if the endpoint cannot be
    /// reached or refuses the connection.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError>;
}
