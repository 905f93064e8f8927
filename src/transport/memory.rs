//! In-process transport for tests.
//!
//! [`memory_transport`] returns a [`MemoryTransport`] to hand to the
//! controller and a [`MemoryListener`] the test drives as the fake backend:
//! accept dials, inspect the client's frames, inject server frames, and drop
//! the [`MemoryConnection`] to sever the link and exercise the reconnect
//! path. Dropping the listener itself makes subsequent dials fail, which
//! simulates the backend being down.

use tokio::sync::mpsc;

use async_trait::async_trait;

use crate::wire::{ClientFrame, ServerFrame};

use super::{connection_queues, Connection, Endpoint, Transport, TransportError};

/// Create a connected transport/listener pair.
#[must_use]
pub fn memory_transport() -> (MemoryTransport, MemoryListener) {
    let (dial_tx, dial_rx) = mpsc::unbounded_channel();
    (MemoryTransport { dial_tx }, MemoryListener { dial_rx })
}

/// Client side: a [`Transport`] whose dials land on the paired listener.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    dial_tx: mpsc::UnboundedSender<MemoryConnection>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError> {
        let (connection, client_rx, server_tx) = connection_queues();
        let server_side = MemoryConnection {
            endpoint: endpoint.clone(),
            to_client: server_tx,
            from_client: client_rx,
        };
        self.dial_tx
            .send(server_side)
            .map_err(|_| TransportError::ConnectFailed(format!("{endpoint}: listener gone")))?;
        Ok(connection)
    }
}

/// Server side: accepts dials from the paired [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryListener {
    dial_rx: mpsc::UnboundedReceiver<MemoryConnection>,
}

impl MemoryListener {
    /// Wait for the next dial. Returns `None` if the transport was dropped.
    pub async fn accept(&mut self) -> Option<MemoryConnection> {
        self.dial_rx.recv().await
    }
}

/// The backend's view of one accepted connection.
///
/// Dropping it severs the link: the client observes end-of-stream.
#[derive(Debug)]
pub struct MemoryConnection {
    /// Endpoint the client dialed.
    pub endpoint: Endpoint,
    to_client: mpsc::Sender<ServerFrame>,
    from_client: mpsc::Receiver<ClientFrame>,
}

impl MemoryConnection {
    /// Push a frame to the client. Returns `false` if the client hung up.
    pub async fn push(&self, frame: ServerFrame) -> bool {
        self.to_client.send(frame).await.is_ok()
    }

    /// Receive the next frame from the client. Returns `None` once the
    /// client hung up.
    pub async fn next_client_frame(&mut self) -> Option<ClientFrame> {
        self.from_client.recv().await
    }
}
