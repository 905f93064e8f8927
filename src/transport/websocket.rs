//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each successful dial spawns a pump task that owns the socket: it
//! serializes outgoing [`ClientFrame`]s to JSON text frames, parses incoming
//! text frames into [`ServerFrame`]s, and answers pings. The session loop
//! only ever touches the queue-backed [`Connection`] halves, so a socket
//! error simply drains through as end-of-stream and triggers the
//! controller's reconnect path.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use async_trait::async_trait;

use crate::wire::{ClientFrame, ServerFrame};

use super::{connection_queues, Connection, Endpoint, Transport, TransportError};

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Production transport dialing `ws://host:port/rooms/{room}`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError> {
        let url = endpoint.url();
        log::debug!("Dialing {url}");

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("{url}: {e}")))?;

        let (connection, client_rx, server_tx) = connection_queues();
        tokio::spawn(pump(ws_stream, client_rx, server_tx));
        Ok(connection)
    }
}

/// Own the socket until either side goes away.
async fn pump(
    ws_stream: WsStream,
    mut client_rx: mpsc::Receiver<ClientFrame>,
    server_tx: mpsc::Sender<ServerFrame>,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            outgoing = client_rx.recv() => {
                let Some(frame) = outgoing else {
                    // Session loop dropped its sender: orderly close.
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        log::error!("Failed to serialize outgoing frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    log::warn!("WebSocket send failed: {e}");
                    break;
                }
            }

            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerFrame>(&text) {
                            Ok(frame) => {
                                if server_tx.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => log::warn!("Ignoring malformed frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        log::info!("WebSocket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("WebSocket error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
    // Dropping server_tx signals end-of-stream to the session loop.
}
