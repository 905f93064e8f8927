//! Session controller: owns the connection, the store, and the event loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::context::{ChatContext, Snapshot};
use crate::message::Message;
use crate::store::{Applied, MessageStore};
use crate::transport::{Endpoint, FrameReceiver, FrameSender, Transport};
use crate::wire::{ClientFrame, ServerFrame};

use super::outbox::Outbox;
use super::{ConnectionStatus, SessionConfig, SessionError};

/// Reason recorded on pending messages when the session closes.
const CLOSE_REASON: &str = "session closed";

/// Reason recorded on posts whose retry budget ran out.
const RETRY_EXHAUSTED_REASON: &str = "delivery not confirmed after retries";

/// Commands consumers enqueue to the session task.
///
/// Everything that mutates the store flows through this queue, so the
/// transport receive path and the consumer send path serialize through one
/// writer.
#[derive(Debug)]
enum Command {
    /// Append an optimistic message and schedule its transmission.
    Post(Message),
    /// Tear the session down.
    Close,
}

/// Live chat-room session bound to one `(room, user)` pair.
///
/// Constructed with [`ChatController::open`]; destroyed by [`close`]
/// (`Drop` closes best-effort). The controller is cheap to share behind an
/// `Arc`; all methods take `&self`.
///
/// [`close`]: ChatController::close
#[derive(Debug)]
pub struct ChatController {
    room: String,
    user: String,
    context: ChatContext,
    command_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl ChatController {
    /// Open a session for `(endpoint.room, user)` over the given transport.
    ///
    /// Waits up to `config.open_timeout` for the room handshake, then
    /// returns the controller regardless; callers observe readiness via
    /// [`status`](Self::status) or a subscription rather than assuming the
    /// session is `Open`.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidRoom` if the room identifier is empty.
    /// - `SessionError::Unauthenticated` if the user identity is empty.
    pub async fn open(
        transport: Arc<dyn Transport>,
        endpoint: Endpoint,
        user: impl Into<String>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let user = user.into();
        if endpoint.room.trim().is_empty() {
            return Err(SessionError::InvalidRoom);
        }
        if user.trim().is_empty() {
            return Err(SessionError::Unauthenticated);
        }

        let context = ChatContext::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        let task = SessionTask {
            transport,
            endpoint: endpoint.clone(),
            user: user.clone(),
            config: config.clone(),
            store: MessageStore::new(),
            outbox: Outbox::new(config.post_retry_timeout, config.post_retry_limit),
            context: context.clone(),
            status: ConnectionStatus::Connecting,
            status_tx,
            command_rx,
            version: 0,
        };
        tokio::spawn(task.run());

        let controller = Self {
            room: endpoint.room,
            user,
            context,
            command_tx,
            status_rx,
        };

        // Suspend until the handshake lands or the timeout passes; the
        // session keeps (re)connecting in the background either way.
        let mut ready_rx = controller.status_rx.clone();
        let _ = timeout(
            config.open_timeout,
            ready_rx.wait_for(|s| matches!(s, ConnectionStatus::Open | ConnectionStatus::Closed)),
        )
        .await;

        Ok(controller)
    }

    /// Room this session is bound to.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// User this session is bound to.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Current connection status. Never blocks.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Current message snapshot. Never blocks on the session task.
    #[must_use]
    pub fn get_messages(&self) -> Arc<[Message]> {
        self.context.latest().messages
    }

    /// Current full snapshot (messages plus status).
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.context.latest()
    }

    /// Reactive handle for downstream consumers.
    #[must_use]
    pub fn context(&self) -> ChatContext {
        self.context.clone()
    }

    /// Send a message body to the room.
    ///
    /// Appends a `Pending` message optimistically and returns it
    /// immediately; delivery happens asynchronously and the message
    /// transitions to `Confirmed` or `Failed` via the subscription
    /// mechanism. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the session has been closed; this
    /// is the only send-time error. Delivery trouble surfaces as the
    /// message's `Failed` status, never as an error here.
    pub fn send(&self, body: impl Into<String>) -> Result<Message, SessionError> {
        if self.status().is_closed() {
            return Err(SessionError::Closed);
        }
        let message = Message::pending(self.user.clone(), body);
        self.command_tx
            .send(Command::Post(message.clone()))
            .map_err(|_| SessionError::Closed)?;
        Ok(message)
    }

    /// Close the session: tear down the transport, mark in-flight sends
    /// `Failed`, notify subscribers once with the terminal status, and drop
    /// all subscriptions.
    ///
    /// Idempotent; completion is observable as `ConnectionStatus::Closed`.
    pub fn close(&self) {
        let _ = self.command_tx.send(Command::Close);
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Close);
    }
}

/// How a serve loop ended.
enum ServeExit {
    /// Transport went away; reconnect.
    Disconnected,
    /// Close command received; tear down.
    Closed,
}

/// Single-writer session task. Exclusive owner of the store and the outbox.
struct SessionTask {
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    user: String,
    config: SessionConfig,
    store: MessageStore,
    outbox: Outbox,
    context: ChatContext,
    status: ConnectionStatus,
    status_tx: watch::Sender<ConnectionStatus>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    version: u64,
}

impl SessionTask {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            if attempt == 0 {
                self.set_status(ConnectionStatus::Connecting);
            }

            let connected = timeout(
                self.config.connect_timeout,
                self.transport.connect(&self.endpoint),
            )
            .await;
            match connected {
                Ok(Ok(connection)) => {
                    let (tx, mut rx) = connection.split();
                    match self.handshake(&tx, &mut rx).await {
                        Ok(()) => {
                            log::info!("Joined room {} as {}", self.endpoint.room, self.user);
                            attempt = 0;
                            self.set_status(ConnectionStatus::Open);
                            // Everything unconfirmed goes out again on the
                            // fresh connection.
                            self.outbox.reset_timers();
                            self.flush_outbox(&tx).await;
                            self.publish();

                            match self.serve(&tx, &mut rx).await {
                                ServeExit::Closed => break,
                                ServeExit::Disconnected => {
                                    log::warn!("Disconnected from {}", self.endpoint);
                                }
                            }
                        }
                        Err(reason) => {
                            log::warn!("Handshake with {} failed: {reason}", self.endpoint);
                        }
                    }
                }
                Ok(Err(e)) => log::warn!("Failed to connect to {}: {e}", self.endpoint),
                Err(_) => log::warn!("Connection attempt to {} timed out", self.endpoint),
            }

            attempt += 1;
            let delay = self.backoff_delay(attempt);
            self.set_status(ConnectionStatus::Reconnecting {
                attempt,
                next_retry_ms: delay.as_millis() as u64,
            });
            self.publish();
            log::info!(
                "Reconnecting to {} in {:.1}s (attempt {attempt})",
                self.endpoint,
                delay.as_secs_f32()
            );

            if self.backoff_wait(delay).await {
                break;
            }
        }

        self.teardown();
    }

    /// Full-jitter backoff: uniform over zero to the capped exponential.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_backoff.as_millis() as u64;
        let cap_ms = self.config.max_backoff.as_millis() as u64;
        let ceiling = base_ms
            .saturating_mul(1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX))
            .min(cap_ms)
            .max(1);
        Duration::from_millis(rand::random_range(0..=ceiling))
    }

    /// Sleep out the backoff while still accepting commands, so sends made
    /// while reconnecting appear as pending entries right away.
    ///
    /// Returns `true` if a close was requested.
    async fn backoff_wait(&mut self, delay: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => return false,
                command = self.command_rx.recv() => match command {
                    Some(Command::Post(message)) => {
                        self.accept_post(message);
                        self.publish();
                    }
                    Some(Command::Close) | None => return true,
                },
            }
        }
    }

    /// Join the room and wait for the server's welcome.
    ///
    /// Replayed history arriving ahead of the welcome is merged on the spot;
    /// reconciliation does not care about ordering.
    async fn handshake(&mut self, tx: &FrameSender, rx: &mut FrameReceiver) -> Result<(), String> {
        let join = ClientFrame::Join {
            room: self.endpoint.room.clone(),
            user: self.user.clone(),
            since_seq: self.store.last_seen_seq(),
        };
        tx.send(join).await.map_err(|e| e.to_string())?;

        let deadline = tokio::time::Instant::now() + self.config.connect_timeout;
        loop {
            let frame = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .map_err(|_| "timed out waiting for welcome".to_string())?;
            match frame {
                Some(ServerFrame::Welcome { room }) => {
                    if room != self.endpoint.room {
                        return Err(format!("welcomed to wrong room {room}"));
                    }
                    return Ok(());
                }
                Some(frame) => {
                    if self.apply_server_frame(frame) {
                        self.publish();
                    }
                }
                None => return Err("connection closed".to_string()),
            }
        }
    }

    /// Drive one live connection until it drops or the session closes.
    async fn serve(&mut self, tx: &FrameSender, rx: &mut FrameReceiver) -> ServeExit {
        let mut tick = tokio::time::interval(self.config.maintenance_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();

        loop {
            let mut dirty = false;

            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(Command::Post(message)) => {
                        self.accept_post(message);
                        self.flush_outbox(tx).await;
                        dirty = true;
                    }
                    Some(Command::Close) | None => return ServeExit::Closed,
                },

                frame = rx.recv() => match frame {
                    Some(frame) => {
                        last_activity = Instant::now();
                        dirty = self.apply_server_frame(frame);
                    }
                    None => return ServeExit::Disconnected,
                },

                _ = tick.tick() => {
                    if let Some(stale_after) = self.config.stale_timeout {
                        if last_activity.elapsed() > stale_after {
                            log::warn!(
                                "Connection to {} stale ({}s), reconnecting",
                                self.endpoint,
                                last_activity.elapsed().as_secs()
                            );
                            return ServeExit::Disconnected;
                        }
                    }
                    self.flush_outbox(tx).await;
                    dirty = self.fail_exhausted_posts() || dirty;
                }
            }

            // Batch whatever else is already queued into the same snapshot,
            // so a burst of mutations produces one notification.
            loop {
                match self.command_rx.try_recv() {
                    Ok(Command::Post(message)) => {
                        self.accept_post(message);
                        self.flush_outbox(tx).await;
                        dirty = true;
                    }
                    Ok(Command::Close) => {
                        if dirty {
                            self.publish();
                        }
                        return ServeExit::Closed;
                    }
                    Err(_) => break,
                }
            }

            if dirty {
                self.publish();
            }
        }
    }

    /// Merge one inbound frame. Returns whether the snapshot changed.
    fn apply_server_frame(&mut self, frame: ServerFrame) -> bool {
        match frame {
            ServerFrame::Message(frame) => {
                let id = frame.id.clone();
                match self.store.apply(frame) {
                    Applied::Inserted => true,
                    Applied::Confirmed => {
                        self.outbox.confirm(&id);
                        true
                    }
                    Applied::Duplicate => {
                        log::debug!("Duplicate frame for {id}");
                        false
                    }
                }
            }
            ServerFrame::Rejected { id, reason } => {
                log::warn!("Server rejected post {id}: {reason}");
                self.outbox.reject(&id);
                self.store.fail(&id, reason)
            }
            ServerFrame::Welcome { .. } => false,
        }
    }

    /// Record an optimistic send in the store and the retry ledger.
    fn accept_post(&mut self, message: Message) {
        let id = message.id.clone();
        let body = message.body.clone();
        if self.store.insert_pending(message) {
            self.outbox.enqueue(id, body);
        }
    }

    /// Transmit every post that is due. Send errors are left to the receive
    /// path, which observes the broken connection as end-of-stream.
    async fn flush_outbox(&mut self, tx: &FrameSender) {
        if self.outbox.is_empty() {
            return;
        }
        for frame in self.outbox.frames_due(Instant::now()) {
            if let Err(e) = tx.send(frame).await {
                log::warn!("Post transmission failed: {e}");
                break;
            }
        }
    }

    /// Mark posts that ran out of retries. Returns whether anything changed.
    fn fail_exhausted_posts(&mut self) -> bool {
        let mut changed = false;
        for id in self.outbox.take_failed() {
            changed = self.store.fail(&id, RETRY_EXHAUSTED_REASON) || changed;
        }
        changed
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status.clone();
        let _ = self.status_tx.send(status);
    }

    fn publish(&mut self) {
        self.version += 1;
        self.context.publish(Snapshot {
            messages: self.store.snapshot(),
            status: self.status.clone(),
            version: self.version,
        });
    }

    /// Final transition into `Closed`: fail in-flight sends, publish one
    /// terminal snapshot, drop all subscriptions.
    fn teardown(mut self) {
        self.command_rx.close();
        for id in self.outbox.drain() {
            self.store.fail(&id, CLOSE_REASON);
        }
        let failed = self.store.fail_all_pending(CLOSE_REASON);
        if failed > 0 {
            log::info!("Failed {failed} in-flight message(s) on close");
        }
        self.set_status(ConnectionStatus::Closed);
        self.version += 1;
        self.context.close(Snapshot {
            messages: self.store.snapshot(),
            status: ConnectionStatus::Closed,
            version: self.version,
        });
        log::info!("Session for room {} closed", self.endpoint.room);
    }
}
