use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::packet::PacketStream;
use crate::{AppError, AppResult};

/// Stable 128-bit identity of a connection, generated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        ConnectionId::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-connection bookkeeping for partial frames inside the receive window.
///
/// `data_start` marks the first unconsumed byte, `next_receive` the position
/// the next read lands at; `data_start <= next_receive <= window length`
/// throughout.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssemblyCursor {
    data_start: usize,
    next_receive: usize,
}

impl AssemblyCursor {
    pub fn new() -> Self {
        AssemblyCursor::default()
    }

    pub fn data_start(&self) -> usize {
        self.data_start
    }

    pub fn next_receive(&self) -> usize {
        self.next_receive
    }

    /// Bytes received but not yet consumed as frames.
    pub fn received(&self) -> usize {
        self.next_receive - self.data_start
    }

    /// Accounts for `n` freshly received bytes.
    pub fn advance_receive(&mut self, n: usize) {
        self.next_receive += n;
    }

    /// Consumes `n` bytes from the front of the assembled data.
    pub fn consume(&mut self, n: usize) {
        self.data_start += n;
        debug_assert!(self.data_start <= self.next_receive);
    }

    /// Resets to the window origin with no residual data.
    pub fn reset(&mut self) {
        self.data_start = 0;
        self.next_receive = 0;
    }

    /// Re-anchors the residual bytes at the window origin after compaction.
    pub fn rebase(&mut self) {
        self.next_receive = self.received();
        self.data_start = 0;
    }
}

/// The application's submission path for one connection: the identity plus a
/// sender into the connection's bounded send queue. Deliberately carries no
/// reference back into the engine.
#[derive(Debug, Clone)]
pub struct SendHandle {
    id: ConnectionId,
    queue: mpsc::Sender<PacketStream>,
}

impl SendHandle {
    pub(crate) fn new(id: ConnectionId, queue: mpsc::Sender<PacketStream>) -> Self {
        SendHandle { id, queue }
    }

    pub fn identity(&self) -> ConnectionId {
        self.id
    }

    /// Submits a packet for sending. Suspends while the send queue is full;
    /// fails once the connection is gone.
    pub async fn send(&self, packet: PacketStream) -> AppResult<()> {
        self.queue
            .send(packet)
            .await
            .map_err(|_| AppError::ChannelSendError(format!("connection {} closed", self.id)))
    }
}

/// Per-connection application callbacks. Implementors receive every complete
/// inbound frame exactly once, in arrival order.
///
/// An error returned from `on_message_received` is logged by the engine and
/// reported through `on_error`; it does not close the connection.
#[async_trait]
pub trait Connection: Send + 'static {
    async fn on_connected(&mut self) {}

    async fn on_message_received(&mut self, packet: PacketStream) -> AppResult<()>;

    async fn on_disconnected(&mut self) {}

    fn on_error(&mut self, _error: &AppError) {}
}

/// Server-side application surface: a factory producing connection values
/// plus engine-level notifications.
pub trait ServerHandler: Send + Sync + 'static {
    type Conn: Connection;

    /// One-time application setup, invoked by `start` after the pools are
    /// allocated and before the first accept.
    fn initialize(&self) {}

    /// Produces the connection value for a newly accepted socket. The handle
    /// is the connection's only way to send.
    fn create_connection(&self, handle: SendHandle) -> Self::Conn;

    fn on_client_connected(&self, _id: ConnectionId) {}

    fn on_client_disconnected(&self, _id: ConnectionId) {}

    fn on_error(&self, _error: &AppError) {}
}

/// Client-side application callbacks, symmetric to [`Connection`] for the
/// single outbound connection.
#[async_trait]
pub trait ClientHandler: Send + 'static {
    async fn on_connected(&mut self, _handle: SendHandle) {}

    async fn on_message_received(&mut self, packet: PacketStream) -> AppResult<()>;

    async fn on_disconnected(&mut self) {}

    fn on_socket_error(&mut self, _error: &AppError) {}
}
