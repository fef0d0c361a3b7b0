use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::network::{
    ClientHandler, Connection, ConnectionId, IoLoop, LengthPrefixProcessor, PacketProcessor,
    SendHandle, DEFAULT_HEADER_SIZE,
};
use crate::packet::PacketStream;
use crate::pool::{BufferArena, OpKind, OpPool};
use crate::service::server::SEND_QUEUE_DEPTH;
use crate::service::Shutdown;
use crate::{AppError, AppResult};

/// Adapts a [`ClientHandler`] to the connection capability set so the client
/// runs the same I/O loop as a server-side connection.
struct ClientConnection<H: ClientHandler> {
    handler: H,
    handle: SendHandle,
}

#[async_trait]
impl<H: ClientHandler> Connection for ClientConnection<H> {
    async fn on_connected(&mut self) {
        self.handler.on_connected(self.handle.clone()).await;
    }

    async fn on_message_received(&mut self, packet: PacketStream) -> AppResult<()> {
        self.handler.on_message_received(packet).await
    }

    async fn on_disconnected(&mut self) {
        self.handler.on_disconnected().await;
    }

    fn on_error(&mut self, error: &AppError) {
        self.handler.on_socket_error(error);
    }
}

/// The outbound counterpart of the server engine: one connection, one
/// receive window, the same framing pipeline and send path.
///
/// The engine drives a single connect/disconnect cycle; the handler is
/// consumed by `connect`.
pub struct ClientEngine<H: ClientHandler> {
    host: String,
    port: u16,
    buffer_size: usize,
    processor: Arc<dyn PacketProcessor>,
    handler: Mutex<Option<H>>,
    handle: Mutex<Option<SendHandle>>,
    close: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
    notify_shutdown: broadcast::Sender<()>,
}

impl<H: ClientHandler> ClientEngine<H> {
    pub fn new(host: impl Into<String>, port: u16, buffer_size: usize, handler: H) -> Self {
        let (notify_shutdown, _) = broadcast::channel(1);
        ClientEngine {
            host: host.into(),
            port,
            buffer_size,
            processor: Arc::new(LengthPrefixProcessor),
            handler: Mutex::new(Some(handler)),
            handle: Mutex::new(None),
            close: Mutex::new(None),
            task: Mutex::new(None),
            notify_shutdown,
        }
    }

    /// Replaces the default length-prefix framing discipline.
    pub fn with_processor(mut self, processor: impl PacketProcessor) -> Self {
        self.processor = Arc::new(processor);
        self
    }

    /// Establishes the outbound socket and starts the receive loop.
    pub async fn connect(&self) -> AppResult<()> {
        if self.buffer_size <= DEFAULT_HEADER_SIZE {
            return Err(AppError::Configuration(format!(
                "buffer size {} cannot hold a frame header",
                self.buffer_size
            )));
        }
        let handler = self
            .handler
            .lock()
            .take()
            .ok_or(AppError::AlreadyRunning)?;

        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        debug!(peer = ?stream.peer_addr().ok(), "client connected");

        // The same pooled machinery as the server, sized for one connection.
        let arena = BufferArena::new(self.buffer_size, 1);
        let read_pool = OpPool::new("receive", OpKind::Receive, 1);
        let write_pool = Arc::new(OpPool::new("send", OpKind::Send, 1));

        let mut op = read_pool.pop()?;
        op.bind_slice(arena.checkout()?);
        let id = ConnectionId::new();
        op.set_owner(id.as_uuid());

        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let handle = SendHandle::new(id, send_tx);
        let close = CancellationToken::new();
        *self.handle.lock() = Some(handle.clone());
        *self.close.lock() = Some(close.clone());

        let conn = ClientConnection { handler, handle };
        let processor = self.processor.clone();
        let shutdown = Shutdown::new(self.notify_shutdown.subscribe());

        let task = tokio::spawn(async move {
            let Some(window) = op.take_slice() else {
                return;
            };
            let io = IoLoop {
                id,
                conn,
                op,
                window,
                write_pool,
                processor,
                send_rx,
                close,
                shutdown,
            };
            let outcome = io.run(stream).await;
            if let Some(e) = &outcome.failure {
                error!(connection = %id, "client connection terminated: {e}");
            }
            let mut conn = outcome.conn;
            conn.on_disconnected().await;
            debug!(connection = %id, "client connection closed");
        });
        *self.task.lock() = Some(task);
        Ok(())
    }

    /// Submits a packet for sending. Suspends while the send queue is full.
    pub async fn send(&self, packet: PacketStream) -> AppResult<()> {
        let handle = self
            .handle
            .lock()
            .clone()
            .ok_or(AppError::InvalidOperation("send before connect"))?;
        handle.send(packet).await
    }

    /// Identity of the live connection, if any.
    pub fn identity(&self) -> Option<ConnectionId> {
        self.handle.lock().as_ref().map(SendHandle::identity)
    }

    pub fn is_connected(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Tears the connection down and waits for `on_disconnected` to fire.
    pub async fn disconnect(&self) -> AppResult<()> {
        match self.close.lock().take() {
            Some(token) => token.cancel(),
            None => return Err(AppError::InvalidOperation("disconnect before connect")),
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        *self.handle.lock() = None;
        Ok(())
    }
}
