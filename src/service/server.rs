use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::network::{
    ConnectionId, IoLoop, LengthPrefixProcessor, PacketProcessor, SendHandle, ServerHandler,
};
use crate::network::Connection as _;
use crate::packet::PacketStream;
use crate::pool::{BufferArena, OpKind, OpPool, OpRecord};
use crate::service::{EngineConfig, Shutdown};
use crate::{AppError, AppResult};

pub(crate) const SEND_QUEUE_DEPTH: usize = 64;

/// Engine lifecycle. Transitions only move forward: Created → Running →
/// Stopping → Disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Running,
    Stopping,
    Disposed,
}

/// Pool occupancy snapshot, mainly for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub arena_bytes: usize,
    pub slices_in_use: usize,
    pub receive_ops_available: usize,
    pub send_ops_available: usize,
}

struct ClientEntry {
    handle: SendHandle,
    close: CancellationToken,
}

struct EnginePools {
    arena: Arc<BufferArena>,
    read_pool: Arc<OpPool>,
    write_pool: Arc<OpPool>,
}

/// The accept/receive/send orchestration layer. Owns the listener, the
/// connection registry, and the pre-allocated I/O pools; dispatches to the
/// application through a [`ServerHandler`].
///
/// Shutdown sequence:
/// 1. `stop` moves the state to Stopping and fires the shutdown broadcast.
/// 2. The accept loop exits and drops the listener; every connection task
///    observes the broadcast, finishes its current dispatch, and tears down
///    through the normal disconnect path.
/// 3. `start` returns once the last task has dropped its completion sender.
pub struct ServerEngine<H: ServerHandler> {
    config: EngineConfig,
    handler: Arc<H>,
    processor: Arc<dyn PacketProcessor>,
    state: Mutex<EngineState>,
    registry: Arc<DashMap<ConnectionId, ClientEntry>>,
    pools: Mutex<Option<EnginePools>>,
    notify_shutdown: broadcast::Sender<()>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: ServerHandler> ServerEngine<H> {
    pub fn new(config: EngineConfig, handler: H) -> Self {
        let (notify_shutdown, _) = broadcast::channel(1);
        ServerEngine {
            config,
            handler: Arc::new(handler),
            processor: Arc::new(LengthPrefixProcessor),
            state: Mutex::new(EngineState::Created),
            registry: Arc::new(DashMap::new()),
            pools: Mutex::new(None),
            notify_shutdown,
            local_addr: Mutex::new(None),
        }
    }

    /// Replaces the default length-prefix framing discipline.
    pub fn with_processor(mut self, processor: impl PacketProcessor) -> Self {
        self.processor = Arc::new(processor);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// The bound listen address, available once `start` is past binding.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Identities of the currently registered clients.
    pub fn clients(&self) -> Vec<ConnectionId> {
        self.registry.iter().map(|entry| *entry.key()).collect()
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> EngineStats {
        match self.pools.lock().as_ref() {
            Some(pools) => EngineStats {
                arena_bytes: pools.arena.capacity(),
                slices_in_use: pools.arena.in_use(),
                receive_ops_available: pools.read_pool.available(),
                send_ops_available: pools.write_pool.available(),
            },
            None => EngineStats::default(),
        }
    }

    /// Validates the configuration, allocates the pools, binds, and runs the
    /// accept loop. Returns after `stop` once every connection task has
    /// drained, or with the error that aborted the engine.
    pub async fn start(&self) -> AppResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                EngineState::Created => *state = EngineState::Running,
                _ => return Err(AppError::AlreadyRunning),
            }
        }
        let result = self.run().await;
        if result.is_err() {
            let mut state = self.state.lock();
            if *state == EngineState::Running {
                *state = EngineState::Created;
            }
        }
        result
    }

    async fn run(&self) -> AppResult<()> {
        self.config.validate()?;
        let addr = self.config.resolve()?;

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(self.config.backlog() as u32)?;
        *self.local_addr.lock() = Some(listener.local_addr()?);

        let n = self.config.max_connections();
        let arena = BufferArena::new(self.config.buffer_size(), n);
        let read_pool = Arc::new(OpPool::new("receive", OpKind::Receive, n));
        let write_pool = Arc::new(OpPool::new("send", OpKind::Send, n));
        *self.pools.lock() = Some(EnginePools {
            arena: arena.clone(),
            read_pool: read_pool.clone(),
            write_pool: write_pool.clone(),
        });

        info!("listening on {}", listener.local_addr()?);
        self.handler.initialize();

        // Each connection task holds a clone; recv returns None once the
        // last task is gone.
        let (complete_tx, mut complete_rx) = mpsc::channel::<()>(1);

        let mut shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        let result = loop {
            let stream = tokio::select! {
                accepted = accept_with_backoff(&listener) => match accepted {
                    Ok(stream) => stream,
                    Err(e) => {
                        self.handler.on_error(&e);
                        break Err(e);
                    }
                },
                _ = shutdown.recv() => break Ok(()),
            };
            if let Err(e) = self.admit(stream, &arena, &read_pool, &write_pool, &complete_tx) {
                self.handler.on_error(&e);
                break Err(e);
            }
        };

        drop(listener);
        drop(complete_tx);
        // Reaches tasks that were not told to stop when the loop broke on an
        // error rather than on `stop`.
        let _ = self.notify_shutdown.send(());
        complete_rx.recv().await;

        info!("server engine stopped");
        result
    }

    /// Wires an accepted socket into a registered connection and spawns its
    /// task. A refused socket (pools at capacity) is shut down with nothing
    /// leaked and the accept loop keeps going.
    fn admit(
        &self,
        stream: TcpStream,
        arena: &Arc<BufferArena>,
        read_pool: &Arc<OpPool>,
        write_pool: &Arc<OpPool>,
        complete_tx: &mpsc::Sender<()>,
    ) -> AppResult<()> {
        let mut op = match read_pool.pop() {
            Ok(op) => op,
            Err(e) => {
                warn!("refusing connection: {e}");
                tokio::spawn(shutdown_socket(stream));
                return Ok(());
            }
        };
        match arena.checkout() {
            Ok(window) => op.bind_slice(window),
            Err(e) => {
                read_pool.push(op);
                warn!("refusing connection: {e}");
                tokio::spawn(shutdown_socket(stream));
                return Ok(());
            }
        }

        let id = ConnectionId::new();
        op.set_owner(id.as_uuid());

        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let handle = SendHandle::new(id, send_tx);
        let close = CancellationToken::new();

        match self.registry.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                read_pool.push(op);
                return Err(AppError::DuplicateIdentity(id.as_uuid()));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(ClientEntry {
                    handle: handle.clone(),
                    close: close.clone(),
                });
            }
        }

        debug!(connection = %id, peer = ?stream.peer_addr().ok(), "client connected");
        self.handler.on_client_connected(id);

        let conn = self.handler.create_connection(handle);
        let shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        let complete_tx = complete_tx.clone();
        let processor = self.processor.clone();
        let handler = self.handler.clone();
        let registry = self.registry.clone();
        let read_pool = read_pool.clone();
        let write_pool = write_pool.clone();

        tokio::spawn(async move {
            let _complete = complete_tx;
            run_client::<H>(
                id, stream, op, conn, processor, handler, registry, read_pool, write_pool,
                send_rx, close, shutdown,
            )
            .await;
        });
        Ok(())
    }

    /// Signals the engine to stop accepting and to drain every connection.
    /// Safe to call repeatedly; only the first call while running has any
    /// effect.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                EngineState::Running => *state = EngineState::Stopping,
                other => {
                    debug!("stop ignored in state {other:?}");
                    return;
                }
            }
        }
        info!("stopping server engine");
        let _ = self.notify_shutdown.send(());
    }

    /// Removes the client from the registry and tears its connection down.
    /// The disconnect callbacks fire from the connection's own task.
    pub fn disconnect_client(&self, id: ConnectionId) -> AppResult<()> {
        match self.registry.remove(&id) {
            Some((_, entry)) => {
                entry.close.cancel();
                Ok(())
            }
            None => Err(AppError::ClientNotFound(id.as_uuid())),
        }
    }

    /// Submits a packet to a registered client through its send queue.
    pub async fn send_to(&self, id: ConnectionId, packet: PacketStream) -> AppResult<()> {
        let handle = self
            .registry
            .get(&id)
            .map(|entry| entry.handle.clone())
            .ok_or(AppError::ClientNotFound(id.as_uuid()))?;
        handle.send(packet).await
    }

    /// Releases the pools. Idempotent; also invoked by `Drop`.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if *state == EngineState::Disposed {
                return;
            }
            *state = EngineState::Disposed;
        }
        *self.pools.lock() = None;
        *self.local_addr.lock() = None;
        debug!("server engine disposed");
    }
}

impl<H: ServerHandler> Drop for ServerEngine<H> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_client<H: ServerHandler>(
    id: ConnectionId,
    stream: TcpStream,
    mut op: OpRecord,
    conn: H::Conn,
    processor: Arc<dyn PacketProcessor>,
    handler: Arc<H>,
    registry: Arc<DashMap<ConnectionId, ClientEntry>>,
    read_pool: Arc<OpPool>,
    write_pool: Arc<OpPool>,
    send_rx: mpsc::Receiver<PacketStream>,
    close: CancellationToken,
    shutdown: Shutdown,
) {
    let Some(window) = op.take_slice() else {
        // a receive op is always armed with its window before spawn
        registry.remove(&id);
        read_pool.push(op);
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
        error!(connection = %id, "connection terminated: {e}");
        handler.on_error(e);
    }
    registry.remove(&id);
    let mut conn = outcome.conn;
    conn.on_disconnected().await;
    handler.on_client_disconnected(id);
    debug!(connection = %id, "client disconnected");
    drop(outcome.window);
    read_pool.push(outcome.op);
}

async fn accept_with_backoff(listener: &TcpListener) -> AppResult<TcpStream> {
    let mut backoff = 1;
    loop {
        match listener.accept().await {
            Ok((stream, _)) => return Ok(stream),
            Err(e) => {
                if backoff > 64 {
                    return Err(AppError::Io(e));
                }
                warn!("accept failed: {e}, retrying in {backoff}s");
            }
        }
        time::sleep(Duration::from_secs(backoff)).await;
        backoff *= 2;
    }
}

async fn shutdown_socket(mut stream: TcpStream) {
    let _ = stream.shutdown().await;
}
