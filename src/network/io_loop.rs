use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::network::{drain_frames, AssemblyCursor, Connection, ConnectionId, PacketProcessor};
use crate::packet::PacketStream;
use crate::pool::{ArenaSlice, OpPool, OpRecord};
use crate::service::Shutdown;
use crate::{AppError, AppResult};

/// Drives one established connection.
///
/// The socket splits into a read loop on the current task and a writer task
/// that drains the bounded send queue, so a handler that submits messages
/// from inside its own dispatch never blocks the queue it is filling.
/// Receives land in the connection's arena window and are framed in place;
/// the writer retires one pooled send op at a time, which keeps sends in
/// submission order.
///
/// Used by both the server engine (one loop per accepted socket) and the
/// client engine (one loop total).
pub(crate) struct IoLoop<C: Connection> {
    pub id: ConnectionId,
    pub conn: C,
    pub op: OpRecord,
    pub window: ArenaSlice,
    pub write_pool: Arc<OpPool>,
    pub processor: Arc<dyn PacketProcessor>,
    pub send_rx: mpsc::Receiver<PacketStream>,
    pub close: CancellationToken,
    pub shutdown: Shutdown,
}

/// What the loop hands back for teardown: the connection value for its
/// disconnect callback, the receive op and window for their pools, and the
/// error when termination was abnormal.
pub(crate) struct IoOutcome<C> {
    pub conn: C,
    pub op: OpRecord,
    pub window: ArenaSlice,
    pub failure: Option<AppError>,
}

enum Event {
    Read(io::Result<usize>),
    Closed,
    Shutdown,
}

impl<C: Connection> IoLoop<C> {
    pub async fn run(mut self, stream: TcpStream) -> IoOutcome<C> {
        let (mut reader, writer) = stream.into_split();
        let mut cursor = AssemblyCursor::new();
        let mut failure: Option<AppError> = None;

        let writer_task = tokio::spawn(write_loop(
            writer,
            self.send_rx,
            self.write_pool,
            self.close.clone(),
            self.id,
        ));

        self.conn.on_connected().await;

        'main: loop {
            let event = {
                // Compaction keeps at least one free byte past next_receive
                // while a frame is incomplete, so this buffer is never empty
                // and a zero-length read always means the peer closed.
                let buf = &mut self.window.as_mut_slice()[cursor.next_receive()..];
                tokio::select! {
                    res = reader.read(buf) => Event::Read(res),
                    _ = self.close.cancelled() => Event::Closed,
                    _ = self.shutdown.recv() => Event::Shutdown,
                }
            };

            match event {
                Event::Read(Ok(0)) => break 'main,
                Event::Read(Ok(n)) => {
                    cursor.advance_receive(n);
                    let mut frames = Vec::new();
                    let drained = drain_frames(
                        &mut cursor,
                        self.window.as_mut_slice(),
                        self.processor.as_ref(),
                        |packet| frames.push(packet),
                    );
                    if let Err(e) = drained {
                        failure = Some(e);
                        break 'main;
                    }
                    for packet in frames {
                        if let Err(e) = self.conn.on_message_received(packet).await {
                            if e.closes_connection() {
                                failure = Some(e);
                                break 'main;
                            }
                            // Packet misuse inside the handler; the
                            // connection stays open.
                            error!(connection = %self.id, "message handler error: {e}");
                            self.conn.on_error(&e);
                        }
                    }
                }
                Event::Read(Err(e)) => {
                    failure = Some(AppError::Io(e));
                    break 'main;
                }
                Event::Closed | Event::Shutdown => break 'main,
            }
        }

        // Stop the writer and fold in a send failure it may have seen first.
        self.close.cancel();
        let send_failure = writer_task.await.unwrap_or(None);
        if failure.is_none() {
            failure = send_failure;
        }
        if let Some(e) = &failure {
            self.conn.on_error(e);
        }

        IoOutcome {
            conn: self.conn,
            op: self.op,
            window: self.window,
            failure,
        }
    }
}

/// Drains the send queue in submission order. A socket failure cancels the
/// close token so the read loop tears the connection down.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut send_rx: mpsc::Receiver<PacketStream>,
    write_pool: Arc<OpPool>,
    close: CancellationToken,
    id: ConnectionId,
) -> Option<AppError> {
    let failure = loop {
        let packet = tokio::select! {
            submitted = send_rx.recv() => match submitted {
                Some(packet) => packet,
                None => {
                    debug!(connection = %id, "send queue closed");
                    break None;
                }
            },
            _ = close.cancelled() => break None,
        };
        match transmit(&mut writer, &write_pool, id, packet).await {
            Ok(()) => {}
            Err(e) if e.closes_connection() => break Some(e),
            Err(e) => {
                // A readable packet was submitted for sending; skip it.
                error!(connection = %id, "unsendable packet: {e}");
            }
        }
    };
    if failure.is_some() {
        close.cancel();
    }
    let _ = writer.shutdown().await;
    failure
}

/// Sends one finalized frame through a pooled send op, advancing the op's
/// window across partial writes until the frame is fully drained.
async fn transmit(
    writer: &mut OwnedWriteHalf,
    write_pool: &OpPool,
    id: ConnectionId,
    packet: PacketStream,
) -> AppResult<()> {
    let mut op = write_pool.pop()?;
    op.set_owner(id.as_uuid());
    let frame = match packet.into_frame() {
        Ok(bytes) => bytes,
        Err(e) => {
            write_pool.push(op);
            return Err(e);
        }
    };
    op.bind_payload(frame);
    let result = write_windowed(writer, &mut op).await;
    write_pool.push(op);
    result.map_err(AppError::Io)
}

async fn write_windowed(writer: &mut OwnedWriteHalf, op: &mut OpRecord) -> io::Result<()> {
    while !op.pending_payload().is_empty() {
        let n = writer.write(op.pending_payload()).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "socket closed mid-send",
            ));
        }
        op.advance_window(n);
    }
    writer.flush().await
}
