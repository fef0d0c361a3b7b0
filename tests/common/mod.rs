#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use framelink::{
    AppResult, ClientHandler, Connection, ConnectionId, EngineConfig, PacketStream, SendHandle,
    ServerEngine, ServerHandler,
};

/// Shared observation point for handler callbacks.
#[derive(Clone, Default)]
pub struct Recorder {
    pub messages: Arc<Mutex<Vec<String>>>,
    pub connected: Arc<AtomicUsize>,
    pub disconnected: Arc<AtomicUsize>,
    pub errors: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }
}

pub struct RecordingServer {
    pub recorder: Recorder,
    pub echo: bool,
    pub welcome: bool,
}

pub struct RecordingConnection {
    handle: SendHandle,
    recorder: Recorder,
    echo: bool,
    welcome: bool,
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn on_connected(&mut self) {
        if self.welcome {
            let mut packet = PacketStream::new();
            packet.write(&"welcome".to_string()).unwrap();
            let _ = self.handle.send(packet).await;
        }
    }

    async fn on_message_received(&mut self, mut packet: PacketStream) -> AppResult<()> {
        let text: String = packet.read()?;
        self.recorder.messages.lock().push(text.clone());
        if self.echo {
            let mut reply = PacketStream::new();
            reply.write(&text)?;
            self.handle.send(reply).await?;
        }
        Ok(())
    }
}

impl ServerHandler for RecordingServer {
    type Conn = RecordingConnection;

    fn create_connection(&self, handle: SendHandle) -> RecordingConnection {
        RecordingConnection {
            handle,
            recorder: self.recorder.clone(),
            echo: self.echo,
            welcome: self.welcome,
        }
    }

    fn on_client_connected(&self, _id: ConnectionId) {
        self.recorder.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_client_disconnected(&self, _id: ConnectionId) {
        self.recorder.disconnected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, _error: &framelink::AppError) {
        self.recorder.errors.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct RecordingClient {
    pub recorder: Recorder,
}

#[async_trait]
impl ClientHandler for RecordingClient {
    async fn on_message_received(&mut self, mut packet: PacketStream) -> AppResult<()> {
        let text: String = packet.read()?;
        self.recorder.messages.lock().push(text);
        Ok(())
    }

    async fn on_disconnected(&mut self) {
        self.recorder.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ServerFixture {
    pub engine: Arc<ServerEngine<RecordingServer>>,
    pub addr: SocketAddr,
    pub task: JoinHandle<AppResult<()>>,
}

pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind port probe")
        .local_addr()
        .expect("probe local addr")
        .port()
}

pub fn local_config(max_connections: usize, buffer_size: usize) -> EngineConfig {
    EngineConfig::new(free_port(), max_connections)
        .with_host("127.0.0.1")
        .with_buffer_size(buffer_size)
}

/// Spawns `start` on its own task and waits for the engine to bind.
pub async fn start_server(config: EngineConfig, handler: RecordingServer) -> ServerFixture {
    let engine = Arc::new(ServerEngine::new(config, handler));
    let task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start().await }
    });
    for _ in 0..200 {
        if let Some(addr) = engine.local_addr() {
            return ServerFixture { engine, addr, task };
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("server did not bind within 1s");
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Wire bytes of one frame whose payload is an encoded string.
pub fn string_frame(text: &str) -> Vec<u8> {
    let mut packet = PacketStream::new();
    packet.write(&text.to_string()).unwrap();
    packet.into_frame().unwrap().to_vec()
}

/// Reads one length-prefixed frame off a raw socket.
pub async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.expect("frame header");
    let len = u32::from_le_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.expect("frame payload");
    payload
}

/// Reads one frame and decodes its payload as a string.
pub async fn read_string(stream: &mut TcpStream) -> String {
    let payload = read_frame(stream).await;
    PacketStream::from_payload(&payload).read().unwrap()
}

pub async fn write_all(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.expect("socket write");
    stream.flush().await.expect("socket flush");
}
