use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;

use framelink::{
    setup_tracing_with, AppResult, ClientEngine, ClientHandler, Connection, ConnectionId,
    EngineConfig, PacketStream, SendHandle, ServerEngine, ServerHandler,
};

#[derive(Parser)]
#[command(version, about = "framed TCP echo server and client")]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Parser)]
pub enum Command {
    /// Run the echo server
    Serve {
        #[arg(short, long, default_value_t = 9000)]
        port: u16,
        #[arg(short, long, default_value_t = 64)]
        max_connections: usize,
    },
    /// Send one message and print the replies
    Send {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long, default_value_t = 9000)]
        port: u16,
        message: String,
    },
}

struct EchoServer;

struct EchoConnection {
    handle: SendHandle,
}

#[async_trait]
impl Connection for EchoConnection {
    async fn on_connected(&mut self) {
        let mut welcome = PacketStream::new();
        if welcome.write(&"welcome".to_string()).is_ok() {
            let _ = self.handle.send(welcome).await;
        }
    }

    async fn on_message_received(&mut self, mut packet: PacketStream) -> AppResult<()> {
        let text: String = packet.read()?;
        info!(connection = %self.handle.identity(), "echo {text:?}");
        let mut reply = PacketStream::new();
        reply.write(&text)?;
        self.handle.send(reply).await
    }
}

impl ServerHandler for EchoServer {
    type Conn = EchoConnection;

    fn create_connection(&self, handle: SendHandle) -> EchoConnection {
        EchoConnection { handle }
    }

    fn on_client_connected(&self, id: ConnectionId) {
        info!("client {id} connected");
    }

    fn on_client_disconnected(&self, id: ConnectionId) {
        info!("client {id} disconnected");
    }
}

struct PrintClient {
    replies: mpsc::Sender<String>,
}

#[async_trait]
impl ClientHandler for PrintClient {
    async fn on_message_received(&mut self, mut packet: PacketStream) -> AppResult<()> {
        let text: String = packet.read()?;
        let _ = self.replies.send(text).await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let commandline = CommandLine::parse();
    let filter = match commandline.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_tracing_with(filter)?;

    match commandline.command {
        Command::Serve {
            port,
            max_connections,
        } => {
            let config = match &commandline.conf {
                Some(path) => EngineConfig::from_file(PathBuf::from(path))?,
                None => EngineConfig::new(port, max_connections),
            };
            let engine = Arc::new(ServerEngine::new(config, EchoServer));
            let stopper = engine.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    info!("shutdown signal received");
                    stopper.stop();
                }
            });
            engine.start().await?;
        }
        Command::Send {
            host,
            port,
            message,
        } => {
            let (reply_tx, mut reply_rx) = mpsc::channel(8);
            let client = ClientEngine::new(host, port, 4096, PrintClient { replies: reply_tx });
            client.connect().await?;

            let mut packet = PacketStream::new();
            packet.write(&message)?;
            client.send(packet).await?;

            // the welcome packet, then the echo
            for _ in 0..2 {
                if let Some(reply) = reply_rx.recv().await {
                    println!("{reply}");
                }
            }
            client.disconnect().await?;
        }
    }
    Ok(())
}
