//! Network Module
//!
//! Connection-facing building blocks of the engine:
//! - Connection identity, the per-connection assembly cursor, and the
//!   submission handle applications send through
//! - The packet processor that frames an inbound byte stream into discrete
//!   messages
//! - The select loop that drives one connection's receive and send paths
//!
//! The engine guarantees at most one outstanding receive per connection and
//! retires each send before starting the next, so message dispatch is
//! strictly ordered within a connection.

pub use connection::{
    AssemblyCursor, ClientHandler, Connection, ConnectionId, SendHandle, ServerHandler,
};
pub use processor::{drain_frames, LengthPrefixProcessor, PacketProcessor, DEFAULT_HEADER_SIZE};

pub(crate) use io_loop::IoLoop;

mod connection;
mod io_loop;
mod processor;
