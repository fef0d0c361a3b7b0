//! Packet Stream Codec
//!
//! Typed primitive I/O over a growable byte buffer. Outbound packets are
//! built with [`PacketStream::new`] and reserve space for the length header;
//! inbound packets are wrapped with [`PacketStream::from_payload`] and read
//! with the [`Wire`] primitives. All encodings are little-endian.

pub use stream::{PacketStream, LENGTH_HEADER_SIZE};
pub use wire::Wire;

mod stream;
mod wire;
