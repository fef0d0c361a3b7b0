use bytes::{Bytes, BytesMut};

use crate::packet::Wire;
use crate::{AppError, AppResult};

/// Bytes reserved at the front of every outbound packet for the u32
/// little-endian payload length, written once on finalization.
pub const LENGTH_HEADER_SIZE: usize = 4;

/// A sequential cursor over a byte buffer with typed primitive access.
///
/// A stream is either readable (constructed from received payload bytes) or
/// writable (being built for sending); mixing the two modes fails with
/// `InvalidOperation`. Reads past the end fail with `EndOfStream`.
#[derive(Debug)]
pub struct PacketStream {
    buffer: BytesMut,
    position: usize,
    readable: bool,
    finalized: bool,
}

impl PacketStream {
    /// Creates a writable stream for an outbound message. The first four
    /// bytes are reserved for the length header.
    pub fn new() -> Self {
        let mut buffer = BytesMut::with_capacity(64);
        buffer.extend_from_slice(&[0u8; LENGTH_HEADER_SIZE]);
        PacketStream {
            buffer,
            position: 0,
            readable: false,
            finalized: false,
        }
    }

    /// Wraps received payload bytes in a readable stream positioned at the
    /// first byte.
    pub fn from_payload(payload: &[u8]) -> Self {
        PacketStream {
            buffer: BytesMut::from(payload),
            position: 0,
            readable: true,
            finalized: false,
        }
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    /// Total bytes held, including the reserved header in write mode.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Unread bytes left in a readable stream.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Appends the encoding of `value`. Fails in read mode and after the
    /// stream has been finalized for sending.
    pub fn write<T: Wire>(&mut self, value: &T) -> AppResult<()> {
        if self.readable {
            return Err(AppError::InvalidOperation("write on a readable packet"));
        }
        if self.finalized {
            return Err(AppError::InvalidOperation("write after finalization"));
        }
        value.write_to(self)
    }

    /// Reads one `T`, advancing the position. Fails in write mode.
    pub fn read<T: Wire>(&mut self) -> AppResult<T> {
        if !self.readable {
            return Err(AppError::InvalidOperation("read on a writable packet"));
        }
        T::read_from(self)
    }

    /// Reads `n` consecutive `T`s.
    pub fn read_array<T: Wire>(&mut self, n: usize) -> AppResult<Vec<T>> {
        if !self.readable {
            return Err(AppError::InvalidOperation("read on a writable packet"));
        }
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(T::read_from(self)?);
        }
        Ok(values)
    }

    /// Finalizes the length header (once) and exposes the wire bytes:
    /// header plus payload.
    pub fn bytes(&mut self) -> AppResult<&[u8]> {
        if self.readable {
            return Err(AppError::InvalidOperation("frame a readable packet"));
        }
        self.finalize();
        Ok(&self.buffer)
    }

    /// Consumes the stream into an immutable wire frame.
    pub fn into_frame(mut self) -> AppResult<Bytes> {
        if self.readable {
            return Err(AppError::InvalidOperation("frame a readable packet"));
        }
        self.finalize();
        Ok(self.buffer.freeze())
    }

    fn finalize(&mut self) {
        if !self.finalized {
            let payload_len = (self.buffer.len() - LENGTH_HEADER_SIZE) as u32;
            self.buffer[..LENGTH_HEADER_SIZE].copy_from_slice(&payload_len.to_le_bytes());
            self.finalized = true;
        }
    }

    /// Takes `n` bytes at the current position. Used by [`Wire`] decoders.
    pub(crate) fn take(&mut self, n: usize) -> AppResult<&[u8]> {
        if self.remaining() < n {
            return Err(AppError::EndOfStream {
                needed: n - self.remaining(),
                remaining: self.remaining(),
            });
        }
        let start = self.position;
        self.position += n;
        Ok(&self.buffer[start..start + n])
    }

    /// Appends raw bytes. Used by [`Wire`] encoders.
    pub(crate) fn put_slice(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
}

impl Default for PacketStream {
    fn default() -> Self {
        PacketStream::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_round_trip() {
        let mut out = PacketStream::new();
        out.write(&0x1234u16).unwrap();
        out.write(&-7i32).unwrap();
        out.write(&u64::MAX).unwrap();
        out.write(&3.5f64).unwrap();
        out.write(&true).unwrap();
        out.write(&"héllo".to_string()).unwrap();

        let frame = out.into_frame().unwrap();
        let mut inbound = PacketStream::from_payload(&frame[LENGTH_HEADER_SIZE..]);
        assert_eq!(inbound.read::<u16>().unwrap(), 0x1234);
        assert_eq!(inbound.read::<i32>().unwrap(), -7);
        assert_eq!(inbound.read::<u64>().unwrap(), u64::MAX);
        assert_eq!(inbound.read::<f64>().unwrap(), 3.5);
        assert!(inbound.read::<bool>().unwrap());
        assert_eq!(inbound.read::<String>().unwrap(), "héllo");
        assert_eq!(inbound.remaining(), 0);
    }

    #[test]
    fn little_endian_layout() {
        let mut out = PacketStream::new();
        out.write(&0x0102_0304u32).unwrap();
        let frame = out.into_frame().unwrap();
        assert_eq!(&frame[..4], &[4, 0, 0, 0]);
        assert_eq!(&frame[4..], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn header_written_once() {
        let mut out = PacketStream::new();
        out.write(&1u8).unwrap();
        let first = out.bytes().unwrap().to_vec();
        let second = out.bytes().unwrap().to_vec();
        assert_eq!(first, second);
        assert_eq!(&first[..4], &[1, 0, 0, 0]);
        assert!(matches!(
            out.write(&2u8),
            Err(AppError::InvalidOperation(_))
        ));
    }

    #[test]
    fn read_past_end() {
        let mut inbound = PacketStream::from_payload(&[1, 2]);
        assert!(matches!(
            inbound.read::<u32>(),
            Err(AppError::EndOfStream {
                needed: 2,
                remaining: 2
            })
        ));
    }

    #[test]
    fn mode_misuse() {
        let mut out = PacketStream::new();
        assert!(matches!(
            out.read::<u8>(),
            Err(AppError::InvalidOperation(_))
        ));

        let mut inbound = PacketStream::from_payload(&[0]);
        assert!(matches!(
            inbound.write(&1u8),
            Err(AppError::InvalidOperation(_))
        ));
        assert!(matches!(
            inbound.bytes(),
            Err(AppError::InvalidOperation(_))
        ));
    }

    #[test]
    fn array_round_trip() {
        let values = vec![3u16, 1, 4, 1, 5];
        let mut out = PacketStream::new();
        out.write(&values).unwrap();
        let frame = out.into_frame().unwrap();

        let mut inbound = PacketStream::from_payload(&frame[LENGTH_HEADER_SIZE..]);
        assert_eq!(inbound.read::<Vec<u16>>().unwrap(), values);
    }

    #[test]
    fn invalid_bool_byte() {
        let mut inbound = PacketStream::from_payload(&[2]);
        assert!(matches!(
            inbound.read::<bool>(),
            Err(AppError::MalformedFrame(_))
        ));
    }

    #[test]
    fn empty_payload_frame() {
        let out = PacketStream::new();
        let frame = out.into_frame().unwrap();
        assert_eq!(&frame[..], &[0, 0, 0, 0]);
    }
}
