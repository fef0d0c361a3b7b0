use crate::network::AssemblyCursor;
use crate::packet::PacketStream;
use crate::{AppError, AppResult};

pub const DEFAULT_HEADER_SIZE: usize = 4;

/// The framing discipline: how a header is sized and parsed, and how an
/// extracted payload becomes a packet. Applications may supply their own;
/// the default frames by a u32 little-endian prefix counting payload bytes
/// only.
pub trait PacketProcessor: Send + Sync + 'static {
    fn header_size(&self) -> usize {
        DEFAULT_HEADER_SIZE
    }

    /// Parses the message size out of a complete header.
    fn frame_length(&self, header: &[u8]) -> AppResult<usize>;

    /// Wraps one extracted payload for dispatch.
    fn create_packet(&self, payload: &[u8]) -> PacketStream {
        PacketStream::from_payload(payload)
    }
}

/// Default framing: `u32 LE payload_length` followed by that many bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct LengthPrefixProcessor;

impl PacketProcessor for LengthPrefixProcessor {
    fn frame_length(&self, header: &[u8]) -> AppResult<usize> {
        let raw: [u8; DEFAULT_HEADER_SIZE] = header
            .try_into()
            .map_err(|_| AppError::MalformedFrame(format!("short header: {} bytes", header.len())))?;
        Ok(u32::from_le_bytes(raw) as usize)
    }
}

/// Extracts every complete frame currently assembled in `window`, invoking
/// `emit` for each in order, then compacts the residual bytes to the window
/// origin when the tail space cannot hold the next needed amount.
///
/// A declared length above `window length - header size` fails with
/// `FrameTooLarge`; the caller is expected to close the connection.
pub fn drain_frames<F>(
    cursor: &mut AssemblyCursor,
    window: &mut [u8],
    processor: &dyn PacketProcessor,
    mut emit: F,
) -> AppResult<usize>
where
    F: FnMut(PacketStream),
{
    let header_size = processor.header_size();
    let limit = window.len() - header_size;
    let mut emitted = 0;

    loop {
        if cursor.received() < header_size {
            break;
        }
        let start = cursor.data_start();
        let length = processor.frame_length(&window[start..start + header_size])?;
        if length > limit {
            return Err(AppError::FrameTooLarge { length, limit });
        }
        if cursor.received() < header_size + length {
            break;
        }
        let payload = &window[start + header_size..start + header_size + length];
        emit(processor.create_packet(payload));
        cursor.consume(header_size + length);
        emitted += 1;
    }

    if cursor.received() == 0 {
        cursor.reset();
    } else {
        // Residual partial frame: move it to the origin when the tail cannot
        // hold the rest of it.
        let needed = if cursor.received() >= header_size {
            let start = cursor.data_start();
            header_size + processor.frame_length(&window[start..start + header_size])?
        } else {
            header_size
        };
        if window.len() - cursor.data_start() < needed {
            window.copy_within(cursor.data_start()..cursor.next_receive(), 0);
            cursor.rebase();
        }
    }

    Ok(emitted)
}
