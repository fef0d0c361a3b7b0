use crate::packet::PacketStream;
use crate::{AppError, AppResult};

/// A value that can be encoded to and decoded from a [`PacketStream`].
///
/// Implementations exist for the primitive protocol types: fixed-width
/// integers, floats, bool (one byte, 0 or 1), length-prefixed UTF-8 strings,
/// and `Vec<T>` (u32 count followed by the elements).
pub trait Wire: Sized {
    fn read_from(stream: &mut PacketStream) -> AppResult<Self>;
    fn write_to(&self, stream: &mut PacketStream) -> AppResult<()>;

    /// Encoded size in bytes.
    fn wire_size(&self) -> usize;
}

macro_rules! impl_wire_numeric {
    ($($ty:ty),*) => {
        $(
            impl Wire for $ty {
                fn read_from(stream: &mut PacketStream) -> AppResult<Self> {
                    const N: usize = std::mem::size_of::<$ty>();
                    let bytes = stream.take(N)?;
                    let mut raw = [0u8; N];
                    raw.copy_from_slice(bytes);
                    Ok(<$ty>::from_le_bytes(raw))
                }

                fn write_to(&self, stream: &mut PacketStream) -> AppResult<()> {
                    stream.put_slice(&self.to_le_bytes());
                    Ok(())
                }

                fn wire_size(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }
            }
        )*
    };
}

impl_wire_numeric!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl Wire for bool {
    fn read_from(stream: &mut PacketStream) -> AppResult<Self> {
        match stream.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(AppError::MalformedFrame(format!(
                "invalid boolean byte {other}"
            ))),
        }
    }

    fn write_to(&self, stream: &mut PacketStream) -> AppResult<()> {
        stream.put_slice(&[u8::from(*self)]);
        Ok(())
    }

    fn wire_size(&self) -> usize {
        1
    }
}

impl Wire for String {
    fn read_from(stream: &mut PacketStream) -> AppResult<Self> {
        let len = u32::read_from(stream)? as usize;
        let bytes = stream.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| AppError::MalformedFrame(format!("invalid utf-8 string: {e}")))
    }

    fn write_to(&self, stream: &mut PacketStream) -> AppResult<()> {
        (self.len() as u32).write_to(stream)?;
        stream.put_slice(self.as_bytes());
        Ok(())
    }

    fn wire_size(&self) -> usize {
        4 + self.len()
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn read_from(stream: &mut PacketStream) -> AppResult<Self> {
        let count = u32::read_from(stream)? as usize;
        let mut values = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            values.push(T::read_from(stream)?);
        }
        Ok(values)
    }

    fn write_to(&self, stream: &mut PacketStream) -> AppResult<()> {
        (self.len() as u32).write_to(stream)?;
        for value in self {
            value.write_to(stream)?;
        }
        Ok(())
    }

    fn wire_size(&self) -> usize {
        4 + self.iter().map(Wire::wire_size).sum::<usize>()
    }
}
