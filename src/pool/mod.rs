//! Pre-allocated I/O resources: the buffer arena partitioned into
//! per-connection receive windows and the bounded pools of reusable
//! operation records.

pub use arena::{ArenaSlice, BufferArena};
pub use ops::{OpKind, OpPool, OpRecord};

mod arena;
mod ops;
