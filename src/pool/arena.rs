use std::sync::Arc;

use parking_lot::Mutex;

use crate::{AppError, AppResult};

struct ArenaState {
    free: Vec<usize>,
    cursor: usize,
    in_use: usize,
}

/// One contiguous byte region of `slice_size * slice_count` bytes, handed
/// out as fixed-size slices. The full region is allocated up front; checkout
/// prefers a recycled offset from the free stack and otherwise advances the
/// first-time cursor.
///
/// Every offset is owned by at most one live [`ArenaSlice`], so concurrent
/// holders never touch overlapping regions. Slices return their offset to
/// the free stack on drop.
pub struct BufferArena {
    memory: *mut u8,
    slice_size: usize,
    slice_count: usize,
    state: Mutex<ArenaState>,
}

// Offsets are handed out exclusively; the raw region behind a checked-out
// slice is only reachable through that slice.
unsafe impl Send for BufferArena {}
unsafe impl Sync for BufferArena {}

impl BufferArena {
    pub fn new(slice_size: usize, slice_count: usize) -> Arc<Self> {
        let total = slice_size * slice_count;
        let memory = Box::into_raw(vec![0u8; total].into_boxed_slice()) as *mut u8;
        Arc::new(BufferArena {
            memory,
            slice_size,
            slice_count,
            state: Mutex::new(ArenaState {
                free: Vec::with_capacity(slice_count),
                cursor: 0,
                in_use: 0,
            }),
        })
    }

    /// Assigns a free slice, failing with `Exhausted` when all
    /// `slice_count` slices are live.
    pub fn checkout(self: &Arc<Self>) -> AppResult<ArenaSlice> {
        let mut state = self.state.lock();
        let offset = if let Some(offset) = state.free.pop() {
            offset
        } else if state.cursor + self.slice_size <= self.capacity() {
            let offset = state.cursor;
            state.cursor += self.slice_size;
            offset
        } else {
            return Err(AppError::Exhausted("buffer arena"));
        };
        state.in_use += 1;
        Ok(ArenaSlice {
            arena: Arc::clone(self),
            offset,
            len: self.slice_size,
        })
    }

    fn checkin(&self, offset: usize) {
        let mut state = self.state.lock();
        state.free.push(offset);
        state.in_use -= 1;
    }

    /// Total bytes owned by the arena, fixed at construction.
    pub fn capacity(&self) -> usize {
        self.slice_size * self.slice_count
    }

    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    pub fn slice_count(&self) -> usize {
        self.slice_count
    }

    /// Number of slices currently checked out.
    pub fn in_use(&self) -> usize {
        self.state.lock().in_use
    }
}

impl Drop for BufferArena {
    fn drop(&mut self) {
        let total = self.capacity();
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.memory,
                total,
            )));
        }
    }
}

impl std::fmt::Debug for BufferArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferArena")
            .field("slice_size", &self.slice_size)
            .field("slice_count", &self.slice_count)
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// A fixed-size window of the arena, exclusively owned until dropped.
pub struct ArenaSlice {
    arena: Arc<BufferArena>,
    offset: usize,
    len: usize,
}

impl ArenaSlice {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.arena.memory.add(self.offset), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.arena.memory.add(self.offset), self.len) }
    }
}

impl Drop for ArenaSlice {
    fn drop(&mut self) {
        self.arena.checkin(self.offset);
    }
}

impl std::fmt::Debug for ArenaSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaSlice")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
