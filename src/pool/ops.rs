use bytes::Bytes;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::pool::ArenaSlice;
use crate::{AppError, AppResult};

/// The operation a record is armed for. Accepts need no record in this
/// model; the standing accept is the loop itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Receive,
    Send,
}

/// A reusable descriptor for one in-flight I/O operation. A record is either
/// in its pool or exclusively held by the task driving the operation, never
/// both.
///
/// Receive records carry the connection's arena slice; send records carry the
/// finalized frame bytes and the resume window across partial writes.
#[derive(Debug)]
pub struct OpRecord {
    kind: OpKind,
    slice: Option<ArenaSlice>,
    owner: Option<Uuid>,
    payload: Option<Bytes>,
    window: usize,
}

impl OpRecord {
    fn new(kind: OpKind) -> Self {
        OpRecord {
            kind,
            slice: None,
            owner: None,
            payload: None,
            window: 0,
        }
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn owner(&self) -> Option<Uuid> {
        self.owner
    }

    pub fn set_owner(&mut self, owner: Uuid) {
        self.owner = Some(owner);
    }

    pub fn bind_slice(&mut self, slice: ArenaSlice) {
        self.slice = Some(slice);
    }

    pub fn take_slice(&mut self) -> Option<ArenaSlice> {
        self.slice.take()
    }

    pub fn slice(&self) -> Option<&ArenaSlice> {
        self.slice.as_ref()
    }

    /// Arms the record for a send: the whole payload is pending.
    pub fn bind_payload(&mut self, payload: Bytes) {
        self.payload = Some(payload);
        self.window = 0;
    }

    /// The bytes still to be written.
    pub fn pending_payload(&self) -> &[u8] {
        match &self.payload {
            Some(payload) => &payload[self.window..],
            None => &[],
        }
    }

    /// Advances the send window past `n` transferred bytes.
    pub fn advance_window(&mut self, n: usize) {
        self.window += n;
    }

    pub fn window(&self) -> usize {
        self.window
    }

    fn reset(&mut self) {
        self.slice = None;
        self.owner = None;
        self.payload = None;
        self.window = 0;
    }
}

/// A bounded stack of [`OpRecord`]s. `pop` underflow means more operations
/// are in flight than the advertised connection cap, which is a fatal
/// invariant breach for the caller to surface.
pub struct OpPool {
    name: &'static str,
    capacity: usize,
    records: Mutex<Vec<OpRecord>>,
}

impl OpPool {
    pub fn new(name: &'static str, kind: OpKind, capacity: usize) -> Self {
        let records = (0..capacity).map(|_| OpRecord::new(kind)).collect();
        OpPool {
            name,
            capacity,
            records: Mutex::new(records),
        }
    }

    pub fn pop(&self) -> AppResult<OpRecord> {
        self.records
            .lock()
            .pop()
            .ok_or(AppError::Exhausted(self.name))
    }

    /// Resets and returns a record to the pool.
    pub fn push(&self, mut op: OpRecord) {
        op.reset();
        let mut records = self.records.lock();
        debug_assert!(records.len() < self.capacity, "op pool over-filled");
        records.push(op);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.records.lock().len()
    }
}

impl std::fmt::Debug for OpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}
