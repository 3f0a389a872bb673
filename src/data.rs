//! # Data Descriptors
//!
//! A [`DataDesc`] is an owned byte segment travelling through the layer chain,
//! either bytes waiting to be written or bytes that were just read. It carries
//! a cursor so a layer can consume it partially and hand the remainder on.
//! Ownership moves with the value; nothing is shared between layers.

use heapless::Vec;

use crate::error::MqttError;

/// Capacity of a single descriptor. Large enough for a maximal encoded
/// `PUBLISH` (topic, packet id and payload plus header).
pub const IO_BUFFER_SIZE: usize = 1280;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataDesc {
    data: Vec<u8, IO_BUFFER_SIZE>,
    pos: usize,
}

impl DataDesc {
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            pos: 0,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, MqttError> {
        let mut desc = Self::new();
        desc.append(bytes)?;
        Ok(desc)
    }

    /// Fills the descriptor through `f`, which receives the whole spare capacity
    /// and returns how many bytes it produced.
    pub fn fill_with<E>(
        &mut self,
        f: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        let start = self.data.len();
        // Resizing to capacity cannot fail.
        let _ = self.data.resize(IO_BUFFER_SIZE, 0);
        let res = f(&mut self.data[start..]);
        let produced = match &res {
            Ok(n) => (*n).min(IO_BUFFER_SIZE - start),
            Err(_) => 0,
        };
        self.data.truncate(start + produced);
        res.map(|_| produced)
    }

    /// Appends bytes after the existing content, compacting consumed bytes
    /// first when that makes room.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), MqttError> {
        if self.data.len() + bytes.len() > IO_BUFFER_SIZE {
            self.compact();
        }
        self.data
            .extend_from_slice(bytes)
            .map_err(|_| MqttError::BufferTooSmall)
    }

    /// Drops the consumed prefix and moves the cursor back to zero.
    pub fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        let len = self.data.len();
        self.data.copy_within(self.pos..len, 0);
        self.data.truncate(len - self.pos);
        self.pos = 0;
    }

    /// Bytes between the cursor and the end.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Moves the cursor forward by at most `n` bytes.
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.data.len());
    }

    /// Takes up to `n` bytes from the cursor.
    pub fn take(&mut self, n: usize) -> &[u8] {
        let start = self.pos;
        let end = (start + n).min(self.data.len());
        self.pos = end;
        &self.data[start..end]
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    pub fn is_consumed(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }
}
