use crate::error::{MemFsError, Result};

/// Byte returned for logical file contents that lie beyond the buffer.
pub const FILLER_BYTE: u8 = b'a';

/// Outcome of a bounded read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadResult {
    pub amount: usize,
    pub eof: bool,
}

/// Fixed-capacity backing store plus a logical length that may exceed it.
#[derive(Debug)]
pub struct FileData {
    buf: Box<[u8]>,
    length: u64,
}

impl FileData {
    /// Allocate the buffer once; it is never resized afterwards.
    pub fn with_capacity(capacity: usize, length: u64) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| MemFsError::OutOfMemory)?;
        buf.resize(capacity, 0);
        Ok(Self {
            buf: buf.into_boxed_slice(),
            length,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Truncate or extend the logical length. Stored bytes past a shrunken
    /// length are zeroed so a later extension does not resurrect them.
    pub fn set_length(&mut self, length: u64) {
        if length < self.length {
            let start = length.min(self.buf.len() as u64) as usize;
            let end = self.length.min(self.buf.len() as u64) as usize;
            self.buf[start..end].fill(0);
        }
        self.length = length;
    }

    /// Fill `out` from `offset`, clamped to the logical length.
    pub fn read_at(&self, offset: u64, out: &mut [u8]) -> ReadResult {
        let amount = if offset >= self.length {
            0
        } else {
            (out.len() as u64).min(self.length - offset) as usize
        };

        let capacity = self.buf.len() as u64;
        if offset < capacity {
            let start = offset as usize;
            let stored = amount.min((capacity - offset) as usize);
            out[..stored].copy_from_slice(&self.buf[start..start + stored]);
            out[stored..amount].fill(FILLER_BYTE);
        } else {
            out[..amount].fill(FILLER_BYTE);
        }

        ReadResult {
            amount,
            eof: offset.saturating_add(out.len() as u64) >= self.length,
        }
    }

    /// Store the in-capacity part of `data` at `offset` and extend the
    /// logical length to cover the whole write. Returns true if it grew.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<bool> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(MemFsError::InvalidArgument)?;

        let capacity = self.buf.len() as u64;
        if offset < capacity {
            let start = offset as usize;
            let stored = data.len().min((capacity - offset) as usize);
            self.buf[start..start + stored].copy_from_slice(&data[..stored]);
        }

        let grew = end > self.length;
        if grew {
            self.length = end;
        }
        Ok(grew)
    }
}
