use std::fmt;

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{MemFsError, Result};

/// Fixed size of the opaque handle exchanged with remote callers.
pub const WIRE_HANDLE_SIZE: usize = 122;

/// Longest full path an object may have.
pub const MAX_PATH_LEN: usize = 4096;

const HASH_LEN: usize = 8;
const LEN_LEN: usize = 2;
const PREFIX_OFFSET: usize = HASH_LEN + LEN_LEN;

/// Digest flavour requested by the protocol layer. Both produce the same bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestType {
    NfsV3,
    NfsV4,
}

/// Deterministic, fixed-size encoding of an object's full path at creation.
///
/// Layout: xxh3-64 of the path (LE), the path length as u16 (LE), then as
/// many leading path bytes as fit, zero-padded.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct WireHandle([u8; WIRE_HANDLE_SIZE]);

impl WireHandle {
    pub fn encode(path: &str) -> Self {
        let bytes = path.as_bytes();
        let mut out = [0u8; WIRE_HANDLE_SIZE];
        out[..HASH_LEN].copy_from_slice(&xxh3_64(bytes).to_le_bytes());
        out[HASH_LEN..PREFIX_OFFSET].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
        let keep = bytes.len().min(WIRE_HANDLE_SIZE - PREFIX_OFFSET);
        out[PREFIX_OFFSET..PREFIX_OFFSET + keep].copy_from_slice(&bytes[..keep]);
        Self(out)
    }

    /// Accept bytes from the wire. Anything but the exact size is malformed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; WIRE_HANDLE_SIZE] = bytes.try_into().map_err(|_| MemFsError::BadHandle)?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn path_hash(&self) -> u64 {
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(&self.0[..HASH_LEN]);
        u64::from_le_bytes(hash)
    }

    pub fn path_len(&self) -> u16 {
        u16::from_le_bytes([self.0[HASH_LEN], self.0[HASH_LEN + 1]])
    }

    /// The leading path bytes carried in the handle.
    pub fn path_prefix(&self) -> &[u8] {
        let keep = (self.path_len() as usize).min(WIRE_HANDLE_SIZE - PREFIX_OFFSET);
        &self.0[PREFIX_OFFSET..PREFIX_OFFSET + keep]
    }
}

impl fmt::Debug for WireHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WireHandle({:016x}, len={}, {:?})",
            self.path_hash(),
            self.path_len(),
            String::from_utf8_lossy(self.path_prefix())
        )
    }
}
