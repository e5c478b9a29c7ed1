use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{MemFsError, Result};

bitflags! {
    /// Access and deny bits of an open. No bits set means closed.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OpenFlags: u16 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const RDWR = Self::READ.bits() | Self::WRITE.bits();
        const DENY_READ = 1 << 2;
        const DENY_WRITE = 1 << 3;
        const DENY_WRITE_MAND = 1 << 4;
        const TRUNC = 1 << 5;
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Per-file tally of the access and deny modes held by open states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ShareCounters {
    pub access_read: u32,
    pub access_write: u32,
    pub deny_read: u32,
    pub deny_write: u32,
    pub deny_write_mand: u32,
}

impl ShareCounters {
    /// Fail with `ShareConflict` if `flags` clashes with what is held.
    ///
    /// `bypass` waives the ordinary deny-read and deny-write reservations,
    /// never the mandatory one.
    pub fn check_conflict(&self, flags: OpenFlags, bypass: bool) -> Result<()> {
        let conflict = (flags.contains(OpenFlags::READ) && self.deny_read > 0 && !bypass)
            || (flags.contains(OpenFlags::WRITE) && self.deny_write_mand > 0)
            || (flags.contains(OpenFlags::WRITE) && self.deny_write > 0 && !bypass)
            || (flags.contains(OpenFlags::DENY_READ) && self.access_read > 0)
            || (flags.intersects(OpenFlags::DENY_WRITE | OpenFlags::DENY_WRITE_MAND)
                && self.access_write > 0);

        if conflict {
            Err(MemFsError::ShareConflict)
        } else {
            Ok(())
        }
    }

    /// Swap the contribution of one open from `old` to `new`.
    pub fn update(&mut self, old: OpenFlags, new: OpenFlags) {
        fn adjust(counter: &mut u32, bit: OpenFlags, old: OpenFlags, new: OpenFlags) {
            match (old.contains(bit), new.contains(bit)) {
                (true, false) => *counter = counter.saturating_sub(1),
                (false, true) => *counter += 1,
                _ => {}
            }
        }

        adjust(&mut self.access_read, OpenFlags::READ, old, new);
        adjust(&mut self.access_write, OpenFlags::WRITE, old, new);
        adjust(&mut self.deny_read, OpenFlags::DENY_READ, old, new);
        adjust(&mut self.deny_write, OpenFlags::DENY_WRITE, old, new);
        adjust(&mut self.deny_write_mand, OpenFlags::DENY_WRITE_MAND, old, new);
    }

    pub fn is_idle(&self) -> bool {
        *self == ShareCounters::default()
    }
}

/// An open descriptor: the flags it was opened with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemFd {
    pub openflags: OpenFlags,
}

impl MemFd {
    pub fn open(&mut self, flags: OpenFlags) {
        self.openflags = flags.difference(OpenFlags::TRUNC);
    }

    pub fn close(&mut self) {
        self.openflags = OpenFlags::empty();
    }

    pub fn is_open(&self) -> bool {
        !self.openflags.is_empty()
    }

    /// Whether this descriptor permits `required` access. WRITE implies READ.
    pub fn can(&self, required: OpenFlags) -> bool {
        let mut granted = self.openflags;
        if granted.contains(OpenFlags::WRITE) {
            granted |= OpenFlags::READ;
        }
        granted.contains(required & OpenFlags::RDWR)
    }
}

/// Kind of protocol state an open is tracked under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Share,
    NlmShare,
    NinePFid,
    Lock,
    Delegation,
}

impl StateType {
    /// Whether opens under this state type take part in share reservations.
    pub fn carries_share(self) -> bool {
        matches!(self, StateType::Share | StateType::NlmShare | StateType::NinePFid)
    }
}

/// Caller-owned record of one open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenState {
    pub state_type: StateType,
    pub fd: MemFd,
}

impl OpenState {
    pub fn new(state_type: StateType) -> Self {
        Self {
            state_type,
            fd: MemFd::default(),
        }
    }

    pub fn share() -> Self {
        Self::new(StateType::Share)
    }

    pub fn flags(&self) -> OpenFlags {
        self.fd.openflags
    }
}
