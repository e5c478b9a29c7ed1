use bitflags::bitflags;
use chrono::Utc;
use serde::Serialize;

use super::object::ObjectType;

bitflags! {
    /// Which attribute fields are requested, set, or valid.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
    pub struct AttrMask: u64 {
        const TYPE = 1 << 0;
        const SIZE = 1 << 1;
        const FSID = 1 << 2;
        const FILEID = 1 << 3;
        const MODE = 1 << 4;
        const NUMLINKS = 1 << 5;
        const OWNER = 1 << 6;
        const GROUP = 1 << 7;
        const RAWDEV = 1 << 8;
        const ATIME = 1 << 9;
        const CREATION = 1 << 10;
        const CTIME = 1 << 11;
        const MTIME = 1 << 12;
        const SPACEUSED = 1 << 13;
        const CHANGE = 1 << 14;
        const ATIME_SERVER = 1 << 15;
        const MTIME_SERVER = 1 << 16;
        /// Caller tolerates a failed attribute read; the result then carries only this bit.
        const RDATTR_ERR = 1 << 17;

        const POSIX = Self::TYPE.bits()
            | Self::SIZE.bits()
            | Self::FSID.bits()
            | Self::FILEID.bits()
            | Self::MODE.bits()
            | Self::NUMLINKS.bits()
            | Self::OWNER.bits()
            | Self::GROUP.bits()
            | Self::RAWDEV.bits()
            | Self::ATIME.bits()
            | Self::CTIME.bits()
            | Self::MTIME.bits()
            | Self::SPACEUSED.bits()
            | Self::CHANGE.bits();

        const SET_TIME = Self::ATIME.bits()
            | Self::MTIME.bits()
            | Self::ATIME_SERVER.bits()
            | Self::MTIME_SERVER.bits();
    }
}

impl Default for AttrMask {
    fn default() -> Self {
        Self::empty()
    }
}

/// Seconds and nanoseconds since the epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Timespec {
    pub secs: i64,
    pub nsecs: u32,
}

impl Timespec {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            secs: now.timestamp(),
            nsecs: now.timestamp_subsec_nanos(),
        }
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self { secs, nsecs: 0 }
    }

    pub fn as_nanos(&self) -> u64 {
        (self.secs.max(0) as u64)
            .saturating_mul(1_000_000_000)
            .saturating_add(self.nsecs as u64)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Fsid {
    pub major: u64,
    pub minor: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct DevNumbers {
    pub major: u32,
    pub minor: u32,
}

/// Exclusive-create verifier, stamped into atime/mtime seconds.
pub type Verifier = [u8; 8];

/// POSIX-like attribute record exchanged with the protocol layer.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AttrList {
    pub request_mask: AttrMask,
    pub valid_mask: AttrMask,
    pub supported: AttrMask,
    pub object_type: Option<ObjectType>,
    pub filesize: u64,
    pub spaceused: u64,
    pub fsid: Fsid,
    pub fileid: u64,
    pub mode: u32,
    pub numlinks: u32,
    pub owner: u32,
    pub group: u32,
    pub rawdev: DevNumbers,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
    pub chgtime: Timespec,
    pub creation: Timespec,
    pub change: u64,
}

impl AttrList {
    /// An empty record asking for `request_mask`.
    pub fn with_request(request_mask: AttrMask) -> Self {
        Self {
            request_mask,
            ..Default::default()
        }
    }

    /// Start a record used to *set* attributes: `valid_mask` says which fields carry values.
    pub fn to_set(valid_mask: AttrMask) -> Self {
        Self {
            valid_mask,
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self.valid_mask |= AttrMask::MODE;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.filesize = size;
        self.valid_mask |= AttrMask::SIZE;
        self
    }

    pub fn with_owner(mut self, owner: u32, group: u32) -> Self {
        self.owner = owner;
        self.group = group;
        self.valid_mask |= AttrMask::OWNER | AttrMask::GROUP;
        self
    }

    /// Copy `src` into `self`, keeping our request mask and narrowing the
    /// valid mask to what was requested (everything, if nothing was).
    pub fn fill_from(&mut self, src: &AttrList) {
        let request = self.request_mask;
        *self = src.clone();
        self.request_mask = request;
        if !request.is_empty() {
            self.valid_mask = src.valid_mask & request;
        }
    }

    pub fn set_verifier(&mut self, verifier: &Verifier) {
        let (atime, mtime) = verifier_halves(verifier);
        self.atime = Timespec::from_secs(atime);
        self.mtime = Timespec::from_secs(mtime);
        self.valid_mask |= AttrMask::ATIME | AttrMask::MTIME;
    }

    pub fn matches_verifier(&self, verifier: &Verifier) -> bool {
        let (atime, mtime) = verifier_halves(verifier);
        self.atime.secs == atime && self.mtime.secs == mtime
    }

    /// Record a change at `when`, keeping `change` strictly increasing.
    pub(crate) fn touch_change(&mut self, when: Timespec) {
        self.chgtime = when;
        self.change = self.change.saturating_add(1).max(when.as_nanos());
    }
}

fn verifier_halves(verifier: &Verifier) -> (i64, i64) {
    let atime = u32::from_le_bytes([verifier[0], verifier[1], verifier[2], verifier[3]]);
    let mtime = u32::from_le_bytes([verifier[4], verifier[5], verifier[6], verifier[7]]);
    (atime as i64, mtime as i64)
}
