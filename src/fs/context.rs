use std::cell::Cell;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

/// Per-call execution context supplied by the protocol layer.
///
/// One context belongs to one call chain on one thread; it is not `Sync`.
#[derive(Debug)]
pub struct OpContext {
    pub creds: Credentials,
    pub export_id: u16,
    held_dir: Cell<Option<u64>>,
}

impl OpContext {
    pub fn new(creds: Credentials, export_id: u16) -> Self {
        Self {
            creds,
            export_id,
            held_dir: Cell::new(None),
        }
    }

    /// True while this call chain holds `ino`'s directory lock.
    pub fn holds_lock_on(&self, ino: u64) -> bool {
        self.held_dir.get() == Some(ino)
    }

    /// Record that `ino`'s directory lock is held until the guard drops.
    pub(crate) fn mark_held(&self, ino: u64) -> HeldDirGuard<'_> {
        let previous = self.held_dir.replace(Some(ino));
        HeldDirGuard { ctx: self, previous }
    }
}

pub(crate) struct HeldDirGuard<'a> {
    ctx: &'a OpContext,
    previous: Option<u64>,
}

impl Drop for HeldDirGuard<'_> {
    fn drop(&mut self) {
        self.ctx.held_dir.set(self.previous);
    }
}
