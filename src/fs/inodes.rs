use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::object::MemObject;

/// First inode number handed out by a store.
pub const FIRST_INO: u64 = 1;

/// Per-store arena of every object not yet released.
///
/// Directory indices and parent links refer to objects by inode number; this
/// table owns them. An object is freed when it leaves the table.
pub struct InodeTable {
    objects: DashMap<u64, Arc<MemObject>>,
    next_ino: AtomicU64,
    released: AtomicU64,
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            next_ino: AtomicU64::new(FIRST_INO),
            released: AtomicU64::new(0),
        }
    }

    /// Reserve the next inode number.
    pub fn alloc(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, obj: Arc<MemObject>) {
        self.objects.insert(obj.ino(), obj);
    }

    pub fn get(&self, ino: u64) -> Option<Arc<MemObject>> {
        self.objects.get(&ino).map(|r| Arc::clone(r.value()))
    }

    /// Take `ino` out of the arena. Only the first caller gets `Some`.
    pub fn remove(&self, ino: u64) -> Option<Arc<MemObject>> {
        self.objects.remove(&ino).map(|(_, obj)| obj)
    }

    pub fn note_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects freed so far.
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Inode numbers handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next_ino.load(Ordering::Relaxed) - FIRST_INO
    }

    pub fn inos(&self) -> Vec<u64> {
        self.objects.iter().map(|r| *r.key()).collect()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
