use std::collections::BTreeMap;

/// Cookie meaning "start of directory"; 0 and 1 stand for `.` and `..`.
pub const FIRST_COOKIE: u64 = 2;

/// Children of one directory, indexed twice: by name for lookup and by
/// insertion number for restartable iteration.
///
/// Insertion numbers are never reused, so a cookie (`index + 1`) stays valid
/// across any number of inserts and removes.
#[derive(Debug)]
pub struct DirIndex {
    /// name -> (ino, index)
    by_name: BTreeMap<String, (u64, u64)>,
    /// index -> ino
    by_index: BTreeMap<u64, u64>,
    next_index: u64,
}

impl DirIndex {
    pub fn new() -> Self {
        Self {
            by_name: BTreeMap::new(),
            by_index: BTreeMap::new(),
            next_index: FIRST_COOKIE,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).map(|(ino, _)| *ino)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Add `ino` under `name`, returning its insertion number.
    ///
    /// The caller has already checked that `name` is free.
    pub fn insert(&mut self, name: &str, ino: u64) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        let previous = self.by_name.insert(name.to_string(), (ino, index));
        assert!(previous.is_none(), "duplicate name {name:?} in directory index");
        self.by_index.insert(index, ino);
        index
    }

    /// Drop the entry for `name`/`index`. Returns false if it was not present.
    pub fn remove(&mut self, name: &str, index: u64) -> bool {
        let by_name = self.by_name.remove(name).is_some();
        let by_index = self.by_index.remove(&index).is_some();
        debug_assert_eq!(by_name, by_index, "directory index out of sync for {name:?}");
        by_name
    }

    /// Detach the first child in name order from both maps.
    pub fn pop_first(&mut self) -> Option<(String, u64)> {
        let (name, (ino, index)) = self.by_name.pop_first()?;
        self.by_index.remove(&index);
        Some((name, ino))
    }

    /// `(index, ino)` pairs with `index >= cookie`, in insertion order.
    pub fn iter_from(&self, cookie: u64) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.by_index.range(cookie..).map(|(index, ino)| (*index, *ino))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for DirIndex {
    fn default() -> Self {
        Self::new()
    }
}
