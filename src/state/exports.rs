use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::config::ExportConfig;
use crate::error::{MemFsError, Result};
use crate::fs::handles::WireHandle;

/// One registered namespace root.
#[derive(Debug)]
pub struct Export {
    pub export_id: u16,
    pub path: String,
    pub umask: u32,
    /// Inode of the root, created on first `lookup_path`.
    pub(crate) root: Mutex<Option<u64>>,
    /// Every unreleased object of this export, in allocation order.
    objects: RwLock<Vec<(u64, WireHandle)>>,
}

#[derive(Debug, Serialize)]
pub struct ExportInfo {
    pub export_id: u16,
    pub path: String,
    pub umask: u32,
    pub objects: usize,
    pub root: Option<u64>,
}

impl Export {
    pub fn new(config: &ExportConfig) -> Self {
        Self {
            export_id: config.export_id,
            path: config.path.clone(),
            umask: config.umask,
            root: Mutex::new(None),
            objects: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, ino: u64, handle: WireHandle) {
        self.objects.write().push((ino, handle));
    }

    pub fn unregister(&self, ino: u64) {
        let mut objects = self.objects.write();
        if let Some(pos) = objects.iter().position(|(i, _)| *i == ino) {
            objects.remove(pos);
        }
    }

    /// Linear scan for an object whose handle matches `bytes` exactly.
    pub fn find(&self, bytes: &[u8]) -> Option<u64> {
        self.objects
            .read()
            .iter()
            .find(|(_, handle)| handle.as_bytes() == bytes)
            .map(|(ino, _)| *ino)
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    pub fn root_ino(&self) -> Option<u64> {
        *self.root.lock()
    }

    pub fn info(&self) -> ExportInfo {
        ExportInfo {
            export_id: self.export_id,
            path: self.path.clone(),
            umask: self.umask,
            objects: self.object_count(),
            root: self.root_ino(),
        }
    }
}

pub struct ExportTable {
    exports: DashMap<u16, Arc<Export>>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self {
            exports: DashMap::new(),
        }
    }

    pub fn add(&self, config: &ExportConfig) -> Result<Arc<Export>> {
        use dashmap::mapref::entry::Entry;

        match self.exports.entry(config.export_id) {
            Entry::Occupied(_) => Err(MemFsError::AlreadyExists),
            Entry::Vacant(slot) => {
                let export = Arc::new(Export::new(config));
                slot.insert(Arc::clone(&export));
                debug!("export added: id={}, path={}", config.export_id, config.path);
                Ok(export)
            }
        }
    }

    pub fn get(&self, export_id: u16) -> Option<Arc<Export>> {
        self.exports.get(&export_id).map(|r| Arc::clone(r.value()))
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.exports.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn all_info(&self) -> Vec<ExportInfo> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.get(id))
            .map(|export| export.info())
            .collect()
    }
}

impl Default for ExportTable {
    fn default() -> Self {
        Self::new()
    }
}
