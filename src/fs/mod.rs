pub mod attrs;
pub mod context;
pub mod data;
pub mod dir_index;
pub mod handles;
pub mod inodes;
pub mod io;
pub mod object;
pub mod share;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use self::attrs::{AttrList, AttrMask, DevNumbers, Fsid, Timespec};
use self::context::OpContext;
use self::data::FileData;
use self::dir_index::{DirIndex, FIRST_COOKIE};
use self::handles::{DigestType, WireHandle, MAX_PATH_LEN, WIRE_HANDLE_SIZE};
use self::inodes::InodeTable;
use self::object::{
    DeviceNode, FileNode, Linkage, MemObject, NodeData, NodeSpec, ObjectType, SymlinkNode,
};
use self::share::{OpenFlags, OpenState, ShareCounters};
use crate::config::{ExportConfig, MemConfig};
use crate::error::{MemFsError, Result};
use crate::state::exports::{Export, ExportInfo, ExportTable};

/// Mode given to an export root when it is first looked up.
pub const ROOT_MODE: u32 = 0o755;

/// Mode given to new objects that were not handed one.
pub const DEFAULT_MODE: u32 = 0o600;

/// One entry handed to a `readdir` callback.
#[derive(Debug)]
pub struct DirEntry {
    pub name: String,
    pub object: Arc<MemObject>,
    pub attrs: AttrList,
    /// Cookie that resumes iteration just after this entry.
    pub cookie: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirAction {
    Continue,
    Terminate,
}

#[derive(Debug, Serialize)]
pub struct FsStats {
    pub inode_size: usize,
    pub live_objects: usize,
    pub allocated: u64,
    pub released: u64,
    pub exports: Vec<ExportInfo>,
}

/// An in-memory store holding one tree per export.
pub struct MemFs {
    pub config: MemConfig,
    /// Arena of every unreleased object.
    pub inodes: InodeTable,
    pub exports: ExportTable,
}

impl MemFs {
    pub fn new(config: MemConfig) -> Result<Self> {
        let fs = Self {
            config,
            inodes: InodeTable::new(),
            exports: ExportTable::new(),
        };
        for export in fs.config.exports.clone() {
            fs.add_export(&export)?;
        }
        info!(
            "memfs store ready: inode_size={}, exports={}",
            fs.config.inode_size,
            fs.exports.len()
        );
        Ok(fs)
    }

    pub fn add_export(&self, config: &ExportConfig) -> Result<Arc<Export>> {
        self.exports.add(config)
    }

    fn export(&self, export_id: u16) -> Result<Arc<Export>> {
        self.exports.get(export_id).ok_or(MemFsError::Stale)
    }

    /// The object with inode `ino`, if it has not been released.
    pub fn object(&self, ino: u64) -> Option<Arc<MemObject>> {
        self.inodes.get(ino)
    }

    pub fn stats(&self) -> FsStats {
        FsStats {
            inode_size: self.config.inode_size,
            live_objects: self.inodes.len(),
            allocated: self.inodes.allocated(),
            released: self.inodes.released(),
            exports: self.exports.all_info(),
        }
    }

    /// Resolve an export path to its root, creating the root on first use.
    pub fn lookup_path(&self, ctx: &OpContext, path: &str) -> Result<Arc<MemObject>> {
        debug!("lookup_path(export={}, path={})", ctx.export_id, path);

        let export = self.export(ctx.export_id)?;
        if path != export.path {
            warn!("lookup_path: {} is not the root of export {}", path, export.export_id);
            return Err(MemFsError::NotFound);
        }

        let mut root = export.root.lock();
        if let Some(obj) = root.and_then(|ino| self.inodes.get(ino)) {
            return Ok(obj);
        }

        let attrs = AttrList::default().with_mode(ROOT_MODE);
        let obj = self.alloc_handle(ctx, &export, None, &export.path, &NodeSpec::Directory, &attrs)?;
        *root = Some(obj.ino());
        info!(
            "export root created: export={}, path={}, ino={}",
            export.export_id,
            export.path,
            obj.ino()
        );
        Ok(obj)
    }

    /// Resolve wire bytes back to a live object of the caller's export.
    pub fn create_handle(&self, ctx: &OpContext, bytes: &[u8]) -> Result<Arc<MemObject>> {
        debug!("create_handle(export={}, len={})", ctx.export_id, bytes.len());

        if bytes.len() != WIRE_HANDLE_SIZE {
            warn!(
                "create_handle: invalid handle size {}, expected {}",
                bytes.len(),
                WIRE_HANDLE_SIZE
            );
            return Err(MemFsError::BadHandle);
        }

        let export = self.export(ctx.export_id)?;
        let ino = export.find(bytes).ok_or(MemFsError::Stale)?;
        self.inodes.get(ino).ok_or(MemFsError::Stale)
    }

    /// Copy the object's wire handle into `buf`, returning the bytes written.
    pub fn handle_to_wire(&self, obj: &MemObject, digest: DigestType, buf: &mut [u8]) -> Result<usize> {
        debug!("handle_to_wire(ino={}, digest={:?})", obj.ino(), digest);
        if buf.len() < WIRE_HANDLE_SIZE {
            return Err(MemFsError::TooSmall);
        }
        buf[..WIRE_HANDLE_SIZE].copy_from_slice(obj.handle().as_bytes());
        Ok(WIRE_HANDLE_SIZE)
    }

    /// Key for caches that index objects by handle.
    pub fn handle_to_key<'a>(&self, obj: &'a MemObject) -> &'a [u8] {
        obj.handle().as_bytes()
    }

    pub fn lookup(&self, ctx: &OpContext, dir: &Arc<MemObject>, name: &str) -> Result<Arc<MemObject>> {
        debug!("lookup(parent={}, name={:?})", dir.ino(), name);
        self.int_lookup(ctx, dir, name)
    }

    fn int_lookup(&self, ctx: &OpContext, dir: &Arc<MemObject>, name: &str) -> Result<Arc<MemObject>> {
        if !dir.is_dir() {
            return Err(MemFsError::NotADirectory);
        }

        match name {
            "." => Ok(Arc::clone(dir)),
            ".." => {
                let parent = dir.parent_ino().ok_or(MemFsError::NotFound)?;
                self.inodes.get(parent).ok_or(MemFsError::Stale)
            }
            _ => {
                // readdir callbacks may look up names in the directory being
                // listed; a plain read() could queue behind a waiting writer.
                let ino = if ctx.holds_lock_on(dir.ino()) {
                    dir.node.read_recursive().as_dir().and_then(|index| index.lookup(name))
                } else {
                    dir.node.read().as_dir().and_then(|index| index.lookup(name))
                };
                let ino = ino.ok_or(MemFsError::NotFound)?;
                self.inodes.get(ino).ok_or(MemFsError::Stale)
            }
        }
    }

    /// Walk `dir` in insertion order from `cookie`, handing each entry to `cb`.
    ///
    /// Returns true if the end of the directory was reached.
    pub fn readdir<F>(
        &self,
        ctx: &OpContext,
        dir: &Arc<MemObject>,
        cookie: u64,
        request_mask: AttrMask,
        mut cb: F,
    ) -> Result<bool>
    where
        F: FnMut(DirEntry) -> DirAction,
    {
        debug!("readdir(ino={}, cookie={})", dir.ino(), cookie);

        let node = dir.node.read();
        let index = node.as_dir().ok_or(MemFsError::NotADirectory)?;
        let _held = ctx.mark_held(dir.ino());

        for (idx, ino) in index.iter_from(cookie.max(FIRST_COOKIE)) {
            let Some(child) = self.inodes.get(ino) else {
                warn!("readdir: ino={} indexed in {} but not in the arena", ino, dir.ino());
                continue;
            };
            let entry = DirEntry {
                name: child.name(),
                attrs: child.snapshot_attrs(request_mask),
                object: child,
                cookie: idx + 1,
            };
            if cb(entry) == DirAction::Terminate {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Collect a directory listing from `cookie` onwards.
    pub fn readdir_entries(
        &self,
        ctx: &OpContext,
        dir: &Arc<MemObject>,
        cookie: u64,
        request_mask: AttrMask,
    ) -> Result<(Vec<DirEntry>, bool)> {
        let mut entries = Vec::new();
        let eof = self.readdir(ctx, dir, cookie, request_mask, |entry| {
            entries.push(entry);
            DirAction::Continue
        })?;
        Ok((entries, eof))
    }

    pub fn create(
        &self,
        ctx: &OpContext,
        dir: &Arc<MemObject>,
        name: &str,
        attrs: &AttrList,
    ) -> Result<(Arc<MemObject>, AttrList)> {
        debug!("create(parent={}, name={:?}, mode={:#o})", dir.ino(), name, attrs.mode);
        self.create_obj(ctx, dir, name, &NodeSpec::RegularFile, attrs)
    }

    pub fn mkdir(
        &self,
        ctx: &OpContext,
        dir: &Arc<MemObject>,
        name: &str,
        attrs: &AttrList,
    ) -> Result<(Arc<MemObject>, AttrList)> {
        debug!("mkdir(parent={}, name={:?}, mode={:#o})", dir.ino(), name, attrs.mode);
        self.create_obj(ctx, dir, name, &NodeSpec::Directory, attrs)
    }

    pub fn mknode(
        &self,
        ctx: &OpContext,
        dir: &Arc<MemObject>,
        name: &str,
        nodetype: ObjectType,
        dev: DevNumbers,
        attrs: &AttrList,
    ) -> Result<(Arc<MemObject>, AttrList)> {
        debug!("mknode(parent={}, name={:?}, type={:?})", dir.ino(), name, nodetype);
        let spec = match nodetype {
            ObjectType::BlockDevice | ObjectType::CharDevice => NodeSpec::Device(nodetype, dev),
            ObjectType::Socket => NodeSpec::Socket,
            ObjectType::Fifo => NodeSpec::Fifo,
            _ => return Err(MemFsError::InvalidArgument),
        };
        self.create_obj(ctx, dir, name, &spec, attrs)
    }

    pub fn symlink(
        &self,
        ctx: &OpContext,
        dir: &Arc<MemObject>,
        name: &str,
        target: &str,
        attrs: &AttrList,
    ) -> Result<(Arc<MemObject>, AttrList)> {
        debug!("symlink(parent={}, name={:?}, target={:?})", dir.ino(), name, target);
        self.create_obj(ctx, dir, name, &NodeSpec::Symlink(target.to_string()), attrs)
    }

    pub fn readlink(&self, obj: &MemObject) -> Result<String> {
        debug!("readlink(ino={})", obj.ino());
        match &*obj.node.read() {
            NodeData::Symlink(link) => Ok(link.target.clone()),
            _ => Err(MemFsError::InvalidArgument),
        }
    }

    pub fn getattrs(&self, obj: &MemObject, request_mask: AttrMask) -> Result<AttrList> {
        debug!("getattrs(ino={})", obj.ino());
        if !obj.is_live() {
            debug!("getattrs: ino={} has been removed", obj.ino());
            return Err(MemFsError::Stale);
        }
        Ok(obj.snapshot_attrs(request_mask))
    }

    /// Apply the fields named by `attrs_set.valid_mask`.
    pub fn setattr2(
        &self,
        obj: &MemObject,
        bypass: bool,
        state: Option<&OpenState>,
        attrs_set: &AttrList,
    ) -> Result<()> {
        let mask = attrs_set.valid_mask;
        debug!("setattr2(ino={}, mask={:#x})", obj.ino(), mask.bits());

        if !obj.is_live() {
            return Err(MemFsError::Stale);
        }
        if mask.contains(AttrMask::SIZE) && obj.object_type() != ObjectType::RegularFile {
            debug!("setattr2: size on non-regular ino={}", obj.ino());
            return Err(MemFsError::InvalidArgument);
        }
        let umask = self.export(obj.export_id())?.umask;

        let mut node = obj.node.write();
        if mask.contains(AttrMask::SIZE) {
            let file = node.as_file_mut().ok_or(MemFsError::InvalidArgument)?;
            if state.is_none() {
                file.share.check_conflict(OpenFlags::WRITE, bypass)?;
            }
            file.data.set_length(attrs_set.filesize);
        }

        let now = Timespec::now();
        let mut attrs = obj.attrs.lock();
        if mask.contains(AttrMask::SIZE) {
            attrs.filesize = attrs_set.filesize;
            attrs.spaceused = attrs_set.filesize;
        }
        if mask.contains(AttrMask::MODE) {
            attrs.mode = apply_umask(attrs_set.mode, umask);
        }
        if mask.contains(AttrMask::OWNER) {
            attrs.owner = attrs_set.owner;
        }
        if mask.contains(AttrMask::GROUP) {
            attrs.group = attrs_set.group;
        }
        if mask.intersects(AttrMask::SET_TIME) {
            if mask.contains(AttrMask::ATIME_SERVER) {
                attrs.atime = now;
            } else if mask.contains(AttrMask::ATIME) {
                attrs.atime = attrs_set.atime;
            }
            if mask.contains(AttrMask::MTIME_SERVER) {
                attrs.mtime = now;
            } else if mask.contains(AttrMask::MTIME) {
                attrs.mtime = attrs_set.mtime;
            }
        }
        attrs.ctime = now;
        attrs.touch_change(now);
        Ok(())
    }

    /// Detach `obj` from `dir` without releasing it.
    pub fn unlink(&self, dir: &MemObject, obj: &MemObject, name: &str) -> Result<()> {
        debug!("unlink(parent={}, ino={}, name={:?})", dir.ino(), obj.ino(), name);

        let mut dir_node = dir.node.write();
        let index = dir_node.as_dir_mut().ok_or(MemFsError::NotADirectory)?;

        if !obj.is_live() {
            debug!("unlink: ino={} already removed", obj.ino());
            return Ok(());
        }
        if index.lookup(name) != Some(obj.ino()) {
            return Err(MemFsError::NotFound);
        }

        // The child's node lock is not taken: after a rename the child may
        // sort before its parent in rename's lock order.
        match obj.object_type() {
            ObjectType::Directory if obj.numlinks() > 2 => {
                debug!("unlink: {} numlinks {}", name, obj.numlinks());
                return Err(MemFsError::NotEmpty);
            }
            ObjectType::RegularFile if obj.fd_is_open() => {
                return Err(MemFsError::FileOpen);
            }
            _ => {}
        }

        self.remove_obj_locked(index, dir, obj);
        drop(dir_node);
        touch_dir(dir);
        Ok(())
    }

    /// Remove `child` from `parent`'s index and optionally release it.
    pub fn remove_child(&self, parent: &MemObject, child: &Arc<MemObject>, release_after: bool) -> Result<()> {
        debug!(
            "remove_child(parent={}, ino={}, release={})",
            parent.ino(),
            child.ino(),
            release_after
        );
        let removed = {
            let mut node = parent.node.write();
            let index = node.as_dir_mut().ok_or(MemFsError::NotADirectory)?;
            self.remove_obj_locked(index, parent, child)
        };
        if removed {
            touch_dir(parent);
        }
        if release_after {
            self.release(child);
        }
        Ok(())
    }

    /// Move `obj` from `old_name` in `olddir` to `new_name` in `newdir`.
    ///
    /// An existing compatible destination is replaced and released.
    pub fn rename(
        &self,
        obj: &Arc<MemObject>,
        olddir: &Arc<MemObject>,
        old_name: &str,
        newdir: &Arc<MemObject>,
        new_name: &str,
    ) -> Result<()> {
        debug!(
            "rename(ino={}, olddir={}, old={:?}, newdir={}, new={:?})",
            obj.ino(),
            olddir.ino(),
            old_name,
            newdir.ino(),
            new_name
        );

        if !olddir.is_dir() || !newdir.is_dir() {
            return Err(MemFsError::NotADirectory);
        }
        check_name(new_name)?;

        let same_dir = olddir.ino() == newdir.ino();
        let (mut old_node, mut new_node) = if same_dir {
            (olddir.node.write(), None)
        } else if olddir.ino() < newdir.ino() {
            let old = olddir.node.write();
            (old, Some(newdir.node.write()))
        } else {
            let new = newdir.node.write();
            (olddir.node.write(), Some(new))
        };

        let old_index = old_node.as_dir_mut().ok_or(MemFsError::NotADirectory)?;
        let mut new_index = match new_node.as_mut() {
            Some(node) => Some(node.as_dir_mut().ok_or(MemFsError::NotADirectory)?),
            None => None,
        };

        if old_index.lookup(old_name) != Some(obj.ino()) {
            return Err(MemFsError::NotFound);
        }
        if !newdir.is_live() {
            return Err(MemFsError::Stale);
        }
        if obj.is_dir() && self.is_ancestor_or_self(obj.ino(), newdir.ino()) {
            debug!("rename: ino={} would move under itself", obj.ino());
            return Err(MemFsError::InvalidArgument);
        }

        let dest_ino = match new_index.as_deref() {
            Some(index) => index.lookup(new_name),
            None => old_index.lookup(new_name),
        };

        let mut displaced = None;
        if let Some(dest_ino) = dest_ino {
            if dest_ino == obj.ino() {
                return Ok(());
            }
            let dest = self.inodes.get(dest_ino).ok_or(MemFsError::Stale)?;
            if dest.is_dir() != obj.is_dir() {
                return Err(MemFsError::AlreadyExists);
            }
            // dest's node lock is never taken; it may be an ancestor of
            // olddir, which is already locked.
            if dest.is_dir() && dest.numlinks() > 2 {
                return Err(MemFsError::AlreadyExists);
            }
            if dest.object_type() == ObjectType::RegularFile && dest.fd_is_open() {
                return Err(MemFsError::FileOpen);
            }
            let target = match new_index.as_deref_mut() {
                Some(dir_index) => dir_index,
                None => &mut *old_index,
            };
            self.remove_obj_locked(target, newdir, &dest);
            displaced = Some(dest);
        }

        {
            let mut link = obj.link.lock();
            let Linkage::Live { index } = link.state else {
                return Err(MemFsError::NotFound);
            };
            old_index.remove(old_name, index);
            let target = match new_index.as_deref_mut() {
                Some(dir_index) => dir_index,
                None => &mut *old_index,
            };
            let new_idx = target.insert(new_name, obj.ino());
            link.name = new_name.to_string();
            link.parent = Some(newdir.ino());
            link.state = Linkage::Live { index: new_idx };
        }

        if !same_dir {
            olddir.numlinks.fetch_sub(1, Ordering::AcqRel);
            newdir.numlinks.fetch_add(1, Ordering::AcqRel);
        }
        drop(new_node);
        drop(old_node);

        touch_dir(olddir);
        if !same_dir {
            touch_dir(newdir);
        }
        {
            let now = Timespec::now();
            let mut attrs = obj.attrs.lock();
            attrs.ctime = now;
            attrs.touch_change(now);
        }

        if let Some(dest) = displaced {
            debug!("rename: releasing displaced ino={}", dest.ino());
            self.release(&dest);
        }
        Ok(())
    }

    /// Free a removed object exactly once. Live objects and export roots are left alone.
    pub fn release(&self, obj: &MemObject) {
        {
            let link = obj.link.lock();
            if link.is_live() {
                debug!("release: ino={} name={} is live, keeping it", obj.ino(), link.name);
                return;
            }
            if self.inodes.remove(obj.ino()).is_none() {
                debug!("release: ino={} already released", obj.ino());
                return;
            }
        }

        debug!("release(ino={}, type={:?})", obj.ino(), obj.object_type());
        self.inodes.note_released();
        if let Some(export) = self.exports.get(obj.export_id()) {
            export.unregister(obj.ino());
        }

        match obj.object_type() {
            ObjectType::Directory => self.clean_dir_tree(obj),
            ObjectType::Symlink => {
                if let NodeData::Symlink(link) = &mut *obj.node.write() {
                    link.target = String::new();
                }
            }
            _ => {}
        }
    }

    /// Detach and release every child of a directory being freed.
    ///
    /// Children are released after the directory's lock is dropped, so no
    /// child lock is ever taken under it.
    fn clean_dir_tree(&self, dir: &MemObject) {
        let mut detached = Vec::new();
        {
            let mut node = dir.node.write();
            let Some(index) = node.as_dir_mut() else {
                return;
            };
            while let Some((name, ino)) = index.pop_first() {
                dir.numlinks.fetch_sub(1, Ordering::AcqRel);
                match self.inodes.get(ino) {
                    Some(child) => {
                        child.link.lock().state = Linkage::Removed;
                        detached.push(child);
                    }
                    None => warn!("clean_dir_tree: child {} (ino={}) of {} already gone", name, ino, dir.ino()),
                }
            }
        }
        for child in detached {
            self.release(&child);
        }
    }

    fn create_obj(
        &self,
        ctx: &OpContext,
        dir: &Arc<MemObject>,
        name: &str,
        spec: &NodeSpec,
        attrs: &AttrList,
    ) -> Result<(Arc<MemObject>, AttrList)> {
        if !dir.is_dir() {
            return Err(MemFsError::NotADirectory);
        }
        match self.int_lookup(ctx, dir, name) {
            Ok(_) => return Err(MemFsError::AlreadyExists),
            Err(MemFsError::NotFound) => {}
            Err(e) => return Err(e),
        }
        check_name(name)?;

        let export = self.export(dir.export_id())?;
        let obj = self.alloc_handle(ctx, &export, Some(dir), name, spec, attrs)?;

        if let Err(e) = self.insert_obj(dir, &obj) {
            debug!("create: undoing ino={} for {:?}: {}", obj.ino(), name, e);
            self.inodes.remove(obj.ino());
            export.unregister(obj.ino());
            return Err(e);
        }

        let attrs_out = obj.snapshot_attrs(AttrMask::POSIX);
        Ok((obj, attrs_out))
    }

    /// Build an object record, give it an inode and a handle, and register it
    /// with its export. The caller links it into the parent.
    fn alloc_handle(
        &self,
        ctx: &OpContext,
        export: &Export,
        parent: Option<&MemObject>,
        name: &str,
        spec: &NodeSpec,
        attrs_in: &AttrList,
    ) -> Result<Arc<MemObject>> {
        let path = match parent {
            None => name.to_string(),
            Some(parent) => join_path(&self.full_path(parent)?, name),
        };
        if path.len() > MAX_PATH_LEN {
            debug!("alloc_handle: path of {} bytes is too long", path.len());
            return Err(MemFsError::ServerFault(format!(
                "path exceeds {} bytes",
                MAX_PATH_LEN
            )));
        }

        let set = attrs_in.valid_mask;
        let now = Timespec::now();
        let object_type = spec.object_type();

        let mut attrs = AttrList {
            object_type: Some(object_type),
            fsid: Fsid {
                major: export.export_id as u64,
                minor: 0,
            },
            ctime: now,
            chgtime: now,
            creation: now,
            change: now.as_nanos(),
            numlinks: 1,
            ..Default::default()
        };
        attrs.mode = if set.contains(AttrMask::MODE) {
            apply_umask(attrs_in.mode, export.umask)
        } else {
            DEFAULT_MODE
        };
        attrs.owner = if set.contains(AttrMask::OWNER) {
            attrs_in.owner
        } else {
            ctx.creds.uid
        };
        attrs.group = if set.contains(AttrMask::GROUP) {
            attrs_in.group
        } else {
            ctx.creds.gid
        };
        attrs.atime = if set.contains(AttrMask::ATIME) { attrs_in.atime } else { now };
        attrs.mtime = if set.contains(AttrMask::MTIME) { attrs_in.mtime } else { now };

        let node = match spec {
            NodeSpec::Directory => {
                attrs.numlinks = 2;
                NodeData::Directory(DirIndex::new())
            }
            NodeSpec::RegularFile => {
                let size = if set.contains(AttrMask::SIZE) { attrs_in.filesize } else { 0 };
                attrs.filesize = size;
                attrs.spaceused = size;
                NodeData::RegularFile(FileNode {
                    data: FileData::with_capacity(self.config.inode_size, size)?,
                    share: ShareCounters::default(),
                })
            }
            NodeSpec::Symlink(target) => NodeData::Symlink(SymlinkNode {
                target: target.clone(),
            }),
            NodeSpec::Device(nodetype, dev) => {
                attrs.rawdev = *dev;
                NodeData::DeviceNode(DeviceNode {
                    nodetype: *nodetype,
                    dev: *dev,
                })
            }
            NodeSpec::Socket => NodeData::Socket,
            NodeSpec::Fifo => NodeData::Fifo,
        };

        attrs.valid_mask = AttrMask::POSIX;
        attrs.supported = AttrMask::POSIX;

        let ino = self.inodes.alloc();
        attrs.fileid = ino;
        let handle = WireHandle::encode(&path);
        let obj = Arc::new(MemObject::new(
            ino,
            export.export_id,
            name.to_string(),
            parent.map(MemObject::ino),
            handle.clone(),
            node,
            attrs,
        ));

        self.inodes.insert(Arc::clone(&obj));
        export.register(ino, handle);
        debug!("alloc_handle(ino={}, path={}, type={:?})", ino, path, object_type);
        Ok(obj)
    }

    /// The object's current path from its export root.
    pub fn full_path(&self, obj: &MemObject) -> Result<String> {
        let (name, mut parent) = {
            let link = obj.link.lock();
            (link.name.clone(), link.parent)
        };
        let mut len = name.len();
        let mut names = vec![name];

        while let Some(ino) = parent {
            let ancestor = self.inodes.get(ino).ok_or_else(|| {
                MemFsError::ServerFault(format!("ancestor {} of ino {} is gone", ino, obj.ino()))
            })?;
            let link = ancestor.link.lock();
            len += link.name.len() + 1;
            if len > MAX_PATH_LEN {
                return Err(MemFsError::ServerFault(format!(
                    "path exceeds {} bytes",
                    MAX_PATH_LEN
                )));
            }
            names.push(link.name.clone());
            parent = link.parent;
        }

        let mut names = names.into_iter().rev();
        let mut path = names.next().unwrap_or_default();
        for name in names {
            path = join_path(&path, &name);
        }
        Ok(path)
    }

    /// Link `child` into `parent`. Fails if the name was taken meanwhile.
    fn insert_obj(&self, parent: &MemObject, child: &MemObject) -> Result<()> {
        {
            let mut node = parent.node.write();
            if !parent.is_live() {
                return Err(MemFsError::Stale);
            }
            let index = node.as_dir_mut().ok_or(MemFsError::NotADirectory)?;

            let mut link = child.link.lock();
            if index.contains(&link.name) {
                return Err(MemFsError::AlreadyExists);
            }
            let idx = index.insert(&link.name, child.ino());
            link.state = Linkage::Live { index: idx };
            parent.numlinks.fetch_add(1, Ordering::AcqRel);
        }
        touch_dir(parent);
        Ok(())
    }

    /// Drop `child` from `index` (owned by `parent`, write-locked by the
    /// caller) and mark it removed. No-op if it is not indexed there.
    fn remove_obj_locked(&self, index: &mut DirIndex, parent: &MemObject, child: &MemObject) -> bool {
        let mut link = child.link.lock();
        let Linkage::Live { index: idx } = link.state else {
            return false;
        };
        if link.parent != Some(parent.ino()) || !index.remove(&link.name, idx) {
            return false;
        }
        link.state = Linkage::Removed;
        drop(link);
        parent.numlinks.fetch_sub(1, Ordering::AcqRel);
        true
    }

    /// True if `ancestor` is `ino` or one of its parents.
    fn is_ancestor_or_self(&self, ancestor: u64, ino: u64) -> bool {
        let mut current = Some(ino);
        while let Some(i) = current {
            if i == ancestor {
                return true;
            }
            current = self.inodes.get(i).and_then(|obj| obj.parent_ino());
        }
        false
    }
}

fn apply_umask(mode: u32, umask: u32) -> u32 {
    mode & (!(libc::S_IFMT as u32) & 0xFFFF) & !umask
}

fn join_path(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(MemFsError::InvalidArgument);
    }
    Ok(())
}

/// Stamp a directory's modification and change times after its index changed.
fn touch_dir(dir: &MemObject) {
    let now = Timespec::now();
    let mut attrs = dir.attrs.lock();
    attrs.mtime = now;
    attrs.ctime = now;
    attrs.touch_change(now);
}
