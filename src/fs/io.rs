use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::attrs::{AttrList, AttrMask, Timespec, Verifier};
use super::context::OpContext;
use super::data::ReadResult;
use super::object::{FileNode, MemObject, NodeSpec, ObjectType};
use super::share::{OpenFlags, OpenState};
use super::{apply_umask, MemFs};
use crate::error::{MemFsError, Result};

/// How an open by name treats a missing or existing file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMode {
    /// Open only; a missing name is an error.
    #[default]
    NoCreate,
    /// Create if missing, open if present.
    Unchecked,
    /// Create; an existing name is an error.
    Guarded,
    Exclusive,
    Exclusive41,
    Exclusive9P,
}

impl CreateMode {
    pub fn is_exclusive(self) -> bool {
        matches!(
            self,
            CreateMode::Exclusive | CreateMode::Exclusive41 | CreateMode::Exclusive9P
        )
    }

    /// Exclusive modes compare the stored verifier, except the 9P flavour.
    pub fn checks_verifier(self) -> bool {
        matches!(self, CreateMode::Exclusive | CreateMode::Exclusive41)
    }
}

#[derive(Clone, Debug)]
pub struct OpenArgs {
    pub openflags: OpenFlags,
    pub createmode: CreateMode,
    /// `None` opens the object itself; `Some` opens a name inside it.
    pub name: Option<String>,
    pub attrs: Option<AttrList>,
    pub verifier: Verifier,
    pub bypass: bool,
    /// Attributes wanted back in the outcome.
    pub request_mask: AttrMask,
}

impl OpenArgs {
    pub fn by_handle(openflags: OpenFlags) -> Self {
        Self {
            openflags,
            createmode: CreateMode::NoCreate,
            name: None,
            attrs: None,
            verifier: [0; 8],
            bypass: false,
            request_mask: AttrMask::POSIX,
        }
    }

    pub fn by_name(name: &str, openflags: OpenFlags, createmode: CreateMode) -> Self {
        Self {
            name: Some(name.to_string()),
            createmode,
            ..Self::by_handle(openflags)
        }
    }

    pub fn with_attrs(mut self, attrs: AttrList) -> Self {
        self.attrs = Some(attrs);
        self
    }

    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = verifier;
        self
    }
}

#[derive(Debug)]
pub struct OpenOutcome {
    pub object: Arc<MemObject>,
    pub attrs: AttrList,
    /// False when the file was created by this call.
    pub caller_perm_check: bool,
    pub created: bool,
}

/// Extra context of a READ_PLUS / WRITE_PLUS request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoInfo {
    Data,
    Hole { length: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOp {
    Lockt,
    Lock,
    Unlock,
    Cancel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    Read,
    Write,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockParam {
    pub lock_type: LockType,
    pub start: u64,
    pub length: u64,
}

impl MemFs {
    /// Open `obj` itself, or open/create `args.name` inside directory `obj`.
    pub fn open2(
        &self,
        ctx: &OpContext,
        obj: &Arc<MemObject>,
        state: Option<&mut OpenState>,
        args: &OpenArgs,
    ) -> Result<OpenOutcome> {
        debug!(
            "open2(ino={}, name={:?}, flags={:#x}, mode={:?})",
            obj.ino(),
            args.name,
            args.openflags.bits(),
            args.createmode
        );

        let mut attrs_set = args.attrs.clone();
        if args.createmode.is_exclusive() {
            attrs_set
                .get_or_insert_with(AttrList::default)
                .set_verifier(&args.verifier);
        }

        match &args.name {
            None => self.open_by_handle(obj, state, args),
            Some(name) => self.open_by_name(ctx, obj, name, state, args, attrs_set),
        }
    }

    fn open_by_handle(
        &self,
        obj: &Arc<MemObject>,
        mut state: Option<&mut OpenState>,
        args: &OpenArgs,
    ) -> Result<OpenOutcome> {
        if obj.object_type() != ObjectType::RegularFile {
            return Err(MemFsError::InvalidArgument);
        }
        let flags = args.openflags;

        {
            let mut node = obj.node.write();
            let file = node.as_file_mut().ok_or(MemFsError::InvalidArgument)?;

            match state.as_deref_mut() {
                Some(state) => {
                    file.share.check_conflict(flags, args.bypass)?;
                    file.share.update(OpenFlags::empty(), flags);
                    state.fd.open(flags);
                }
                None => obj.fd.lock().open(flags),
            }

            if args.createmode.checks_verifier() && !obj.attrs.lock().matches_verifier(&args.verifier) {
                debug!("open2: verifier mismatch on ino={}", obj.ino());
                match state.as_deref_mut() {
                    Some(state) => {
                        file.share.update(flags, OpenFlags::empty());
                        state.fd.close();
                    }
                    None => obj.fd.lock().close(),
                }
                return Err(MemFsError::AlreadyExists);
            }

            if flags.contains(OpenFlags::TRUNC) {
                truncate(obj, file);
            }
        }

        Ok(OpenOutcome {
            object: Arc::clone(obj),
            attrs: obj.snapshot_attrs(args.request_mask),
            caller_perm_check: true,
            created: false,
        })
    }

    fn open_by_name(
        &self,
        ctx: &OpContext,
        dir: &Arc<MemObject>,
        name: &str,
        mut state: Option<&mut OpenState>,
        args: &OpenArgs,
        attrs_set: Option<AttrList>,
    ) -> Result<OpenOutcome> {
        if !dir.is_dir() {
            return Err(MemFsError::NotADirectory);
        }
        let create_attrs = attrs_set.clone().unwrap_or_default();

        let (obj, created) = match self.int_lookup(ctx, dir, name) {
            Ok(existing) => (existing, false),
            Err(MemFsError::NotFound) if args.createmode == CreateMode::NoCreate => {
                return Err(MemFsError::NotFound);
            }
            Err(MemFsError::NotFound) => {
                match self.create_obj(ctx, dir, name, &NodeSpec::RegularFile, &create_attrs) {
                    Ok((obj, _)) => (obj, true),
                    // lost a create race; unchecked opens whatever won
                    Err(MemFsError::AlreadyExists) if args.createmode == CreateMode::Unchecked => {
                        (self.int_lookup(ctx, dir, name)?, false)
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        if !created {
            if args.createmode == CreateMode::Guarded {
                return Err(MemFsError::AlreadyExists);
            }
            if args.createmode.checks_verifier() && !obj.attrs.lock().matches_verifier(&args.verifier) {
                debug!("open2: verifier mismatch on existing {:?}", name);
                return Err(MemFsError::AlreadyExists);
            }
        }
        if obj.object_type() != ObjectType::RegularFile {
            return Err(MemFsError::InvalidArgument);
        }

        let mut attrs_out = if created {
            obj.snapshot_attrs(args.request_mask)
        } else {
            if let Some(set) = attrs_set.as_ref().filter(|set| !set.valid_mask.is_empty()) {
                self.copy_attrs_mask(&obj, set)?;
            }
            self.opened_attrs(&obj, args.request_mask)?
        };

        {
            let flags = args.openflags;
            let mut node = obj.node.write();
            let file = node.as_file_mut().ok_or(MemFsError::InvalidArgument)?;
            match state.as_deref_mut() {
                Some(state) => {
                    file.share.check_conflict(flags, args.bypass)?;
                    file.share.update(OpenFlags::empty(), flags);
                    state.fd.open(flags);
                }
                None => obj.fd.lock().open(flags),
            }
            if !created && flags.contains(OpenFlags::TRUNC) {
                truncate(&obj, file);
                if attrs_out.valid_mask.contains(AttrMask::SIZE) {
                    attrs_out.filesize = 0;
                    attrs_out.spaceused = 0;
                }
            }
        }

        Ok(OpenOutcome {
            object: obj,
            attrs: attrs_out,
            caller_perm_check: !created,
            created,
        })
    }

    /// Attributes of a file opened by name. With `RDATTR_ERR` requested, a
    /// failed read yields a record carrying only that bit.
    fn opened_attrs(&self, obj: &MemObject, request_mask: AttrMask) -> Result<AttrList> {
        match self.getattrs(obj, request_mask) {
            Ok(attrs) => Ok(attrs),
            Err(e) if request_mask.contains(AttrMask::RDATTR_ERR) => {
                debug!("open2: attributes of ino={} unavailable: {}", obj.ino(), e);
                let mut attrs = AttrList::with_request(request_mask);
                attrs.valid_mask = AttrMask::RDATTR_ERR;
                Ok(attrs)
            }
            Err(e) => Err(e),
        }
    }

    /// Overwrite the supplied attributes of an existing file on open.
    ///
    /// ctime becomes now; atime and mtime follow it unless supplied.
    fn copy_attrs_mask(&self, obj: &MemObject, set: &AttrList) -> Result<()> {
        let mask = set.valid_mask;
        let umask = self.export(obj.export_id())?.umask;

        let mut node = obj.node.write();
        if mask.contains(AttrMask::SIZE) {
            if let Some(file) = node.as_file_mut() {
                file.data.set_length(set.filesize);
            }
        }

        let now = Timespec::now();
        let mut attrs = obj.attrs.lock();
        attrs.ctime = now;
        if mask.contains(AttrMask::SIZE) {
            attrs.filesize = set.filesize;
        }
        if mask.contains(AttrMask::MODE) {
            attrs.mode = apply_umask(set.mode, umask);
        }
        if mask.contains(AttrMask::OWNER) {
            attrs.owner = set.owner;
        }
        if mask.contains(AttrMask::GROUP) {
            attrs.group = set.group;
        }
        attrs.atime = if mask.contains(AttrMask::ATIME) { set.atime } else { now };
        if mask.contains(AttrMask::CREATION) {
            attrs.creation = set.creation;
        }
        attrs.mtime = if mask.contains(AttrMask::MTIME) { set.mtime } else { now };
        if mask.contains(AttrMask::SPACEUSED) {
            attrs.spaceused = set.spaceused;
        }
        attrs.touch_change(now);
        Ok(())
    }

    /// Change the access and deny modes of an existing share state.
    pub fn reopen2(&self, obj: &MemObject, state: &mut OpenState, openflags: OpenFlags) -> Result<()> {
        debug!("reopen2(ino={}, flags={:#x})", obj.ino(), openflags.bits());

        let mut node = obj.node.write();
        let file = node.as_file_mut().ok_or(MemFsError::InvalidArgument)?;
        let old = state.fd.openflags;

        // Our own reservation must not conflict with itself.
        file.share.update(old, OpenFlags::empty());
        if let Err(e) = file.share.check_conflict(openflags, false) {
            file.share.update(OpenFlags::empty(), old);
            return Err(e);
        }
        file.share.update(OpenFlags::empty(), openflags);
        state.fd.open(openflags);

        if openflags.contains(OpenFlags::TRUNC) {
            truncate(obj, file);
        }
        Ok(())
    }

    pub fn read2(
        &self,
        obj: &MemObject,
        bypass: bool,
        state: Option<&OpenState>,
        offset: u64,
        buf: &mut [u8],
        info: Option<&IoInfo>,
    ) -> Result<ReadResult> {
        debug!("read2(ino={}, offset={}, size={})", obj.ino(), offset, buf.len());

        if info.is_some() {
            return Err(MemFsError::NotSupported);
        }

        let node = obj.node.read();
        let file = node.as_file().ok_or(MemFsError::InvalidArgument)?;
        match state {
            Some(state) if !state.fd.can(OpenFlags::READ) => return Err(MemFsError::NotOpened),
            Some(_) => {}
            None => file.share.check_conflict(OpenFlags::READ, bypass)?,
        }

        let res = file.data.read_at(offset, buf);
        obj.attrs.lock().atime = Timespec::now();
        Ok(res)
    }

    pub fn write2(
        &self,
        obj: &MemObject,
        bypass: bool,
        state: Option<&OpenState>,
        offset: u64,
        data: &[u8],
        info: Option<&IoInfo>,
    ) -> Result<usize> {
        debug!("write2(ino={}, offset={}, size={})", obj.ino(), offset, data.len());

        if info.is_some() {
            return Err(MemFsError::NotSupported);
        }

        let mut node = obj.node.write();
        let file = node.as_file_mut().ok_or(MemFsError::InvalidArgument)?;
        match state {
            Some(state) if !state.fd.can(OpenFlags::WRITE) => return Err(MemFsError::NotOpened),
            Some(_) => {}
            None => file.share.check_conflict(OpenFlags::WRITE, bypass)?,
        }

        let grew = file.data.write_at(offset, data)?;
        let length = file.data.length();

        let now = Timespec::now();
        let mut attrs = obj.attrs.lock();
        if grew {
            attrs.filesize = length;
            attrs.spaceused = length;
        }
        attrs.mtime = now;
        attrs.touch_change(now);
        Ok(data.len())
    }

    /// Close the object-global descriptor.
    pub fn close(&self, obj: &MemObject) -> Result<()> {
        debug!("close(ino={})", obj.ino());
        if obj.object_type() != ObjectType::RegularFile {
            return Err(MemFsError::InvalidArgument);
        }
        obj.fd.lock().close();
        Ok(())
    }

    /// Drop one open state: its share contribution and its descriptor.
    pub fn close2(&self, obj: &MemObject, state: &mut OpenState) -> Result<()> {
        debug!("close2(ino={}, state={:?})", obj.ino(), state.state_type);
        let mut node = obj.node.write();
        if state.state_type.carries_share() {
            if let Some(file) = node.as_file_mut() {
                file.share.update(state.fd.openflags, OpenFlags::empty());
            }
        }
        state.fd.close();
        Ok(())
    }

    pub fn commit2(&self, obj: &MemObject, offset: u64, len: u64) -> Result<()> {
        debug!("commit2(ino={}, offset={}, len={})", obj.ino(), offset, len);
        Ok(())
    }

    /// No lock table is kept: every request is granted.
    pub fn lock_op2(
        &self,
        obj: &MemObject,
        _state: Option<&OpenState>,
        op: LockOp,
        request: &LockParam,
    ) -> Result<Option<LockParam>> {
        debug!("lock_op2(ino={}, op={:?}, lock={:?})", obj.ino(), op, request);
        Ok(None)
    }
}

/// Reset a file to empty. The caller holds the file's write lock.
fn truncate(obj: &MemObject, file: &mut FileNode) {
    file.data.set_length(0);
    let now = Timespec::now();
    let mut attrs = obj.attrs.lock();
    attrs.filesize = 0;
    attrs.spaceused = 0;
    attrs.mtime = now;
    attrs.touch_change(now);
}
