use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{MemFsError, Result};
use crate::fs::attrs::{AttrList, AttrMask, DevNumbers};
use crate::fs::context::OpContext;
use crate::fs::dir_index::FIRST_COOKIE;
use crate::fs::handles::{DigestType, WIRE_HANDLE_SIZE};
use crate::fs::object::{MemObject, ObjectType};
use crate::fs::MemFs;

fn default_true() -> bool {
    true
}

/// One step of a replay script. Paths are absolute and start with the export path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptOp {
    Mkdir {
        path: String,
        #[serde(default)]
        mode: Option<u32>,
    },
    Create {
        path: String,
        #[serde(default)]
        mode: Option<u32>,
    },
    Symlink {
        path: String,
        target: String,
    },
    Mknod {
        path: String,
        kind: ObjectType,
        #[serde(default)]
        major: u32,
        #[serde(default)]
        minor: u32,
    },
    Write {
        path: String,
        #[serde(default)]
        offset: u64,
        data: String,
    },
    Read {
        path: String,
        #[serde(default)]
        offset: u64,
        len: usize,
    },
    Readdir {
        path: String,
        #[serde(default)]
        cookie: Option<u64>,
    },
    Getattr {
        path: String,
    },
    Setattr {
        path: String,
        #[serde(default)]
        mode: Option<u32>,
        #[serde(default)]
        size: Option<u64>,
    },
    Rename {
        from: String,
        to: String,
    },
    Unlink {
        path: String,
        /// Release the object once it is detached.
        #[serde(default = "default_true")]
        release: bool,
    },
    Readlink {
        path: String,
    },
    /// Encode the object's wire handle and resolve it back.
    Handle {
        path: String,
    },
    Stats,
}

impl ScriptOp {
    pub fn name(&self) -> &'static str {
        match self {
            ScriptOp::Mkdir { .. } => "mkdir",
            ScriptOp::Create { .. } => "create",
            ScriptOp::Symlink { .. } => "symlink",
            ScriptOp::Mknod { .. } => "mknod",
            ScriptOp::Write { .. } => "write",
            ScriptOp::Read { .. } => "read",
            ScriptOp::Readdir { .. } => "readdir",
            ScriptOp::Getattr { .. } => "getattr",
            ScriptOp::Setattr { .. } => "setattr",
            ScriptOp::Rename { .. } => "rename",
            ScriptOp::Unlink { .. } => "unlink",
            ScriptOp::Readlink { .. } => "readlink",
            ScriptOp::Handle { .. } => "handle",
            ScriptOp::Stats => "stats",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OpReport {
    pub step: usize,
    pub op: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub result: Value,
}

pub fn load_script(path: &Path) -> Result<Vec<ScriptOp>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// A store plus the caller identity a script runs under.
pub struct Session<'a> {
    fs: &'a MemFs,
    ctx: &'a OpContext,
    export_path: String,
    root: Arc<MemObject>,
}

impl<'a> Session<'a> {
    pub fn open(fs: &'a MemFs, ctx: &'a OpContext, export_path: &str) -> Result<Self> {
        let root = fs.lookup_path(ctx, export_path)?;
        Ok(Self {
            fs,
            ctx,
            export_path: export_path.to_string(),
            root,
        })
    }

    /// Path components below the export root.
    fn components<'p>(&self, path: &'p str) -> Result<Vec<&'p str>> {
        let rest = path
            .strip_prefix(self.export_path.as_str())
            .ok_or(MemFsError::NotFound)?;
        if !rest.is_empty() && !rest.starts_with('/') && !self.export_path.ends_with('/') {
            return Err(MemFsError::NotFound);
        }
        Ok(rest.split('/').filter(|c| !c.is_empty()).collect())
    }

    /// Resolve `path` by looking up each component from the root.
    pub fn walk(&self, path: &str) -> Result<Arc<MemObject>> {
        let mut current = Arc::clone(&self.root);
        for name in self.components(path)? {
            current = self.fs.lookup(self.ctx, &current, name)?;
        }
        Ok(current)
    }

    /// Resolve everything but the last component.
    fn walk_parent<'p>(&self, path: &'p str) -> Result<(Arc<MemObject>, &'p str)> {
        let mut components = self.components(path)?;
        let name = components.pop().ok_or(MemFsError::InvalidArgument)?;
        let mut current = Arc::clone(&self.root);
        for component in components {
            current = self.fs.lookup(self.ctx, &current, component)?;
        }
        Ok((current, name))
    }

    fn mode_attrs(mode: Option<u32>) -> AttrList {
        match mode {
            Some(mode) => AttrList::default().with_mode(mode),
            None => AttrList::default(),
        }
    }

    pub fn run(&self, op: &ScriptOp) -> Result<Value> {
        match op {
            ScriptOp::Mkdir { path, mode } => {
                let (dir, name) = self.walk_parent(path)?;
                let (obj, _) = self.fs.mkdir(self.ctx, &dir, name, &Self::mode_attrs(*mode))?;
                Ok(json!({ "ino": obj.ino() }))
            }
            ScriptOp::Create { path, mode } => {
                let (dir, name) = self.walk_parent(path)?;
                let (obj, _) = self.fs.create(self.ctx, &dir, name, &Self::mode_attrs(*mode))?;
                Ok(json!({ "ino": obj.ino() }))
            }
            ScriptOp::Symlink { path, target } => {
                let (dir, name) = self.walk_parent(path)?;
                let (obj, _) = self.fs.symlink(self.ctx, &dir, name, target, &AttrList::default())?;
                Ok(json!({ "ino": obj.ino() }))
            }
            ScriptOp::Mknod {
                path,
                kind,
                major,
                minor,
            } => {
                let (dir, name) = self.walk_parent(path)?;
                let dev = DevNumbers {
                    major: *major,
                    minor: *minor,
                };
                let (obj, _) = self.fs.mknode(self.ctx, &dir, name, *kind, dev, &AttrList::default())?;
                Ok(json!({ "ino": obj.ino() }))
            }
            ScriptOp::Write { path, offset, data } => {
                let obj = self.walk(path)?;
                let written = self.fs.write2(&obj, false, None, *offset, data.as_bytes(), None)?;
                Ok(json!({ "written": written }))
            }
            ScriptOp::Read { path, offset, len } => {
                let obj = self.walk(path)?;
                let mut buf = vec![0u8; *len];
                let res = self.fs.read2(&obj, false, None, *offset, &mut buf, None)?;
                buf.truncate(res.amount);
                Ok(json!({
                    "amount": res.amount,
                    "eof": res.eof,
                    "data": String::from_utf8_lossy(&buf),
                }))
            }
            ScriptOp::Readdir { path, cookie } => {
                let dir = self.walk(path)?;
                let start = cookie.unwrap_or(FIRST_COOKIE);
                let (entries, eof) = self.fs.readdir_entries(self.ctx, &dir, start, AttrMask::TYPE)?;
                let entries: Vec<Value> = entries
                    .iter()
                    .map(|e| {
                        json!({
                            "name": e.name,
                            "ino": e.object.ino(),
                            "type": e.object.object_type(),
                            "cookie": e.cookie,
                        })
                    })
                    .collect();
                Ok(json!({ "entries": entries, "eof": eof }))
            }
            ScriptOp::Getattr { path } => {
                let obj = self.walk(path)?;
                let attrs = self.fs.getattrs(&obj, AttrMask::POSIX)?;
                Ok(json!({
                    "ino": attrs.fileid,
                    "type": attrs.object_type,
                    "mode": format!("{:o}", attrs.mode),
                    "size": attrs.filesize,
                    "numlinks": attrs.numlinks,
                    "owner": attrs.owner,
                    "group": attrs.group,
                    "change": attrs.change,
                }))
            }
            ScriptOp::Setattr { path, mode, size } => {
                let obj = self.walk(path)?;
                let mut attrs = Self::mode_attrs(*mode);
                if let Some(size) = size {
                    attrs = attrs.with_size(*size);
                }
                self.fs.setattr2(&obj, false, None, &attrs)?;
                Ok(Value::Null)
            }
            ScriptOp::Rename { from, to } => {
                let (olddir, old_name) = self.walk_parent(from)?;
                let obj = self.fs.lookup(self.ctx, &olddir, old_name)?;
                let (newdir, new_name) = self.walk_parent(to)?;
                self.fs.rename(&obj, &olddir, old_name, &newdir, new_name)?;
                Ok(json!({ "ino": obj.ino() }))
            }
            ScriptOp::Unlink { path, release } => {
                let (dir, name) = self.walk_parent(path)?;
                let obj = self.fs.lookup(self.ctx, &dir, name)?;
                self.fs.unlink(&dir, &obj, name)?;
                if *release {
                    self.fs.release(&obj);
                }
                Ok(json!({ "ino": obj.ino() }))
            }
            ScriptOp::Readlink { path } => {
                let obj = self.walk(path)?;
                Ok(json!({ "target": self.fs.readlink(&obj)? }))
            }
            ScriptOp::Handle { path } => {
                let obj = self.walk(path)?;
                let mut buf = [0u8; WIRE_HANDLE_SIZE];
                let len = self.fs.handle_to_wire(&obj, DigestType::NfsV4, &mut buf)?;
                let resolved = self.fs.create_handle(self.ctx, &buf[..len])?;
                Ok(json!({
                    "handle": to_hex(&buf[..len]),
                    "resolves_to": resolved.ino(),
                }))
            }
            ScriptOp::Stats => Ok(serde_json::to_value(self.fs.stats())?),
        }
    }

    /// Run every step, recording failures instead of stopping at them.
    pub fn replay(&self, ops: &[ScriptOp]) -> Vec<OpReport> {
        info!("replaying {} script steps", ops.len());
        ops.iter()
            .enumerate()
            .map(|(step, op)| {
                debug!("step {}: {:?}", step, op);
                match self.run(op) {
                    Ok(result) => OpReport {
                        step,
                        op: op.name(),
                        ok: true,
                        error: None,
                        errno: None,
                        result,
                    },
                    Err(e) => OpReport {
                        step,
                        op: op.name(),
                        ok: false,
                        errno: Some(e.errno()),
                        error: Some(e.to_string()),
                        result: Value::Null,
                    },
                }
            })
            .collect()
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
