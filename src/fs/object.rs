use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::attrs::{AttrList, AttrMask, DevNumbers};
use super::data::FileData;
use super::dir_index::DirIndex;
use super::handles::WireHandle;
use super::share::{MemFd, ShareCounters};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    RegularFile,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Socket,
    Fifo,
}

/// What to build: the type plus any payload it is born with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeSpec {
    Directory,
    RegularFile,
    Symlink(String),
    Device(ObjectType, DevNumbers),
    Socket,
    Fifo,
}

impl NodeSpec {
    pub fn object_type(&self) -> ObjectType {
        match self {
            NodeSpec::Directory => ObjectType::Directory,
            NodeSpec::RegularFile => ObjectType::RegularFile,
            NodeSpec::Symlink(_) => ObjectType::Symlink,
            NodeSpec::Device(kind, _) => *kind,
            NodeSpec::Socket => ObjectType::Socket,
            NodeSpec::Fifo => ObjectType::Fifo,
        }
    }
}

#[derive(Debug)]
pub struct FileNode {
    pub data: FileData,
    pub share: ShareCounters,
}

#[derive(Debug)]
pub struct SymlinkNode {
    pub target: String,
}

#[derive(Debug)]
pub struct DeviceNode {
    pub nodetype: ObjectType,
    pub dev: DevNumbers,
}

/// Type-specific state, guarded by the object's lock.
#[derive(Debug)]
pub enum NodeData {
    Directory(DirIndex),
    RegularFile(FileNode),
    Symlink(SymlinkNode),
    DeviceNode(DeviceNode),
    Socket,
    Fifo,
}

impl NodeData {
    pub fn as_dir(&self) -> Option<&DirIndex> {
        match self {
            NodeData::Directory(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut DirIndex> {
        match self {
            NodeData::Directory(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            NodeData::RegularFile(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileNode> {
        match self {
            NodeData::RegularFile(file) => Some(file),
            _ => None,
        }
    }
}

/// Whether an object is currently indexed by its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    Live { index: u64 },
    Removed,
}

#[derive(Debug)]
pub struct Link {
    pub name: String,
    /// Non-owning back-reference; `None` only for an export root.
    pub parent: Option<u64>,
    pub state: Linkage,
}

impl Link {
    pub fn is_live(&self) -> bool {
        self.parent.is_none() || matches!(self.state, Linkage::Live { .. })
    }
}

/// A node of the in-memory tree.
///
/// Lock order: `node`, then the leaf mutexes `link`, `attrs` and `fd`. The
/// leaf mutexes are never held while acquiring anything else. No call holds
/// two `node` locks except `rename`, which takes both directories in inode
/// order and never touches a child's `node`.
#[derive(Debug)]
pub struct MemObject {
    ino: u64,
    export_id: u16,
    object_type: ObjectType,
    handle: WireHandle,
    pub(crate) node: RwLock<NodeData>,
    pub(crate) link: Mutex<Link>,
    pub(crate) attrs: Mutex<AttrList>,
    /// Descriptor used by calls that carry no open state; regular files only.
    pub(crate) fd: Mutex<MemFd>,
    /// Live child count plus the two implicit entries; directories only.
    pub(crate) numlinks: AtomicU32,
}

impl MemObject {
    pub(crate) fn new(
        ino: u64,
        export_id: u16,
        name: String,
        parent: Option<u64>,
        handle: WireHandle,
        node: NodeData,
        attrs: AttrList,
    ) -> Self {
        let object_type = attrs.object_type.unwrap_or(ObjectType::RegularFile);
        let numlinks = if object_type == ObjectType::Directory { 2 } else { 0 };
        Self {
            ino,
            export_id,
            object_type,
            handle,
            node: RwLock::new(node),
            link: Mutex::new(Link {
                name,
                parent,
                state: Linkage::Removed,
            }),
            attrs: Mutex::new(attrs),
            fd: Mutex::new(MemFd::default()),
            numlinks: AtomicU32::new(numlinks),
        }
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn export_id(&self) -> u16 {
        self.export_id
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn is_dir(&self) -> bool {
        self.object_type == ObjectType::Directory
    }

    pub fn handle(&self) -> &WireHandle {
        &self.handle
    }

    pub fn name(&self) -> String {
        self.link.lock().name.clone()
    }

    pub fn parent_ino(&self) -> Option<u64> {
        self.link.lock().parent
    }

    pub fn linkage(&self) -> Linkage {
        self.link.lock().state
    }

    /// An export root, or an object still indexed by its parent.
    pub fn is_live(&self) -> bool {
        self.link.lock().is_live()
    }

    /// Whether the object-wide descriptor is open.
    pub fn fd_is_open(&self) -> bool {
        self.fd.lock().is_open()
    }

    pub fn numlinks(&self) -> u32 {
        self.numlinks.load(Ordering::Acquire)
    }

    /// Copy the attributes under the attrs mutex only.
    ///
    /// Not serialized with directory mutation: a concurrent writer may land
    /// just before or just after the copy.
    pub fn snapshot_attrs(&self, request_mask: AttrMask) -> AttrList {
        let mut out = AttrList::with_request(request_mask);
        {
            let attrs = self.attrs.lock();
            out.fill_from(&attrs);
        }
        if self.is_dir() {
            out.numlinks = self.numlinks();
        }
        out
    }
}
