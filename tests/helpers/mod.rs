use std::sync::Arc;

use memfs::config::MemConfig;
use memfs::fs::attrs::{AttrList, AttrMask};
use memfs::fs::context::{Credentials, OpContext};
use memfs::fs::dir_index::FIRST_COOKIE;
use memfs::fs::object::MemObject;
use memfs::fs::MemFs;

pub const EXPORT_ID: u16 = 1;
pub const EXPORT_PATH: &str = "/export";

/// A store with the default export and file capacity.
pub fn store() -> MemFs {
    MemFs::new(MemConfig::default()).expect("failed to build store")
}

/// A store whose regular files hold at most `inode_size` bytes.
pub fn store_with(inode_size: usize) -> MemFs {
    let config = MemConfig {
        inode_size,
        ..Default::default()
    };
    MemFs::new(config).expect("failed to build store")
}

pub fn shared_store() -> Arc<MemFs> {
    Arc::new(store())
}

pub fn ctx() -> OpContext {
    OpContext::new(Credentials { uid: 1000, gid: 1000 }, EXPORT_ID)
}

pub fn root(fs: &MemFs, ctx: &OpContext) -> Arc<MemObject> {
    fs.lookup_path(ctx, EXPORT_PATH).expect("export root")
}

pub fn mkdir(fs: &MemFs, ctx: &OpContext, dir: &Arc<MemObject>, name: &str) -> Arc<MemObject> {
    fs.mkdir(ctx, dir, name, &AttrList::default().with_mode(0o755))
        .unwrap_or_else(|e| panic!("mkdir {}: {}", name, e))
        .0
}

pub fn create(fs: &MemFs, ctx: &OpContext, dir: &Arc<MemObject>, name: &str) -> Arc<MemObject> {
    fs.create(ctx, dir, name, &AttrList::default().with_mode(0o644))
        .unwrap_or_else(|e| panic!("create {}: {}", name, e))
        .0
}

/// Names of `dir`'s entries in iteration order.
pub fn list(fs: &MemFs, ctx: &OpContext, dir: &Arc<MemObject>) -> Vec<String> {
    let (entries, eof) = fs
        .readdir_entries(ctx, dir, FIRST_COOKIE, AttrMask::TYPE)
        .expect("readdir");
    assert!(eof);
    entries.into_iter().map(|e| e.name).collect()
}

/// Read up to `len` bytes from the start of a file.
pub fn read_all(fs: &MemFs, obj: &MemObject, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let res = fs.read2(obj, false, None, 0, &mut buf, None).expect("read");
    buf.truncate(res.amount);
    buf
}
