use memfs::error::MemFsError;
use memfs::fs::attrs::{AttrList, AttrMask, DevNumbers, Timespec};
use memfs::fs::handles::MAX_PATH_LEN;
use memfs::fs::object::ObjectType;

use crate::helpers::{create, ctx, mkdir, root, store, EXPORT_PATH};

/// Test 1: A symlink reads back its target; other objects are not links.
#[test]
fn test_readlink() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let (link, attrs) = fs
        .symlink(&ctx, &root, "l", "a/b/../c", &AttrList::default())
        .unwrap();
    assert_eq!(attrs.object_type, Some(ObjectType::Symlink));
    assert_eq!(fs.readlink(&link).unwrap(), "a/b/../c");

    let file = create(&fs, &ctx, &root, "f");
    assert!(matches!(fs.readlink(&file), Err(MemFsError::InvalidArgument)));
    assert!(matches!(fs.readlink(&root), Err(MemFsError::InvalidArgument)));
}

/// Test 2: Device nodes carry their numbers; fifos and sockets carry none.
#[test]
fn test_mknode_kinds() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let dev = DevNumbers { major: 8, minor: 17 };

    let (chr, attrs) = fs
        .mknode(&ctx, &root, "tty", ObjectType::CharDevice, dev, &AttrList::default())
        .unwrap();
    assert_eq!(attrs.object_type, Some(ObjectType::CharDevice));
    assert_eq!(attrs.rawdev, dev);
    assert_eq!(chr.object_type(), ObjectType::CharDevice);

    let (_, attrs) = fs
        .mknode(&ctx, &root, "sda1", ObjectType::BlockDevice, dev, &AttrList::default().with_mode(0o640))
        .unwrap();
    assert_eq!(attrs.rawdev.major, 8);
    assert_eq!(attrs.rawdev.minor, 17);
    assert_eq!(attrs.mode, 0o640);

    for (name, kind) in [("pipe", ObjectType::Fifo), ("sock", ObjectType::Socket)] {
        let (obj, attrs) = fs
            .mknode(&ctx, &root, name, kind, dev, &AttrList::default())
            .unwrap();
        assert_eq!(obj.object_type(), kind);
        assert_eq!(attrs.rawdev, DevNumbers::default());
    }

    let listed = crate::helpers::list(&fs, &ctx, &root);
    assert_eq!(listed, vec!["tty", "sda1", "pipe", "sock"]);
}

/// Test 3: mknode refuses kinds that have their own create call.
#[test]
fn test_mknode_rejects_other_kinds() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    for kind in [ObjectType::Directory, ObjectType::RegularFile, ObjectType::Symlink] {
        assert!(matches!(
            fs.mknode(&ctx, &root, "x", kind, DevNumbers::default(), &AttrList::default()),
            Err(MemFsError::InvalidArgument)
        ));
    }
    assert!(matches!(fs.lookup(&ctx, &root, "x"), Err(MemFsError::NotFound)));
    assert_eq!(fs.inodes.len(), 1);
}

/// Test 4: A full path longer than the limit fails the create and leaks nothing.
#[test]
fn test_overlong_path_is_server_fault() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let prefix = EXPORT_PATH.len() + 1;

    let longest = "n".repeat(MAX_PATH_LEN - prefix);
    create(&fs, &ctx, &root, &longest);

    let too_long = "n".repeat(MAX_PATH_LEN - prefix + 1);
    assert!(matches!(
        fs.create(&ctx, &root, &too_long, &AttrList::default()),
        Err(MemFsError::ServerFault(_))
    ));
    assert_eq!(fs.inodes.len(), 2);

    // the limit counts every ancestor
    let half = "d".repeat(MAX_PATH_LEN / 2);
    let dir = mkdir(&fs, &ctx, &root, &half);
    assert!(matches!(
        fs.mkdir(&ctx, &dir, &half, &AttrList::default()),
        Err(MemFsError::ServerFault(_))
    ));
    assert!(crate::helpers::list(&fs, &ctx, &dir).is_empty());
    assert_eq!(fs.inodes.len(), 3);
}

/// Test 5: Times move only when asked to, either to the given value or to now.
#[test]
fn test_setattr_times() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let file = create(&fs, &ctx, &root, "t");

    let mut set = AttrList::to_set(AttrMask::ATIME | AttrMask::MTIME);
    set.atime = Timespec::from_secs(100);
    set.mtime = Timespec::from_secs(200);
    fs.setattr2(&file, false, None, &set).unwrap();
    let attrs = fs.getattrs(&file, AttrMask::POSIX).unwrap();
    assert_eq!(attrs.atime, Timespec::from_secs(100));
    assert_eq!(attrs.mtime, Timespec::from_secs(200));

    fs.setattr2(&file, false, None, &AttrList::default().with_mode(0o600))
        .unwrap();
    let attrs = fs.getattrs(&file, AttrMask::POSIX).unwrap();
    assert_eq!(attrs.mode, 0o600);
    assert_eq!(attrs.atime, Timespec::from_secs(100));
    assert_eq!(attrs.mtime, Timespec::from_secs(200));

    let mut set = AttrList::to_set(AttrMask::MTIME | AttrMask::MTIME_SERVER);
    set.mtime = Timespec::from_secs(300);
    fs.setattr2(&file, false, None, &set).unwrap();
    let attrs = fs.getattrs(&file, AttrMask::POSIX).unwrap();
    assert_eq!(attrs.atime, Timespec::from_secs(100));
    assert!(attrs.mtime > Timespec::from_secs(300));
}
