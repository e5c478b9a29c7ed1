use std::sync::{Arc, Barrier};

use memfs::error::MemFsError;
use memfs::fs::attrs::{AttrList, AttrMask};
use memfs::fs::object::Linkage;
use memfs::fs::share::{OpenFlags, OpenState};
use memfs::fs::io::OpenArgs;

use crate::helpers::{create, ctx, list, mkdir, root, shared_store, store};

/// Test 1: A removal racing with duplicate releases frees the object exactly once.
#[test]
fn test_concurrent_release_is_exactly_once() {
    let fs = shared_store();
    let ctx = ctx();
    let root = root(&fs, &ctx);

    for round in 0..200u64 {
        let file = create(&fs, &ctx, &root, "victim");
        let barrier = Arc::new(Barrier::new(9));

        let remover = {
            let fs = Arc::clone(&fs);
            let root = Arc::clone(&root);
            let file = Arc::clone(&file);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                fs.remove_child(&root, &file, true).unwrap();
            })
        };
        let releasers: Vec<_> = (0..8)
            .map(|_| {
                let fs = Arc::clone(&fs);
                let file = Arc::clone(&file);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..4 {
                        fs.release(&file);
                    }
                })
            })
            .collect();
        remover.join().unwrap();
        for h in releasers {
            h.join().unwrap();
        }

        assert_eq!(fs.stats().released, round + 1, "round {}", round);
        assert!(fs.object(file.ino()).is_none());
        assert_eq!(file.linkage(), Linkage::Removed);
    }
    assert_eq!(fs.inodes.len(), 1);
}

/// Test 2: Releasing a detached directory tears down everything under it.
#[test]
fn test_recursive_teardown_leaves_only_root() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let a = mkdir(&fs, &ctx, &root, "a");
    let b = mkdir(&fs, &ctx, &a, "b");
    let f = create(&fs, &ctx, &b, "f");
    let link = fs
        .symlink(&ctx, &a, "l", "b/f", &AttrList::default())
        .unwrap()
        .0;

    fs.remove_child(&root, &a, true).unwrap();

    assert_eq!(fs.inodes.len(), 1);
    assert_eq!(fs.stats().released, 4);
    for obj in [&a, &b, &f, &link] {
        assert!(fs.object(obj.ino()).is_none());
        assert!(!obj.is_live());
    }
    assert_eq!(a.numlinks(), 2);
    assert!(list(&fs, &ctx, &root).is_empty());
    assert_eq!(root.numlinks(), 2);
}

/// Test 3: Releasing a live object or an export root does nothing.
#[test]
fn test_release_of_live_object_is_noop() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let file = create(&fs, &ctx, &root, "keep");

    fs.release(&file);
    fs.release(&root);

    assert_eq!(fs.stats().released, 0);
    assert_eq!(fs.lookup(&ctx, &root, "keep").unwrap().ino(), file.ino());
    assert_eq!(fs.lookup_path(&ctx, "/export").unwrap().ino(), root.ino());
}

/// Test 4: A removed object reports stale attributes but is not freed until released.
#[test]
fn test_unlinked_object_is_stale_until_released() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let file = create(&fs, &ctx, &root, "f");
    fs.unlink(&root, &file, "f").unwrap();

    assert!(matches!(fs.getattrs(&file, AttrMask::POSIX), Err(MemFsError::Stale)));
    assert!(fs.object(file.ino()).is_some());
    // a second unlink of the removed object is accepted
    fs.unlink(&root, &file, "f").unwrap();
    fs.release(&file);
    assert!(fs.object(file.ino()).is_none());
}

/// Test 5: Non-empty directories and open files refuse to be unlinked.
#[test]
fn test_unlink_guards() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let dir = mkdir(&fs, &ctx, &root, "d");
    create(&fs, &ctx, &dir, "inner");
    assert!(matches!(fs.unlink(&root, &dir, "d"), Err(MemFsError::NotEmpty)));

    let file = create(&fs, &ctx, &root, "open");
    fs.open2(&ctx, &file, None, &OpenArgs::by_handle(OpenFlags::READ)).unwrap();
    assert!(matches!(fs.unlink(&root, &file, "open"), Err(MemFsError::FileOpen)));
    fs.close(&file).unwrap();
    fs.unlink(&root, &file, "open").unwrap();

    assert!(matches!(fs.unlink(&root, &dir, "other"), Err(MemFsError::NotFound)));
}

/// Test 6: Creating under a removed directory fails.
#[test]
fn test_create_in_removed_directory_is_stale() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let dir = mkdir(&fs, &ctx, &root, "d");
    fs.unlink(&root, &dir, "d").unwrap();

    let err = fs.create(&ctx, &dir, "late", &AttrList::default()).unwrap_err();
    assert!(matches!(err, MemFsError::Stale));
    assert_eq!(fs.inodes.len(), 2);
}

/// Test 7: Rename replaces a compatible destination and releases it.
#[test]
fn test_rename_displaces_destination() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let src = create(&fs, &ctx, &root, "src");
    let dst = create(&fs, &ctx, &root, "dst");

    fs.rename(&src, &root, "src", &root, "dst").unwrap();

    assert_eq!(fs.lookup(&ctx, &root, "dst").unwrap().ino(), src.ino());
    assert!(fs.object(dst.ino()).is_none());
    assert_eq!(list(&fs, &ctx, &root), vec!["dst"]);
    assert_eq!(root.numlinks(), 3);
}

/// Test 8: Rename refuses incompatible destinations and moves into its own subtree.
#[test]
fn test_rename_refusals() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let dir = mkdir(&fs, &ctx, &root, "dir");
    let sub = mkdir(&fs, &ctx, &dir, "sub");
    let file = create(&fs, &ctx, &root, "file");
    let full = mkdir(&fs, &ctx, &root, "full");
    create(&fs, &ctx, &full, "x");

    assert!(matches!(
        fs.rename(&file, &root, "file", &root, "dir"),
        Err(MemFsError::AlreadyExists)
    ));
    assert!(matches!(
        fs.rename(&dir, &root, "dir", &root, "full"),
        Err(MemFsError::AlreadyExists)
    ));
    assert!(matches!(
        fs.rename(&dir, &root, "dir", &sub, "loop"),
        Err(MemFsError::InvalidArgument)
    ));

    let open = create(&fs, &ctx, &root, "open");
    let mut state = OpenState::share();
    fs.open2(&ctx, &open, Some(&mut state), &OpenArgs::by_handle(OpenFlags::READ))
        .unwrap();
    fs.open2(&ctx, &open, None, &OpenArgs::by_handle(OpenFlags::READ)).unwrap();
    assert!(matches!(
        fs.rename(&file, &root, "file", &root, "open"),
        Err(MemFsError::FileOpen)
    ));

    // nothing moved
    assert_eq!(sub.parent_ino(), Some(dir.ino()));
    assert_eq!(fs.lookup(&ctx, &root, "file").unwrap().ino(), file.ino());
}

/// Test 9: Renaming an object onto itself is accepted and changes nothing.
#[test]
fn test_rename_onto_same_object() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let file = create(&fs, &ctx, &root, "same");
    fs.rename(&file, &root, "same", &root, "same").unwrap();
    assert_eq!(list(&fs, &ctx, &root), vec!["same"]);
    assert_eq!(fs.stats().released, 0);
}
