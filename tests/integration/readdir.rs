use std::time::Duration;

use memfs::fs::attrs::{AttrList, AttrMask};
use memfs::fs::dir_index::FIRST_COOKIE;
use memfs::fs::DirAction;

use crate::helpers::{create, ctx, list, mkdir, root, store};

/// Test 1: Entries come back in insertion order, not name order.
#[test]
fn test_readdir_insertion_order() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    for name in ["zeta", "alpha", "mid"] {
        create(&fs, &ctx, &root, name);
    }
    assert_eq!(list(&fs, &ctx, &root), vec!["zeta", "alpha", "mid"]);
}

/// Test 2: A cookie resumes after its entry even when the directory changed.
#[test]
fn test_cookie_resumes_under_mutation() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let a = create(&fs, &ctx, &root, "a");
    let b = create(&fs, &ctx, &root, "b");
    create(&fs, &ctx, &root, "c");

    let mut resume = 0;
    let eof = fs
        .readdir(&ctx, &root, FIRST_COOKIE, AttrMask::TYPE, |entry| {
            resume = entry.cookie;
            assert_eq!(entry.object.ino(), a.ino());
            DirAction::Terminate
        })
        .unwrap();
    assert!(!eof);

    fs.unlink(&root, &b, "b").unwrap();
    fs.release(&b);
    create(&fs, &ctx, &root, "d");
    fs.rename(&a, &root, "a", &root, "e").unwrap();

    let (rest, eof) = fs.readdir_entries(&ctx, &root, resume, AttrMask::TYPE).unwrap();
    assert!(eof);
    let names: Vec<_> = rest.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["c", "d", "e"]);
    assert!(rest.windows(2).all(|w| w[0].cookie < w[1].cookie));
}

/// Test 3: Index values are never reused after a removal.
#[test]
fn test_indices_are_monotonic() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let first = create(&fs, &ctx, &root, "x");
    let (entries, _) = fs.readdir_entries(&ctx, &root, FIRST_COOKIE, AttrMask::TYPE).unwrap();
    let first_cookie = entries[0].cookie;

    fs.unlink(&root, &first, "x").unwrap();
    fs.release(&first);
    create(&fs, &ctx, &root, "x");

    let (entries, _) = fs.readdir_entries(&ctx, &root, FIRST_COOKIE, AttrMask::TYPE).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].cookie > first_cookie);
}

/// Test 4: The callback may look up names and ".." in the directory being
/// listed while another thread waits to modify it.
#[test]
fn test_callback_lookup_with_waiting_writer() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let dir = mkdir(&fs, &ctx, &root, "d");
    create(&fs, &ctx, &dir, "one");
    create(&fs, &ctx, &dir, "two");

    std::thread::scope(|s| {
        let mut spawned = false;
        let eof = fs
            .readdir(&ctx, &dir, FIRST_COOKIE, AttrMask::POSIX, |entry| {
                if !spawned {
                    spawned = true;
                    let fs = &fs;
                    let dir = &dir;
                    s.spawn(move || {
                        let ctx = crate::helpers::ctx();
                        fs.create(&ctx, dir, "three", &AttrList::default()).unwrap();
                    });
                    std::thread::sleep(Duration::from_millis(100));
                }
                let found = fs.lookup(&ctx, &dir, &entry.name).unwrap();
                assert_eq!(found.ino(), entry.object.ino());
                assert_eq!(fs.lookup(&ctx, &dir, "..").unwrap().ino(), root.ino());
                assert_eq!(fs.lookup(&ctx, &dir, ".").unwrap().ino(), dir.ino());
                DirAction::Continue
            })
            .unwrap();
        assert!(eof);
    });

    assert_eq!(list(&fs, &ctx, &dir), vec!["one", "two", "three"]);
}

/// Test 5: Attributes handed to the callback are limited to the request.
#[test]
fn test_entry_attrs_follow_request_mask() {
    let fs = store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    create(&fs, &ctx, &root, "f");

    let (entries, _) = fs
        .readdir_entries(&ctx, &root, FIRST_COOKIE, AttrMask::TYPE | AttrMask::SIZE)
        .unwrap();
    let attrs = &entries[0].attrs;
    assert!(attrs.valid_mask.contains(AttrMask::TYPE));
    assert!(!attrs.valid_mask.contains(AttrMask::MODE));
}
