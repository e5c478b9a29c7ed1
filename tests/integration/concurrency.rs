use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use memfs::error::MemFsError;
use memfs::fs::attrs::AttrList;
use memfs::fs::context::Credentials;
use memfs::stress::{self, check_tree, StressOptions};

use crate::helpers::{create, ctx, mkdir, root, shared_store, EXPORT_ID, EXPORT_PATH};

/// Test 1: Threads racing to create the same names end with one object per name.
#[test]
fn test_racing_creates_agree() {
    let fs = shared_store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let dir = mkdir(&fs, &ctx, &root, "race");

    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let fs = Arc::clone(&fs);
            let dir = Arc::clone(&dir);
            std::thread::spawn(move || {
                let ctx = crate::helpers::ctx();
                let mut rng = StdRng::seed_from_u64(0x5EED + t);
                let mut created = 0;
                for _ in 0..200 {
                    let name = format!("f{}", rng.gen_range(0..32));
                    if fs.create(&ctx, &dir, &name, &AttrList::default()).is_ok() {
                        created += 1;
                    }
                }
                created
            })
        })
        .collect();
    let created: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let report = check_tree(&fs, &ctx, &root).unwrap();
    assert!(report.violations.is_empty(), "{:?}", report.violations);
    assert_eq!(dir.numlinks() as usize, 2 + created);
    assert_eq!(report.files, created);
}

/// Test 2: Renames shuffling directories in opposite orders never deadlock.
#[test]
fn test_cross_renames_finish() {
    let fs = shared_store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let a = mkdir(&fs, &ctx, &root, "a");
    let b = mkdir(&fs, &ctx, &root, "b");
    for i in 0..16 {
        crate::helpers::create(&fs, &ctx, &a, &format!("n{}", i));
        crate::helpers::create(&fs, &ctx, &b, &format!("m{}", i));
    }

    let handles: Vec<_> = [(Arc::clone(&a), Arc::clone(&b)), (Arc::clone(&b), Arc::clone(&a))]
        .into_iter()
        .enumerate()
        .map(|(t, (from, to))| {
            let fs = Arc::clone(&fs);
            std::thread::spawn(move || {
                let ctx = crate::helpers::ctx();
                let mut rng = StdRng::seed_from_u64(t as u64);
                for _ in 0..500 {
                    let prefix = if rng.gen_bool(0.5) { "n" } else { "m" };
                    let name = format!("{}{}", prefix, rng.gen_range(0..16));
                    if let Ok(obj) = fs.lookup(&ctx, &from, &name) {
                        let _ = fs.rename(&obj, &from, &name, &to, &name);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let report = check_tree(&fs, &ctx, &root).unwrap();
    assert!(report.violations.is_empty(), "{:?}", report.violations);
    assert_eq!(report.files, 32);
}

/// Test 3: A seeded mixed workload leaves a consistent tree.
#[test]
fn test_stress_run_is_consistent() {
    let fs = shared_store();
    let opts = StressOptions {
        threads: 6,
        ops: 500,
        seed: 42,
        max_seconds: Some(60),
    };
    let report = stress::run(
        Arc::clone(&fs),
        Credentials::default(),
        EXPORT_ID,
        EXPORT_PATH,
        &opts,
    )
    .unwrap();
    assert!(report.passed(), "{:?}", report);
    assert_eq!(report.tree.reachable, fs.inodes.len());
}

/// Test 4: Unlinking a child directory that sorts before its parent does not
/// deadlock against renames between the two.
#[test]
fn test_unlink_child_against_renames_with_parent() {
    let fs = shared_store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    let child = mkdir(&fs, &ctx, &root, "c");
    let parent = mkdir(&fs, &ctx, &root, "p");
    fs.rename(&child, &root, "c", &parent, "c").unwrap();
    assert!(child.ino() < parent.ino());

    create(&fs, &ctx, &child, "keep");
    let mover = create(&fs, &ctx, &child, "x");

    let (done_tx, done_rx) = mpsc::channel();
    let unlinker = {
        let fs = Arc::clone(&fs);
        let parent = Arc::clone(&parent);
        let child = Arc::clone(&child);
        let done = done_tx.clone();
        std::thread::spawn(move || {
            for _ in 0..5_000 {
                let res = fs.unlink(&parent, &child, "c");
                assert!(matches!(res, Err(MemFsError::NotEmpty)), "{:?}", res);
            }
            done.send("unlink").unwrap();
        })
    };
    let renamer = {
        let fs = Arc::clone(&fs);
        let parent = Arc::clone(&parent);
        let child = Arc::clone(&child);
        std::thread::spawn(move || {
            for _ in 0..2_500 {
                fs.rename(&mover, &child, "x", &parent, "x").unwrap();
                fs.rename(&mover, &parent, "x", &child, "x").unwrap();
            }
            done_tx.send("rename").unwrap();
        })
    };

    for _ in 0..2 {
        let finished = done_rx.recv_timeout(Duration::from_secs(30));
        assert!(finished.is_ok(), "unlink and rename made no progress for 30s");
    }
    unlinker.join().unwrap();
    renamer.join().unwrap();

    let report = check_tree(&fs, &ctx, &root).unwrap();
    assert!(report.violations.is_empty(), "{:?}", report.violations);
    assert_eq!(crate::helpers::list(&fs, &ctx, &child), vec!["keep", "x"]);
}

/// Test 5: Tearing down a subtree while its directories trade entries
/// finishes and frees everything under it.
#[test]
fn test_teardown_against_renames_inside() {
    let fs = shared_store();
    let ctx = ctx();
    let root = root(&fs, &ctx);
    for round in 0..50 {
        let top = mkdir(&fs, &ctx, &root, &format!("top{}", round));
        let low = mkdir(&fs, &ctx, &root, "low");
        fs.rename(&low, &root, "low", &top, "low").unwrap();
        let file = create(&fs, &ctx, &low, "f");

        let (done_tx, done_rx) = mpsc::channel();
        let renamer = {
            let fs = Arc::clone(&fs);
            let top = Arc::clone(&top);
            let low = Arc::clone(&low);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    if fs.rename(&file, &low, "f", &top, "f").is_err() {
                        break;
                    }
                    if fs.rename(&file, &top, "f", &low, "f").is_err() {
                        break;
                    }
                }
                done_tx.send(()).unwrap();
            })
        };
        fs.remove_child(&root, &top, true).unwrap();

        assert!(
            done_rx.recv_timeout(Duration::from_secs(30)).is_ok(),
            "renames stuck behind teardown in round {}",
            round
        );
        renamer.join().unwrap();
        assert!(fs.object(top.ino()).is_none());
        assert!(fs.object(low.ino()).is_none());
    }
    assert_eq!(fs.inodes.len(), 1);
}
