use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{MemFsError, Result};
use crate::fs::attrs::{AttrList, AttrMask};
use crate::fs::context::{Credentials, OpContext};
use crate::fs::dir_index::FIRST_COOKIE;
use crate::fs::io::OpenArgs;
use crate::fs::object::{MemObject, NodeData};
use crate::fs::share::{OpenFlags, OpenState};
use crate::fs::{DirAction, MemFs};

/// Shared directories the workers compete in.
const SHARED_DIRS: usize = 4;
/// Names per directory; kept small so workers collide.
const NAME_POOL: usize = 16;

#[derive(Debug, Clone)]
pub struct StressOptions {
    pub threads: usize,
    pub ops: usize,
    pub seed: u64,
    pub max_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Create,
    Mkdir,
    Write,
    Read,
    Readdir,
    Open,
    Rename,
    Unlink,
}

impl Operation {
    fn label(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Mkdir => "mkdir",
            Operation::Write => "write",
            Operation::Read => "read",
            Operation::Readdir => "readdir",
            Operation::Open => "open",
            Operation::Rename => "rename",
            Operation::Unlink => "unlink",
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct TreeReport {
    pub reachable: usize,
    pub directories: usize,
    pub files: usize,
    pub arena_objects: usize,
    pub violations: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StressReport {
    pub threads: usize,
    pub ops_per_thread: usize,
    pub seed: u64,
    pub elapsed_ms: u64,
    pub completed: BTreeMap<&'static str, u64>,
    pub benign_errors: BTreeMap<String, u64>,
    pub fatal_errors: BTreeMap<String, u64>,
    pub released: u64,
    pub tree: TreeReport,
}

impl StressReport {
    pub fn passed(&self) -> bool {
        self.fatal_errors.is_empty() && self.tree.violations.is_empty()
    }
}

#[derive(Default)]
struct WorkerResult {
    completed: BTreeMap<&'static str, u64>,
    benign_errors: BTreeMap<String, u64>,
    fatal_errors: BTreeMap<String, u64>,
}

struct Worker {
    id: usize,
    fs: Arc<MemFs>,
    creds: Credentials,
    export_id: u16,
    dirs: Vec<u64>,
    ops: usize,
    rng_seed: u64,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) -> WorkerResult {
        let ctx = OpContext::new(self.creds, self.export_id);
        let mut rng = StdRng::seed_from_u64(self.rng_seed);
        let mut result = WorkerResult::default();

        for _ in 0..self.ops {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("worker {} stopping early", self.id);
                break;
            }
            let op = pick_operation(&mut rng);
            match self.step(&ctx, &mut rng, op) {
                Ok(()) => *result.completed.entry(op.label()).or_insert(0) += 1,
                Err(e) if is_benign(&e) => {
                    *result
                        .benign_errors
                        .entry(format!("{}_{}", op.label(), error_label(&e)))
                        .or_insert(0) += 1;
                }
                Err(e) => {
                    warn!("worker {} fatal {}: {}", self.id, op.label(), e);
                    *result.fatal_errors.entry(op.label().to_string()).or_insert(0) += 1;
                }
            }
        }
        result
    }

    fn random_dir(&self, rng: &mut StdRng) -> Result<Arc<MemObject>> {
        let ino = self.dirs[rng.gen_range(0..self.dirs.len())];
        self.fs.object(ino).ok_or(MemFsError::Stale)
    }

    fn random_name(rng: &mut StdRng) -> String {
        format!("n{:02}", rng.gen_range(0..NAME_POOL))
    }

    fn step(&self, ctx: &OpContext, rng: &mut StdRng, op: Operation) -> Result<()> {
        let fs = &self.fs;
        let dir = self.random_dir(rng)?;
        let name = Self::random_name(rng);

        match op {
            Operation::Create => {
                fs.create(ctx, &dir, &name, &AttrList::default().with_mode(0o644))?;
            }
            Operation::Mkdir => {
                fs.mkdir(ctx, &dir, &name, &AttrList::default().with_mode(0o755))?;
            }
            Operation::Write => {
                let obj = fs.lookup(ctx, &dir, &name)?;
                let mut data = vec![0u8; rng.gen_range(1..256)];
                rng.fill(&mut data[..]);
                let offset = rng.gen_range(0..8192);
                fs.write2(&obj, false, None, offset, &data, None)?;
            }
            Operation::Read => {
                let obj = fs.lookup(ctx, &dir, &name)?;
                let mut buf = vec![0u8; 512];
                let offset = rng.gen_range(0..8192);
                fs.read2(&obj, false, None, offset, &mut buf, None)?;
            }
            Operation::Readdir => {
                let mut cookie = FIRST_COOKIE;
                fs.readdir(ctx, &dir, FIRST_COOKIE, AttrMask::POSIX, |entry| {
                    cookie = entry.cookie;
                    // re-entrant lookups on the directory being listed
                    let _ = fs.lookup(ctx, &dir, &entry.name);
                    let _ = fs.lookup(ctx, &dir, "..");
                    DirAction::Continue
                })?;
                fs.readdir(ctx, &dir, cookie, AttrMask::TYPE, |_| DirAction::Terminate)?;
            }
            Operation::Open => {
                let obj = fs.lookup(ctx, &dir, &name)?;
                let mut state = OpenState::share();
                let flags = if rng.gen_bool(0.5) {
                    OpenFlags::READ | OpenFlags::DENY_WRITE
                } else {
                    OpenFlags::RDWR
                };
                fs.open2(ctx, &obj, Some(&mut state), &OpenArgs::by_handle(flags))?;
                let io = if flags.contains(OpenFlags::WRITE) {
                    fs.write2(&obj, false, Some(&state), 0, b"stress", None).map(|_| ())
                } else {
                    let mut buf = [0u8; 16];
                    fs.read2(&obj, false, Some(&state), 0, &mut buf, None).map(|_| ())
                };
                fs.close2(&obj, &mut state)?;
                io?;
            }
            Operation::Rename => {
                let obj = fs.lookup(ctx, &dir, &name)?;
                let newdir = self.random_dir(rng)?;
                let new_name = Self::random_name(rng);
                fs.rename(&obj, &dir, &name, &newdir, &new_name)?;
            }
            Operation::Unlink => {
                let obj = fs.lookup(ctx, &dir, &name)?;
                fs.unlink(&dir, &obj, &name)?;
                fs.release(&obj);
            }
        }
        Ok(())
    }
}

fn pick_operation(rng: &mut StdRng) -> Operation {
    match rng.gen_range(0..100) {
        0..=19 => Operation::Create,
        20..=24 => Operation::Mkdir,
        25..=44 => Operation::Write,
        45..=59 => Operation::Read,
        60..=69 => Operation::Readdir,
        70..=77 => Operation::Open,
        78..=87 => Operation::Rename,
        _ => Operation::Unlink,
    }
}

/// Errors a well-behaved store returns when workers race on the same names.
fn is_benign(e: &MemFsError) -> bool {
    matches!(
        e,
        MemFsError::NotFound
            | MemFsError::AlreadyExists
            | MemFsError::NotADirectory
            | MemFsError::NotEmpty
            | MemFsError::FileOpen
            | MemFsError::ShareConflict
            | MemFsError::Stale
            | MemFsError::InvalidArgument
    )
}

fn error_label(e: &MemFsError) -> &'static str {
    match e {
        MemFsError::NotFound => "not_found",
        MemFsError::AlreadyExists => "exists",
        MemFsError::NotADirectory => "not_dir",
        MemFsError::NotEmpty => "not_empty",
        MemFsError::FileOpen => "file_open",
        MemFsError::ShareConflict => "share_conflict",
        MemFsError::Stale => "stale",
        MemFsError::InvalidArgument => "invalid",
        _ => "other",
    }
}

/// Stop the workers once `limit` has passed, polling in short ticks so a
/// finished run does not wait out the whole limit.
fn start_timer_thread(
    limit: Duration,
    shutdown: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("memfs-stress-timer".to_string())
        .spawn(move || {
            let deadline = Instant::now() + limit;
            let tick = Duration::from_millis(50);
            while !done.load(Ordering::Relaxed) {
                if Instant::now() >= deadline {
                    info!("stress time limit reached, stopping workers");
                    shutdown.store(true, Ordering::Relaxed);
                    break;
                }
                std::thread::sleep(tick);
            }
        })
}

/// Run concurrent workers against `export_path`, then check the tree.
pub fn run(
    fs: Arc<MemFs>,
    creds: Credentials,
    export_id: u16,
    export_path: &str,
    opts: &StressOptions,
) -> Result<StressReport> {
    let ctx = OpContext::new(creds, export_id);
    let root = fs.lookup_path(&ctx, export_path)?;

    let mut dirs = vec![root.ino()];
    for i in 0..SHARED_DIRS {
        let (dir, _) = fs.mkdir(&ctx, &root, &format!("shared{}", i), &AttrList::default().with_mode(0o755))?;
        dirs.push(dir.ino());
    }

    info!(
        "stress starting: threads={}, ops={}, seed={}",
        opts.threads, opts.ops, opts.seed
    );
    let started = Instant::now();
    let shutdown = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));
    let timer = match opts.max_seconds {
        Some(secs) => Some(start_timer_thread(
            Duration::from_secs(secs),
            Arc::clone(&shutdown),
            Arc::clone(&done),
        )?),
        None => None,
    };

    let mut handles = Vec::with_capacity(opts.threads);
    for id in 0..opts.threads {
        let worker = Worker {
            id,
            fs: Arc::clone(&fs),
            creds,
            export_id,
            dirs: dirs.clone(),
            ops: opts.ops,
            rng_seed: opts.seed ^ (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
            shutdown: Arc::clone(&shutdown),
        };
        let handle = std::thread::Builder::new()
            .name(format!("memfs-stress-{}", id))
            .spawn(move || worker.run())?;
        handles.push(handle);
    }

    let mut totals = WorkerResult::default();
    for handle in handles {
        let result = handle
            .join()
            .map_err(|_| MemFsError::ServerFault("stress worker panicked".into()))?;
        merge(&mut totals.completed, result.completed);
        merge(&mut totals.benign_errors, result.benign_errors);
        merge(&mut totals.fatal_errors, result.fatal_errors);
    }
    done.store(true, Ordering::Relaxed);
    if let Some(timer) = timer {
        let _ = timer.join();
    }

    let tree = check_tree(&fs, &ctx, &root)?;
    let report = StressReport {
        threads: opts.threads,
        ops_per_thread: opts.ops,
        seed: opts.seed,
        elapsed_ms: started.elapsed().as_millis() as u64,
        completed: totals.completed,
        benign_errors: totals.benign_errors,
        fatal_errors: totals.fatal_errors,
        released: fs.inodes.released(),
        tree,
    };
    info!(
        "stress finished in {}ms: reachable={}, violations={}",
        report.elapsed_ms,
        report.tree.reachable,
        report.tree.violations.len()
    );
    Ok(report)
}

fn merge<K: Ord>(into: &mut BTreeMap<K, u64>, from: BTreeMap<K, u64>) {
    for (key, count) in from {
        *into.entry(key).or_insert(0) += count;
    }
}

/// Walk the tree from `root` and check linkage, link counts, open state and
/// that every arena object of the export is reachable.
pub fn check_tree(fs: &MemFs, ctx: &OpContext, root: &Arc<MemObject>) -> Result<TreeReport> {
    let mut report = TreeReport {
        reachable: 1,
        directories: 1,
        ..Default::default()
    };
    let mut pending = vec![Arc::clone(root)];

    while let Some(dir) = pending.pop() {
        let (entries, _) = fs.readdir_entries(ctx, &dir, FIRST_COOKIE, AttrMask::POSIX)?;
        let expected_links = 2 + entries.len() as u32;
        if dir.numlinks() != expected_links {
            report.violations.push(format!(
                "ino {} has numlinks {} but {} children",
                dir.ino(),
                dir.numlinks(),
                entries.len()
            ));
        }

        for entry in entries {
            let child = entry.object;
            report.reachable += 1;
            if child.parent_ino() != Some(dir.ino()) {
                report.violations.push(format!(
                    "ino {} listed in {} but points at {:?}",
                    child.ino(),
                    dir.ino(),
                    child.parent_ino()
                ));
            }
            if !child.is_live() {
                report
                    .violations
                    .push(format!("ino {} listed in {} but removed", child.ino(), dir.ino()));
            }
            match &*child.node.read() {
                NodeData::Directory(_) => {
                    report.directories += 1;
                }
                NodeData::RegularFile(file) => {
                    report.files += 1;
                    if !file.share.is_idle() || child.fd_is_open() {
                        report
                            .violations
                            .push(format!("ino {} still has open state", child.ino()));
                    }
                }
                _ => {}
            }
            if child.is_dir() {
                pending.push(child);
            }
        }
    }

    report.arena_objects = fs
        .inodes
        .inos()
        .into_iter()
        .filter_map(|ino| fs.object(ino))
        .filter(|obj| obj.export_id() == root.export_id())
        .count();
    if report.arena_objects != report.reachable {
        report.violations.push(format!(
            "arena holds {} objects but {} are reachable",
            report.arena_objects, report.reachable
        ));
    }
    Ok(report)
}
