use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use memfs::config::{Cli, Command, MemConfig};
use memfs::fs::context::{Credentials, OpContext};
use memfs::fs::MemFs;
use memfs::script::{load_script, Session};
use memfs::stress::{self, StressOptions};

/// Log to `log_file` and stderr. The guard must outlive the run.
fn init_logging(log_file: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let log_dir = log_file.parent().unwrap_or_else(|| Path::new("/tmp"));
    let log_name = log_file
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("memfs.log"));
    let file_appender = tracing_appender::rolling::never(log_dir, log_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        );
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error: failed to set tracing subscriber: {}", e);
        std::process::exit(1);
    }
    guard
}

fn load_config(path: Option<&Path>, export_path: Option<String>, inode_size: Option<usize>) -> MemConfig {
    let config = MemConfig::load_or_default(path).unwrap_or_else(|e| {
        eprintln!("Error: config {:?}: {}", path, e);
        std::process::exit(1);
    });
    let config = config.with_overrides(export_path, inode_size);
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    config
}

fn caller_credentials() -> Credentials {
    Credentials {
        uid: nix::unistd::getuid().as_raw(),
        gid: nix::unistd::getgid().as_raw(),
    }
}

fn main() {
    let cli = Cli::parse();
    let _guard = init_logging(&cli.log_file);

    match cli.command {
        Command::Replay {
            script,
            export_path,
            inode_size,
        } => {
            let config = load_config(cli.config.as_deref(), export_path, inode_size);
            let ops = load_script(&script).unwrap_or_else(|e| {
                eprintln!("Error: script {:?}: {}", script, e);
                std::process::exit(1);
            });

            let Some(export) = config.primary_export().cloned() else {
                eprintln!("Error: no export configured");
                std::process::exit(1);
            };
            let fs = MemFs::new(config).unwrap_or_else(|e| {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            });
            let ctx = OpContext::new(caller_credentials(), export.export_id);

            info!(
                "memfs replay: script={}, export={}",
                script.display(),
                export.path
            );
            let session = Session::open(&fs, &ctx, &export.path).unwrap_or_else(|e| {
                eprintln!("Error: export {}: {}", export.path, e);
                std::process::exit(1);
            });

            let reports = session.replay(&ops);
            let failed = reports.iter().filter(|r| !r.ok).count();
            for report in &reports {
                match serde_json::to_string(report) {
                    Ok(line) => println!("{}", line),
                    Err(e) => error!("failed to encode step {}: {}", report.step, e),
                }
            }
            info!("replay done: {} steps, {} failed", reports.len(), failed);
        }
        Command::Stress {
            threads,
            ops,
            seed,
            max_seconds,
            inode_size,
        } => {
            let config = load_config(cli.config.as_deref(), None, inode_size);
            let Some(export) = config.primary_export().cloned() else {
                eprintln!("Error: no export configured");
                std::process::exit(1);
            };
            let fs = match MemFs::new(config) {
                Ok(fs) => Arc::new(fs),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };

            let opts = StressOptions {
                threads,
                ops,
                seed,
                max_seconds,
            };
            let report = stress::run(fs, caller_credentials(), export.export_id, &export.path, &opts)
                .unwrap_or_else(|e| {
                    eprintln!("Error: stress run failed: {}", e);
                    std::process::exit(1);
                });

            match serde_json::to_string_pretty(&report) {
                Ok(text) => println!("{}", text),
                Err(e) => error!("failed to encode stress report: {}", e),
            }
            if !report.passed() {
                for violation in &report.tree.violations {
                    error!("invariant violated: {}", violation);
                }
                eprintln!(
                    "memfs: stress failed ({} fatal errors, {} violations)",
                    report.fatal_errors.values().sum::<u64>(),
                    report.tree.violations.len()
                );
                std::process::exit(2);
            }
        }
    }
}
