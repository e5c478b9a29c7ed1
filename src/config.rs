use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MemFsError, Result};

#[derive(Parser, Debug)]
#[command(name = "memfs", about = "In-memory object store driver")]
pub struct Cli {
    /// JSON file with store and export settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log file path
    #[arg(long, global = true, default_value = "/tmp/memfs.log")]
    pub log_file: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a JSON operation script against a fresh store
    Replay {
        /// Path to the script
        script: PathBuf,

        /// Override the first export's path
        #[arg(long)]
        export_path: Option<String>,

        /// Override the per-file data capacity in bytes
        #[arg(long)]
        inode_size: Option<usize>,
    },
    /// Hammer one export from several threads and verify the tree afterwards
    Stress {
        /// Number of worker threads
        #[arg(long, default_value_t = 4)]
        threads: usize,

        /// Operations per worker
        #[arg(long, default_value_t = 1000)]
        ops: usize,

        /// Seed for the workers' random choices
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Stop early after this many seconds
        #[arg(long)]
        max_seconds: Option<u64>,

        /// Override the per-file data capacity in bytes
        #[arg(long)]
        inode_size: Option<usize>,
    },
}

pub const DEFAULT_INODE_SIZE: usize = 4096;
pub const DEFAULT_EXPORT_ID: u16 = 1;
pub const DEFAULT_EXPORT_PATH: &str = "/export";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub export_id: u16,
    pub path: String,
    pub umask: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            export_id: DEFAULT_EXPORT_ID,
            path: DEFAULT_EXPORT_PATH.to_string(),
            umask: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemConfig {
    /// Fixed data capacity of every regular file.
    pub inode_size: usize,
    pub exports: Vec<ExportConfig>,
}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            inode_size: DEFAULT_INODE_SIZE,
            exports: vec![ExportConfig::default()],
        }
    }
}

impl MemConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: MemConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else start from defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.exports.is_empty() {
            return Err(MemFsError::Config("at least one export is required".into()));
        }
        for export in &self.exports {
            if !export.path.starts_with('/') {
                return Err(MemFsError::Config(format!(
                    "export {} path must be absolute: {:?}",
                    export.export_id, export.path
                )));
            }
        }
        Ok(())
    }

    /// Apply command-line overrides to the first export and the store.
    pub fn with_overrides(mut self, export_path: Option<String>, inode_size: Option<usize>) -> Self {
        if let Some(size) = inode_size {
            self.inode_size = size;
        }
        if let (Some(path), Some(first)) = (export_path, self.exports.first_mut()) {
            first.path = path;
        }
        self
    }

    pub fn primary_export(&self) -> Option<&ExportConfig> {
        self.exports.first()
    }
}
