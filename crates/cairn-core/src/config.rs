//! Node configuration.
//!
//! The launch surface is positional:
//!
//!   cairnd <directory-host> <directory-port> <node-port> [data-file]
//!
//! `node-port` 0 means "any free port". When a data file is given it must
//! be exactly `DATA_SIZE` bytes; it seeds the store and bootstrap is
//! skipped. Tuning knobs that are not part of the launch contract are
//! CAIRN_* environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::DATA_SIZE;

/// Everything the node needs to start.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub directory_host: String,
    pub directory_port: u16,
    /// Listening port. 0 = OS-assigned.
    pub node_port: u16,
    /// Seed payload. `None` = bootstrap from peers.
    pub data_file: Option<PathBuf>,
    /// Number of correction scanners. At least two, so racing scanners
    /// exercise the ticket coalescing they are designed around.
    pub scanners: usize,
    /// Sleep between correction retries and between full scan passes.
    pub scan_interval: Duration,
}

const DEFAULT_SCANNERS: usize = 2;
const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(1);

impl NodeConfig {
    /// Parse the positional arguments (program name already stripped).
    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        if args.len() < 3 {
            return Err(ConfigError::Usage);
        }
        let directory_port = parse_port(&args[1])?;
        if directory_port == 0 {
            return Err(ConfigError::DirectoryPortZero);
        }
        let node_port = parse_port(&args[2])?;
        let data_file = match args.get(3) {
            Some(p) if !p.is_empty() => Some(PathBuf::from(p)),
            _ => None,
        };

        let mut config = Self {
            directory_host: args[0].clone(),
            directory_port,
            node_port,
            data_file,
            scanners: DEFAULT_SCANNERS,
            scan_interval: DEFAULT_SCAN_INTERVAL,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply CAIRN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CAIRN_SCANNERS") {
            if let Ok(n) = v.parse::<usize>() {
                // Never fewer than two: ticket coalescing assumes racing
                // scanners, and a lone scanner has nobody to coalesce with.
                self.scanners = n.max(DEFAULT_SCANNERS);
            }
        }
        if let Ok(v) = std::env::var("CAIRN_SCAN_INTERVAL_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.scan_interval = Duration::from_millis(ms.max(1));
            }
        }
    }
}

fn parse_port(arg: &str) -> Result<u16, ConfigError> {
    arg.parse::<u16>()
        .map_err(|_| ConfigError::BadPort(arg.to_string()))
}

/// Read and validate a seed payload file.
///
/// The file must be a readable regular file of exactly `DATA_SIZE` bytes.
/// A wrong-size file is a configuration error, not a crash.
pub fn read_seed_file(path: &Path) -> Result<Box<[u8; DATA_SIZE]>, ConfigError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ConfigError::SeedUnreadable(path.to_path_buf(), e))?;
    if !metadata.is_file() {
        return Err(ConfigError::SeedNotAFile(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)
        .map_err(|e| ConfigError::SeedUnreadable(path.to_path_buf(), e))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ConfigError::SeedWrongSize(path.to_path_buf(), len))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("usage: cairnd <directory-host> <directory-port> <node-port> [data-file]")]
    Usage,
    #[error("port numbers must be integers between 0 and 65535, got {0:?}")]
    BadPort(String),
    #[error("the directory port must be strictly positive")]
    DirectoryPortZero,
    #[error("data file {} is not a regular file", .0.display())]
    SeedNotAFile(PathBuf),
    #[error("failed to read data file {}: {1}", .0.display())]
    SeedUnreadable(PathBuf, std::io::Error),
    #[error("data file {} holds {1} bytes, expected exactly {}", .0.display(), DATA_SIZE)]
    SeedWrongSize(PathBuf, usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
