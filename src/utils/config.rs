//! Application configuration constants.
//! Tuning and thresholds in one place.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived paths: built once from `CARGO_PKG_NAME` and the platform dirs, then cached.
///
/// `POCR_CONFIG_HOME` / `POCR_DATA_HOME` override the platform config/data dirs (tests, portable setups).
pub struct PackagePaths {
    pkg_name: &'static str,
    config_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    db_filename: String,
    local_config_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache paths. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            let dirs = ProjectDirs::from("", "", pkg);
            let config_dir = std::env::var_os("POCR_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|| dirs.as_ref().map(|d| d.config_dir().to_path_buf()));
            let data_dir = std::env::var_os("POCR_DATA_HOME")
                .map(PathBuf::from)
                .or_else(|| dirs.as_ref().map(|d| d.data_dir().to_path_buf()));
            PackagePaths {
                pkg_name: pkg,
                config_dir,
                data_dir,
                db_filename: format!("{pkg}.db"),
                local_config_filename: format!(".{pkg}.toml"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    pub fn db_filename(&self) -> &str {
        &self.db_filename
    }

    /// Per-root settings file name (`.pocr.toml`).
    pub fn local_config_filename(&self) -> &str {
        &self.local_config_filename
    }

    /// User settings file (`<config dir>/config.toml`), if a config dir exists on this platform.
    pub fn user_config_file(&self) -> Option<PathBuf> {
        self.config_dir.as_ref().map(|d| d.join("config.toml"))
    }

    /// Default index location: `<data dir>/pocr.db`.
    pub fn default_store_path(&self) -> Result<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|d| d.join(&self.db_filename))
            .context("no platform data directory; pass --db")
    }
}

// ---- Settings defaults ----

pub struct DefaultSettings;

impl DefaultSettings {
    /// Image extensions scanned by default.
    pub const EXTENSIONS: &'static [&'static str] =
        &["png", "jpg", "jpeg", "bmp", "tiff", "tif", "gif", "webp"];
    /// Upper bound for the default worker count; OCR decode buffers are large.
    pub const MAX_WORKERS: usize = 8;
    #[cfg(windows)]
    pub const TESSERACT: &'static str = "tesseract.exe";
    #[cfg(not(windows))]
    pub const TESSERACT: &'static str = "tesseract";
}

// ---- Pipeline ----

/// Work queue slots per worker. Bounds how many admitted images wait ahead of the pool.
pub const WORK_QUEUE_PER_WORKER: usize = 2;

/// Capacity of the writer channel (admissions + outcomes).
pub const WRITER_CHANNEL_CAP: usize = 1024;

// ---- Hashing ----

/// Hashing I/O thresholds and buffer sizes.
pub struct HashingConsts;

impl HashingConsts {
    /// File size above which hashing uses memory-mapped I/O (bytes). 100 MB.
    pub const HASH_MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;
    /// Chunk size for reading files below mmap threshold (bytes). 1 MB.
    pub const HASH_READ_CHUNK_SIZE: usize = 1024 * 1024;
}

// ---- Database ----

/// Max writer messages per transaction.
pub const DB_WRITE_BATCH_SIZE: usize = 64;

/// Commit a partial batch when the writer queue has been idle this long.
pub const WRITER_IDLE_FLUSH: Duration = Duration::from_millis(200);

/// Consecutive failed row commits before the run is aborted.
pub const MAX_CONSECUTIVE_STORE_ERRORS: usize = 3;

// ---- Query ----

/// Characters of context kept on each side of a match in a snippet.
pub const SNIPPET_CONTEXT_CHARS: usize = 60;

/// Default normalized score a fuzzy match must reach.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.5;

// ---- Output ----

/// In verbose CLI output, list at most this many failures before summarizing the rest.
pub const FAILURE_LIST_THRESHOLD: usize = 50;
