use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::types::{FingerprintStrategy, MissingFilePolicy};
use crate::utils::SettingsOverlay;

/// OCR local image folders into a searchable index.
#[derive(Clone, Parser)]
#[command(name = "pocr", version)]
#[command(about = "OCR image folders incrementally; search the extracted text.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the index database. Default: `pocr.db` in the platform data dir.
    #[arg(long, short, global = true)]
    pub db: Option<PathBuf>,

    /// Verbose output (debug logs, progress bar, full failure list).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Walk DIR, OCR new and changed images and commit the text to the index.
    Ingest(IngestArgs),
    /// Search the extracted text.
    Search(SearchArgs),
    /// Show record counts per status and the failed files.
    Status,
}

#[derive(Clone, Args)]
pub struct IngestArgs {
    /// Directory to ingest. Default: `roots` / `screenshots_dir` from the config file.
    #[arg(value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Number of OCR workers.
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// Detect changes by blake3 content hash instead of size + mtime.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub exact: Option<bool>,

    /// Delete records of files that no longer exist under DIR.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub prune: Option<bool>,

    /// Re-OCR files whose last attempt failed even if they did not change.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub retry_failed: Option<bool>,

    /// Report what would be processed; no OCR, no writes.
    #[arg(long)]
    pub dry_run: bool,

    /// Strict mode: fail on first walk error instead of recording it.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub strict: Option<bool>,

    /// Follow symbolic links.
    #[arg(long, short = 'f', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub follow_links: Option<bool>,

    /// Mtime tolerance window in seconds. Files within this window are considered unchanged.
    #[arg(long, short = 'm', value_parser = clap::value_parser!(i64))]
    pub mtime_window: Option<i64>,

    /// Exclude patterns (glob syntax). Can specify multiple: -e pattern1 pattern2 pattern3
    #[arg(long, short = 'e', num_args = 1..)]
    pub exclude: Vec<String>,

    /// Image extensions to scan (replaces the default list).
    #[arg(long, num_args = 1..)]
    pub ext: Vec<String>,

    /// Path to the tesseract executable.
    #[arg(long)]
    pub tesseract: Option<PathBuf>,

    /// Tesseract language(s), e.g. `eng` or `eng+deu`.
    #[arg(long)]
    pub lang: Option<String>,

    /// Encrypt a new index with SQLCipher. Prompts for passphrase (or use POCR_DB_KEY / .env).
    #[arg(long, short = 'x', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub encrypt: Option<bool>,
}

#[derive(Clone, Args)]
pub struct SearchArgs {
    /// Text to look for. Several words are searched as one phrase.
    #[arg(value_name = "QUERY", num_args = 1.., required = true)]
    pub query: Vec<String>,

    /// Fuzzy matching, optionally with a threshold in 0.0..=1.0.
    #[arg(long, value_name = "THRESHOLD", num_args = 0..=1)]
    pub fuzzy: Option<Option<f64>>,

    /// Maximum number of results.
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

impl Cli {
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Settings layer from the global flags only.
    pub fn overlay(&self) -> SettingsOverlay {
        SettingsOverlay {
            db_path: self.db.clone(),
            ..Default::default()
        }
    }
}

impl IngestArgs {
    /// Settings layer from the command line; only flags actually given are set.
    pub fn overlay(&self, global: SettingsOverlay) -> SettingsOverlay {
        let non_empty = |v: &Vec<String>| (!v.is_empty()).then(|| v.clone());
        SettingsOverlay {
            max_workers: self.workers,
            fingerprint: self.exact.map(|exact| match exact {
                true => FingerprintStrategy::Exact,
                false => FingerprintStrategy::Cheap,
            }),
            mtime_window: self.mtime_window,
            missing_files: self.prune.map(|prune| match prune {
                true => MissingFilePolicy::Prune,
                false => MissingFilePolicy::Keep,
            }),
            retry_failed: self.retry_failed,
            follow_links: self.follow_links,
            strict: self.strict,
            exclude: non_empty(&self.exclude),
            extensions: non_empty(&self.ext),
            tesseract_path: self.tesseract.clone(),
            tesseract_lang: self.lang.clone(),
            encrypt: self.encrypt,
            ..global
        }
    }
}

impl SearchArgs {
    pub fn query_text(&self) -> String {
        self.query.join(" ")
    }
}
