//! Public and internal types for the pocr API and pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::error::FailureReason;
use crate::utils::config::{DEFAULT_FUZZY_THRESHOLD, DefaultSettings, PackagePaths};

/// Size + mtime of a file, plus its blake3 hash when computed ([`FingerprintStrategy::Exact`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    /// Modification time in nanoseconds since epoch.
    pub mtime_ns: i64,
    pub hash: Option<[u8; 32]>,
}

impl Fingerprint {
    /// Placeholder for files whose metadata could not be read. Never matches a real file.
    pub fn unknown() -> Self {
        Fingerprint {
            size: 0,
            mtime_ns: 0,
            hash: None,
        }
    }
}

/// A file found by enumeration, not yet classified.
#[derive(Clone, Debug)]
pub struct Candidate {
    /// Canonical absolute path, `/`-separated.
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Processed,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Processed => "processed",
            RecordStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RecordStatus::Pending),
            "processed" => Some(RecordStatus::Processed),
            "failed" => Some(RecordStatus::Failed),
            _ => None,
        }
    }
}

/// One row of the `images` table.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub status: RecordStatus,
    /// Present iff `status` is [`RecordStatus::Processed`].
    pub extracted_text: Option<String>,
    pub confidence: Option<f32>,
    /// Unix seconds of the last committed OCR attempt.
    pub last_processed_at: Option<i64>,
    /// Present iff `status` is [`RecordStatus::Failed`].
    pub failure_reason: Option<String>,
}

/// What the change detector needs from a stored row.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredMeta {
    pub fingerprint: Fingerprint,
    pub status: RecordStatus,
}

/// Map of path → stored fingerprint and status, loaded once per run.
pub type StoredIndex = HashMap<PathBuf, StoredMeta>;

/// Change detector verdict for one candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    New,
    Changed,
    Unchanged,
}

/// A candidate admitted for OCR.
#[derive(Clone, Debug)]
pub struct WorkItem {
    pub candidate: Candidate,
}

/// Result of one worker item.
#[derive(Clone, Debug)]
pub enum WorkOutcome {
    Processed {
        candidate: Candidate,
        text: String,
        confidence: f32,
    },
    Failed {
        candidate: Candidate,
        reason: FailureReason,
    },
}

impl WorkOutcome {
    pub fn candidate(&self) -> &Candidate {
        match self {
            WorkOutcome::Processed { candidate, .. } | WorkOutcome::Failed { candidate, .. } => {
                candidate
            }
        }
    }
}

/// A file that ended the run failed, with the reason.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: FailureReason,
}

/// Counts for one ingestion run. `scanned == skipped + processed + failed + discarded`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub scanned: usize,
    pub skipped: usize,
    pub processed: usize,
    pub failed: usize,
    /// Admitted but dropped without OCR because the run was cancelled.
    pub discarded: usize,
    pub pruned: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// What [`ingest`](crate::ingest) returns: counts plus every failure with its reason.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IngestReport {
    pub root: PathBuf,
    pub summary: RunSummary,
    pub failures: Vec<FileFailure>,
}

/// Dry-run classification of a root (no OCR, no writes).
#[derive(Clone, Debug, Default, Serialize)]
pub struct Plan {
    pub new: Vec<PathBuf>,
    pub changed: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    /// Stored under the root but no longer on disk.
    pub missing: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
}

/// How fingerprints are computed and compared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintStrategy {
    /// Size + mtime. Misses same-size edits that keep the timestamp.
    #[default]
    Cheap,
    /// Blake3 of the full content. One full read per file per run.
    Exact,
}

/// What happens to records whose file disappeared from disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingFilePolicy {
    /// Records stay and remain searchable.
    #[default]
    Keep,
    /// Records under the scanned root are deleted after a complete, error-free walk.
    Prune,
}

/// Strongly-typed settings for a run. Build with [`Default`] and override, or resolve from
/// layered files with [`resolve`](crate::utils::settings_file::resolve).
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Roots scanned when the caller gives none.
    pub roots: Vec<PathBuf>,
    /// Index database path. When None, `<data dir>/pocr.db`.
    pub store_path: Option<PathBuf>,
    /// Allowed image extensions, lowercase without dot.
    pub extensions: Vec<String>,
    /// Worker count. When None, available parallelism capped at [`DefaultSettings::MAX_WORKERS`].
    pub pool_size: Option<usize>,
    pub fingerprint: FingerprintStrategy,
    /// Mtime tolerance window in nanoseconds (cheap strategy).
    pub mtime_window_ns: i64,
    pub missing_files: MissingFilePolicy,
    /// Re-OCR unchanged files whose last attempt failed.
    pub retry_failed: bool,
    pub follow_links: bool,
    /// Fail on the first walk error instead of recording it.
    pub strict: bool,
    /// Exclude patterns (glob syntax, matched on file/dir name and full path).
    pub exclude: Vec<String>,
    pub tesseract_path: PathBuf,
    pub tesseract_lang: Option<String>,
    /// Default fuzzy search threshold (0.0..=1.0).
    pub fuzzy_threshold: f64,
    /// Encrypt a newly created store with SQLCipher.
    pub encrypt: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            roots: Vec::new(),
            store_path: None,
            extensions: DefaultSettings::EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            pool_size: None,
            fingerprint: FingerprintStrategy::default(),
            mtime_window_ns: 0,
            missing_files: MissingFilePolicy::default(),
            retry_failed: false,
            follow_links: false,
            strict: false,
            exclude: Vec::new(),
            tesseract_path: PathBuf::from(DefaultSettings::TESSERACT),
            tesseract_lang: None,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            encrypt: false,
        }
    }
}

impl Settings {
    /// Effective worker count (at least 1).
    pub fn worker_count(&self) -> usize {
        self.pool_size
            .unwrap_or_else(|| rayon::current_num_threads().min(DefaultSettings::MAX_WORKERS))
            .max(1)
    }

    /// Effective store path: explicit, else the platform data dir.
    pub fn resolved_store_path(&self) -> anyhow::Result<PathBuf> {
        match &self.store_path {
            Some(p) => Ok(p.clone()),
            None => PackagePaths::get().default_store_path(),
        }
    }
}

/// Callbacks and cancellation for a run. All fields optional.
#[derive(Default)]
pub struct IngestControl {
    /// Cooperative stop: the walk stops admitting, queued items are discarded, in-flight items finish.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Called from the walk thread with the number of items just admitted for OCR.
    pub on_admitted: Option<Box<dyn Fn(usize) + Send>>,
    /// Called after each commit with the number of outcomes it contained.
    pub on_committed: Option<Box<dyn Fn(usize) + Send>>,
}

/// Query mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SearchMode {
    /// Case-insensitive substring, ranked by occurrence count.
    Exact,
    /// Per-line fuzzy match, normalized score must reach `threshold`.
    Fuzzy { threshold: f64 },
}

#[derive(Clone, Debug)]
pub struct SearchOpts {
    pub mode: SearchMode,
    pub limit: Option<usize>,
}

impl Default for SearchOpts {
    fn default() -> Self {
        SearchOpts {
            mode: SearchMode::Exact,
            limit: None,
        }
    }
}

/// One query match.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub path: PathBuf,
    pub snippet: String,
    pub score: f64,
}
