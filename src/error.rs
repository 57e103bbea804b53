//! Error taxonomy: per-file failure reasons (recorded, never propagated) and run-aborting errors.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single file could not be indexed. Stored in `failure_reason` as its display string.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum FailureReason {
    #[error("file access: {0}")]
    FileAccess(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt image: {0}")]
    CorruptImage(String),
    #[error("ocr: {0}")]
    Ocr(String),
    #[error("worker fault: {0}")]
    WorkerFault(String),
    #[error("store: {0}")]
    Store(String),
}

impl FailureReason {
    /// Short tag for display and grouping.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::FileAccess(_) => "file-access",
            FailureReason::UnsupportedFormat(_) => "unsupported-format",
            FailureReason::CorruptImage(_) => "corrupt-image",
            FailureReason::Ocr(_) => "ocr",
            FailureReason::WorkerFault(_) => "worker-fault",
            FailureReason::Store(_) => "store",
        }
    }
}

/// Errors that abort a run. Returned wrapped in [`anyhow::Error`]; downcast to inspect.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot read root {path}: {source}")]
    Enumeration {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("root is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("strict mode: {0}")]
    Strict(String),
    #[error("aborting after {count} consecutive store errors; last: {last}")]
    Store { count: usize, last: String },
    #[error("failed to start OCR engine: {0}")]
    Engine(String),
}
