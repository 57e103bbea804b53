//! pocr: incremental OCR indexing of local image folders, with text search over the results.

pub mod check;
pub mod engine;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use engine::capability::{
    Capabilities, EngineFactory, ImageCrateDecoder, ImageDecoder, OcrEngine, Recognition,
};
pub use engine::tesseract::TesseractCli;
pub use error::{FailureReason, IngestError};

use log::debug;
use rusqlite::Connection;
use std::path::Path;

/// Result alias used by public pocr API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Ingest `root`: enumerate images, OCR new and changed ones, commit results to the store named
/// by `settings`.
///
/// Per-file failures never make this return `Err`; they are listed in the report. Run-level
/// failures return an [`IngestError`] wrapped in [`anyhow::Error`].
///
/// ```ignore
/// let settings = pocr::Settings::default();
/// let caps = pocr::Capabilities::tesseract(&settings);
/// let report = pocr::ingest(Path::new("Screenshots"), &settings, &caps, Default::default())?;
/// println!("{} processed", report.summary.processed);
/// ```
pub fn ingest(
    root: &Path,
    settings: &Settings,
    capabilities: &Capabilities,
    control: IngestControl,
) -> Result<IngestReport> {
    let config_str = format!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_string().to_uppercase(),
        settings
    );
    debug!("{}", config_str);
    index::ingest_dir(root, settings, capabilities, control)
}

/// Search processed records. Empty query or no match returns an empty vec.
pub fn search(conn: &Connection, query: &str, opts: &SearchOpts) -> Result<Vec<SearchHit>> {
    engine::db_ops::search(conn, query, opts)
}

/// Dry run: classify `root` against the store without OCR or writes.
pub fn plan(root: &Path, settings: &Settings) -> Result<Plan> {
    check::plan_dir(root, settings)
}

/// Open the store named by `settings` read-only, for [`search`] while an ingest may be running.
pub fn open_index(settings: &Settings) -> Result<Connection> {
    engine::db_ops::open_reader(&settings.resolved_store_path()?)
}
