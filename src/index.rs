//! Ingestion run: walk, OCR and commit a root into the index.

use anyhow::{Context, Result};
use log::{debug, warn};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::engine::capability::Capabilities;
use crate::engine::db_ops::{
    DrainParams, drain_into_store, load_index, open_db, open_db_or_detect_encrypted, prune_missing,
};
use crate::engine::tools::check_root_and_canonicalize;
use crate::pipeline::{
    PipelineHandles, PipelineParams, check_for_initial_error_or_skipped_paths, run_pipeline,
    shutdown_pipeline_handles,
};
use crate::types::{IngestControl, IngestReport, MissingFilePolicy, RunSummary, Settings};
use crate::utils::get_passphrase;

/// Open (or create) the store for writing. A new store is encrypted when `encrypt` is set;
/// an existing one is opened with its key if it turns out to be encrypted.
pub fn open_store(store_path: &Path, encrypt: bool) -> Result<Connection> {
    if encrypt && !store_path.exists() {
        let dir = store_path.parent().unwrap_or(Path::new("."));
        let pass = get_passphrase(dir, true)?;
        return open_db(store_path, Some(pass.as_str()));
    }
    let (conn, _passphrase_used) = open_db_or_detect_encrypted(store_path)?;
    Ok(conn)
}

/// Ingest `root` into the store named by `settings`.
///
/// Errors only for run-level failures (unreadable root, engine setup, systemic store errors,
/// strict-mode walk errors). Per-file failures are in the report.
pub fn ingest_dir(
    root: &Path,
    settings: &Settings,
    capabilities: &Capabilities,
    control: IngestControl,
) -> Result<IngestReport> {
    let started = Instant::now();
    let root = check_root_and_canonicalize(root)?;
    let store_path = settings.resolved_store_path()?;
    let mut conn = open_store(&store_path, settings.encrypt)
        .with_context(|| format!("open index {}", store_path.display()))?;
    let stored = Arc::new(load_index(&conn).context("load stored records")?);
    debug!(
        "{} stored records; ingesting {}",
        stored.len(),
        root.display()
    );

    let IngestControl {
        cancel,
        on_admitted,
        on_committed,
    } = control;
    let cancel = cancel.unwrap_or_else(|| Arc::new(AtomicBool::new(false)));

    let PipelineHandles {
        writer_rx,
        walk_handle,
        worker_handles,
    } = run_pipeline(PipelineParams {
        root: &root,
        settings,
        capabilities,
        stored: Arc::clone(&stored),
        store_path: Some(&store_path),
        cancel: Arc::clone(&cancel),
        on_admitted,
    })?;

    // The writer drops the receiver on error, which unblocks walk and workers.
    let drained = drain_into_store(&mut conn, writer_rx, DrainParams { on_committed });
    if drained.is_err() {
        cancel.store(true, Ordering::Relaxed);
    }
    let joined = shutdown_pipeline_handles(walk_handle, worker_handles);
    let written = drained?;
    let walk = joined?;
    check_for_initial_error_or_skipped_paths(&walk, settings.strict)?;

    let cancelled = walk.cancelled || cancel.load(Ordering::Relaxed);
    let pruned = match settings.missing_files {
        MissingFilePolicy::Prune if walk.walk_errors == 0 && !cancelled => {
            prune_missing(&mut conn, &stored, &root, &walk.seen)?
        }
        MissingFilePolicy::Prune => {
            warn!("walk incomplete; skipping prune of missing files");
            0
        }
        MissingFilePolicy::Keep => 0,
    };

    if let Err(err) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
        debug!("WAL checkpoint skipped: {}", err);
    }

    let mut failures = walk.failures;
    failures.extend(written.failures);
    failures.sort_by(|a, b| a.path.cmp(&b.path));

    let summary = RunSummary {
        scanned: walk.scanned,
        skipped: walk.skipped,
        processed: written.processed,
        failed: failures.len(),
        discarded: written.discarded,
        pruned,
        cancelled,
        elapsed: started.elapsed(),
    };
    debug!("{:?}", summary);
    Ok(IngestReport {
        root,
        summary,
        failures,
    })
}
