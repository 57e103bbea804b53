//! Index writer: the only code that mutates the store. Runs on one thread, consumes
//! [`WriterMsg`]s in arrival order and commits them in small transactions.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, warn};
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::engine::tools::{now_unix_secs, path_to_db_string};
use crate::error::{FailureReason, IngestError};
use crate::types::{Candidate, FileFailure, StoredIndex, WorkOutcome};
use crate::utils::config::{DB_WRITE_BATCH_SIZE, MAX_CONSECUTIVE_STORE_ERRORS, WRITER_IDLE_FLUSH};

use super::{INSERT_PENDING_SQL, UPSERT_OUTCOME_SQL};

/// Messages to the writer. For one path, `Admitted` is always sent before its outcome.
#[derive(Clone, Debug)]
pub enum WriterMsg {
    /// New path admitted for OCR: insert a pending row.
    Admitted(Candidate),
    /// Worker finished (or enumeration failed) for a path.
    Completed(WorkOutcome),
    /// Admitted but dropped because the run was cancelled. No write.
    Discarded(PathBuf),
}

/// What the writer committed during a run.
#[derive(Clone, Debug, Default)]
pub struct WriteTally {
    pub processed: usize,
    pub failed: usize,
    pub discarded: usize,
    pub failures: Vec<FileFailure>,
}

/// Apply one message inside the caller's transaction. Each outcome is a single upsert
/// statement, so the row is either fully replaced or untouched.
pub fn apply_msg(conn: &Connection, msg: &WriterMsg, now: i64) -> rusqlite::Result<()> {
    match msg {
        WriterMsg::Admitted(c) => {
            conn.execute(
                INSERT_PENDING_SQL,
                (
                    path_to_db_string(&c.path),
                    c.fingerprint.size as i64,
                    c.fingerprint.mtime_ns,
                    c.fingerprint.hash.as_ref().map(|h| h.as_slice()),
                ),
            )?;
        }
        WriterMsg::Completed(WorkOutcome::Processed {
            candidate,
            text,
            confidence,
        }) => {
            conn.execute(
                UPSERT_OUTCOME_SQL,
                (
                    path_to_db_string(&candidate.path),
                    candidate.fingerprint.size as i64,
                    candidate.fingerprint.mtime_ns,
                    candidate.fingerprint.hash.as_ref().map(|h| h.as_slice()),
                    "processed",
                    Some(text.as_str()),
                    Some(*confidence as f64),
                    now,
                    None::<&str>,
                ),
            )?;
        }
        WriterMsg::Completed(WorkOutcome::Failed { candidate, reason }) => {
            conn.execute(
                UPSERT_OUTCOME_SQL,
                (
                    path_to_db_string(&candidate.path),
                    candidate.fingerprint.size as i64,
                    candidate.fingerprint.mtime_ns,
                    candidate.fingerprint.hash.as_ref().map(|h| h.as_slice()),
                    "failed",
                    None::<&str>,
                    None::<f64>,
                    now,
                    Some(reason.to_string()),
                ),
            )?;
        }
        WriterMsg::Discarded(_) => {}
    }
    Ok(())
}

/// Batches messages into transactions and keeps the tally.
pub struct IndexWriter<'c> {
    conn: &'c mut Connection,
    batch: Vec<WriterMsg>,
    oldest: Option<Instant>,
    consecutive_errors: usize,
    tally: WriteTally,
    on_committed: Option<Box<dyn Fn(usize) + Send>>,
}

impl<'c> IndexWriter<'c> {
    pub fn new(conn: &'c mut Connection, on_committed: Option<Box<dyn Fn(usize) + Send>>) -> Self {
        IndexWriter {
            conn,
            batch: Vec::with_capacity(DB_WRITE_BATCH_SIZE),
            oldest: None,
            consecutive_errors: 0,
            tally: WriteTally::default(),
            on_committed,
        }
    }

    /// Queue a message; commits when the batch is full.
    pub fn push(&mut self, msg: WriterMsg) -> Result<()> {
        self.oldest.get_or_insert_with(Instant::now);
        self.batch.push(msg);
        if self.batch.len() >= DB_WRITE_BATCH_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Commit everything queued. On a failed batch, rows are replayed one transaction each so a
    /// single bad row only fails its own file.
    pub fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        self.oldest = None;
        match self.commit(&batch) {
            Ok(()) => {
                self.consecutive_errors = 0;
                self.record_committed(&batch);
            }
            Err(err) => {
                debug!(
                    "batch of {} failed ({}); replaying row by row",
                    batch.len(),
                    err
                );
                for msg in &batch {
                    self.commit_single(msg)?;
                }
            }
        }
        Ok(())
    }

    /// Commit if the oldest queued message has waited at least `max_age`.
    pub fn flush_if_older_than(&mut self, max_age: Duration) -> Result<()> {
        if self.oldest.is_some_and(|t| t.elapsed() >= max_age) {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush and return the tally.
    pub fn finish(mut self) -> Result<WriteTally> {
        self.flush()?;
        Ok(self.tally)
    }

    fn commit(&mut self, batch: &[WriterMsg]) -> rusqlite::Result<()> {
        let now = now_unix_secs();
        let tx = self.conn.transaction()?;
        for msg in batch {
            apply_msg(&tx, msg, now)?;
        }
        tx.commit()
    }

    fn commit_single(&mut self, msg: &WriterMsg) -> Result<()> {
        match self.commit(std::slice::from_ref(msg)) {
            Ok(()) => {
                self.consecutive_errors = 0;
                self.record_committed(std::slice::from_ref(msg));
            }
            Err(err) => {
                self.consecutive_errors += 1;
                warn!("store write failed: {}", err);
                if let WriterMsg::Completed(outcome) = msg {
                    self.tally.failed += 1;
                    self.tally.failures.push(FileFailure {
                        path: outcome.candidate().path.clone(),
                        reason: FailureReason::Store(err.to_string()),
                    });
                }
                if self.consecutive_errors >= MAX_CONSECUTIVE_STORE_ERRORS {
                    return Err(IngestError::Store {
                        count: self.consecutive_errors,
                        last: err.to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn record_committed(&mut self, batch: &[WriterMsg]) {
        let mut outcomes = 0_usize;
        for msg in batch {
            match msg {
                WriterMsg::Admitted(_) => {}
                WriterMsg::Completed(WorkOutcome::Processed { .. }) => {
                    self.tally.processed += 1;
                    outcomes += 1;
                }
                WriterMsg::Completed(WorkOutcome::Failed { candidate, reason }) => {
                    self.tally.failed += 1;
                    self.tally.failures.push(FileFailure {
                        path: candidate.path.clone(),
                        reason: reason.clone(),
                    });
                    outcomes += 1;
                }
                WriterMsg::Discarded(_) => {
                    self.tally.discarded += 1;
                    outcomes += 1;
                }
            }
        }
        if outcomes > 0
            && let Some(ref cb) = self.on_committed
        {
            cb(outcomes);
        }
    }
}

/// Parameters for [`drain_into_store`].
#[derive(Default)]
pub struct DrainParams {
    pub on_committed: Option<Box<dyn Fn(usize) + Send>>,
}

/// Receive writer messages until every sender is gone, committing in batches. A partial batch
/// is committed once its oldest message is [`WRITER_IDLE_FLUSH`] old, so readers see progress
/// during slow OCR.
pub fn drain_into_store(
    conn: &mut Connection,
    rx: Receiver<WriterMsg>,
    params: DrainParams,
) -> Result<WriteTally> {
    let mut writer = IndexWriter::new(conn, params.on_committed);
    loop {
        match rx.recv_timeout(WRITER_IDLE_FLUSH) {
            Ok(msg) => {
                writer.push(msg)?;
                writer.flush_if_older_than(WRITER_IDLE_FLUSH)?;
            }
            Err(RecvTimeoutError::Timeout) => writer.flush()?,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    let tally = writer.finish()?;
    debug!(
        "writer done: {} processed, {} failed, {} discarded",
        tally.processed, tally.failed, tally.discarded
    );
    Ok(tally)
}

/// Delete records under `root` that were loaded at the start of the run but not enumerated.
/// Returns the number of rows deleted.
pub fn prune_missing(
    conn: &mut Connection,
    existing: &StoredIndex,
    root: &Path,
    seen: &HashSet<PathBuf>,
) -> Result<usize> {
    let tx = conn.transaction().context("begin prune")?;
    let mut pruned = 0_usize;
    {
        let mut stmt = tx
            .prepare("DELETE FROM images WHERE path = ?1")
            .context("prepare delete")?;
        for path in existing.keys() {
            if path.starts_with(root) && !seen.contains(path) {
                pruned += stmt
                    .execute([path_to_db_string(path)])
                    .context("delete missing record")?;
            }
        }
    }
    tx.commit().context("commit prune")?;
    Ok(pruned)
}
