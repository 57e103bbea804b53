//! Enumeration and the walk loop: walk → fingerprint → classify → admit.

use crossbeam_channel::Sender;
use log::{debug, trace};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crate::engine::change::classify;
use crate::engine::db_ops::WriterMsg;
use crate::error::FailureReason;
use crate::types::{
    Candidate, Change, FileFailure, Fingerprint, FingerprintStrategy, WorkItem, WorkOutcome,
};

use super::context::{PipelineContext, WalkFilter, WalkTally};
use super::metadata::candidate_from_path;

/// One result from a directory walk: either an image file or an error with optional path.
pub enum WalkOutcome {
    Ok(PathBuf),
    Err { msg: String, path: Option<PathBuf> },
}

/// Convert a walkdir result into [`WalkOutcome`].
pub fn to_outcome_walkdir(r: Result<walkdir::DirEntry, walkdir::Error>) -> WalkOutcome {
    match r {
        Ok(entry) => WalkOutcome::Ok(entry.into_path()),
        Err(err) => WalkOutcome::Err {
            msg: format!("{}", err),
            path: err.path().map(PathBuf::from),
        },
    }
}

/// Image files under `filter.root` in lexicographic order per directory. Excluded directories
/// are pruned, not descended into.
pub fn walk_images(filter: WalkFilter) -> impl Iterator<Item = WalkOutcome> {
    let keep = filter.clone();
    walkdir::WalkDir::new(&filter.root)
        .follow_links(filter.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| e.depth() == 0 || keep.keeps_entry(e.path()))
        .filter(move |r| match r {
            Ok(entry) => entry.file_type().is_file() && filter.is_image(entry.path()),
            Err(_) => true,
        })
        .map(to_outcome_walkdir)
}

/// Enumerate candidates under `filter.root` with their fingerprints. Walk and stat errors are
/// yielded as failures; enumeration continues past them.
pub fn enumerate(
    filter: WalkFilter,
    strategy: FingerprintStrategy,
) -> impl Iterator<Item = Result<Candidate, FileFailure>> {
    let root = filter.root.clone();
    walk_images(filter).map(move |outcome| match outcome {
        WalkOutcome::Ok(path) => {
            candidate_from_path(&path, strategy).map_err(|reason| FileFailure { path, reason })
        }
        WalkOutcome::Err { msg, path } => Err(FileFailure {
            path: path.unwrap_or_else(|| root.clone()),
            reason: FailureReason::FileAccess(msg),
        }),
    })
}

pub fn spawn_walk_thread(
    work_tx: Sender<WorkItem>,
    writer_tx: Sender<WriterMsg>,
    ctx: PipelineContext,
) -> JoinHandle<WalkTally> {
    thread::spawn(move || {
        let iter = walk_images(ctx.filter.clone());
        run_walk_loop(work_tx, writer_tx, ctx, iter)
    })
}

/// Failed outcome for a file that never reached a worker.
fn failed_before_work(path: PathBuf, reason: FailureReason) -> WriterMsg {
    WriterMsg::Completed(WorkOutcome::Failed {
        candidate: Candidate {
            path,
            fingerprint: Fingerprint::unknown(),
        },
        reason,
    })
}

/// Run the walk loop: fingerprint and classify every image, skip unchanged ones, admit the rest.
///
/// For a new path, `Admitted` goes to the writer before the work item is dispatched, so its
/// pending row always lands before its outcome. Stops on cancel, on the first error in strict
/// mode, or when a downstream channel closes. Drops both senders on return.
pub fn run_walk_loop<I>(
    work_tx: Sender<WorkItem>,
    writer_tx: Sender<WriterMsg>,
    ctx: PipelineContext,
    iter: I,
) -> WalkTally
where
    I: Iterator<Item = WalkOutcome>,
{
    let mut tally = WalkTally::default();
    for outcome in iter {
        if ctx.cancelled() {
            tally.cancelled = true;
            break;
        }
        match outcome {
            WalkOutcome::Ok(path) => {
                tally.scanned += 1;
                tally.seen.insert(path.clone());
                let candidate = match candidate_from_path(&path, ctx.strategy) {
                    Ok(c) => c,
                    Err(reason) => {
                        if writer_tx.send(failed_before_work(path, reason)).is_err() {
                            break;
                        }
                        continue;
                    }
                };
                let change = classify(&candidate, &ctx.stored, &ctx.policy);
                trace!("{:?}: {}", change, candidate.path.display());
                if change == Change::Unchanged {
                    tally.skipped += 1;
                    continue;
                }
                if change == Change::New
                    && writer_tx
                        .send(WriterMsg::Admitted(candidate.clone()))
                        .is_err()
                {
                    break;
                }
                if work_tx.send(WorkItem { candidate }).is_err() {
                    break;
                }
                tally.admitted += 1;
                if let Some(ref cb) = ctx.on_admitted {
                    cb(1);
                }
            }
            WalkOutcome::Err { msg, path } => {
                tally.walk_errors += 1;
                if ctx.strict {
                    let at = path.map(|p| format!(" ({})", p.display()));
                    tally.first_error = Some(format!("{}{}", msg, at.unwrap_or_default()));
                    break;
                }
                tally.scanned += 1;
                let reason = FailureReason::FileAccess(msg);
                match path {
                    // An image that could not be reached still gets a failed record.
                    Some(p) if ctx.filter.is_image(&p) => {
                        tally.seen.insert(p.clone());
                        if writer_tx.send(failed_before_work(p, reason)).is_err() {
                            break;
                        }
                    }
                    other => tally.failures.push(FileFailure {
                        path: other.unwrap_or_else(|| ctx.filter.root.clone()),
                        reason,
                    }),
                }
            }
        }
    }
    debug!(
        "walk done: {} scanned, {} skipped, {} admitted, {} walk errors",
        tally.scanned, tally.skipped, tally.admitted, tally.walk_errors
    );
    drop(work_tx);
    drop(writer_tx);
    tally
}

