//! Pipeline context: shared data handed to the walk thread and the channels between stages.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crate::engine::change::ChangePolicy;
use crate::engine::db_ops::WriterMsg;
use crate::engine::tools::{has_allowed_extension, should_include_in_walk, store_files_for};
use crate::types::{FileFailure, FingerprintStrategy, Settings, StoredIndex, WorkItem};
use crate::utils::config::{WORK_QUEUE_PER_WORKER, WRITER_CHANNEL_CAP};

/// Which entries the walk descends into and which files it yields.
#[derive(Clone, Debug)]
pub struct WalkFilter {
    pub root: PathBuf,
    /// The index file and its WAL/SHM siblings; never treated as input.
    pub store_files: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
    pub follow_links: bool,
}

impl WalkFilter {
    pub fn new(root: &Path, settings: &Settings, store_path: Option<&Path>) -> Self {
        WalkFilter {
            root: root.to_path_buf(),
            store_files: store_path.map(store_files_for).unwrap_or_default(),
            extensions: settings
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            exclude: settings.exclude.clone(),
            follow_links: settings.follow_links,
        }
    }

    /// False for entries pruned from the walk (excluded dirs are not descended into).
    pub fn keeps_entry(&self, path: &Path) -> bool {
        should_include_in_walk(path, &self.root, &self.store_files, &self.exclude)
    }

    /// True for files with an allowed image extension.
    pub fn is_image(&self, path: &Path) -> bool {
        has_allowed_extension(path, &self.extensions)
    }
}

/// Shared context for the walk thread: filters, prior records, change policy and cancel flag.
pub struct PipelineContext {
    pub filter: WalkFilter,
    pub stored: Arc<StoredIndex>,
    pub policy: ChangePolicy,
    pub strategy: FingerprintStrategy,
    pub strict: bool,
    pub cancel: Arc<AtomicBool>,
    pub on_admitted: Option<Box<dyn Fn(usize) + Send>>,
}

impl PipelineContext {
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// What the walk thread saw. Outcomes of admitted items are counted by the writer instead.
#[derive(Debug, Default)]
pub struct WalkTally {
    pub scanned: usize,
    pub skipped: usize,
    pub admitted: usize,
    /// Every image path enumerated, including ones that failed.
    pub seen: HashSet<PathBuf>,
    /// Walk errors that are not tied to an image file (unreadable directories and the like).
    pub failures: Vec<FileFailure>,
    /// All walk errors, including those recorded in the store as failed files.
    pub walk_errors: usize,
    /// First walk error in strict mode; the walk stopped there.
    pub first_error: Option<String>,
    pub cancelled: bool,
}

/// Channels between stages. Walk gets work_tx + writer_tx; workers get work_rx + writer_tx;
/// the coordinator drains writer_rx.
pub struct PipelineChannels {
    pub work_tx: Sender<WorkItem>,
    pub work_rx: Receiver<WorkItem>,
    pub writer_tx: Sender<WriterMsg>,
    pub writer_rx: Receiver<WriterMsg>,
}

pub fn create_pipeline_channels(workers: usize) -> PipelineChannels {
    let (work_tx, work_rx) = bounded::<WorkItem>(workers.max(1) * WORK_QUEUE_PER_WORKER);
    let (writer_tx, writer_rx) = bounded::<WriterMsg>(WRITER_CHANNEL_CAP);
    PipelineChannels {
        work_tx,
        work_rx,
        writer_tx,
        writer_rx,
    }
}

/// Handles returned by [`run_pipeline`](super::run_pipeline). The caller drains `writer_rx`
/// until it closes, then joins the threads.
pub struct PipelineHandles {
    pub writer_rx: Receiver<WriterMsg>,
    pub walk_handle: JoinHandle<WalkTally>,
    pub worker_handles: Vec<JoinHandle<()>>,
}
