use anyhow::Result;
use log::debug;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::JoinHandle;

use crate::engine::capability::{Capabilities, OcrEngine};
use crate::engine::change::ChangePolicy;
use crate::error::IngestError;
use crate::pipeline;
use crate::pipeline::context::{PipelineContext, WalkFilter, WalkTally};
use crate::types::{Settings, StoredIndex};

/// Inputs for [`run_pipeline`].
pub struct PipelineParams<'a> {
    /// Canonical root.
    pub root: &'a Path,
    pub settings: &'a Settings,
    pub capabilities: &'a Capabilities,
    pub stored: Arc<StoredIndex>,
    /// Store file, excluded from the walk.
    pub store_path: Option<&'a Path>,
    pub cancel: Arc<AtomicBool>,
    pub on_admitted: Option<Box<dyn Fn(usize) + Send>>,
}

/// Build one engine per worker before anything is dispatched.
fn create_engines(capabilities: &Capabilities, count: usize) -> Result<Vec<Box<dyn OcrEngine>>> {
    (0..count)
        .map(|_| {
            (capabilities.engines)()
                .map_err(|e| anyhow::Error::from(IngestError::Engine(format!("{e:#}"))))
        })
        .collect()
}

/// Start the walk thread and the worker pool. Caller drains `writer_rx` until it closes, then
/// calls [`shutdown_pipeline_handles`].
pub fn run_pipeline(params: PipelineParams<'_>) -> Result<pipeline::PipelineHandles> {
    let PipelineParams {
        root,
        settings,
        capabilities,
        stored,
        store_path,
        cancel,
        on_admitted,
    } = params;

    let workers = settings.worker_count();
    let engines = create_engines(capabilities, workers)?;
    debug!(
        "starting {} workers ({} engine)",
        workers,
        engines.first().map(|e| e.name()).unwrap_or("no")
    );

    let channels = pipeline::create_pipeline_channels(workers);
    let ctx = PipelineContext {
        filter: WalkFilter::new(root, settings, store_path),
        stored,
        policy: ChangePolicy::from(settings),
        strategy: settings.fingerprint,
        strict: settings.strict,
        cancel: Arc::clone(&cancel),
        on_admitted,
    };

    let worker_handles = pipeline::spawn_ocr_workers(
        engines,
        &channels.work_rx,
        &channels.writer_tx,
        &capabilities.decoder,
        &capabilities.engines,
        &cancel,
    );
    drop(channels.work_rx);

    let walk_handle = pipeline::spawn_walk_thread(channels.work_tx, channels.writer_tx, ctx);

    Ok(pipeline::PipelineHandles {
        writer_rx: channels.writer_rx,
        walk_handle,
        worker_handles,
    })
}

/// Join walk and worker threads (after the writer channel is drained). Returns the walk tally.
pub fn shutdown_pipeline_handles(
    walk_handle: JoinHandle<WalkTally>,
    worker_handles: Vec<JoinHandle<()>>,
) -> Result<WalkTally> {
    let tally = walk_handle
        .join()
        .map_err(|_| anyhow::anyhow!("walk thread panicked"))?;
    for h in worker_handles {
        h.join()
            .map_err(|_| anyhow::anyhow!("OCR worker thread panicked"))?;
    }
    Ok(tally)
}
