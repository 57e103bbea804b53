//! OCR worker pool: each worker owns one engine, reads work items and reports one outcome per item.

use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::engine::capability::{
    EngineFactory, ImageDecoder, OcrEngine, Recognition, format_hint,
};
use crate::engine::db_ops::WriterMsg;
use crate::error::FailureReason;
use crate::types::{Candidate, WorkItem, WorkOutcome};

/// Everything one worker needs besides its channels.
struct Worker {
    id: usize,
    engine: Option<Box<dyn OcrEngine>>,
    decoder: Arc<dyn ImageDecoder>,
    factory: Arc<EngineFactory>,
    cancel: Arc<AtomicBool>,
}

/// Read, decode and recognize one file.
fn recognize_file(
    candidate: &Candidate,
    decoder: &dyn ImageDecoder,
    engine: &mut dyn OcrEngine,
) -> Result<Recognition, FailureReason> {
    let bytes = std::fs::read(&candidate.path)
        .map_err(|e| FailureReason::FileAccess(format!("read: {e}")))?;
    let image = decoder.decode(&bytes, format_hint(&candidate.path))?;
    engine.recognize(&image).map_err(FailureReason::Ocr)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

impl Worker {
    /// Process one item. A panic inside decode/OCR becomes `WorkerFault` and the engine is rebuilt.
    fn process(&mut self, candidate: Candidate) -> WorkOutcome {
        let Some(engine) = self.engine.as_mut() else {
            return WorkOutcome::Failed {
                candidate,
                reason: FailureReason::WorkerFault("no OCR engine available".to_string()),
            };
        };
        let decoder = self.decoder.as_ref();
        let result = catch_unwind(AssertUnwindSafe(|| {
            recognize_file(&candidate, decoder, engine.as_mut())
        }));
        match result {
            Ok(Ok(rec)) => WorkOutcome::Processed {
                candidate,
                text: rec.text.trim().to_string(),
                confidence: rec.confidence,
            },
            Ok(Err(reason)) => WorkOutcome::Failed { candidate, reason },
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                warn!(
                    "worker {} panicked on {}: {}",
                    self.id,
                    candidate.path.display(),
                    msg
                );
                self.rebuild_engine();
                WorkOutcome::Failed {
                    candidate,
                    reason: FailureReason::WorkerFault(msg),
                }
            }
        }
    }

    /// Drop the possibly-poisoned engine and build a fresh one. Without one, later items fail as
    /// `WorkerFault` so every admitted item still gets an outcome.
    fn rebuild_engine(&mut self) {
        self.engine = None;
        match (self.factory)() {
            Ok(engine) => self.engine = Some(engine),
            Err(err) => warn!("worker {}: could not rebuild OCR engine: {:#}", self.id, err),
        }
    }

    fn run(mut self, work_rx: Receiver<WorkItem>, writer_tx: Sender<WriterMsg>) {
        while let Ok(item) = work_rx.recv() {
            let msg = if self.cancel.load(Ordering::Relaxed) {
                WriterMsg::Discarded(item.candidate.path)
            } else {
                WriterMsg::Completed(self.process(item.candidate))
            };
            if writer_tx.send(msg).is_err() {
                break;
            }
        }
        debug!("worker {} exiting", self.id);
    }
}

/// Spawn one worker per engine. Caller must drop its own `writer_tx` afterwards so the writer
/// sees the channel close once walk and workers are done.
pub fn spawn_ocr_workers(
    engines: Vec<Box<dyn OcrEngine>>,
    work_rx: &Receiver<WorkItem>,
    writer_tx: &Sender<WriterMsg>,
    decoder: &Arc<dyn ImageDecoder>,
    factory: &Arc<EngineFactory>,
    cancel: &Arc<AtomicBool>,
) -> Vec<JoinHandle<()>> {
    engines
        .into_iter()
        .enumerate()
        .map(|(id, engine)| {
            let worker = Worker {
                id,
                engine: Some(engine),
                decoder: Arc::clone(decoder),
                factory: Arc::clone(factory),
                cancel: Arc::clone(cancel),
            };
            let work_rx = work_rx.clone();
            let writer_tx = writer_tx.clone();
            thread::spawn(move || worker.run(work_rx, writer_tx))
        })
        .collect()
}
