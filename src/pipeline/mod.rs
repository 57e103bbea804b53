//! Pipeline components: context, walk loop, OCR workers, error handling.

pub mod context;
pub mod error_handler;
pub mod metadata;
pub mod orchestrator;
pub mod walk;
pub mod workers;

pub use context::{
    PipelineChannels, PipelineContext, PipelineHandles, WalkFilter, WalkTally,
    create_pipeline_channels,
};
pub use error_handler::check_for_initial_error_or_skipped_paths;
pub use metadata::candidate_from_path;
pub use orchestrator::{PipelineParams, run_pipeline, shutdown_pipeline_handles};
pub use walk::{WalkOutcome, enumerate, run_walk_loop, spawn_walk_thread, walk_images};
pub use workers::spawn_ocr_workers;
