use anyhow::Result;
use log::warn;

use crate::error::IngestError;
use crate::pipeline::context::WalkTally;

/// Check the walk result: in strict mode the recorded first error aborts the run; otherwise walk
/// errors are logged and left in the failure list. Call after joining walk and workers.
pub fn check_for_initial_error_or_skipped_paths(walk: &WalkTally, strict: bool) -> Result<()> {
    if strict && let Some(ref msg) = walk.first_error {
        return Err(IngestError::Strict(msg.clone()).into());
    }
    if walk.walk_errors > 0 {
        warn!(
            "{} paths could not be read during the walk; recorded as file-access failures",
            walk.walk_errors
        );
    }
    Ok(())
}
