//! Fingerprint a single enumerated file.

use std::path::Path;

use crate::engine::hashing::hash_file;
use crate::engine::tools::system_time_to_ns;
use crate::error::FailureReason;
use crate::types::{Candidate, Fingerprint, FingerprintStrategy};

/// Stat (and for [`FingerprintStrategy::Exact`], hash) one file. Any I/O error is a per-file
/// `FileAccess` failure.
pub fn candidate_from_path(
    abs_path: &Path,
    strategy: FingerprintStrategy,
) -> Result<Candidate, FailureReason> {
    let meta = std::fs::metadata(abs_path)
        .map_err(|e| FailureReason::FileAccess(format!("stat: {e}")))?;
    let size = meta.len();
    let mtime_ns = meta.modified().map(system_time_to_ns).unwrap_or(0);
    let hash = match strategy {
        FingerprintStrategy::Cheap => None,
        FingerprintStrategy::Exact => Some(
            hash_file(abs_path, size)
                .map_err(|e| FailureReason::FileAccess(format!("hash: {e}")))?,
        ),
    };
    Ok(Candidate {
        path: abs_path.to_path_buf(),
        fingerprint: Fingerprint {
            size,
            mtime_ns,
            hash,
        },
    })
}
