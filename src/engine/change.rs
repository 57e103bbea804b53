//! Change detection: classify a candidate against its stored record.

use crate::engine::hashing::hash_matches;
use crate::engine::tools::mtime_changed;
use crate::types::{
    Candidate, Change, FingerprintStrategy, RecordStatus, Settings, StoredIndex, StoredMeta,
};

/// The settings the change detector depends on.
#[derive(Clone, Copy, Debug)]
pub struct ChangePolicy {
    pub strategy: FingerprintStrategy,
    pub mtime_window_ns: i64,
    pub retry_failed: bool,
}

impl From<&Settings> for ChangePolicy {
    fn from(s: &Settings) -> Self {
        ChangePolicy {
            strategy: s.fingerprint,
            mtime_window_ns: s.mtime_window_ns,
            retry_failed: s.retry_failed,
        }
    }
}

/// New if unseen; Changed if the record is stale, still pending, or a failure to retry; else Unchanged.
pub fn decide(candidate: &Candidate, existing: Option<&StoredMeta>, policy: &ChangePolicy) -> Change {
    let Some(stored) = existing else {
        return Change::New;
    };
    match stored.status {
        // Left behind by an interrupted run.
        RecordStatus::Pending => return Change::Changed,
        RecordStatus::Failed if policy.retry_failed => return Change::Changed,
        _ => {}
    }
    let current = &candidate.fingerprint;
    let old = &stored.fingerprint;
    let same = match policy.strategy {
        FingerprintStrategy::Cheap => {
            current.size == old.size
                && !mtime_changed(current.mtime_ns, old.mtime_ns, policy.mtime_window_ns)
        }
        FingerprintStrategy::Exact => hash_matches(&current.hash, &old.hash),
    };
    if same {
        Change::Unchanged
    } else {
        Change::Changed
    }
}

/// [`decide`] with the lookup in `index`.
pub fn classify(candidate: &Candidate, index: &StoredIndex, policy: &ChangePolicy) -> Change {
    decide(candidate, index.get(&candidate.path), policy)
}
