//! Dry run: classify a root against the index without OCR or writes.

use anyhow::{Context, Result};
use log::debug;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::engine::change::{ChangePolicy, classify};
use crate::engine::db_ops::{load_index, open_reader};
use crate::engine::tools::check_root_and_canonicalize;
use crate::pipeline::{WalkFilter, enumerate};
use crate::types::{Change, Plan, Settings, StoredIndex};

/// Records of an existing store; an absent store is empty. Never creates the file.
fn load_existing(store_path: &Path) -> Result<StoredIndex> {
    if !store_path.is_file() {
        return Ok(StoredIndex::new());
    }
    let conn = open_reader(store_path)?;
    load_index(&conn).context("load stored records")
}

/// Classify every image under `root` as new, changed or unchanged, and list stored records under
/// `root` whose file is gone.
pub fn plan_dir(root: &Path, settings: &Settings) -> Result<Plan> {
    let root = check_root_and_canonicalize(root)?;
    let store_path = settings.resolved_store_path()?;
    let stored = load_existing(&store_path)?;
    let policy = ChangePolicy::from(settings);

    let mut plan = Plan::default();
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let filter = WalkFilter::new(&root, settings, Some(&store_path));
    for found in enumerate(filter, settings.fingerprint) {
        match found {
            Ok(candidate) => {
                seen.insert(candidate.path.clone());
                match classify(&candidate, &stored, &policy) {
                    Change::New => plan.new.push(candidate.path),
                    Change::Changed => plan.changed.push(candidate.path),
                    Change::Unchanged => plan.unchanged.push(candidate.path),
                }
            }
            Err(failure) => {
                seen.insert(failure.path.clone());
                plan.failures.push(failure);
            }
        }
    }
    plan.missing = stored
        .keys()
        .filter(|p| p.starts_with(&root) && !seen.contains(*p))
        .cloned()
        .collect();
    plan.missing.sort();

    debug!(
        "plan: {} new, {} changed, {} unchanged, {} missing",
        plan.new.len(),
        plan.changed.len(),
        plan.unchanged.len(),
        plan.missing.len()
    );
    Ok(plan)
}
