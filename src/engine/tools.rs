//! Path and filter utilities

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::IngestError;

/// Convert absolute path to relative path from base
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Path as stored in the DB: forward slashes on every platform.
pub fn path_to_db_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Check if a file should be excluded based on OS-specific hidden files
pub fn is_os_hidden_file(path: &Path) -> bool {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        match name {
            // macOS
            ".DS_Store" | ".AppleDouble" | ".LSOverride" => true,
            // Windows
            "Thumbs.db" | "ehthumbs.db" | "Desktop.ini" | "$RECYCLE.BIN" => true,
            // Linux
            ".directory" => true,
            // macOS resource forks, Linux trash dirs
            _ => name.starts_with("._") || name.starts_with(".Trash-"),
        }
    } else {
        false
    }
}

/// True if `path` has one of `extensions` (lowercase, no dot), compared case-insensitively.
pub fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            extensions.iter().any(|allowed| *allowed == ext)
        })
}

/// True if the file name or the full path matches any exclude pattern.
pub fn is_excluded(path: &Path, exclude_patterns: &[String]) -> bool {
    if exclude_patterns.is_empty() {
        return false;
    }
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let path_str = path_to_db_string(path);
    exclude_patterns
        .iter()
        .any(|pattern| glob_match(pattern, name) || glob_match(pattern, &path_str))
}

/// Returns true if the path should be included in the walk (not the root, not the index or its
/// WAL/SHM siblings, not OS clutter, not excluded).
pub fn should_include_in_walk(
    path: &Path,
    root: &Path,
    store_files: &[PathBuf],
    exclude_patterns: &[String],
) -> bool {
    if path == root {
        return false;
    }
    if store_files.iter().any(|f| f.as_path() == path) {
        return false;
    }
    if is_os_hidden_file(path) {
        return false;
    }
    !is_excluded(path, exclude_patterns)
}

/// Simple glob pattern matching (supports * and ?)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    // Remove leading '!' if present (negation handled by caller)
    let pattern = pattern.strip_prefix('!').unwrap_or(pattern);
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    // Iterative matcher with single-star backtracking.
    let (mut pi, mut ti) = (0_usize, 0_usize);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Check if mtime has changed beyond tolerance window
pub fn mtime_changed(new_mtime: i64, old_mtime: i64, tolerance_ns: i64) -> bool {
    new_mtime.abs_diff(old_mtime) > tolerance_ns.max(0) as u64
}

/// Nanoseconds since epoch, 0 for pre-epoch or unavailable times.
pub fn system_time_to_ns(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Current time in unix seconds.
pub fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Canonicalize the root and require a readable directory. Errors here abort the run before any work.
pub fn check_root_and_canonicalize(path: &Path) -> Result<PathBuf, IngestError> {
    let canonical = path.canonicalize().map_err(|source| IngestError::Enumeration {
        path: path.to_path_buf(),
        source,
    })?;
    if !canonical.is_dir() {
        return Err(IngestError::NotADirectory(canonical));
    }
    std::fs::read_dir(&canonical).map_err(|source| IngestError::Enumeration {
        path: canonical.clone(),
        source,
    })?;
    Ok(canonical)
}

/// The index file and its SQLite WAL/SHM siblings, canonicalized when they exist.
pub fn store_files_for(store_path: &Path) -> Vec<PathBuf> {
    let base = store_path
        .canonicalize()
        .unwrap_or_else(|_| store_path.to_path_buf());
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = base.parent().unwrap_or(Path::new(".")).to_path_buf();
    vec![
        base.clone(),
        parent.join(format!("{name}-wal")),
        parent.join(format!("{name}-shm")),
    ]
}
