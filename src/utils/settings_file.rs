//! Layered settings: TOML files plus CLI, merged with a pure function.
//!
//! Precedence (last wins): built-in defaults < user `config.toml` < `.pocr.toml` in the scanned
//! root < command line. Every layer is a [`SettingsOverlay`]; only fields present in a layer
//! override the ones below it.

use anyhow::{Context, Result};
use directories::UserDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::Settings;
use crate::engine::tools::path_to_db_string;
use crate::types::{FingerprintStrategy, MissingFilePolicy};
use crate::utils::config::PackagePaths;

/// One settings layer. Keys match the TOML file; unknown keys make the whole file invalid.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SettingsOverlay {
    /// Single root (kept for files written by older setups).
    pub screenshots_dir: Option<PathBuf>,
    pub roots: Option<Vec<PathBuf>>,
    pub db_path: Option<PathBuf>,
    pub extensions: Option<Vec<String>>,
    pub max_workers: Option<usize>,
    pub fingerprint: Option<FingerprintStrategy>,
    /// Seconds.
    pub mtime_window: Option<i64>,
    pub missing_files: Option<MissingFilePolicy>,
    pub retry_failed: Option<bool>,
    pub follow_links: Option<bool>,
    pub strict: Option<bool>,
    pub exclude: Option<Vec<String>>,
    pub tesseract_path: Option<PathBuf>,
    pub tesseract_lang: Option<String>,
    pub fuzzy_threshold: Option<f64>,
    pub encrypt: Option<bool>,
}

/// Parse a settings file. Returns None if the file is missing; logs and returns None if invalid.
pub fn load_settings_file(path: &Path) -> Option<SettingsOverlay> {
    let s = std::fs::read_to_string(path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// User settings from the platform config dir, if present.
pub fn load_user_settings() -> Option<SettingsOverlay> {
    PackagePaths::get()
        .user_config_file()
        .and_then(|p| load_settings_file(&p))
}

/// Settings from `.pocr.toml` in `root`, if present.
pub fn load_root_settings(root: &Path) -> Option<SettingsOverlay> {
    load_settings_file(&root.join(PackagePaths::get().local_config_filename()))
}

/// Starter `config.toml` text. Only `screenshots_dir` is active; the rest are commented defaults.
fn default_config_text(screenshots_dir: Option<&Path>) -> String {
    let mut out = String::from(
        "# pocr settings. Command-line flags override these, and a `.pocr.toml` in a scanned\n\
         # folder overrides them for that folder.\n\n",
    );
    match screenshots_dir {
        Some(dir) => {
            let value = toml::Value::String(path_to_db_string(dir));
            out.push_str(&format!("screenshots_dir = {}\n", value));
        }
        None => out.push_str("# screenshots_dir = \"/path/to/Screenshots\"\n"),
    }
    out.push_str(
        "# max_workers = 4\n\
         # fingerprint = \"cheap\"    # or \"exact\"\n\
         # missing_files = \"keep\"   # or \"prune\"\n\
         # retry_failed = false\n\
         # exclude = [\"drafts\"]\n\
         # tesseract_path = \"tesseract\"\n\
         # tesseract_lang = \"eng\"\n\
         # fuzzy_threshold = 0.5\n",
    );
    out
}

/// Write a starter config at `path` unless a file is already there. Returns true if written.
pub fn write_default_config(path: &Path, screenshots_dir: Option<&Path>) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config directory {}", parent.display()))?;
    }
    fs::write(path, default_config_text(screenshots_dir))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(true)
}

/// First run: create the user config with `screenshots_dir` set to `<Pictures>/Screenshots`.
/// Returns the path when a file was written.
pub fn ensure_user_config() -> Result<Option<PathBuf>> {
    let Some(path) = PackagePaths::get().user_config_file() else {
        return Ok(None);
    };
    let screenshots = UserDirs::new().and_then(|u| u.picture_dir().map(|p| p.join("Screenshots")));
    Ok(write_default_config(&path, screenshots.as_deref())?.then_some(path))
}

/// Overwrite a settings field from the overlay when present.
macro_rules! apply_overlay {
    ($overlay:expr, $settings:expr, $o_field:ident => $s_field:ident) => {
        if let Some(ref v) = $overlay.$o_field {
            $settings.$s_field = v.clone();
        }
    };
}

/// Apply `overlay` on top of `base`. Pure: no I/O, no globals.
pub fn merge(mut base: Settings, overlay: &SettingsOverlay) -> Settings {
    if let Some(ref dir) = overlay.screenshots_dir {
        base.roots = vec![dir.clone()];
    }
    apply_overlay!(overlay, base, roots => roots);
    if let Some(ref p) = overlay.db_path {
        base.store_path = Some(p.clone());
    }
    if let Some(ref exts) = overlay.extensions {
        base.extensions = exts
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
    }
    if let Some(n) = overlay.max_workers {
        base.pool_size = Some(n.max(1));
    }
    apply_overlay!(overlay, base, fingerprint => fingerprint);
    if let Some(secs) = overlay.mtime_window {
        base.mtime_window_ns = secs.max(0).saturating_mul(1_000_000_000);
    }
    apply_overlay!(overlay, base, missing_files => missing_files);
    apply_overlay!(overlay, base, retry_failed => retry_failed);
    apply_overlay!(overlay, base, follow_links => follow_links);
    apply_overlay!(overlay, base, strict => strict);
    apply_overlay!(overlay, base, exclude => exclude);
    apply_overlay!(overlay, base, tesseract_path => tesseract_path);
    if let Some(ref lang) = overlay.tesseract_lang {
        base.tesseract_lang = Some(lang.clone());
    }
    if let Some(t) = overlay.fuzzy_threshold {
        base.fuzzy_threshold = t.clamp(0.0, 1.0);
    }
    apply_overlay!(overlay, base, encrypt => encrypt);
    base
}

/// Fold layers (lowest precedence first) over the built-in defaults.
pub fn resolve(layers: &[SettingsOverlay]) -> Settings {
    layers.iter().fold(Settings::default(), merge)
}
