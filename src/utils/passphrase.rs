//! SQLCipher key for an encrypted index. Looked up in `POCR_DB_KEY`, then in a `.env` file next
//! to the index, then asked for on the terminal.

use anyhow::{Context, Result};
use colored::Colorize;
use log::{debug, warn};
use std::path::Path;

pub const KEY_VAR: &str = "POCR_DB_KEY";

/// Where a stored key was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySource {
    Environment,
    DotEnv,
}

fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// `POCR_DB_KEY` from `<dir>/.env`. The file is parsed, not loaded: the process environment is
/// left untouched.
pub fn key_from_dotenv(dir: &Path) -> Option<String> {
    let entries = dotenvy::from_path_iter(dir.join(".env")).ok()?;
    entries
        .filter_map(|entry| entry.ok())
        .find(|(name, _)| name == KEY_VAR)
        .and_then(|(_, value)| non_blank(&value))
}

/// A key that needs no prompt, with where it came from.
pub fn stored_key(dir: &Path) -> Option<(String, KeySource)> {
    std::env::var(KEY_VAR)
        .ok()
        .and_then(|v| non_blank(&v))
        .map(|k| (k, KeySource::Environment))
        .or_else(|| key_from_dotenv(dir).map(|k| (k, KeySource::DotEnv)))
}

fn ask(prompt: &str) -> Result<String> {
    let label = format!("[{}]", env!("CARGO_PKG_NAME")).cyan().bold();
    rpassword::prompt_password(format!("{} {}", label, prompt)).context("read passphrase")
}

/// Prompt for the key. A new index asks twice and refuses a mismatch or an empty key.
fn prompt_key(is_new: bool) -> Result<String> {
    if !is_new {
        return non_blank(&ask("Index passphrase: ")?).context("empty passphrase");
    }
    let key = non_blank(&ask("New index passphrase: ")?)
        .context("an encrypted index needs a non-empty passphrase")?;
    if non_blank(&ask("Repeat passphrase: ")?).as_deref() != Some(key.as_str()) {
        anyhow::bail!("passphrases do not match");
    }
    warn!("Keep this passphrase: the OCR text in the index cannot be read without it");
    Ok(key)
}

/// Key for the index in `dir`. `is_new` is true when an encrypted index is about to be created.
pub fn get_passphrase(dir: &Path, is_new: bool) -> Result<String> {
    match stored_key(dir) {
        Some((key, source)) => {
            debug!("SQLCipher key from {:?}", source);
            Ok(key)
        }
        None => prompt_key(is_new),
    }
}
