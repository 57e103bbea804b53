//! Open and load index database.

use anyhow::{Context, Result};
use rusqlite::{Connection, Row};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::engine::hashing::hash_from_blob;
use crate::engine::tools::path_to_db_string;
use crate::types::{Fingerprint, ImageRecord, RecordStatus, StoredIndex, StoredMeta};
use crate::utils::get_passphrase;

use super::{SCHEMA, SELECT_RECORD_COLUMNS, WAL_PRAGMAS};

/// Enable WAL and apply schema to an open connection (idempotent).
fn apply_wal_and_schema(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(())
}

/// True if the connection can read the schema (false for an encrypted DB opened without key).
fn is_readable(conn: &Connection) -> bool {
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))
        .is_ok()
}

fn store_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

/// Open or create the index DB and ensure schema + WAL. Creates missing parent directories.
/// If `passphrase` is Some, set SQLCipher PRAGMA key before any other operations.
pub fn open_db(path: &Path, passphrase: Option<&str>) -> Result<Connection> {
    std::fs::create_dir_all(store_dir(path))
        .with_context(|| format!("create index directory for {}", path.display()))?;
    let conn = Connection::open(path).context("open database")?;

    if let Some(key) = passphrase {
        conn.pragma_update(None, "key", key)
            .context("set SQLCipher key")?;
    }

    apply_wal_and_schema(&conn)?;
    Ok(conn)
}

/// Open existing DB, detecting if it is encrypted: try without key first; if read fails, load
/// passphrase (env → .env next to the index → prompt) and open with key. Returns (connection, passphrase_used).
pub fn open_db_or_detect_encrypted(path: &Path) -> Result<(Connection, Option<String>)> {
    std::fs::create_dir_all(store_dir(path))
        .with_context(|| format!("create index directory for {}", path.display()))?;
    let conn = Connection::open(path).context("open database")?;
    if is_readable(&conn) {
        apply_wal_and_schema(&conn)?;
        return Ok((conn, None));
    }
    drop(conn);
    let pass = get_passphrase(store_dir(path), false)?;
    let conn = open_db(path, Some(pass.as_str()))?;
    Ok((conn, Some(pass)))
}

/// Open an existing index for queries only. Never creates the file; detects encryption.
pub fn open_reader(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        anyhow::bail!("no index at {}; run ingest first", path.display());
    }
    let mut conn = Connection::open(path).context("open database for reading")?;
    if !is_readable(&conn) {
        drop(conn);
        let pass = get_passphrase(store_dir(path), false)?;
        conn = Connection::open(path).context("open database for reading")?;
        conn.pragma_update(None, "key", pass.as_str())
            .context("set SQLCipher key")?;
    }
    conn.execute_batch("PRAGMA query_only = ON; PRAGMA busy_timeout = 5000;")
        .context("set reader pragmas")?;
    Ok(conn)
}

/// Open an in-memory DB with the same schema (tests, dry runs without an index).
pub fn open_db_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory database")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(conn)
}

fn status_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<RecordStatus> {
    let s: String = row.get(idx)?;
    RecordStatus::parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown status {s:?}").into(),
        )
    })
}

fn fingerprint_from_row(row: &Row<'_>) -> rusqlite::Result<Fingerprint> {
    let size: i64 = row.get(1)?;
    Ok(Fingerprint {
        size: size.max(0) as u64,
        mtime_ns: row.get(2)?,
        hash: hash_from_blob(row.get(3)?),
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    let path: String = row.get(0)?;
    let confidence: Option<f64> = row.get(6)?;
    Ok(ImageRecord {
        path: PathBuf::from(path),
        fingerprint: fingerprint_from_row(row)?,
        status: status_from_row(row, 4)?,
        extracted_text: row.get(5)?,
        confidence: confidence.map(|c| c as f32),
        last_processed_at: row.get(7)?,
        failure_reason: row.get(8)?,
    })
}

/// Load fingerprints and statuses of all records: path -> [`StoredMeta`].
pub fn load_index(conn: &Connection) -> Result<StoredIndex> {
    let mut stmt = conn.prepare("SELECT path, size, mtime_ns, hash, status FROM images")?;
    let rows = stmt.query_map([], |row| {
        let path: String = row.get(0)?;
        Ok((
            PathBuf::from(path),
            StoredMeta {
                fingerprint: fingerprint_from_row(row)?,
                status: status_from_row(row, 4)?,
            },
        ))
    })?;
    let mut map = StoredIndex::new();
    for row in rows {
        let (path, meta) = row?;
        map.insert(path, meta);
    }
    Ok(map)
}

/// Fetch one record by path.
pub fn get_record(conn: &Connection, path: &Path) -> Result<Option<ImageRecord>> {
    let sql = format!("SELECT {SELECT_RECORD_COLUMNS} FROM images WHERE path = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map([path_to_db_string(path)], record_from_row)?;
    rows.next().transpose().context("read record")
}

/// All records ordered by path.
pub fn list_records(conn: &Connection) -> Result<Vec<ImageRecord>> {
    let sql = format!("SELECT {SELECT_RECORD_COLUMNS} FROM images ORDER BY path");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], record_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("read records")
}

/// Failed records (path, reason) ordered by path.
pub fn list_failed(conn: &Connection) -> Result<Vec<(PathBuf, String)>> {
    let mut stmt = conn.prepare(
        "SELECT path, failure_reason FROM images WHERE status = 'failed' ORDER BY path",
    )?;
    let rows = stmt.query_map([], |row| {
        let path: String = row.get(0)?;
        let reason: String = row.get(1)?;
        Ok((PathBuf::from(path), reason))
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("read failed records")
}

/// Record count per status (missing statuses count 0).
pub fn count_by_status(conn: &Connection) -> Result<BTreeMap<&'static str, usize>> {
    let mut counts: BTreeMap<&'static str, usize> = [
        RecordStatus::Pending,
        RecordStatus::Processed,
        RecordStatus::Failed,
    ]
    .iter()
    .map(|s| (s.as_str(), 0))
    .collect();
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM images GROUP BY status")?;
    let rows = stmt.query_map([], |row| {
        let status = status_from_row(row, 0)?;
        let n: i64 = row.get(1)?;
        Ok((status, n.max(0) as usize))
    })?;
    for row in rows {
        let (status, n) = row?;
        counts.insert(status.as_str(), n);
    }
    Ok(counts)
}
