//! Database operations: schema, open/load, single-writer commits, text search.

mod connection;
mod query;
mod writer;

pub use connection::{
    count_by_status, get_record, list_failed, list_records, load_index, open_db, open_db_in_memory,
    open_db_or_detect_encrypted, open_reader,
};
pub use query::{make_snippet, search};
pub use writer::{
    DrainParams, IndexWriter, WriteTally, WriterMsg, apply_msg, drain_into_store, prune_missing,
};

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 1000;
        PRAGMA journal_size_limit = 67108864;
        PRAGMA busy_timeout = 5000;
        "#;

/// Outcome upsert: every column of the row is replaced in one statement.
pub(crate) const UPSERT_OUTCOME_SQL: &str = r#"
INSERT INTO images (path, size, mtime_ns, hash, status, extracted_text, confidence, last_processed_at, failure_reason)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(path) DO UPDATE SET
    size = excluded.size,
    mtime_ns = excluded.mtime_ns,
    hash = excluded.hash,
    status = excluded.status,
    extracted_text = excluded.extracted_text,
    confidence = excluded.confidence,
    last_processed_at = excluded.last_processed_at,
    failure_reason = excluded.failure_reason
"#;

/// Pending row for a never-seen path. An existing row is left as is.
pub(crate) const INSERT_PENDING_SQL: &str = r#"
INSERT INTO images (path, size, mtime_ns, hash, status)
VALUES (?1, ?2, ?3, ?4, 'pending')
ON CONFLICT(path) DO NOTHING
"#;

pub(crate) const SELECT_RECORD_COLUMNS: &str = "path, size, mtime_ns, hash, status, extracted_text, confidence, last_processed_at, failure_reason";

/// Schema for the images table. The CHECKs make text-without-processed (and the reverse)
/// unrepresentable.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    path TEXT PRIMARY KEY,
    size INTEGER NOT NULL,
    mtime_ns INTEGER NOT NULL,
    hash BLOB,
    status TEXT NOT NULL CHECK (status IN ('pending', 'processed', 'failed')),
    extracted_text TEXT,
    confidence REAL,
    last_processed_at INTEGER,
    failure_reason TEXT,
    CHECK ((status = 'processed') = (extracted_text IS NOT NULL)),
    CHECK ((status = 'failed') = (failure_reason IS NOT NULL))
);
CREATE INDEX IF NOT EXISTS idx_images_status ON images(status);
"#;
