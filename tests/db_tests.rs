//! DB tests: schema constraints, transactional rollback, load_index round-trip, search, prune.

use pocr::engine::db_ops::{
    IndexWriter, WriterMsg, apply_msg, count_by_status, get_record, list_records, load_index,
    make_snippet, open_db, open_db_in_memory, open_reader, prune_missing, search,
};
use pocr::utils::config::MAX_CONSECUTIVE_STORE_ERRORS;
use pocr::{
    Candidate, FailureReason, Fingerprint, IngestError, RecordStatus, SearchMode, SearchOpts,
    WorkOutcome,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn candidate(path: &str, size: u64) -> Candidate {
    Candidate {
        path: PathBuf::from(path),
        fingerprint: Fingerprint {
            size,
            mtime_ns: 1_700_000_000_000_000_000,
            hash: Some([size as u8; 32]),
        },
    }
}

fn processed(path: &str, text: &str) -> WriterMsg {
    WriterMsg::Completed(WorkOutcome::Processed {
        candidate: candidate(path, 10),
        text: text.to_string(),
        confidence: 88.5,
    })
}

fn failed(path: &str) -> WriterMsg {
    WriterMsg::Completed(WorkOutcome::Failed {
        candidate: candidate(path, 10),
        reason: FailureReason::Ocr("engine said no".into()),
    })
}

/// Store with three processed records and one failed one.
fn seeded(conn: &mut rusqlite::Connection) {
    let mut w = IndexWriter::new(conn, None);
    w.push(processed("/shots/path1.png", "Invoice #42\nTotal due: 100 EUR"))
        .unwrap();
    w.push(processed("/shots/path2.png", "meeting notes\nagenda for monday"))
        .unwrap();
    w.push(processed(
        "/shots/path3.png",
        "receipt receipt receipt\nno billing words here",
    ))
    .unwrap();
    w.push(failed("/shots/broken.png")).unwrap();
    w.finish().unwrap();
}

#[test]
fn test_check_rejects_text_without_processed_status() {
    let conn = open_db_in_memory().unwrap();
    let err = conn.execute(
        "INSERT INTO images (path, size, mtime_ns, status, extracted_text) VALUES ('/a', 1, 1, 'pending', 'text')",
        [],
    );
    assert!(err.is_err());
    let err = conn.execute(
        "INSERT INTO images (path, size, mtime_ns, status) VALUES ('/a', 1, 1, 'processed')",
        [],
    );
    assert!(err.is_err());
    let err = conn.execute(
        "INSERT INTO images (path, size, mtime_ns, status) VALUES ('/a', 1, 1, 'failed')",
        [],
    );
    assert!(err.is_err());
    let err = conn.execute(
        "INSERT INTO images (path, size, mtime_ns, status) VALUES ('/a', 1, 1, 'done')",
        [],
    );
    assert!(err.is_err());
}

#[test]
fn test_interrupted_transaction_leaves_previous_state() {
    let mut conn = open_db_in_memory().unwrap();
    seeded(&mut conn);
    let before = get_record(&conn, Path::new("/shots/path1.png"))
        .unwrap()
        .unwrap();
    {
        let tx = conn.transaction().unwrap();
        apply_msg(&tx, &processed("/shots/path1.png", "rewritten"), 1).unwrap();
        apply_msg(&tx, &failed("/shots/path2.png"), 1).unwrap();
        // Dropped without commit: simulated crash mid-batch.
    }
    let after = get_record(&conn, Path::new("/shots/path1.png"))
        .unwrap()
        .unwrap();
    assert_eq!(before, after);
    let p2 = get_record(&conn, Path::new("/shots/path2.png"))
        .unwrap()
        .unwrap();
    assert_eq!(p2.status, RecordStatus::Processed);
}

#[test]
fn test_every_row_satisfies_status_invariants() {
    let mut conn = open_db_in_memory().unwrap();
    seeded(&mut conn);
    let mut w = IndexWriter::new(&mut conn, None);
    w.push(WriterMsg::Admitted(candidate("/shots/new.png", 3)))
        .unwrap();
    w.finish().unwrap();
    for rec in list_records(&conn).unwrap() {
        assert_eq!(
            rec.status == RecordStatus::Processed,
            rec.extracted_text.is_some(),
            "{rec:?}"
        );
        assert_eq!(
            rec.status == RecordStatus::Failed,
            rec.failure_reason.is_some(),
            "{rec:?}"
        );
    }
    let counts = count_by_status(&conn).unwrap();
    assert_eq!(counts["processed"], 3);
    assert_eq!(counts["failed"], 1);
    assert_eq!(counts["pending"], 1);
}

#[test]
fn test_load_index_roundtrip() {
    let mut conn = open_db_in_memory().unwrap();
    seeded(&mut conn);
    let index = load_index(&conn).unwrap();
    assert_eq!(index.len(), 4);
    let meta = &index[Path::new("/shots/path1.png")];
    assert_eq!(meta.status, RecordStatus::Processed);
    assert_eq!(meta.fingerprint, candidate("/shots/path1.png", 10).fingerprint);
    assert_eq!(
        index[Path::new("/shots/broken.png")].status,
        RecordStatus::Failed
    );
}

#[test]
fn test_search_exact_finds_only_matching_record() {
    let mut conn = open_db_in_memory().unwrap();
    seeded(&mut conn);
    let hits = search(&conn, "invoice", &SearchOpts::default()).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, PathBuf::from("/shots/path1.png"));
    assert!(hits[0].snippet.contains("Invoice #42"));

    let none = search(&conn, "xyz-not-present", &SearchOpts::default()).unwrap();
    assert!(none.is_empty());
    assert!(search(&conn, "   ", &SearchOpts::default()).unwrap().is_empty());
}

#[test]
fn test_search_exact_ranks_by_occurrences() {
    let mut conn = open_db_in_memory().unwrap();
    seeded(&mut conn);
    let mut w = IndexWriter::new(&mut conn, None);
    w.push(processed("/shots/path4.png", "one receipt")).unwrap();
    w.finish().unwrap();
    let hits = search(&conn, "RECEIPT", &SearchOpts::default()).unwrap();
    let paths: Vec<_> = hits.iter().map(|h| h.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            PathBuf::from("/shots/path3.png"),
            PathBuf::from("/shots/path4.png")
        ]
    );
    assert_eq!(hits[0].score, 3.0);
}

#[test]
fn test_search_wildcards_are_literal() {
    let mut conn = open_db_in_memory().unwrap();
    seeded(&mut conn);
    assert!(search(&conn, "%", &SearchOpts::default()).unwrap().is_empty());
    assert!(search(&conn, "_", &SearchOpts::default()).unwrap().is_empty());
}

#[test]
fn test_search_exact_folds_non_ascii_case() {
    let mut conn = open_db_in_memory().unwrap();
    seeded(&mut conn);
    let mut w = IndexWriter::new(&mut conn, None);
    w.push(processed("/shots/bank.png", "ÜBERWEISUNG Nr 42\nEmpfänger: STRAẞE AG"))
        .unwrap();
    w.finish().unwrap();

    let hits = search(&conn, "überweisung", &SearchOpts::default()).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, PathBuf::from("/shots/bank.png"));
    assert!(hits[0].snippet.contains("ÜBERWEISUNG"));

    let hits = search(&conn, "EMPFÄNGER", &SearchOpts::default()).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn test_search_fuzzy_tolerates_gaps_and_respects_limit() {
    let mut conn = open_db_in_memory().unwrap();
    seeded(&mut conn);
    let opts = SearchOpts {
        mode: SearchMode::Fuzzy { threshold: 0.5 },
        limit: None,
    };
    let hits = search(&conn, "total due", &opts).unwrap();
    assert_eq!(hits.first().map(|h| h.path.clone()), Some(PathBuf::from("/shots/path1.png")));
    assert!(hits.iter().all(|h| (0.5..=1.0).contains(&h.score)));

    let limited = SearchOpts {
        mode: SearchMode::Fuzzy { threshold: 0.0 },
        limit: Some(1),
    };
    assert!(search(&conn, "e", &limited).unwrap().len() <= 1);
}

#[test]
fn test_failed_records_never_match() {
    let mut conn = open_db_in_memory().unwrap();
    seeded(&mut conn);
    let hits = search(&conn, "engine said no", &SearchOpts::default()).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn test_prune_only_under_root_and_unseen() {
    let mut conn = open_db_in_memory().unwrap();
    seeded(&mut conn);
    let mut w = IndexWriter::new(&mut conn, None);
    w.push(processed("/elsewhere/x.png", "other root")).unwrap();
    w.finish().unwrap();
    let existing = load_index(&conn).unwrap();
    let seen: HashSet<PathBuf> = [PathBuf::from("/shots/path1.png")].into_iter().collect();
    let pruned = prune_missing(&mut conn, &existing, Path::new("/shots"), &seen).unwrap();
    assert_eq!(pruned, 3);
    let left: Vec<_> = list_records(&conn)
        .unwrap()
        .into_iter()
        .map(|r| r.path)
        .collect();
    assert_eq!(
        left,
        vec![
            PathBuf::from("/elsewhere/x.png"),
            PathBuf::from("/shots/path1.png")
        ]
    );
}

#[test]
fn test_file_db_reader_is_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("nested").join("pocr.db");
    let mut conn = open_db(&db, None).unwrap();
    seeded(&mut conn);
    drop(conn);

    let reader = open_reader(&db).unwrap();
    assert_eq!(load_index(&reader).unwrap().len(), 4);
    assert!(reader.execute("DELETE FROM images", []).is_err());
}

#[test]
fn test_reader_requires_existing_store() {
    let dir = tempfile::tempdir().unwrap();
    assert!(open_reader(&dir.path().join("missing.db")).is_err());
}

// --- writer ---

fn cheap_candidate(path: &str) -> Candidate {
    Candidate {
        path: PathBuf::from(path),
        fingerprint: Fingerprint {
            size: 10,
            mtime_ns: 100,
            hash: None,
        },
    }
}

#[test]
fn test_writer_pending_then_processed() {
    let mut conn = open_db_in_memory().unwrap();
    let mut w = IndexWriter::new(&mut conn, None);
    w.push(WriterMsg::Admitted(cheap_candidate("/a.png"))).unwrap();
    w.flush().unwrap();
    w.push(WriterMsg::Completed(WorkOutcome::Processed {
        candidate: cheap_candidate("/a.png"),
        text: "hello".into(),
        confidence: 90.0,
    }))
    .unwrap();
    let tally = w.finish().unwrap();
    assert_eq!(tally.processed, 1);

    let rec = get_record(&conn, Path::new("/a.png")).unwrap().unwrap();
    assert_eq!(rec.status, RecordStatus::Processed);
    assert_eq!(rec.extracted_text.as_deref(), Some("hello"));
    assert!(rec.last_processed_at.is_some());
}

#[test]
fn test_writer_admitted_keeps_existing_processed_row() {
    let mut conn = open_db_in_memory().unwrap();
    let mut w = IndexWriter::new(&mut conn, None);
    w.push(WriterMsg::Completed(WorkOutcome::Processed {
        candidate: cheap_candidate("/a.png"),
        text: "kept".into(),
        confidence: 90.0,
    }))
    .unwrap();
    w.push(WriterMsg::Admitted(cheap_candidate("/a.png"))).unwrap();
    w.finish().unwrap();

    let rec = get_record(&conn, Path::new("/a.png")).unwrap().unwrap();
    assert_eq!(rec.status, RecordStatus::Processed);
    assert_eq!(rec.extracted_text.as_deref(), Some("kept"));
}

#[test]
fn test_writer_failure_clears_previous_text() {
    let mut conn = open_db_in_memory().unwrap();
    let mut w = IndexWriter::new(&mut conn, None);
    w.push(WriterMsg::Completed(WorkOutcome::Processed {
        candidate: cheap_candidate("/a.png"),
        text: "old".into(),
        confidence: 90.0,
    }))
    .unwrap();
    w.flush().unwrap();
    w.push(WriterMsg::Completed(WorkOutcome::Failed {
        candidate: cheap_candidate("/a.png"),
        reason: FailureReason::CorruptImage("bad header".into()),
    }))
    .unwrap();
    let tally = w.finish().unwrap();
    assert_eq!((tally.processed, tally.failed), (1, 1));

    let rec = get_record(&conn, Path::new("/a.png")).unwrap().unwrap();
    assert_eq!(rec.status, RecordStatus::Failed);
    assert_eq!(rec.extracted_text, None);
    assert_eq!(rec.failure_reason.as_deref(), Some("corrupt image: bad header"));
}

#[test]
fn test_writer_aborts_after_consecutive_store_errors() {
    let mut conn = open_db_in_memory().unwrap();
    conn.execute_batch("DROP TABLE images").unwrap();
    let mut w = IndexWriter::new(&mut conn, None);
    for i in 0..MAX_CONSECUTIVE_STORE_ERRORS {
        w.push(WriterMsg::Completed(WorkOutcome::Processed {
            candidate: cheap_candidate(&format!("/{i}.png")),
            text: "x".into(),
            confidence: 1.0,
        }))
        .unwrap();
    }
    let err = w.flush().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IngestError>(),
        Some(IngestError::Store { .. })
    ));
}

#[test]
fn test_writer_callback_counts_outcomes_only() {
    let committed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&committed);
    let mut conn = open_db_in_memory().unwrap();
    let mut w = IndexWriter::new(
        &mut conn,
        Some(Box::new(move |n| {
            seen.fetch_add(n, Ordering::Relaxed);
        })),
    );
    w.push(WriterMsg::Admitted(cheap_candidate("/a.png"))).unwrap();
    w.push(WriterMsg::Completed(WorkOutcome::Processed {
        candidate: cheap_candidate("/a.png"),
        text: "t".into(),
        confidence: 1.0,
    }))
    .unwrap();
    w.push(WriterMsg::Discarded(PathBuf::from("/b.png"))).unwrap();
    let tally = w.finish().unwrap();
    assert_eq!(tally.discarded, 1);
    assert_eq!(committed.load(Ordering::Relaxed), 2);
}

// --- snippets ---

#[test]
fn test_snippet_collapses_whitespace() {
    assert_eq!(make_snippet("invoice  number\n42", 0, 7), "invoice number 42");
}

#[test]
fn test_snippet_marks_cut_ends() {
    let text = format!("{}needle{}", "a ".repeat(100), "b ".repeat(100));
    let at = text.find("needle").unwrap();
    let s = make_snippet(&text, at, 6);
    assert!(s.starts_with('…') && s.ends_with('…'), "{s}");
    assert!(s.contains("needle"));
}

#[test]
fn test_snippet_respects_multibyte_boundaries() {
    let text = format!("{}ziel", "äöü ".repeat(40));
    let at = text.find("ziel").unwrap();
    let s = make_snippet(&text, at, 4);
    assert!(s.ends_with("ziel"), "{s}");
}
