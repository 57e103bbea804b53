//! End-to-end ingestion tests with a counting fake OCR engine and real PNG/BMP fixtures.

use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use pocr::engine::db_ops::{count_by_status, get_record, list_records, open_db, open_reader};
use pocr::{
    Capabilities, EngineFactory, FingerprintStrategy, ImageCrateDecoder, ImageRecord,
    IngestControl, IngestError, IngestReport, MissingFilePolicy, OcrEngine, Recognition,
    RecordStatus, RunSummary, SearchOpts, Settings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Image size that makes the fake engine panic.
const PANIC_SIZE: (u32, u32) = (13, 13);
/// Image width the fake engine reads as an invoice.
const INVOICE_WIDTH: u32 = 42;

struct FakeEngine {
    calls: Arc<AtomicUsize>,
}

impl OcrEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn recognize(&mut self, image: &DynamicImage) -> Result<Recognition, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let size = (image.width(), image.height());
        if size == PANIC_SIZE {
            panic!("fake engine blew up");
        }
        let text = match size.0 {
            INVOICE_WIDTH => "Invoice number 42\nTotal due: 100 EUR".to_string(),
            w => format!("screenshot {} by {}", w, size.1),
        };
        Ok(Recognition {
            text,
            confidence: 91.0,
        })
    }
}

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    store: PathBuf,
    calls: Arc<AtomicUsize>,
    builds: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("shots");
        std::fs::create_dir_all(&root).unwrap();
        let store = dir.path().join("index").join("pocr.db");
        Fixture {
            root,
            store,
            _dir: dir,
            calls: Arc::new(AtomicUsize::new(0)),
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn settings(&self) -> Settings {
        Settings {
            store_path: Some(self.store.clone()),
            pool_size: Some(2),
            ..Default::default()
        }
    }

    fn capabilities(&self) -> Capabilities {
        let calls = Arc::clone(&self.calls);
        let builds = Arc::clone(&self.builds);
        let factory: Arc<EngineFactory> = Arc::new(move || -> anyhow::Result<Box<dyn OcrEngine>> {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeEngine {
                calls: Arc::clone(&calls),
            }) as Box<dyn OcrEngine>)
        });
        Capabilities::new(Arc::new(ImageCrateDecoder), factory)
    }

    fn ingest(&self, settings: &Settings) -> IngestReport {
        pocr::ingest(
            &self.root,
            settings,
            &self.capabilities(),
            IngestControl::default(),
        )
        .unwrap()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn records(&self) -> Vec<ImageRecord> {
        list_records(&open_reader(&self.store).unwrap()).unwrap()
    }

    fn record(&self, name: &str) -> Option<ImageRecord> {
        let path = self.root.canonicalize().unwrap().join(name);
        get_record(&open_reader(&self.store).unwrap(), &path).unwrap()
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

fn write_png(path: &Path, w: u32, h: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = ImageBuffer::from_fn(w, h, |x, y| Luma([((x + y) % 256) as u8]));
    DynamicImage::ImageLuma8(img)
        .save_with_format(path, ImageFormat::Png)
        .unwrap();
}

fn write_bmp(path: &Path, w: u32, h: u32, shade: u8) {
    let img = ImageBuffer::from_pixel(w, h, Rgb([shade, shade, shade]));
    DynamicImage::ImageRgb8(img)
        .save_with_format(path, ImageFormat::Bmp)
        .unwrap();
}

fn set_mtime(path: &Path, t: SystemTime) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(t)
        .unwrap();
}

fn assert_balanced(s: &RunSummary) {
    assert_eq!(
        s.scanned,
        s.skipped + s.processed + s.failed + s.discarded,
        "{s:?}"
    );
}

fn assert_record_invariants(rec: &ImageRecord) {
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

#[test]
fn test_second_run_is_idempotent() {
    let fx = Fixture::new();
    write_png(&fx.path("a.png"), 20, 10);
    write_png(&fx.path("b.png"), 30, 10);
    write_png(&fx.path("sub/c.jpg.png"), 40, 10);
    let settings = fx.settings();

    let first = fx.ingest(&settings);
    assert_eq!(first.summary.processed, 3);
    assert_eq!(fx.calls(), 3);
    let before = fx.records();

    let second = fx.ingest(&settings);
    assert_eq!(fx.calls(), 3);
    assert_eq!(second.summary.scanned, 3);
    assert_eq!(second.summary.skipped, 3);
    assert_eq!(second.summary.processed, 0);
    assert_balanced(&second.summary);
    assert_eq!(fx.records(), before);
}

#[test]
fn test_only_modified_file_is_reprocessed() {
    let fx = Fixture::new();
    write_png(&fx.path("a.png"), 20, 10);
    write_png(&fx.path("b.png"), 30, 10);
    let settings = fx.settings();
    fx.ingest(&settings);
    let a_before = fx.record("a.png").unwrap();

    write_png(&fx.path("b.png"), 31, 12);
    set_mtime(
        &fx.path("b.png"),
        SystemTime::now() + Duration::from_secs(5),
    );
    let report = fx.ingest(&settings);

    assert_eq!(fx.calls(), 3);
    assert_eq!(report.summary.processed, 1);
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(fx.record("a.png").unwrap(), a_before);
    assert_eq!(
        fx.record("b.png").unwrap().extracted_text.as_deref(),
        Some("screenshot 31 by 12")
    );
}

#[test]
fn test_corrupt_file_fails_alone() {
    let fx = Fixture::new();
    for i in 0..9 {
        write_png(&fx.path(&format!("ok-{i}.png")), 20 + i, 10);
    }
    std::fs::write(fx.path("broken.png"), b"\x89PNG\r\n\x1a\nthis is not really a png").unwrap();

    let report = fx.ingest(&fx.settings());
    assert_eq!(report.summary.processed, 9);
    assert_eq!(report.summary.failed, 1);
    assert_balanced(&report.summary);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].path.ends_with("broken.png"));
    assert_eq!(report.failures[0].reason.kind(), "corrupt-image");

    let rec = fx.record("broken.png").unwrap();
    assert_eq!(rec.status, RecordStatus::Failed);
    assert!(rec.failure_reason.unwrap().starts_with("corrupt image"));
    for rec in fx.records() {
        assert_record_invariants(&rec);
    }
}

#[test]
fn test_failed_file_is_not_retried_unless_asked() {
    let fx = Fixture::new();
    std::fs::write(fx.path("broken.png"), b"garbage").unwrap();
    write_png(&fx.path("ok.png"), 20, 10);
    let mut settings = fx.settings();
    fx.ingest(&settings);

    let again = fx.ingest(&settings);
    assert_eq!(again.summary.skipped, 2);
    assert_eq!(again.summary.failed, 0);

    settings.retry_failed = true;
    let retry = fx.ingest(&settings);
    assert_eq!(retry.summary.failed, 1);
    assert_eq!(retry.summary.skipped, 1);
}

#[test]
fn test_worker_panic_is_isolated() {
    let fx = Fixture::new();
    write_png(&fx.path("boom.png"), PANIC_SIZE.0, PANIC_SIZE.1);
    for i in 0..5 {
        write_png(&fx.path(&format!("fine-{i}.png")), 20 + i, 10);
    }
    let settings = Settings {
        pool_size: Some(1),
        ..fx.settings()
    };

    let report = fx.ingest(&settings);
    assert_eq!(report.summary.processed, 5);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.failures[0].reason.kind(), "worker-fault");
    assert!(report.failures[0].reason.to_string().contains("blew up"));
    // One engine at start, one rebuilt after the panic.
    assert_eq!(fx.builds.load(Ordering::SeqCst), 2);
    assert_eq!(fx.record("boom.png").unwrap().status, RecordStatus::Failed);
}

#[test]
fn test_cancel_keeps_summary_valid_and_resumes() {
    let fx = Fixture::new();
    for i in 0..20 {
        write_png(&fx.path(&format!("img-{i:02}.png")), 20 + i, 10);
    }
    let settings = Settings {
        pool_size: Some(1),
        ..fx.settings()
    };
    let cancel = Arc::new(AtomicBool::new(false));
    let trip = Arc::clone(&cancel);
    let control = IngestControl {
        cancel: Some(Arc::clone(&cancel)),
        on_admitted: Some(Box::new(move |_: usize| trip.store(true, Ordering::SeqCst))),
        on_committed: None,
    };

    let report = pocr::ingest(&fx.root, &settings, &fx.capabilities(), control).unwrap();
    assert!(report.summary.cancelled);
    assert!(report.summary.scanned < 20);
    assert_balanced(&report.summary);
    for rec in fx.records() {
        assert_record_invariants(&rec);
    }

    let resumed = fx.ingest(&settings);
    assert!(!resumed.summary.cancelled);
    assert_balanced(&resumed.summary);
    let counts = count_by_status(&open_reader(&fx.store).unwrap()).unwrap();
    assert_eq!(counts["processed"], 20);
    assert_eq!(counts["pending"], 0);
}

#[test]
fn test_reader_sees_consistent_rows_during_ingest() {
    let fx = Fixture::new();
    for i in 0..40 {
        let w = if i == 7 { INVOICE_WIDTH } else { 50 + i };
        write_png(&fx.path(&format!("img-{i:02}.png")), w, 10);
    }
    drop(open_db(&fx.store, None).unwrap());

    let done = Arc::new(AtomicBool::new(false));
    let reader_done = Arc::clone(&done);
    let store = fx.store.clone();
    let reader = std::thread::spawn(move || {
        let conn = open_reader(&store).unwrap();
        let mut rounds = 0_usize;
        loop {
            let finished = reader_done.load(Ordering::SeqCst);
            for rec in list_records(&conn).unwrap() {
                assert_record_invariants(&rec);
            }
            for hit in pocr::search(&conn, "screenshot", &SearchOpts::default()).unwrap() {
                let rec = get_record(&conn, &hit.path).unwrap().unwrap();
                assert_eq!(rec.status, RecordStatus::Processed);
            }
            rounds += 1;
            if finished {
                break;
            }
        }
        rounds
    });

    let report = fx.ingest(&fx.settings());
    done.store(true, Ordering::SeqCst);
    let rounds = reader.join().unwrap();
    assert!(rounds >= 1);
    assert_eq!(report.summary.processed, 40);

    let conn = open_reader(&fx.store).unwrap();
    let hits = pocr::search(&conn, "invoice", &SearchOpts::default()).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].path.ends_with("img-07.png"));
    assert!(
        pocr::search(&conn, "xyz-not-present", &SearchOpts::default())
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_missing_files_kept_by_default_pruned_on_request() {
    let fx = Fixture::new();
    write_png(&fx.path("stay.png"), 20, 10);
    write_png(&fx.path("gone.png"), 30, 10);
    let mut settings = fx.settings();
    fx.ingest(&settings);

    std::fs::remove_file(fx.path("gone.png")).unwrap();
    let kept = fx.ingest(&settings);
    assert_eq!(kept.summary.pruned, 0);
    assert!(fx.record("gone.png").is_some());
    let conn = open_reader(&fx.store).unwrap();
    assert_eq!(
        pocr::search(&conn, "30 by 10", &SearchOpts::default())
            .unwrap()
            .len(),
        1
    );

    settings.missing_files = MissingFilePolicy::Prune;
    let pruned = fx.ingest(&settings);
    assert_eq!(pruned.summary.pruned, 1);
    assert!(fx.record("gone.png").is_none());
    assert!(fx.record("stay.png").is_some());
}

#[test]
fn test_exact_strategy_catches_same_size_edit() {
    let fx = Fixture::new();
    let p = fx.path("same.bmp");
    write_bmp(&p, 16, 8, 10);
    let stamp = SystemTime::now() - Duration::from_secs(3600);
    set_mtime(&p, stamp);
    let size_before = std::fs::metadata(&p).unwrap().len();

    let exact = Settings {
        fingerprint: FingerprintStrategy::Exact,
        ..fx.settings()
    };
    assert_eq!(fx.ingest(&exact).summary.processed, 1);

    write_bmp(&p, 16, 8, 200);
    set_mtime(&p, stamp);
    assert_eq!(std::fs::metadata(&p).unwrap().len(), size_before);

    let cheap = fx.ingest(&fx.settings());
    assert_eq!(cheap.summary.skipped, 1);
    assert_eq!(fx.calls(), 1);

    let rerun = fx.ingest(&exact);
    assert_eq!(rerun.summary.processed, 1);
    assert_eq!(fx.calls(), 2);
    assert_eq!(fx.ingest(&exact).summary.skipped, 1);
}

#[test]
fn test_plan_classifies_without_writing() {
    let fx = Fixture::new();
    write_png(&fx.path("same.png"), 20, 10);
    write_png(&fx.path("edit.png"), 30, 10);
    write_png(&fx.path("gone.png"), 40, 10);
    let settings = fx.settings();
    fx.ingest(&settings);

    write_png(&fx.path("edit.png"), 33, 11);
    set_mtime(
        &fx.path("edit.png"),
        SystemTime::now() + Duration::from_secs(5),
    );
    write_png(&fx.path("fresh.png"), 50, 10);
    std::fs::remove_file(fx.path("gone.png")).unwrap();
    let before = fx.records();

    let plan = pocr::plan(&fx.root, &settings).unwrap();
    let names = |v: &[PathBuf]| -> Vec<String> {
        v.iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    };
    assert_eq!(names(&plan.new), vec!["fresh.png"]);
    assert_eq!(names(&plan.changed), vec!["edit.png"]);
    assert_eq!(names(&plan.unchanged), vec!["same.png"]);
    assert_eq!(names(&plan.missing), vec!["gone.png"]);
    assert_eq!(fx.records(), before);
    assert_eq!(fx.calls(), 3);
}

#[test]
fn test_filters_skip_other_files_and_excluded_dirs() {
    let fx = Fixture::new();
    write_png(&fx.path("keep.png"), 20, 10);
    write_png(&fx.path("drafts/skip.png"), 30, 10);
    std::fs::write(fx.path("notes.txt"), b"not an image").unwrap();
    std::fs::write(fx.path(".DS_Store"), b"clutter").unwrap();
    let settings = Settings {
        exclude: vec!["drafts".to_string()],
        ..fx.settings()
    };
    let report = fx.ingest(&settings);
    assert_eq!(report.summary.scanned, 1);
    assert_eq!(report.summary.processed, 1);
    assert!(fx.record("drafts/skip.png").is_none());
}

#[test]
fn test_store_inside_root_is_not_ingested() {
    let fx = Fixture::new();
    write_png(&fx.path("a.png"), 20, 10);
    let settings = Settings {
        store_path: Some(fx.root.join("index.png")),
        ..fx.settings()
    };
    let report = fx.ingest(&settings);
    assert_eq!(report.summary.scanned, 1);
    assert_eq!(report.summary.failed, 0);
}

#[test]
fn test_run_level_errors() {
    let fx = Fixture::new();
    let settings = fx.settings();
    let caps = fx.capabilities();

    let err = pocr::ingest(
        &fx.root.join("missing"),
        &settings,
        &caps,
        IngestControl::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IngestError>(),
        Some(IngestError::Enumeration { .. })
    ));

    write_png(&fx.path("a.png"), 20, 10);
    let err = pocr::ingest(&fx.path("a.png"), &settings, &caps, IngestControl::default())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IngestError>(),
        Some(IngestError::NotADirectory(_))
    ));

    let broken: Arc<EngineFactory> =
        Arc::new(|| -> anyhow::Result<Box<dyn OcrEngine>> { anyhow::bail!("no engine here") });
    let caps = Capabilities::new(Arc::new(ImageCrateDecoder), broken);
    let err = pocr::ingest(&fx.root, &settings, &caps, IngestControl::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IngestError>(),
        Some(IngestError::Engine(_))
    ));
}

#[test]
fn test_progress_callbacks_count_outcomes() {
    let fx = Fixture::new();
    for i in 0..4 {
        write_png(&fx.path(&format!("p{i}.png")), 20 + i, 10);
    }
    let admitted = Arc::new(AtomicUsize::new(0));
    let committed = Arc::new(AtomicUsize::new(0));
    let (a, c) = (Arc::clone(&admitted), Arc::clone(&committed));
    let control = IngestControl {
        cancel: None,
        on_admitted: Some(Box::new(move |n: usize| {
            a.fetch_add(n, Ordering::SeqCst);
        })),
        on_committed: Some(Box::new(move |n: usize| {
            c.fetch_add(n, Ordering::SeqCst);
        })),
    };
    pocr::ingest(&fx.root, &fx.settings(), &fx.capabilities(), control).unwrap();
    assert_eq!(admitted.load(Ordering::SeqCst), 4);
    assert_eq!(committed.load(Ordering::SeqCst), 4);
}

#[test]
fn test_store_failure_aborts_run_without_hanging() {
    let fx = Fixture::new();
    for i in 0..12 {
        write_png(&fx.path(&format!("s{i:02}.png")), 20 + i, 10);
    }
    // Every write to the images table fails; reads still work.
    open_db(&fx.store, None)
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER fail_insert BEFORE INSERT ON images
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;
             CREATE TRIGGER fail_update BEFORE UPDATE ON images
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    let root = fx.root.clone();
    let settings = fx.settings();
    let caps = fx.capabilities();
    std::thread::spawn(move || {
        let result = pocr::ingest(&root, &settings, &caps, IngestControl::default());
        let _ = tx.send(result);
    });

    let err = rx
        .recv_timeout(Duration::from_secs(60))
        .expect("ingest hung after store errors")
        .unwrap_err();
    match err.downcast_ref::<IngestError>() {
        Some(IngestError::Store { count, last }) => {
            assert!(*count >= 3);
            assert!(last.contains("disk full"), "{last}");
        }
        other => panic!("expected store error, got {other:?}: {err:#}"),
    }
    assert!(fx.records().is_empty());
}
