//! Progress bar utilities for displaying ingestion status

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

// Progress bar type alias
pub type ProgressBar = Arc<Mutex<Bar>>;

/// Create a bar whose total grows as images are admitted for OCR.
pub fn create_ocr_bar(desc: &'static str) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = 0,
        desc = desc,
        animation = Animation::Classic,
        position = 0,
        unit = " images"
    )))
}

/// Force a refresh of the bar (e.g. so it shows "0 images" immediately).
pub fn refresh_bar(pb: &ProgressBar) {
    if let Ok(mut bar) = pb.try_lock() {
        let _ = bar.refresh();
    }
}

/// Add `n` to the bar's total. Blocks on the lock: a skipped increment would leave the total short.
pub fn grow_bar_total(pb: &ProgressBar, n: usize) {
    if let Ok(mut bar) = pb.lock() {
        bar.total += n;
        let _ = bar.refresh();
    }
}

/// Advance the bar by `n`.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) {
    if let Ok(mut bar) = pb.lock() {
        let _ = bar.update(n);
    }
}

/// Callback that grows the bar total (for `on_admitted`).
pub fn admitted_callback(bar: &Option<ProgressBar>) -> Option<Box<dyn Fn(usize) + Send>> {
    bar.as_ref().map(|bar| {
        let bar = Arc::clone(bar);
        Box::new(move |n: usize| grow_bar_total(&bar, n)) as Box<dyn Fn(usize) + Send>
    })
}

/// Callback that advances the bar (for `on_committed`).
pub fn progress_callback(bar: &Option<ProgressBar>) -> Option<Box<dyn Fn(usize) + Send>> {
    bar.as_ref().map(|bar| {
        let bar = Arc::clone(bar);
        Box::new(move |n: usize| update_progress_bar(&bar, n)) as Box<dyn Fn(usize) + Send>
    })
}

/// Clear the bar line before printing the summary.
pub fn finish_bar(bar: &Option<ProgressBar>) {
    if let Some(bar) = bar
        && let Ok(mut b) = bar.lock()
    {
        let _ = b.refresh();
        eprintln!();
    }
}
