//! Command handlers for ingest, search and status.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::arg_parser::{Cli, Commands, IngestArgs, SearchArgs};
use crate::engine::db_ops::{count_by_status, list_failed, open_reader};
use crate::engine::progress::{
    admitted_callback, create_ocr_bar, finish_bar, progress_callback, refresh_bar,
};
use crate::engine::tools::path_relative_to;
use crate::types::{
    FileFailure, IngestControl, IngestReport, Plan, SearchHit, SearchMode, SearchOpts, Settings,
};
use crate::utils::config::{FAILURE_LIST_THRESHOLD, PackagePaths};
use crate::utils::settings_file::{ensure_user_config, load_root_settings, load_user_settings};
use crate::utils::{Colors, SettingsOverlay, resolve, setup_logging};
use crate::{Capabilities, TesseractCli};

/// Run the parsed command line.
pub fn handle_run(cli: &Cli) -> Result<()> {
    setup_logging(cli.verbose());
    match &cli.command {
        Commands::Ingest(args) => handle_ingest(cli, args),
        Commands::Search(args) => handle_search(cli, args),
        Commands::Status => handle_status(cli),
    }
}

/// Settings for `root`: user config, then the root's `.pocr.toml`, then the command line.
fn settings_for(root: Option<&Path>, cli_layer: &SettingsOverlay) -> Settings {
    let mut layers: Vec<SettingsOverlay> = Vec::with_capacity(3);
    layers.extend(load_user_settings());
    if let Some(root) = root {
        layers.extend(load_root_settings(root));
    }
    layers.push(cli_layer.clone());
    resolve(&layers)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{}", s);
    Ok(())
}

/// Path relative to `root` for display, absolute if outside it.
fn display_path(path: &Path, root: &Path) -> String {
    path_relative_to(path, root)
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

fn handle_ingest(cli: &Cli, args: &IngestArgs) -> Result<()> {
    let cli_layer = args.overlay(cli.overlay());
    let roots: Vec<PathBuf> = match &args.dir {
        Some(dir) => vec![dir.clone()],
        None => {
            if let Some(created) = ensure_user_config()? {
                info!(
                    "Created {}; edit `screenshots_dir` there to choose the default folder",
                    created.display()
                );
            }
            settings_for(None, &cli_layer).roots
        }
    };
    if roots.is_empty() {
        let config = PackagePaths::get()
            .user_config_file()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "the config file".to_string());
        anyhow::bail!(
            "no directory given; pass DIR or set `screenshots_dir` in {}",
            config
        );
    }

    if args.dry_run {
        warn!("RUNNING IN DRY-RUN MODE. NO CHANGES WILL BE APPLIED TO THE INDEX.");
        for root in &roots {
            let settings = settings_for(Some(root), &cli_layer);
            let plan = crate::plan(root, &settings)?;
            let shown_root = root.canonicalize().unwrap_or_else(|_| root.clone());
            match cli.json {
                true => print_json(&plan)?,
                false => print_plan(&plan, &shown_root, cli.verbose()),
            }
        }
        return Ok(());
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_handler = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        cancel_handler.store(true, Ordering::Relaxed);
    })
    .context("set Ctrl+C handler")?;

    let mut reports = Vec::with_capacity(roots.len());
    for root in &roots {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let settings = settings_for(Some(root), &cli_layer);
        let tesseract = TesseractCli::new(
            settings.tesseract_path.clone(),
            settings.tesseract_lang.clone(),
        );
        let version = tesseract.version().with_context(|| {
            format!(
                "tesseract not usable at {}; install it or set tesseract_path",
                settings.tesseract_path.display()
            )
        })?;
        debug!("OCR engine: {}", version);

        let bar = cli.verbose().then(|| {
            let b = create_ocr_bar("OCR");
            refresh_bar(&b);
            b
        });
        let control = IngestControl {
            cancel: Some(Arc::clone(&cancel)),
            on_admitted: admitted_callback(&bar),
            on_committed: progress_callback(&bar),
        };
        let report = crate::ingest(root, &settings, &Capabilities::tesseract(&settings), control)?;
        finish_bar(&bar);
        if !cli.json {
            print_summary(&report, cli.verbose());
        }
        reports.push(report);
    }
    if cli.json {
        print_json(&reports)?;
    }
    Ok(())
}

fn handle_search(cli: &Cli, args: &SearchArgs) -> Result<()> {
    let settings = settings_for(None, &cli.overlay());
    let conn = open_reader(&settings.resolved_store_path()?)?;
    let mode = match args.fuzzy {
        None => SearchMode::Exact,
        Some(threshold) => SearchMode::Fuzzy {
            threshold: threshold
                .unwrap_or(settings.fuzzy_threshold)
                .clamp(0.0, 1.0),
        },
    };
    let opts = SearchOpts {
        mode,
        limit: args.limit,
    };
    let hits = crate::search(&conn, &args.query_text(), &opts)?;
    match cli.json {
        true => print_json(&hits)?,
        false => print_hits(&hits),
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    store: PathBuf,
    counts: std::collections::BTreeMap<&'static str, usize>,
    failed: Vec<(PathBuf, String)>,
}

fn handle_status(cli: &Cli) -> Result<()> {
    let settings = settings_for(None, &cli.overlay());
    let store = settings.resolved_store_path()?;
    let conn = open_reader(&store)?;
    let status = StatusReport {
        counts: count_by_status(&conn)?,
        failed: list_failed(&conn)?,
        store,
    };
    if cli.json {
        return print_json(&status);
    }
    println!("{}", status.store.display());
    for (name, n) in &status.counts {
        println!("  {:<10} {}", name, n);
    }
    for (path, reason) in &status.failed {
        println!(
            "  {} {} ({})",
            Colors::colorize(Colors::FAILED, "failed"),
            path.display(),
            reason
        );
    }
    Ok(())
}

fn print_failures(failures: &[FileFailure], root: &Path, verbose: bool) {
    let shown = if verbose {
        failures.len()
    } else {
        failures.len().min(FAILURE_LIST_THRESHOLD)
    };
    for f in &failures[..shown] {
        println!(
            "  {} {}: {}",
            Colors::colorize(Colors::FAILED, f.reason.kind()),
            display_path(&f.path, root),
            f.reason
        );
    }
    if shown < failures.len() {
        println!(
            "  ... and {} more (run `{} status` for the full list)",
            failures.len() - shown,
            PackagePaths::get().pkg_name()
        );
    }
}

fn print_summary(report: &IngestReport, verbose: bool) {
    let s = &report.summary;
    println!(
        "{}: scanned {} | {} | {} | {} in {:.1?}",
        report.root.display(),
        s.scanned,
        Colors::colorize(Colors::PROCESSED, &format!("processed {}", s.processed)),
        Colors::colorize(Colors::SKIPPED, &format!("skipped {}", s.skipped)),
        Colors::colorize(Colors::FAILED, &format!("failed {}", s.failed)),
        s.elapsed
    );
    if s.pruned > 0 {
        println!("  pruned {} missing records", s.pruned);
    }
    if s.cancelled {
        warn!(
            "Cancelled; {} queued images were not processed and will be picked up next run",
            s.discarded
        );
    }
    print_failures(&report.failures, &report.root, verbose);
}

fn print_plan(plan: &Plan, root: &Path, verbose: bool) {
    println!(
        "{} | {} | {} | missing {}",
        Colors::colorize(Colors::PROCESSED, &format!("New: {}", plan.new.len())),
        Colors::colorize(Colors::CHANGED, &format!("Changed: {}", plan.changed.len())),
        Colors::colorize(Colors::SKIPPED, &format!("Unchanged: {}", plan.unchanged.len())),
        plan.missing.len()
    );
    if verbose {
        for p in &plan.new {
            println!("  + {}", display_path(p, root));
        }
        for p in &plan.changed {
            println!("  ~ {}", display_path(p, root));
        }
        for p in &plan.missing {
            println!("  - {}", display_path(p, root));
        }
    }
    print_failures(&plan.failures, root, verbose);
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        info!("No matches.");
        return;
    }
    for hit in hits {
        println!(
            "{} {}",
            Colors::colorize(Colors::CHANGED, &format!("{:>6.2}", hit.score)),
            hit.path.display()
        );
        println!("       {}", hit.snippet);
    }
}
