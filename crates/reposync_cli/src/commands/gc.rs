//! Gc command implementation.

use super::{open_depot, CliResult};
use reposync_core::gc::{Collector, GcConfig, GcHandle, GcMode, GcPhase, GcReport, GcScope};
use reposync_core::{Depot, RepoId};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Runs one collection pass over `depot`.
pub fn collect(depot: &Depot, repo: Option<RepoId>, full: bool, dry_run: bool) -> CliResult<GcReport> {
    let (collector, scope) = collector(depot, repo, full, dry_run);
    Ok(collector.run(scope)?)
}

fn collector(depot: &Depot, repo: Option<RepoId>, full: bool, dry_run: bool) -> (Collector<'_>, GcScope) {
    let scope = repo.map_or(GcScope::All, GcScope::Repo);
    let mode = if full { GcMode::Full } else { GcMode::BlocksOnly };
    let config = GcConfig::default().with_mode(mode).with_dry_run(dry_run);
    (Collector::new(depot, config), scope)
}

/// Runs a pass while printing its progress from a watcher thread.
fn collect_with_progress(
    depot: &Depot,
    repo: Option<RepoId>,
    full: bool,
    dry_run: bool,
) -> CliResult<GcReport> {
    let (collector, scope) = collector(depot, repo, full, dry_run);
    let handle = collector.handle();
    let finished = AtomicBool::new(false);
    let report = std::thread::scope(|s| {
        s.spawn(|| watch(&handle, &finished));
        let report = collector.run(scope);
        finished.store(true, Ordering::Release);
        report
    })?;
    Ok(report)
}

fn watch(handle: &GcHandle, finished: &AtomicBool) {
    while !finished.load(Ordering::Acquire) {
        std::thread::sleep(PROGRESS_INTERVAL);
        let progress = handle.progress();
        match progress.phase {
            GcPhase::Marking => println!("  marking..."),
            GcPhase::Sweeping => println!(
                "  sweeping {}/{} ({:.1}%), {} removable",
                progress.processed,
                progress.total,
                progress.percent(),
                progress.removed
            ),
            _ => {}
        }
    }
}

/// Runs the gc command.
pub fn run(path: &Path, repo: Option<RepoId>, full: bool, dry_run: bool) -> CliResult<()> {
    println!("Collecting garbage at {:?}", path);
    if dry_run {
        println!("(dry run - nothing will be removed)");
    }
    println!();

    let depot = open_depot(path)?;
    let report = collect_with_progress(&depot, repo, full, dry_run)?;
    if !dry_run {
        depot.objects().sync()?;
    }

    let verb = if dry_run { "Removable" } else { "Removed" };
    println!("Scope:   {}", repo.map_or_else(|| "all repos".to_string(), |r| r.to_string()));
    println!("Mode:    {}", if full { "full" } else { "blocks only" });
    println!("Scanned: {} objects", report.scanned);
    println!(
        "{verb}: {} blocks, {} fs-objects, {} commits",
        report.removed_blocks, report.removed_fs, report.removed_commits
    );
    println!("Bytes:   {}", report.reclaimed_bytes);
    if report.kept_young > 0 {
        println!("Kept {} objects written during the pass", report.kept_young);
    }
    Ok(())
}
