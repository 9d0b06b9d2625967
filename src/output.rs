//! CLI output formatting.
//!
//! Each report has a `format_*` function that returns display lines and a
//! `print_*` wrapper that writes them to stdout. Format functions are pure,
//! so they're tested without capturing output.
//!
//! ## Progress
//!
//! ```text
//! Optimizing 3 images
//! [1/3] processed  banner-hero.png
//! [2/3] skipped    logo.png
//! [3/3] error      broken.jpg
//! ```
//!
//! ## Run summary
//!
//! ```text
//! Discovered 40 images (37 already done)
//! 2 processed, 0 skipped, 1 errored
//! Errors logged to .imgopt-errors.jsonl
//! ```

use crate::pipeline::{ProgressEvent, RunReport};
use crate::state::StateReport;

/// Width of the status column in progress lines.
const STATUS_WIDTH: usize = 11;

// ============================================================================
// Progress
// ============================================================================

/// Format one progress event. `Finished` produces no lines.
pub fn format_progress_event(event: &ProgressEvent, total: usize) -> Vec<String> {
    match event {
        ProgressEvent::Started { total: 0 } => vec!["Nothing to do".to_string()],
        ProgressEvent::Started { total: 1 } => vec!["Optimizing 1 image".to_string()],
        ProgressEvent::Started { total } => vec![format!("Optimizing {total} images")],
        ProgressEvent::Updated {
            current,
            status,
            filename,
        } => vec![format!(
            "[{current}/{total}] {:<width$}{filename}",
            status.label(),
            width = STATUS_WIDTH
        )],
        ProgressEvent::Finished => Vec::new(),
    }
}

// ============================================================================
// Run summary
// ============================================================================

pub fn format_run_report(report: &RunReport) -> Vec<String> {
    let mut lines = Vec::new();
    if report.previously_succeeded > 0 {
        lines.push(format!(
            "Discovered {} images ({} already done)",
            report.discovered, report.previously_succeeded
        ));
    } else {
        lines.push(format!("Discovered {} images", report.discovered));
    }
    lines.push(report.to_string());
    if report.lfs_pointers > 0 {
        lines.push(format!(
            "    {} LFS pointer(s) left unresolved",
            report.lfs_pointers
        ));
    }
    if report.lfs_errors > 0 {
        lines.push(format!("    {} LFS retrieval failure(s)", report.lfs_errors));
    }
    if report.has_errors() {
        lines.push(format!("Errors logged to {}", report.error_log.display()));
    }
    lines
}

pub fn print_run_report(report: &RunReport) {
    for line in format_run_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// State report
// ============================================================================

/// Format the on-demand state audit view (`imgopt status`).
pub fn format_state_report(report: &StateReport) -> Vec<String> {
    let s = &report.summary;
    let mut lines = vec![
        format!("Files recorded: {}", s.total),
        format!("    succeeded: {}", s.succeeded),
        format!("    skipped:   {}", s.skipped),
        format!("    failed:    {}", s.failed),
        format!("Success rate: {:.1}%", s.success_rate),
    ];
    if report.errors.is_empty() {
        return lines;
    }
    lines.push(format!(
        "Errors ({}) from {}",
        report.errors.len(),
        report.error_log_path.display()
    ));
    for entry in &report.errors {
        lines.push(format!(
            "    {} [{}] attempt {}/{} {}: {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.error.code,
            entry.context.attempt,
            entry.context.max_attempts,
            entry.file,
            entry.error.message
        ));
    }
    lines
}

pub fn print_state_report(report: &StateReport) {
    for line in format_state_report(report) {
        println!("{}", line);
    }
}
