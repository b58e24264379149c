//! CLI output formatting for builds.
//!
//! # Output Format
//!
//! ## Build (streamed from events)
//!
//! ```text
//! Discovered 4 files
//! Read 4 documents
//! Cleared build/
//! 001 markdown
//! 001 markdown done (12 ms)
//! Stages complete
//!     Failed: feed.xml (permission denied)
//! Wrote 3 files, 1 failed
//! ```
//!
//! ## Check
//!
//! ```text
//! Documents
//! 001 index.md (1.2 KB)
//! 002 posts/hello.md (340 B)
//!
//! 2 documents, 1.5 KB
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::document::DocumentSet;
use crate::pipeline::{BuildEvent, BuildReport};
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Human-readable byte size: `340 B`, `1.2 KB`, `3.4 MB`.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{} {}", n, one)
    } else {
        format!("{} {}", n, many)
    }
}

/// Display a directory with a trailing slash.
fn dir_label(path: &Path) -> String {
    format!("{}/", path.display().to_string().trim_end_matches('/'))
}

// ============================================================================
// Build events
// ============================================================================

/// Format a single build event as display lines.
pub fn format_build_event(event: &BuildEvent) -> Vec<String> {
    match event {
        BuildEvent::Discovered { paths } => {
            vec![format!("Discovered {}", plural(paths.len(), "file", "files"))]
        }
        BuildEvent::Read { documents } => {
            vec![format!("Read {}", plural(*documents, "document", "documents"))]
        }
        BuildEvent::Clobbered { destination } => {
            vec![format!("Cleared {}", dir_label(destination))]
        }
        BuildEvent::StageStarted { index, name } => {
            vec![format!("{} {}", format_index(index + 1), name)]
        }
        BuildEvent::StageFinished {
            index,
            name,
            elapsed,
        } => vec![format!(
            "{} {} done ({} ms)",
            format_index(index + 1),
            name,
            elapsed.as_millis()
        )],
        BuildEvent::StagesComplete => vec!["Stages complete".to_string()],
        BuildEvent::WriteFailed { path, error } => {
            vec![format!("    Failed: {} ({})", path, error)]
        }
        BuildEvent::Complete { written, failed } => {
            let mut line = format!("Wrote {}", plural(*written, "file", "files"));
            if *failed > 0 {
                line.push_str(&format!(", {} failed", failed));
            }
            vec![line]
        }
    }
}

// ============================================================================
// Build report
// ============================================================================

/// Format the final report: written files, then failures.
pub fn format_build_report(report: &BuildReport, destination: &Path) -> Vec<String> {
    let mut lines = vec![format!("Output {}", dir_label(destination))];
    for (i, path) in report.written.iter().enumerate() {
        lines.push(format!("    {} {}", format_index(i + 1), path));
    }

    if !report.failed.is_empty() {
        lines.push(String::new());
        lines.push("Failed".to_string());
        for failure in &report.failed {
            lines.push(format!("    {}", failure.path));
            lines.push(format!("        Error: {}", failure.error));
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "Built {} in {} ms",
        plural(report.written.len(), "file", "files"),
        report.elapsed.as_millis()
    ));
    lines
}

pub fn print_build_report(report: &BuildReport, destination: &Path) {
    for line in format_build_report(report, destination) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

/// Format a loaded document set as an inventory.
pub fn format_check_output(documents: &DocumentSet) -> Vec<String> {
    let mut lines = vec!["Documents".to_string()];
    let mut total: u64 = 0;

    for (i, (key, doc)) in documents.iter().enumerate() {
        let size = doc.content.len() as u64;
        total += size;
        lines.push(format!(
            "{} {} ({})",
            format_index(i + 1),
            key,
            format_size(size)
        ));
    }

    lines.push(String::new());
    lines.push(format!(
        "{}, {}",
        plural(documents.len(), "document", "documents"),
        format_size(total)
    ));
    lines
}

pub fn print_check_output(documents: &DocumentSet) {
    for line in format_check_output(documents) {
        println!("{}", line);
    }
}
