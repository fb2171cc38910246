//! Human-readable output for a session.

use std::fmt::Write as _;
use tinyimage_pipeline::{BatchReport, Summary, Task};

const UNITS: [&str; 3] = ["KB", "MB", "GB"];

/// `512 B`, `1.50 KB`, `12.3 MB`, `100 GB`: fewer decimals as the value grows.
pub fn format_bytes(bytes: Option<u64>) -> String {
    let Some(bytes) = bytes else {
        return "N/A".to_string();
    };
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let precision: usize = match value {
        v if v >= 100.0 => 0,
        v if v >= 10.0 => 1,
        _ => 2,
    };
    format!("{value:.precision$} {}", UNITS[unit])
}

/// Size reduction in percent; negative when the output grew.
pub fn percent_change(original: Option<u64>, output: Option<u64>) -> Option<f64> {
    match (original, output) {
        (Some(original), Some(output)) if original > 0 && output > 0 => {
            Some((original as f64 - output as f64) / original as f64 * 100.0)
        },
        _ => None,
    }
}

/// `-35.2%` for a reduction, `+4.0%` for growth.
pub fn format_percent_change(percent: Option<f64>) -> String {
    match percent {
        Some(percent) if percent.is_finite() => {
            let sign = if percent >= 0.0 { '-' } else { '+' };
            format!("{sign}{:.1}%", percent.abs())
        },
        _ => "N/A".to_string(),
    }
}

/// One line per task: status, name, sizes and where the output goes.
pub fn render_tasks(tasks: &[Task]) -> String {
    let mut out = String::new();
    for task in tasks {
        let output_bytes = task
            .computed()
            .map(|output| output.output_bytes())
            .or(task.last_known_output_bytes);
        let _ = write!(
            out,
            "{:<12} {}  {} -> {} ({})",
            task.status_label().to_string(),
            task.display_name,
            format_bytes(task.source_size_bytes),
            format_bytes(output_bytes),
            format_percent_change(percent_change(task.source_size_bytes, output_bytes)),
        );
        if let Some(path) = task.written_output_path.as_deref().or(task.computed().map(|o| o.planned_path.as_path())) {
            let _ = write!(out, "  {}", path.display());
        }
        if let Some(message) = task.error_message() {
            let _ = write!(out, "  [{message}]");
        }
        out.push('\n');
    }
    out
}

pub fn render_summary(summary: &Summary) -> String {
    format!(
        "{} selected, {} supported, {} precomputed, {} writable, {} written, {} failed",
        summary.total, summary.supported, summary.precompute_done, summary.writable, summary.written, summary.failed
    )
}

pub fn render_batch(report: &BatchReport) -> String {
    format!(
        "Batch write finished: {} succeeded, {} failed, {} skipped",
        report.succeeded, report.failed, report.skipped
    )
}
