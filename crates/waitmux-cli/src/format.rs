//! Human-readable output for status and detect.

use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use waitmux_daemon::{format_rate_limit_status, format_time_until_reset, BlockedPane, StatusReport};

fn local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn pane_line(pane: &BlockedPane, now: DateTime<Utc>) -> String {
    let wait = if pane.resumed {
        "resumed".green().to_string()
    } else if pane.reset_at <= now {
        "due".yellow().to_string()
    } else {
        format!("resets in {}", format_time_until_reset(pane.reset_at, now))
    };
    format!(
        "  {} {}:{}  {}  {}",
        pane.pane_id.yellow(),
        pane.session_label,
        pane.window_index,
        wait,
        format!("({})", pane.reset_expression).dimmed()
    )
}

pub fn status_text(report: &StatusReport, now: DateTime<Utc>) -> String {
    let state = &report.state;
    let mut lines = Vec::new();

    let daemon = match state.pid {
        _ if report.is_running() => format!(
            "{} (PID {})",
            "running".green().bold(),
            state.pid.unwrap_or_default()
        ),
        Some(pid) if report.stale => format!(
            "{} (stale state from PID {})",
            "not running".yellow().bold(),
            pid
        ),
        _ => "stopped".dimmed().to_string(),
    };
    lines.push(format!("{}: {}", "Daemon".cyan(), daemon));

    if let Some(err) = &report.load_error {
        lines.push(format!("{}: {}", "State file unreadable".red(), err));
    }
    if let Some(started) = state.started_at {
        lines.push(format!("{}: {}", "Started".cyan(), local(started)));
    }
    if let Some(scan) = state.last_scan_at {
        lines.push(format!("{}: {}", "Last scan".cyan(), local(scan)));
    }

    lines.push(format!(
        "{}: {}",
        "Tracked panes".cyan(),
        state.tracked_panes.len()
    ));
    for pane in state.tracked_panes.values() {
        lines.push(pane_line(pane, now));
    }

    lines.push(format!(
        "{}: {}/{}",
        "Resumes".cyan(),
        state.successful_resumes,
        state.total_resume_attempts
    ));
    if state.error_count > 0 {
        let last = state.last_error.as_deref().unwrap_or("unknown");
        lines.push(format!(
            "{}: {} (last: {})",
            "Errors".cyan(),
            state.error_count,
            last.dimmed()
        ));
    }

    lines.push(String::new());
    lines.push(format_rate_limit_status(&report.rate_limit, now));
    lines.join("\n")
}

pub fn detect_text(panes: &[BlockedPane], now: DateTime<Utc>) -> String {
    if panes.is_empty() {
        return "No rate-limited panes found".dimmed().to_string();
    }

    let mut lines = vec![format!(
        "{} {}",
        panes.len().to_string().bold(),
        "rate-limited pane(s):".cyan()
    )];
    for pane in panes {
        lines.push(pane_line(pane, now));
        lines.push(format!("    {}", pane.signature.dimmed()));
    }
    lines.join("\n")
}
