use crate::types::{BlockedPane, RateLimitStatus};
use chrono::{DateTime, Utc};

/// Status for a single reset time as seen at `now`.
///
/// Limited strictly before the reset; at or after it the pane is free.
pub fn resolve_status(reset_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> RateLimitStatus {
    match reset_at {
        Some(reset_at) if now < reset_at => RateLimitStatus {
            is_limited: true,
            reset_at: Some(reset_at),
            remaining_seconds: Some(reset_at.signed_duration_since(now).num_seconds().max(0)),
        },
        _ => RateLimitStatus::not_limited(),
    }
}

/// Aggregate status over tracked panes: limited while any pending pane is
/// still waiting, reporting the earliest upcoming reset.
pub fn aggregate_status<'a>(
    panes: impl IntoIterator<Item = &'a BlockedPane>,
    now: DateTime<Utc>,
) -> RateLimitStatus {
    let next_reset = panes
        .into_iter()
        .filter(|p| !p.resumed && p.reset_at > now)
        .map(|p| p.reset_at)
        .min();
    resolve_status(next_reset, now)
}

/// Format time until reset in human-readable form
pub fn format_time_until_reset(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = reset_at.signed_duration_since(now);

    if duration.num_seconds() <= 0 {
        return "Reset time has passed".to_string();
    }

    let hours = duration.num_hours();
    let minutes = duration.num_minutes() % 60;
    let seconds = duration.num_seconds() % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Format rate limit status as a human-readable string
pub fn format_rate_limit_status(status: &RateLimitStatus, now: DateTime<Utc>) -> String {
    if !status.is_limited {
        return "No active rate limits".to_string();
    }

    let mut parts = vec!["Rate limit active".to_string()];

    if let Some(reset_at) = status.reset_at {
        parts.push(format!(
            "Resets in: {}",
            format_time_until_reset(reset_at, now)
        ));
        parts.push(format!(
            "Reset time: {}",
            reset_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }

    parts.join("\n")
}
