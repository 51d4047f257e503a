//! Rate-limit block detection over captured pane text.
//!
//! Every phrasing and reset-time format the daemon understands lives in this
//! module. Only the tail of a capture is inspected, and when several reset
//! expressions are present the one appearing last wins.

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::DaemonConfig;
use crate::types::ResetSource;

lazy_static! {
    // Each phrase needs rate-limit context: a bare "limit" or "usage limit"
    // shows up in ordinary output ("context limit", "memory usage limit").
    static ref BLOCK_PATTERN: Regex = Regex::new(concat!(
        r"(?i)(?:\brate[ -]?limit(?:ed|ing|s? (?:reached|exceeded|hit))\b",
        r"|\brate_limit_(?:error|exceeded)\b",
        r"|\busage limit (?:reached|exceeded|hit)\b",
        r"|\b(?:\d+[- ]hours?|daily|weekly|monthly|session|opus|sonnet) limit (?:reached|exceeded)\b",
        r"|\btoo many requests\b",
        r"|\b(?:error|status|code|http)\W{0,3}429\b",
        r"|\bquota (?:exceeded|exhausted|reached)\b",
        r"|\byou(?:'|’)ve (?:hit|reached) your (?:(?:usage|rate|session|daily|weekly|\d+[- ]hours?) )?limit\b)",
    ))
    .unwrap();

    // "in 5 minutes", "after 1h 30m", "in 2 hours and 5 minutes"
    static ref RELATIVE_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:in|after)\s+((?:\d+\s*(?:hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)(?:\s*,?\s*(?:and\s+)?)?)+)\b"
    )
    .unwrap();

    static ref DURATION_UNIT: Regex =
        Regex::new(r"(?i)(\d+)\s*(hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)").unwrap();

    // "in 04:59", "in 1:02:03"
    static ref COUNTDOWN_PATTERN: Regex =
        Regex::new(r"(?i)\b(?:in|after)\s+(?:(\d{1,2}):)?(\d{1,2}):(\d{2})\b").unwrap();

    // "resets at 3pm", "reset at 14:30", "try again at 2:05 PM", "resets 10:30pm"
    static ref ABSOLUTE_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:resets?|available|again|until)\s+(?:at\s+)?(\d{1,2})(?::(\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)?"
    )
    .unwrap();

    // "usage limit reached|1735689600"
    static ref EPOCH_PATTERN: Regex =
        Regex::new(r"(?i)\blimit\s+reached\s*\|\s*(\d{10}|\d{13})\b").unwrap();
}

/// A reset time more than this far in the past is read as tomorrow's.
const PASSED_CLOCK_GRACE_MINUTES: i64 = 60;

/// Longest wait accepted from a relative expression.
const MAX_RELATIVE_SECS: i64 = 8 * 24 * 3600;

const CONTEXT_LINES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMatch {
    pub reset_at: DateTime<Utc>,
    /// The matched reset expression, or the block phrase for fallbacks.
    pub expression: String,
    pub source: ResetSource,
    /// Trimmed line holding the authoritative match.
    pub signature: String,
    /// How many lines of the inspected tail read exactly like `signature`.
    pub occurrences: usize,
    /// The non-blank lines just above the signature line, taken from the
    /// whole capture. Output scrolling past a message leaves this alone, so
    /// it tells a message still on screen from a later copy with the same
    /// wording.
    pub context: String,
}

#[derive(Debug)]
struct Candidate {
    start: usize,
    reset_at: DateTime<Utc>,
    expression: String,
    source: ResetSource,
}

#[derive(Debug, Clone)]
pub struct BlockDetector {
    tail_lines: usize,
    fallback_wait: Duration,
}

impl BlockDetector {
    pub fn new(tail_lines: usize, fallback_wait: std::time::Duration) -> Self {
        Self {
            tail_lines,
            fallback_wait: Duration::from_std(fallback_wait).unwrap_or(Duration::minutes(5)),
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(config.tail_lines, config.fallback_wait)
    }

    /// Classify `text` captured at `captured_at`, reading clock times in the
    /// host's local timezone.
    pub fn detect(&self, text: &str, captured_at: DateTime<Utc>) -> Option<BlockMatch> {
        self.detect_in(text, captured_at, &Local)
    }

    /// Same as [`detect`](Self::detect) with clock times read in `tz`.
    pub fn detect_in<Tz: TimeZone>(
        &self,
        text: &str,
        captured_at: DateTime<Utc>,
        tz: &Tz,
    ) -> Option<BlockMatch> {
        let tail = tail_lines(text, self.tail_lines);
        let first_block = BLOCK_PATTERN.find(tail)?;

        // Expressions above the first block message belong to unrelated output.
        let region_start = line_start(tail, first_block.start());
        let region = &tail[region_start..];
        let tail_start = text.trim_end().len() - tail.len();

        let mut best: Option<Candidate> = None;
        for candidate in reset_candidates(region, captured_at, tz) {
            if best.as_ref().map_or(true, |b| candidate.start > b.start) {
                best = Some(candidate);
            }
        }

        let (reset_at, expression, source, at) = match best {
            Some(c) => (c.reset_at, c.expression, c.source, c.start),
            None => {
                let last_block = BLOCK_PATTERN.find_iter(region).last()?;
                (
                    captured_at + self.fallback_wait,
                    last_block.as_str().to_string(),
                    ResetSource::Fallback,
                    last_block.start(),
                )
            }
        };

        let signature = line_at(region, at);
        let occurrences = region.lines().filter(|l| l.trim() == signature).count();
        let context = lines_above(text, tail_start + region_start + at, CONTEXT_LINES);
        Some(BlockMatch {
            reset_at,
            expression,
            source,
            signature,
            occurrences,
            context,
        })
    }
}

fn reset_candidates<Tz: TimeZone>(
    region: &str,
    captured_at: DateTime<Utc>,
    tz: &Tz,
) -> Vec<Candidate> {
    let mut out = Vec::new();

    for caps in RELATIVE_PATTERN.captures_iter(region) {
        let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let secs = sum_duration(spec.as_str());
        if secs > 0 {
            out.push(Candidate {
                start: whole.start(),
                reset_at: captured_at + Duration::seconds(secs),
                expression: whole.as_str().trim().trim_end_matches(',').trim().to_string(),
                source: ResetSource::Relative,
            });
        }
    }

    for caps in COUNTDOWN_PATTERN.captures_iter(region) {
        let Some(whole) = caps.get(0) else { continue };
        let hours: i64 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let (Ok(minutes), Ok(seconds)) = (caps[2].parse::<i64>(), caps[3].parse::<i64>()) else {
            continue;
        };
        if seconds >= 60 || (caps.get(1).is_some() && minutes >= 60) {
            continue;
        }
        let secs = hours * 3600 + minutes * 60 + seconds;
        out.push(Candidate {
            start: whole.start(),
            reset_at: captured_at + Duration::seconds(secs),
            expression: whole.as_str().to_string(),
            source: ResetSource::Countdown,
        });
    }

    for caps in ABSOLUTE_PATTERN.captures_iter(region) {
        let Some(whole) = caps.get(0) else { continue };
        let minute = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        let meridiem = caps.get(3).map(|m| m.as_str());
        // A bare number ("resets 3 times") is not a clock time.
        if minute.is_none() && meridiem.is_none() {
            continue;
        }
        let Ok(hour) = caps[1].parse::<u32>() else {
            continue;
        };
        if let Some(reset_at) =
            resolve_clock_time(hour, minute.unwrap_or(0), meridiem, captured_at, tz)
        {
            out.push(Candidate {
                start: whole.start(),
                reset_at,
                expression: whole.as_str().trim().to_string(),
                source: ResetSource::Absolute,
            });
        }
    }

    for caps in EPOCH_PATTERN.captures_iter(region) {
        let Some(whole) = caps.get(0) else { continue };
        let Ok(raw) = caps[1].parse::<i64>() else {
            continue;
        };
        let secs = if caps[1].len() == 13 { raw / 1000 } else { raw };
        if let Some(reset_at) = DateTime::from_timestamp(secs, 0) {
            out.push(Candidate {
                start: whole.start(),
                reset_at,
                expression: whole.as_str().to_string(),
                source: ResetSource::Epoch,
            });
        }
    }

    out
}

fn sum_duration(spec: &str) -> i64 {
    let total = DURATION_UNIT
        .captures_iter(spec)
        .filter_map(|caps| {
            let n: i64 = caps[1].parse().ok()?;
            let unit = caps[2].to_ascii_lowercase();
            let scale = match unit.chars().next() {
                Some('h') => 3600,
                Some('m') => 60,
                _ => 1,
            };
            n.checked_mul(scale)
        })
        .fold(0i64, |acc, secs| acc.saturating_add(secs));
    total.min(MAX_RELATIVE_SECS)
}

fn resolve_clock_time<Tz: TimeZone>(
    hour: u32,
    minute: u32,
    meridiem: Option<&str>,
    captured_at: DateTime<Utc>,
    tz: &Tz,
) -> Option<DateTime<Utc>> {
    let hour = match meridiem {
        Some(m) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            let pm = m.to_ascii_lowercase().starts_with('p');
            hour % 12 + if pm { 12 } else { 0 }
        }
        None => hour,
    };
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;

    let today = captured_at.with_timezone(tz).date_naive();
    let candidate = tz
        .from_local_datetime(&today.and_time(time))
        .earliest()?
        .with_timezone(&Utc);

    if candidate + Duration::minutes(PASSED_CLOCK_GRACE_MINUTES) >= captured_at {
        return Some(candidate);
    }

    let tomorrow = today.succ_opt()?;
    tz.from_local_datetime(&tomorrow.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Last `n` lines of `text`, ignoring trailing blank lines (tmux pads the
/// unused bottom of a pane with them).
fn tail_lines(text: &str, n: usize) -> &str {
    let trimmed = text.trim_end();
    if n == 0 {
        return "";
    }
    let mut start = trimmed.len();
    for _ in 0..n {
        match trimmed[..start].rfind('\n') {
            Some(i) => start = i,
            None => return trimmed,
        }
    }
    &trimmed[start + 1..]
}

fn line_start(text: &str, idx: usize) -> usize {
    text[..idx].rfind('\n').map_or(0, |i| i + 1)
}

/// Up to `n` non-blank trimmed lines ending just above the line holding `idx`.
fn lines_above(text: &str, idx: usize, n: usize) -> String {
    let mut above: Vec<&str> = text[..line_start(text, idx)]
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(n)
        .collect();
    above.reverse();
    above.join("\n")
}

fn line_at(text: &str, idx: usize) -> String {
    let start = line_start(text, idx);
    let end = text[idx..].find('\n').map_or(text.len(), |i| idx + i);
    text[start..end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn detector() -> BlockDetector {
        BlockDetector::new(40, std::time::Duration::from_secs(300))
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
    }

    fn detect(text: &str, captured_at: DateTime<Utc>) -> Option<BlockMatch> {
        detector().detect_in(text, captured_at, &Utc)
    }

    #[test]
    fn relative_minutes_resolve_against_capture_time() {
        let t = at(12, 0);
        let m = detect("rate limited, retry in 5 minutes", t).unwrap();

        assert_eq!(m.reset_at, t + Duration::seconds(300));
        assert_eq!(m.source, ResetSource::Relative);
        assert_eq!(m.expression, "in 5 minutes");
        assert_eq!(m.signature, "rate limited, retry in 5 minutes");
    }

    #[test]
    fn unrelated_text_is_not_a_block() {
        let t = at(12, 0);
        assert!(detect("cargo build finished in 5 minutes", t).is_none());
        assert!(detect("Compiling waitmux v0.1.0\nwarning: unused import", t).is_none());
        assert!(detect("src/lib.rs:429: fn main()", t).is_none());
        assert!(detect("Edited src/rate_limit.rs (+42 -3)", t).is_none());
        assert!(detect("Added a moderate limit to the retry budget", t).is_none());
        assert!(detect("Context limit reached · /compact or /clear to continue", t).is_none());
        assert!(detect("warning: memory usage limit is 2GB", t).is_none());
        assert!(detect("You've reached the context limit for this chat", t).is_none());
    }

    #[test]
    fn block_phrasings_are_recognised() {
        let t = at(12, 0);
        for text in [
            "Claude usage limit reached.",
            "5-hour limit reached",
            "Weekly limit exceeded",
            "rate_limit_error",
            "Ratelimited by upstream",
            "HTTP 429",
            "Quota exhausted for this project",
            "You've hit your usage limit",
        ] {
            let m = detect(text, t);
            assert!(m.is_some(), "{text:?} should be a block");
            assert_eq!(m.unwrap().source, ResetSource::Fallback);
        }
    }

    #[test]
    fn latest_appearing_expression_wins_even_if_earlier() {
        let t = at(12, 0);
        let text = "Rate limit reached. Retry in 30 minutes.\n\
                    > continue\n\
                    Rate limit reached. Retry in 10 minutes.";
        let m = detect(text, t).unwrap();

        assert_eq!(m.reset_at, t + Duration::minutes(10));
        assert_eq!(m.signature, "Rate limit reached. Retry in 10 minutes.");
    }

    #[test]
    fn later_absolute_time_overrides_earlier_relative_one() {
        let t = at(12, 0);
        let text = "Usage limit reached, resets in 3 hours\nUsage limit reached, resets at 12:30";
        let m = detect(text, t).unwrap();

        assert_eq!(m.reset_at, at(12, 30));
        assert_eq!(m.source, ResetSource::Absolute);
    }

    #[test]
    fn compound_relative_durations() {
        let t = at(12, 0);
        let m = detect("Too many requests. Try again in 1h 30m", t).unwrap();
        assert_eq!(m.reset_at, t + Duration::seconds(5400));

        let m = detect("rate_limit_error: retry after 2 hours and 5 minutes.", t).unwrap();
        assert_eq!(m.reset_at, t + Duration::seconds(7500));

        let m = detect("Rate limited (retrying in 30s)", t).unwrap();
        assert_eq!(m.reset_at, t + Duration::seconds(30));
    }

    #[test]
    fn countdown_formats() {
        let t = at(12, 0);
        let m = detect("Too many requests, retry in 04:59", t).unwrap();
        assert_eq!(m.reset_at, t + Duration::seconds(299));
        assert_eq!(m.source, ResetSource::Countdown);

        let m = detect("Rate limit reached: available again in 1:02:03", t).unwrap();
        assert_eq!(m.reset_at, t + Duration::seconds(3723));
    }

    #[test]
    fn absolute_clock_time_today_tomorrow_and_grace() {
        let text = "Claude usage limit reached. Your limit will reset at 3pm (America/Los_Angeles).";

        let m = detect(text, at(13, 0)).unwrap();
        assert_eq!(m.reset_at, at(15, 0));
        assert_eq!(m.source, ResetSource::Absolute);

        // Just passed: already due rather than a day away
        let m = detect(text, at(15, 20)).unwrap();
        assert_eq!(m.reset_at, at(15, 0));

        let m = detect(text, at(17, 0)).unwrap();
        assert_eq!(m.reset_at, Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap());
    }

    #[test]
    fn twenty_four_hour_and_meridiem_with_minutes() {
        let m = detect("5-hour limit reached ∙ resets 10:30pm", at(20, 0)).unwrap();
        assert_eq!(m.reset_at, at(22, 30));

        let m = detect("Rate limit exceeded. Try again at 2:05 PM", at(9, 0)).unwrap();
        assert_eq!(m.reset_at, at(14, 5));

        let m = detect("quota exceeded, reset at 14:30", at(9, 0)).unwrap();
        assert_eq!(m.reset_at, at(14, 30));
    }

    #[test]
    fn epoch_marker() {
        let m = detect("Claude AI usage limit reached|1772377200", at(9, 0)).unwrap();
        assert_eq!(m.reset_at, DateTime::from_timestamp(1772377200, 0).unwrap());
        assert_eq!(m.source, ResetSource::Epoch);
    }

    #[test]
    fn block_without_time_uses_fallback() {
        let t = at(12, 0);
        let m = detect("API Error: 429 Too Many Requests", t).unwrap();

        assert_eq!(m.source, ResetSource::Fallback);
        assert_eq!(m.reset_at, t + Duration::seconds(300));
        assert_eq!(m.signature, "API Error: 429 Too Many Requests");
    }

    #[test]
    fn bare_number_after_reset_is_not_a_time() {
        let m = detect("rate limit hit; the counter resets 3 times a day", at(12, 0)).unwrap();
        assert_eq!(m.source, ResetSource::Fallback);
    }

    #[test]
    fn block_scrolled_out_of_tail_is_ignored() {
        let mut text = String::from("Rate limit reached, retry in 5 minutes\n");
        for i in 0..50 {
            text.push_str(&format!("working on step {}\n", i));
        }
        assert!(detect(&text, at(12, 0)).is_none());
    }

    #[test]
    fn trailing_blank_lines_do_not_push_block_out() {
        let mut text = String::from("Rate limit reached, retry in 5 minutes\n");
        text.push_str(&"\n".repeat(120));
        assert!(detect(&text, at(12, 0)).is_some());
    }

    #[test]
    fn expressions_before_block_message_are_ignored() {
        let text = "tests finished in 2 minutes\nAPI Error: Rate limit reached";
        let m = detect(text, at(12, 0)).unwrap();
        assert_eq!(m.source, ResetSource::Fallback);
        assert_eq!(m.signature, "API Error: Rate limit reached");
    }

    #[test]
    fn repeated_identical_messages_are_counted() {
        let text = "Rate limit reached, retry in 5 minutes\n> continue\nRate limit reached, retry in 5 minutes";
        let m = detect(text, at(12, 0)).unwrap();
        assert_eq!(m.occurrences, 2);

        let m = detect("Rate limit reached, retry in 5 minutes", at(12, 0)).unwrap();
        assert_eq!(m.occurrences, 1);
    }

    #[test]
    fn context_comes_from_lines_above_the_signature() {
        let m = detect("$ claude\n\n> fix the parser\nAPI Error: 429 Too Many Requests", at(12, 0))
            .unwrap();
        assert_eq!(m.context, "$ claude\n> fix the parser");

        let mut text = String::from("continue\n");
        for i in 0..60 {
            text.push_str(&format!("work line {}\n", i));
        }
        text.push_str("API Error: 429 Too Many Requests");
        let m = detect(&text, at(12, 0)).unwrap();
        assert_eq!(m.context, "work line 58\nwork line 59");

        let m = detect("API Error: 429 Too Many Requests", at(12, 0)).unwrap();
        assert_eq!(m.context, "");
    }

    #[test]
    fn tail_lines_helper() {
        assert_eq!(tail_lines("a\nb\nc\n\n\n", 2), "b\nc");
        assert_eq!(tail_lines("a\nb", 5), "a\nb");
        assert_eq!(tail_lines("a\nb", 0), "");
    }
}
