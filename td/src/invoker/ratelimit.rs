//! Rate-limit signature detection (spec.md §4.8, DESIGN NOTES §9).
//!
//! Represented as an explicit pattern table with one detection entry point,
//! rather than ad-hoc substring matching, so new providers are additive.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Provider-side throttling category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    RequestsPerMinute,
    DailyQuota,
    TokenBudget,
}

/// Parsed rate-limit descriptor (spec.md §3 PauseState "discovered
/// rate-limit descriptor").
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub kind: LimitKind,
    pub resume_at: DateTime<Utc>,
    pub raw_message: String,
}

struct Pattern {
    kind: LimitKind,
    regex: &'static LazyLock<Regex>,
    extract: fn(&Captures, &str) -> Option<DateTime<Utc>>,
}

static RESET_EPOCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)rate limit.*reset at (\d+)").unwrap());
static RETRY_AFTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)retry.after[: ]+(\d+)\s*(s|sec|seconds|m|min|minutes)?").unwrap());
static DAILY_QUOTA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)daily (quota|limit) exceeded").unwrap());
static TOKEN_BUDGET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)token (budget|quota) exceeded").unwrap());

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        Pattern {
            kind: LimitKind::RequestsPerMinute,
            regex: &RESET_EPOCH_RE,
            extract: |captures, _| {
                let epoch: i64 = captures.get(1)?.as_str().parse().ok()?;
                DateTime::from_timestamp(epoch, 0)
            },
        },
        Pattern {
            kind: LimitKind::RequestsPerMinute,
            regex: &RETRY_AFTER_RE,
            extract: |captures, _| {
                let amount: i64 = captures.get(1)?.as_str().parse().ok()?;
                let unit = captures.get(2).map(|m| m.as_str()).unwrap_or("s");
                let delta = if unit.starts_with('m') {
                    ChronoDuration::minutes(amount)
                } else {
                    ChronoDuration::seconds(amount)
                };
                Some(Utc::now() + delta)
            },
        },
        Pattern {
            kind: LimitKind::DailyQuota,
            regex: &DAILY_QUOTA_RE,
            extract: |_, _| Some(Utc::now() + ChronoDuration::hours(24)),
        },
        Pattern {
            kind: LimitKind::TokenBudget,
            regex: &TOKEN_BUDGET_RE,
            extract: |_, _| Some(Utc::now() + ChronoDuration::hours(1)),
        },
    ]
});

/// Single detection entry point: scans combined stdout/stderr text for a
/// known rate-limit signature, regardless of exit code (spec.md §6).
pub fn detect(output: &str) -> Option<RateLimitInfo> {
    for pattern in PATTERNS.iter() {
        if let Some(captures) = pattern.regex.captures(output) {
            if let Some(resume_at) = (pattern.extract)(&captures, output) {
                return Some(RateLimitInfo {
                    kind: pattern.kind,
                    resume_at,
                    raw_message: output.lines().last().unwrap_or(output).to_string(),
                });
            }
        }
    }
    None
}
