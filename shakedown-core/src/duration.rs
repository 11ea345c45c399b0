//! Duration strings of the form `<minutes>m<seconds>s`.
//!
//! Plans and cluster configs express times as compact strings: `"90s"`,
//! `"2m30s"`, `"2m"`, `"0s"`. Either component may be omitted. Parsing is
//! strict — any unconsumed input is an error — and an unparsable string is
//! a fatal configuration error at load time, before anything runs.

use std::time::Duration;
use thiserror::Error;

/// Error for a duration string that does not match `<m>m<s>s`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid duration {0:?} (expected <minutes>m<seconds>s, e.g. \"2m30s\" or \"90s\")")]
pub struct DurationError(
    /// The rejected input.
    pub String,
);

/// Parse a `<minutes>m<seconds>s` string into a [`Duration`].
///
/// Both components are optional; the empty string parses to zero. Leading
/// and trailing whitespace is ignored. Components must appear in
/// minutes-then-seconds order, each at most once.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    let (minutes, rest) = take_component(s, 'm').ok_or_else(|| DurationError(input.into()))?;
    let (seconds, rest) = take_component(rest, 's').ok_or_else(|| DurationError(input.into()))?;

    if !rest.is_empty() {
        return Err(DurationError(input.into()));
    }

    minutes
        .unwrap_or(0)
        .checked_mul(60)
        .and_then(|m| m.checked_add(seconds.unwrap_or(0)))
        .map(Duration::from_secs)
        .ok_or_else(|| DurationError(input.into()))
}

/// Format a [`Duration`] back into `<m>m<s>s` form.
///
/// Sub-second precision is discarded; zero formats as `"0s"`. Reparsing the
/// result always yields the same whole-second value.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (minutes, seconds) = (total / 60, total % 60);
    match (minutes, seconds) {
        (0, s) => format!("{s}s"),
        (m, 0) => format!("{m}m"),
        (m, s) => format!("{m}m{s}s"),
    }
}

/// Consume an optional `<digits><unit>` prefix.
///
/// Returns the parsed value (or `None` when the component is absent) and the
/// remaining input. Digits not followed by `unit` are left unconsumed so the
/// caller can reject trailing garbage; digits too large for `u64` are an
/// absent match for the same reason.
fn take_component(s: &str, unit: char) -> Option<(Option<u64>, &str)> {
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return Some((None, s));
    }
    let rest = &s[digits..];
    match rest.strip_prefix(unit) {
        Some(after) => {
            let value = s[..digits].parse::<u64>().ok()?;
            Some((Some(value), after))
        }
        // Digits belonging to a later component (e.g. "90s" while scanning
        // for 'm') are not consumed here.
        None => Some((None, s)),
    }
}
