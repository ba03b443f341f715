use std::time::Duration;

use regex::Regex;
use std::sync::OnceLock;

/// Parses OpenAI's `x-ratelimit-reset-{requests,tokens}` header format,
/// e.g. `"6m0s"`, `"1s"`, `"100ms"`, `"1m6.5s"` (spec.md §4.1
/// `updateRateLimits`: `\d+m?\d+(\.\d+)?s?\d*ms?`).
pub fn parse_reset_duration(value: &str) -> Option<Duration> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(\d+)m)?(?:(\d+(?:\.\d+)?)s)?(?:(\d+)ms)?$").expect("static regex")
    });

    let caps = re.captures(value.trim())?;
    let minutes: f64 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0.0);
    let seconds: f64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0.0);
    let millis: f64 = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0.0);

    if minutes == 0.0 && seconds == 0.0 && millis == 0.0 && value.trim().is_empty() {
        return None;
    }

    let total_ms = minutes * 60_000.0 + seconds * 1_000.0 + millis;
    Some(Duration::from_millis(total_ms.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minutes_and_seconds() {
        assert_eq!(parse_reset_duration("6m0s"), Some(Duration::from_secs(360)));
    }

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_reset_duration("1s"), Some(Duration::from_secs(1)));
    }

    #[test]
    fn parses_milliseconds() {
        assert_eq!(parse_reset_duration("100ms"), Some(Duration::from_millis(100)));
    }

    #[test]
    fn parses_fractional_seconds_with_minutes() {
        assert_eq!(
            parse_reset_duration("1m6.5s"),
            Some(Duration::from_millis(66_500))
        );
    }

    #[test]
    fn empty_string_is_none() {
        assert_eq!(parse_reset_duration(""), None);
    }
}
