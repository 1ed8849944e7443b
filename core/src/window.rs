//! Parses the `--since`/`--window` duration grammar shared by the CLI and
//! HTTP query parameters: `<n>{s|m|h|d}` or the literal `all`.

use chrono::{DateTime, Utc};

use crate::{LerimError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// A relative window expressed in whole seconds.
    Seconds(i64),
    /// No lower bound — the literal `all`.
    All,
}

/// Parses a window token. Accepts `<positive integer>{s,m,h,d}` or `all`.
/// Rejects zero-length windows and unknown units.
pub fn parse_window(raw: &str) -> Result<Window> {
    if raw == "all" {
        return Ok(Window::All);
    }

    let raw = raw.trim();
    let unit = raw
        .chars()
        .last()
        .ok_or_else(|| LerimError::Other("empty window string".to_string()))?;
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86_400,
        other => {
            return Err(LerimError::Other(format!(
                "unknown window unit '{other}', expected one of s,m,h,d or 'all'"
            )))
        }
    };

    let digits = &raw[..raw.len() - 1];
    let count: i64 = digits
        .parse()
        .map_err(|_| LerimError::Other(format!("invalid window value '{raw}'")))?;
    if count <= 0 {
        return Err(LerimError::Other(format!(
            "window '{raw}' must be a positive duration"
        )));
    }

    Ok(Window::Seconds(count * multiplier))
}

/// Resolves a parsed window, relative to `now`, into a concrete `since`
/// bound. `All` with an empty catalog resolves to `None` by the caller
/// simply never calling this — `All` always resolves to `None` here, and
/// catalog-emptiness is the caller's concern.
pub fn since_bound(window: Window, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match window {
        Window::All => None,
        Window::Seconds(secs) => Some(now - chrono::Duration::seconds(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_window("30s").unwrap(), Window::Seconds(30));
        assert_eq!(parse_window("2m").unwrap(), Window::Seconds(120));
        assert_eq!(parse_window("1h").unwrap(), Window::Seconds(3600));
        assert_eq!(parse_window("1d").unwrap(), Window::Seconds(86_400));
    }

    #[test]
    fn parses_all_literal() {
        assert_eq!(parse_window("all").unwrap(), Window::All);
    }

    #[test]
    fn rejects_zero_duration() {
        assert!(parse_window("0s").is_err());
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_window("5w").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_window("abc").is_err());
        assert!(parse_window("").is_err());
    }

    #[test]
    fn all_resolves_to_no_lower_bound() {
        let now = Utc::now();
        assert_eq!(since_bound(Window::All, now), None);
    }

    #[test]
    fn seconds_resolves_relative_to_now() {
        let now = Utc::now();
        let resolved = since_bound(Window::Seconds(60), now).unwrap();
        assert_eq!(now - resolved, chrono::Duration::seconds(60));
    }
}
