//! Parsing helpers shared by the engine configuration and its callers.

use crate::error::StorageError;
use crate::types::TagSet;
use std::collections::HashMap;
use std::time::Duration;

/// Parses a duration string made of an integer and one of the suffixes `ms`, `s`, `mn`, `h`, `d`.
///
/// e.g. `"2h"` => 7200 seconds, `"250ms"` => 250 milliseconds.
pub fn parse_duration(s: &str) -> Result<Duration, StorageError> {
    let s = s.trim();
    let invalid = || StorageError::InvalidDuration(format!("can't parse time {:?}", s));

    // Two-letter suffixes first: "ms" would otherwise be read as "s".
    let (digits, unit_ms): (&str, u64) = if let Some(d) = s.strip_suffix("ms") {
        (d, 1)
    } else if let Some(d) = s.strip_suffix("mn") {
        (d, 60 * 1000)
    } else if let Some(d) = s.strip_suffix('s') {
        (d, 1000)
    } else if let Some(d) = s.strip_suffix('h') {
        (d, 60 * 60 * 1000)
    } else if let Some(d) = s.strip_suffix('d') {
        (d, 24 * 60 * 60 * 1000)
    } else {
        return Err(invalid());
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    let millis = n.checked_mul(unit_ms).ok_or_else(invalid)?;

    Ok(Duration::from_millis(millis))
}

/// Parses a backend option string of the form `key=value&key=value`.
///
/// A leading `?` is ignored, as are empty segments. Later keys win.
pub fn parse_options(s: &str) -> Result<HashMap<String, String>, StorageError> {
    let mut out = HashMap::new();
    for pair in s.trim().trim_start_matches('?').split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            StorageError::ConfigError(format!("malformed option {:?}, expected key=value", pair))
        })?;
        out.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(out)
}

/// Parses a comma separated `key:value` list into a tag set.
///
/// e.g. `"warm:kitty,soft:kitty"` => `{"warm": "kitty", "soft": "kitty"}`.
/// Entries that are not exactly one `key:value` pair are skipped.
pub fn parse_tags(s: &str) -> TagSet {
    s.split(',')
        .filter_map(|tag| {
            let mut parts = tag.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(k), Some(v), None) => Some((k.to_string(), v.to_string())),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_suffixes() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5mn").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn rejects_malformed_durations() {
        for bad in ["", "s", "30", "30m", "-5s", "1.5h", "abc", "3 d"] {
            assert!(
                matches!(parse_duration(bad), Err(StorageError::InvalidDuration(_))),
                "{:?} should not parse",
                bad
            );
        }
    }

    #[test]
    fn parses_option_string() {
        let opts = parse_options("granularity=10s&retention=1h").unwrap();
        assert_eq!(opts.get("granularity").map(String::as_str), Some("10s"));
        assert_eq!(opts.get("retention").map(String::as_str), Some("1h"));

        assert!(parse_options("").unwrap().is_empty());
        assert_eq!(parse_options("?retention=2d&").unwrap().len(), 1);
        assert!(parse_options("granularity").is_err());
    }

    #[test]
    fn parses_tag_query() {
        let tags = parse_tags("warm:kitty,soft:kitty,broken,a:b:c");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("warm").map(String::as_str), Some("kitty"));
        assert_eq!(tags.get("soft").map(String::as_str), Some("kitty"));
        assert!(parse_tags("").is_empty());
    }
}
