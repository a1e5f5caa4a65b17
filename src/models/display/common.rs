//! Common display helpers

use chrono::{DateTime, Utc};

/// Placeholder for missing optional values
pub const EMPTY: &str = "-";

/// Truncate to `max_chars` characters, marking the cut with an ellipsis
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", kept)
}

pub fn or_empty(value: Option<&str>) -> String {
    value.map(str::to_string).unwrap_or_else(|| EMPTY.to_string())
}

/// Normalize an RFC 3339 timestamp to `YYYY-MM-DD HH:MM` UTC, passing
/// anything unparsable through untouched
pub fn short_timestamp(value: Option<&str>) -> String {
    match value {
        Some(ts) => match ts.parse::<DateTime<Utc>>() {
            Ok(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
            Err(_) => ts.to_string(),
        },
        None => EMPTY.to_string(),
    }
}
