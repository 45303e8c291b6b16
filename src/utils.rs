//! Shared utility helpers.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current UTC time as ISO-8601 with second precision
/// (e.g. `2024-05-01T12:00:00Z`).
pub fn utc_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Format `at` the way session entries and log events are stamped.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Compact, filename-safe UTC stamp used as an archive suffix
/// (e.g. `20240501T120000Z`).
pub fn archive_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Truncate a string to `max` bytes on a char boundary, appending `…` if trimmed.
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Prefers breaking on the last newline inside a chunk so paragraphs
/// stay intact; falls back to a hard split.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest: Vec<char> = text.chars().collect();
    while rest.len() > max_chars {
        let window = &rest[..max_chars];
        let cut = window
            .iter()
            .rposition(|c| *c == '\n')
            .filter(|&i| i > 0)
            .map(|i| i + 1)
            .unwrap_or(max_chars);
        chunks.push(rest[..cut].iter().collect());
        rest = rest.split_off(cut);
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.into_iter().collect());
    }
    chunks
}
