//! Object paths for uploaded assets.
//!
//! Layout: `{namespace}/{lesson_id}/{timestamp_ms}_{sanitized_file_name}`.
//! The millisecond timestamp keeps re-uploads of the same file name apart.

use std::time::{SystemTime, UNIX_EPOCH};

/// Keep only `[A-Za-z0-9._-]`; an empty result becomes `file`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    // Dots alone would still resolve to `.` / `..`
    if cleaned.chars().all(|c| c == '.') {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Storage path of an asset uploaded for `lesson_id` at `timestamp_ms`
pub fn asset_path(namespace: &str, lesson_id: &str, file_name: &str, timestamp_ms: u128) -> String {
    let namespace = namespace.trim_matches('/');
    let lesson = sanitize_file_name(lesson_id);
    let file = sanitize_file_name(file_name);
    if namespace.is_empty() {
        format!("{lesson}/{timestamp_ms}_{file}")
    } else {
        format!("{namespace}/{lesson}/{timestamp_ms}_{file}")
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
