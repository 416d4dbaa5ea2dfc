//! Shared formatting utilities used by the renderer and the CLI
//!
//! Pure functions only: byte sizes, transfer rates, durations, relative
//! timestamps, HTML escaping and string truncation.

use chrono::{DateTime, Utc};

/// Size constants (in bytes)
pub mod size {
    pub const KB: u64 = 1024;
    pub const MB: u64 = KB * 1024;
    pub const GB: u64 = MB * 1024;
    pub const TB: u64 = GB * 1024;
}

/// Date format keyword that selects relative rendering ("5m ago").
pub const RELATIVE_DATE_FORMAT: &str = "relative";

/// Truncate a string to a maximum length (in characters), adding "..." at the end if truncated.
///
/// This function is Unicode-safe and counts characters, not bytes.
///
/// # Examples
/// ```
/// use qmon::formatting::truncate_string;
/// assert_eq!(truncate_string("hello", 10), "hello");
/// assert_eq!(truncate_string("hello world", 8), "hello...");
/// assert_eq!(truncate_string("ab", 2), "ab");
/// ```
#[must_use]
pub fn truncate_string(s: &str, max_len: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format duration in verbose human-readable style (e.g., "2d 3h", "5h 30m").
///
/// Shows at most 2 time units for readability.
///
/// # Examples
/// ```
/// use qmon::formatting::format_duration_human;
/// assert_eq!(format_duration_human(0), "0s");
/// assert_eq!(format_duration_human(45), "45s");
/// assert_eq!(format_duration_human(3660), "1h 1m");
/// assert_eq!(format_duration_human(90000), "1d 1h");
/// ```
#[must_use]
pub fn format_duration_human(seconds: u64) -> String {
    if seconds == 0 {
        return "0s".to_string();
    }

    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    } else if hours > 0 {
        if minutes > 0 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}h", hours)
        }
    } else if minutes > 0 {
        if secs > 0 {
            format!("{}m {}s", minutes, secs)
        } else {
            format!("{}m", minutes)
        }
    } else {
        format!("{}s", secs)
    }
}

/// Format raw bytes to human-readable size.
///
/// # Examples
/// ```
/// use qmon::formatting::format_bytes;
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// assert_eq!(format_bytes(1073741824), "1.0 GB");
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    use size::{GB, KB, MB, TB};

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a transfer rate given in bytes per second.
///
/// # Examples
/// ```
/// use qmon::formatting::format_speed;
/// assert_eq!(format_speed(0), "0 B/s");
/// assert_eq!(format_speed(2 * 1024 * 1024), "2.0 MB/s");
/// ```
#[must_use]
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

/// Format a percentage with one decimal place, e.g. `42.5%`.
#[must_use]
pub fn format_percent(pct: f64) -> String {
    format!("{:.1}%", pct)
}

/// Format `then` relative to `now` ("just now", "5m ago", "in 2h").
///
/// # Examples
/// ```
/// use chrono::{Duration, Utc};
/// use qmon::formatting::format_relative_time;
/// let now = Utc::now();
/// assert_eq!(format_relative_time(now, now), "just now");
/// assert_eq!(format_relative_time(now - Duration::seconds(300), now), "5m ago");
/// assert_eq!(format_relative_time(now + Duration::seconds(7200), now), "in 2h");
/// ```
#[must_use]
pub fn format_relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(then).num_seconds();
    if delta.abs() < 5 {
        "just now".to_string()
    } else if delta > 0 {
        format!("{} ago", format_duration_human(delta as u64))
    } else {
        format!("in {}", format_duration_human(delta.unsigned_abs()))
    }
}

/// Format a timestamp according to a user date-format preference.
///
/// `"relative"` selects [`format_relative_time`]; anything else is treated as
/// a chrono strftime pattern. An empty pattern falls back to RFC 3339-ish output.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>, date_format: &str, now: DateTime<Utc>) -> String {
    if date_format.eq_ignore_ascii_case(RELATIVE_DATE_FORMAT) {
        return format_relative_time(ts, now);
    }
    let pattern = if date_format.is_empty() {
        "%Y-%m-%d %H:%M:%S"
    } else {
        date_format
    };

    // An invalid strftime pattern makes Display fail; use fmt::Write to catch it.
    use std::fmt::Write;
    let mut out = String::new();
    match write!(out, "{}", ts.format(pattern)) {
        Ok(()) => out,
        Err(_) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

/// Escape text for safe inclusion in HTML element content or attribute values.
///
/// # Examples
/// ```
/// use qmon::formatting::escape_html;
/// assert_eq!(escape_html("<b>\"Tom\" & 'Jerry'</b>"),
///            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;");
/// ```
#[must_use]
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
