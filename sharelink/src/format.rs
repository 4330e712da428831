//! Human-readable formatting for file sizes and upload timestamps.

use chrono::{DateTime, Utc};

const SIZE_UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
const SIZE_BASE: u64 = 1024;

/// Format a byte count using binary (1024) multiples.
///
/// Values are rounded to two decimals and trailing zeros are dropped, so `1536` renders as
/// `"1.5 KB"` and `2_400_000` as `"2.29 MB"`. Anything beyond terabytes stays in `TB`.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut exponent = 0usize;
    let mut divisor = 1u64;
    while exponent < SIZE_UNITS.len() - 1 && bytes / divisor >= SIZE_BASE {
        divisor *= SIZE_BASE;
        exponent += 1;
    }

    let value = bytes as f64 / divisor as f64;
    let rounded = (value * 100.0).round() / 100.0;

    // f64's Display prints the shortest form, which already omits trailing zeros
    format!("{} {}", rounded, SIZE_UNITS[exponent])
}

/// Format an upload timestamp, e.g. `"Mar 5, 2025, 02:30 PM"`.
pub fn format_upload_date(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%b %-d, %Y, %I:%M %p").to_string()
}
