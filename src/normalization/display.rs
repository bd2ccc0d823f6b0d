use crate::commons::FILE_PREFIX;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Human title for a file: no `File:` prefix, no extension.
pub fn clean_title(title: &str) -> String {
    let title = title.trim();
    let name = title.strip_prefix(FILE_PREFIX).unwrap_or(title);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

/// `H:MM:SS`; fractional seconds are truncated, hours are not wrapped.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Size in binary megabytes with two decimals, e.g. `29.30 MB`.
pub fn format_size(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / BYTES_PER_MB)
}
