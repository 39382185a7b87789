//! Human-readable formatting of byte counts for logs and the CLI.

/// Format byte count as human-readable size: `"1.5 GiB"`, `"100.3 MiB"`,
/// `"50.0 KiB"`, `"512 B"`.
pub fn format_bytes(bytes: u64) -> String {
    let f = bytes as f64;
    if bytes >= 1024 * 1024 * 1024 * 1024 {
        format!("{:.1} TiB", f / (1024.0 * 1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1} GiB", f / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", f / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KiB", f / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a budget, showing `i64::MAX` as `"unlimited"`.
pub fn format_budget(budget: i64) -> String {
    if budget == i64::MAX {
        "unlimited".to_string()
    } else if budget < 0 {
        "-".to_string()
    } else {
        format_bytes(budget as u64)
    }
}
