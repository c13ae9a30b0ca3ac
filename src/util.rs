const KIB: f32 = 1024.0;
const MIB: f32 = KIB * 1024.0;
const GIB: u64 = 1024 * 1024 * 1024;

/// Render a human-friendly transfer speed string.
#[must_use]
pub fn format_speed(bytes_per_sec: f32) -> String {
    if bytes_per_sec < KIB {
        format!("{bytes_per_sec:.0} B/s")
    } else if bytes_per_sec < MIB {
        format!("{:.1} KB/s", bytes_per_sec / KIB)
    } else {
        format!("{:.1} MB/s", bytes_per_sec / MIB)
    }
}

/// Render a byte count as megabytes, or gigabytes above 1 GiB.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    if bytes > GIB {
        format!("{:.2}G", bytes as f64 / GIB as f64)
    } else {
        format!("{:.2}M", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Compute download progress as a percentage.
#[must_use]
pub fn progress_percent(downloaded: u64, total: Option<u64>) -> f32 {
    match total {
        Some(total) if total > 0 => (downloaded as f32 / total as f32) * 100.0,
        _ => 0.0,
    }
}
