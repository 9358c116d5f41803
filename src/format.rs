//! Display helpers shared by the terminal renderer and the HTTP relay.

const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Human-readable byte count with one decimal and no trailing `.0`.
///
/// `0` renders as `0 B`; sub-byte values stay in `B` and anything past GB
/// is expressed in GB.
pub fn format_bytes(bytes: f64) -> String {
    if bytes <= 0.0 || !bytes.is_finite() {
        return "0 B".to_string();
    }
    let idx = if bytes < 1.0 {
        0
    } else {
        ((bytes.ln() / 1024f64.ln()).floor() as usize).min(UNITS.len() - 1)
    };
    let scaled = bytes / 1024f64.powi(idx as i32);
    let mut num = format!("{scaled:.1}");
    if num.ends_with(".0") {
        num.truncate(num.len() - 2);
    }
    format!("{num} {}", UNITS[idx])
}

/// Progress with one decimal place, e.g. `42.5%`.
pub fn format_percent(p: f64) -> String {
    format!("{p:.1}%")
}

/// Fill of the upload gauge: full at 1000 bytes.
pub fn upload_gauge(total_upload: f64) -> f64 {
    (total_upload / 1000.0 * 100.0).min(100.0)
}

/// Fill of the download gauge: full at 5000 bytes.
pub fn download_gauge(total_download: f64) -> f64 {
    (total_download / 5000.0 * 100.0).min(100.0)
}

/// Share of routed apps as a percentage.
pub fn routed_gauge(routed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    routed as f64 / total as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_formatting() {
        assert_eq!(format_bytes(0.0), "0 B");
        assert_eq!(format_bytes(512.0), "512 B");
        assert_eq!(format_bytes(1536.0), "1.5 KB");
        assert_eq!(format_bytes(2048.0), "2 KB");
        assert_eq!(format_bytes(3.3 * 1024.0 * 1024.0), "3.3 MB");
        assert_eq!(format_bytes(0.4), "0.4 B");
        assert_eq!(format_bytes(5.0 * 1024f64.powi(4)), "5120 GB");
    }

    #[test]
    fn gauges_cap_at_full() {
        assert_eq!(upload_gauge(500.0), 50.0);
        assert_eq!(upload_gauge(5_000.0), 100.0);
        assert_eq!(download_gauge(2_500.0), 50.0);
        assert_eq!(download_gauge(1e9), 100.0);
        assert_eq!(routed_gauge(6, 8), 75.0);
        assert_eq!(routed_gauge(0, 0), 0.0);
    }

    #[test]
    fn percent_one_decimal() {
        assert_eq!(format_percent(100.0), "100.0%");
        assert_eq!(format_percent(12.345), "12.3%");
    }
}
