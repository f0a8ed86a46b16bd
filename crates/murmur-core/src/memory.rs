//! Process resident-memory probe
//!
//! Lifecycle accounting uses whole-process resident set size. On a
//! unified-memory architecture the same metric covers both host and
//! accelerator allocations because they share physical memory, so no
//! separate accelerator query is needed.

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Current process RSS in megabytes, or `None` when the platform
/// offers no way to read it.
pub fn resident_memory_mb() -> Option<f64> {
    memory_stats::memory_stats().map(|usage| usage.physical_mem as f64 / BYTES_PER_MB)
}

/// Render a probe result for log lines.
pub fn format_mb(value: Option<f64>) -> String {
    match value {
        Some(mb) => format!("{mb:.1} MB"),
        None => "unavailable".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reports_positive_rss() {
        let rss = resident_memory_mb().expect("RSS probe should work on test platforms");
        assert!(rss > 0.0);
    }

    #[test]
    fn format_handles_missing_probe() {
        assert_eq!(format_mb(None), "unavailable");
        assert_eq!(format_mb(Some(12.34)), "12.3 MB");
    }
}
