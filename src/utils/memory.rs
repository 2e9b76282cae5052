// src/utils/memory.rs

//! Process memory sampling.

const PAGE_SIZE_BYTES: f64 = 4096.0;

/// Resident set size of the current process in MB.
///
/// Reads `/proc/self/statm`; returns `None` where procfs is unavailable.
pub async fn resident_mb() -> Option<f64> {
    let statm = tokio::fs::read_to_string("/proc/self/statm").await.ok()?;
    parse_statm_mb(&statm)
}

fn parse_statm_mb(statm: &str) -> Option<f64> {
    let resident_pages: f64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * PAGE_SIZE_BYTES / (1024.0 * 1024.0))
}
