//! Disk-backed cache of harvested page content.
//!
//! ## Layout
//!
//! - `local`: the `CacheStore` read/write path
//! - `consistency`: scan, repair and TTL sweep over all entries
//! - `paths`: deterministic file naming
//! - `quality`: full/partial/minimum classification
//! - `encode`: entry encoding with the filtered retry
//! - `metrics`: rolling-window counters
//! - `events`: outbound profiler event queue

pub mod consistency;
pub mod encode;
pub mod events;
pub mod local;
pub mod metrics;
pub mod paths;
pub mod quality;

// Re-export for convenience
pub use consistency::{ConsistencyIssue, ConsistencyReport, RepairReport, SweepReport};
pub use events::{FlushReport, NoopSink, ProfilerEvent, ProfilerSink, ReprofileReason};
pub use local::{CacheStore, WriteOutcome, list_entry_files};
pub use metrics::{CacheMetrics, Counter, MetricsSnapshot};
