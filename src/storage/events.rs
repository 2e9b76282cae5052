//! Outbound notifications toward the domain-profiling collaborator.
//!
//! The store never calls the profiler inline. Events are buffered in a
//! bounded queue and delivered by `flush`, which reports how many were
//! delivered, failed or dropped so failures stay observable.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;

/// Why a domain should be profiled again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprofileReason {
    CorruptedCache,
    MissingTimestamp,
    SerializationFailed,
    WriteFailed,
    LowQuality,
}

impl ReprofileReason {
    pub const ALL: [ReprofileReason; 5] = [
        ReprofileReason::CorruptedCache,
        ReprofileReason::MissingTimestamp,
        ReprofileReason::SerializationFailed,
        ReprofileReason::WriteFailed,
        ReprofileReason::LowQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReprofileReason::CorruptedCache => "corrupted_cache",
            ReprofileReason::MissingTimestamp => "missing_timestamp",
            ReprofileReason::SerializationFailed => "serialization_failed",
            ReprofileReason::WriteFailed => "write_failed",
            ReprofileReason::LowQuality => "low_quality",
        }
    }

    /// Parse a reason; anything outside the vocabulary is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl fmt::Display for ReprofileReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event sent to the profiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProfilerEvent {
    Reprofile {
        domain: String,
        reason: ReprofileReason,
    },
    CacheHit {
        domain: String,
    },
    Session {
        domain: String,
        success: bool,
    },
}

impl ProfilerEvent {
    pub fn domain(&self) -> &str {
        match self {
            ProfilerEvent::Reprofile { domain, .. }
            | ProfilerEvent::CacheHit { domain }
            | ProfilerEvent::Session { domain, .. } => domain,
        }
    }
}

/// Capability injected into the store for profiler delivery.
#[async_trait]
pub trait ProfilerSink: Send + Sync {
    async fn deliver(&self, event: &ProfilerEvent) -> Result<()>;
}

/// Sink that accepts and discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl ProfilerSink for NoopSink {
    async fn deliver(&self, _event: &ProfilerEvent) -> Result<()> {
        Ok(())
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub delivered: usize,
    pub failed: usize,
    /// Events discarded since the previous flush because the queue was full
    pub dropped: usize,
}

/// Bounded FIFO of pending profiler events.
///
/// When full, the oldest event is discarded to make room.
#[derive(Debug)]
pub struct EventQueue {
    pending: Mutex<VecDeque<ProfilerEvent>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, event: ProfilerEvent) {
        let mut pending = self.pending.lock();
        if pending.len() >= self.capacity {
            pending.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        pending.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Deliver every pending event to `sink`. Failed events are not requeued.
    pub async fn flush(&self, sink: &dyn ProfilerSink) -> FlushReport {
        let batch: Vec<ProfilerEvent> = self.pending.lock().drain(..).collect();
        let mut report = FlushReport {
            dropped: self.dropped.swap(0, Ordering::Relaxed) as usize,
            ..FlushReport::default()
        };

        for event in &batch {
            match sink.deliver(event).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!(
                        "Profiler delivery failed for {} ({:?}): {}",
                        event.domain(),
                        event,
                        e
                    );
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    struct FailingSink;

    #[async_trait]
    impl ProfilerSink for FailingSink {
        async fn deliver(&self, event: &ProfilerEvent) -> Result<()> {
            if event.domain() == "bad.com" {
                Err(AppError::validation("profiler offline"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_reason_vocabulary() {
        for reason in ReprofileReason::ALL {
            assert_eq!(ReprofileReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(ReprofileReason::parse("because_i_said_so"), None);
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let queue = EventQueue::new(2);
        for domain in ["a.com", "b.com", "c.com"] {
            queue.push(ProfilerEvent::CacheHit {
                domain: domain.into(),
            });
        }
        assert_eq!(queue.len(), 2);
        let pending = queue.pending.lock();
        assert_eq!(pending[0].domain(), "b.com");
    }

    #[tokio::test]
    async fn test_flush_reports_failures() {
        let queue = EventQueue::new(1);
        queue.push(ProfilerEvent::CacheHit {
            domain: "good.com".into(),
        });
        queue.push(ProfilerEvent::Session {
            domain: "bad.com".into(),
            success: false,
        });

        let report = queue.flush(&FailingSink).await;
        assert_eq!(
            report,
            FlushReport {
                delivered: 0,
                failed: 1,
                dropped: 1
            }
        );
        assert!(queue.is_empty());

        queue.push(ProfilerEvent::CacheHit {
            domain: "good.com".into(),
        });
        let report = queue.flush(&FailingSink).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 0);
    }
}
