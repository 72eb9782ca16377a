use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing record handling across every stage.
#[derive(Default)]
pub struct PipelineMetrics {
    records_processed: AtomicU64,
    records_failed: AtomicU64,
    chunks_stored: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a record that completed its stage and was forwarded.
    pub fn record_processed(&self) {
        self.records_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a record reported back to the broker as failed.
    pub fn record_failed(&self) {
        self.records_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record chunks written to a vector store.
    pub fn record_chunks_stored(&self, count: u64) {
        self.chunks_stored.fetch_add(count, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_processed: self.records_processed.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            chunks_stored: self.chunks_stored.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Records that completed their stage since startup.
    pub records_processed: u64,
    /// Records reported as batch item failures since startup.
    pub records_failed: u64,
    /// Chunks upserted into vector stores since startup.
    pub chunks_stored: u64,
}
