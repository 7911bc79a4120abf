//! Internal events for skyshard metrics emission.
//!
//! Each event struct represents a measurable occurrence during ingestion.
//! Events implement the `InternalEvent` trait which records the corresponding
//! metric. Every event carries a `target` label naming the worker that
//! produced it (e.g. `"worker-3"`).

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Rows pulled off an input stream, accepted or not.
pub struct RowsRead {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for RowsRead {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Rows read");
        counter!("skyshard_rows_read_total", "target" => self.target).increment(self.count);
    }
}

/// Rows that passed validation and were routed to a partition.
pub struct RowsRetained {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for RowsRetained {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Rows retained");
        counter!("skyshard_rows_retained_total", "target" => self.target).increment(self.count);
    }
}

/// Rows dropped by validation, labelled with the reason.
pub struct RowsSkipped {
    pub count: u64,
    pub reason: &'static str,
    pub target: String,
}

impl InternalEvent for RowsSkipped {
    fn emit(self) {
        trace!(count = self.count, reason = self.reason, target = %self.target, "Rows skipped");
        counter!("skyshard_rows_skipped_total", "reason" => self.reason, "target" => self.target)
            .increment(self.count);
    }
}

/// A partition buffer was flushed to a Parquet file.
pub struct PartitionFlushed {
    pub records: u64,
    pub bytes: u64,
    pub duration: Duration,
    pub target: String,
}

impl InternalEvent for PartitionFlushed {
    fn emit(self) {
        trace!(
            records = self.records,
            bytes = self.bytes,
            duration_ms = self.duration.as_millis() as u64,
            target = %self.target,
            "Partition flushed"
        );
        counter!("skyshard_files_written_total", "target" => self.target.clone()).increment(1);
        counter!("skyshard_bytes_written_total", "target" => self.target.clone())
            .increment(self.bytes);
        histogram!("skyshard_flush_duration_seconds", "target" => self.target)
            .record(self.duration.as_secs_f64());
    }
}

/// Outcome of processing one input source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Completed,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Completed => "completed",
            SourceStatus::Failed => "failed",
        }
    }
}

/// An input source finished, successfully or not.
pub struct SourceFinished {
    pub status: SourceStatus,
    pub target: String,
}

impl InternalEvent for SourceFinished {
    fn emit(self) {
        trace!(status = self.status.as_str(), target = %self.target, "Source finished");
        counter!("skyshard_sources_total", "status" => self.status.as_str(), "target" => self.target)
            .increment(1);
    }
}

/// Current in-memory buffer footprint of one worker.
pub struct BufferedBytes {
    pub bytes: usize,
    pub buffers: usize,
    pub target: String,
}

impl InternalEvent for BufferedBytes {
    fn emit(self) {
        trace!(bytes = self.bytes, buffers = self.buffers, target = %self.target, "Buffered bytes");
        gauge!("skyshard_buffered_bytes", "target" => self.target.clone()).set(self.bytes as f64);
        gauge!("skyshard_active_buffers", "target" => self.target).set(self.buffers as f64);
    }
}
