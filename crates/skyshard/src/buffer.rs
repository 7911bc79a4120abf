//! Per-partition record buffers with size-triggered flushing.
//!
//! Each partition directory gets an append-only buffer the first time a
//! record is routed to it. Buffer sizes are tracked with a running byte
//! estimate; once a buffer reaches the flush threshold its contents are
//! written as one Parquet file and the buffer starts over, keeping its file
//! counter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::debug;
use uuid::Uuid;

use skyshard_core::emit;
use skyshard_core::metrics::events::PartitionFlushed;

use crate::error::{FlushTaskSnafu, WriteError};
use crate::sink::{ColumnarWriter, WrittenFile};
use crate::source::RawRecord;

/// Default proportional target, roughly 25 MB per output file.
pub const DEFAULT_TARGET_MAX_BYTES: usize = 25_000_000;

/// Policy deciding the byte size at which a buffer is flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum FlushThreshold {
    /// Same threshold for every source.
    Fixed { bytes: usize },
    /// Split each source into equal parts no larger than `target_max_bytes`.
    Proportional { target_max_bytes: usize },
}

impl Default for FlushThreshold {
    fn default() -> Self {
        FlushThreshold::Proportional {
            target_max_bytes: DEFAULT_TARGET_MAX_BYTES,
        }
    }
}

impl FlushThreshold {
    /// Configured byte value, before any per-source adjustment.
    pub fn configured_bytes(&self) -> usize {
        match *self {
            FlushThreshold::Fixed { bytes } => bytes,
            FlushThreshold::Proportional { target_max_bytes } => target_max_bytes,
        }
    }

    /// Threshold for a source of `content_length` bytes.
    ///
    /// A proportional threshold falls back to its target when the length is
    /// unknown.
    pub fn for_source(&self, content_length: Option<u64>) -> usize {
        match *self {
            FlushThreshold::Fixed { bytes } => bytes,
            FlushThreshold::Proportional { target_max_bytes } => match content_length {
                Some(len) if len > 0 && target_max_bytes > 0 => {
                    let parts = len.div_ceil(target_max_bytes as u64);
                    usize::try_from(len / parts).unwrap_or(target_max_bytes).max(1)
                }
                _ => target_max_bytes,
            },
        }
    }
}

/// How flushed files are named inside their partition directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileNaming {
    /// `<file_root>.<NN>.parquet`, `NN` being the buffer's flush counter.
    #[default]
    Counter,
    /// `<uuid-v7>.parquet`.
    Random,
}

/// Records waiting to be written to one partition.
#[derive(Debug)]
pub struct PartitionBuffer {
    records: Vec<RawRecord>,
    bytes: usize,
    flush_count: u32,
    file_root: String,
}

impl PartitionBuffer {
    fn new(file_root: &str) -> Self {
        Self {
            records: Vec::new(),
            bytes: 0,
            flush_count: 0,
            file_root: file_root.to_string(),
        }
    }

    fn push(&mut self, record: RawRecord, bytes: usize) {
        self.records.push(record);
        self.bytes += bytes;
    }

    fn file_name(&self, naming: FileNaming) -> String {
        match naming {
            FileNaming::Counter => format!("{}.{:02}.parquet", self.file_root, self.flush_count),
            FileNaming::Random => format!("{}.parquet", Uuid::now_v7()),
        }
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// Owns every partition buffer of one worker.
pub struct BufferManager {
    buffers: HashMap<PathBuf, PartitionBuffer>,
    threshold: usize,
    writer: Arc<ColumnarWriter>,
    naming: FileNaming,
    buffered_bytes: usize,
    /// Worker label for metrics.
    target: String,
}

impl BufferManager {
    pub fn new(
        writer: ColumnarWriter,
        naming: FileNaming,
        threshold: usize,
        target: impl Into<String>,
    ) -> Self {
        Self {
            buffers: HashMap::new(),
            threshold,
            writer: Arc::new(writer),
            naming,
            buffered_bytes: 0,
            target: target.into(),
        }
    }

    /// Append `record` to the buffer for `partition`, creating the buffer with
    /// `file_root` if this is the partition's first record.
    pub fn route(&mut self, partition: &Path, record: RawRecord, file_root: &str) {
        let bytes = record.byte_estimate();
        match self.buffers.get_mut(partition) {
            Some(buffer) => buffer.push(record, bytes),
            None => {
                let mut buffer = PartitionBuffer::new(file_root);
                buffer.push(record, bytes);
                self.buffers.insert(partition.to_path_buf(), buffer);
            }
        }
        self.buffered_bytes += bytes;
    }

    /// Flush the buffer for `partition` if it has reached the threshold.
    pub async fn maybe_flush(
        &mut self,
        partition: &Path,
    ) -> Result<Option<WrittenFile>, WriteError> {
        let Some(buffer) = self.buffers.get_mut(partition) else {
            return Ok(None);
        };
        if buffer.records.is_empty() || buffer.bytes < self.threshold {
            return Ok(None);
        }

        let freed = buffer.bytes;
        let written = flush(&self.writer, self.naming, &self.target, partition, buffer).await?;
        self.buffered_bytes -= freed;
        Ok(Some(written))
    }

    /// Flush every non-empty buffer and discard all buffers.
    ///
    /// Calling this again without routing more records writes nothing.
    pub async fn drain_all(&mut self) -> Result<Vec<WrittenFile>, WriteError> {
        let mut pending: Vec<_> = self.buffers.iter_mut().collect();
        pending.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut written = Vec::new();
        for (partition, buffer) in pending {
            if buffer.records.is_empty() {
                continue;
            }
            let freed = buffer.bytes;
            written.push(flush(&self.writer, self.naming, &self.target, partition, buffer).await?);
            self.buffered_bytes -= freed;
        }

        debug!(
            target = %self.target,
            files = written.len(),
            buffers = self.buffers.len(),
            "Drained partition buffers"
        );
        self.buffers.clear();
        self.buffered_bytes = 0;
        Ok(written)
    }

    pub fn set_threshold(&mut self, bytes: usize) {
        self.threshold = bytes;
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn buffer(&self, partition: &Path) -> Option<&PartitionBuffer> {
        self.buffers.get(partition)
    }

    pub fn buffered_records(&self, partition: &Path) -> usize {
        self.buffers.get(partition).map_or(0, |b| b.records.len())
    }

    pub fn flush_count(&self, partition: &Path) -> u32 {
        self.buffers.get(partition).map_or(0, |b| b.flush_count)
    }

    /// Estimated bytes held across all buffers.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn active_buffers(&self) -> usize {
        self.buffers.len()
    }
}

/// Write out `buffer` on the blocking pool and reset it. On failure the
/// buffer is left untouched.
async fn flush(
    writer: &Arc<ColumnarWriter>,
    naming: FileNaming,
    target: &str,
    partition: &Path,
    buffer: &mut PartitionBuffer,
) -> Result<WrittenFile, WriteError> {
    let start = Instant::now();
    let destination = partition.join(buffer.file_name(naming));

    // Encoding and persisting are CPU and disk bound; keep them off the
    // runtime threads that drive the input streams.
    let writer = Arc::clone(writer);
    let records = std::mem::take(&mut buffer.records);
    let task_path = destination.clone();
    let (records, result) = tokio::task::spawn_blocking(move || {
        let result = writer.write(&records, &task_path);
        (records, result)
    })
    .await
    .context(FlushTaskSnafu { path: destination })?;

    let written = match result {
        Ok(written) => written,
        Err(err) => {
            buffer.records = records;
            return Err(err);
        }
    };

    emit!(PartitionFlushed {
        records: written.records as u64,
        bytes: written.bytes,
        duration: start.elapsed(),
        target: target.to_string(),
    });
    debug!(
        target = %target,
        path = %written.path.display(),
        records = written.records,
        estimated_bytes = buffer.bytes,
        "Flushed partition buffer"
    );

    buffer.bytes = 0;
    buffer.flush_count += 1;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::sink::ColumnarWriterConfig;
    use tempfile::TempDir;

    fn record(ra: &str) -> RawRecord {
        RawRecord::new([
            "10829", "871234567", "0.1", "0.2", "0.3", "1.5", "2.5", "10", "20", "3", "0.01",
            "0.02", ra, "-12.5", "0",
        ])
    }

    fn manager(threshold: usize, naming: FileNaming) -> BufferManager {
        let writer = ColumnarWriter::new(Schema::photon_events(), ColumnarWriterConfig::default());
        BufferManager::new(writer, naming, threshold, "test")
    }

    fn parquet_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".parquet"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_fixed_threshold() {
        let threshold = FlushThreshold::Fixed { bytes: 1000 };
        assert_eq!(threshold.for_source(Some(10_000)), 1000);
        assert_eq!(threshold.for_source(None), 1000);
    }

    #[test]
    fn test_proportional_threshold() {
        let threshold = FlushThreshold::Proportional {
            target_max_bytes: 25_000_000,
        };
        // Four equal parts, each under the target.
        assert_eq!(threshold.for_source(Some(80_000_000)), 20_000_000);
        assert_eq!(threshold.for_source(Some(50_000_000)), 25_000_000);
        assert_eq!(threshold.for_source(Some(1_000)), 1_000);
        assert_eq!(threshold.for_source(None), 25_000_000);
        assert_eq!(threshold.for_source(Some(0)), 25_000_000);
    }

    #[test]
    fn test_route_accounts_bytes() {
        let dir = TempDir::new().unwrap();
        let mut buffers = manager(usize::MAX, FileNaming::Counter);
        let a = dir.path().join("a");
        let b = dir.path().join("b");

        let estimate = record("10.0").byte_estimate();
        buffers.route(&a, record("10.0"), "root");
        buffers.route(&a, record("10.0"), "root");
        buffers.route(&b, record("10.0"), "root");

        assert_eq!(buffers.buffered_records(&a), 2);
        assert_eq!(buffers.buffered_records(&b), 1);
        assert_eq!(buffers.buffer(&a).unwrap().bytes(), 2 * estimate);
        assert_eq!(buffers.buffered_bytes(), 3 * estimate);
        assert_eq!(buffers.active_buffers(), 2);
    }

    #[tokio::test]
    async fn test_no_flush_below_threshold() {
        let dir = TempDir::new().unwrap();
        let mut buffers = manager(usize::MAX, FileNaming::Counter);
        buffers.route(dir.path(), record("10.0"), "root");

        assert!(buffers.maybe_flush(dir.path()).await.unwrap().is_none());
        assert!(parquet_files(dir.path()).is_empty());
        assert!(buffers.maybe_flush(&dir.path().join("unknown")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flush_at_threshold_resets_buffer() {
        let dir = TempDir::new().unwrap();
        let estimate = record("10.0").byte_estimate();
        let mut buffers = manager(2 * estimate, FileNaming::Counter);

        buffers.route(dir.path(), record("10.0"), "sample");
        assert!(buffers.maybe_flush(dir.path()).await.unwrap().is_none());
        buffers.route(dir.path(), record("11.0"), "sample");

        let written = buffers.maybe_flush(dir.path()).await.unwrap().unwrap();
        assert_eq!(written.path, dir.path().join("sample.00.parquet"));
        assert_eq!(written.records, 2);
        assert_eq!(buffers.buffered_records(dir.path()), 0);
        assert_eq!(buffers.flush_count(dir.path()), 1);
        assert_eq!(buffers.buffered_bytes(), 0);
        assert_eq!(buffers.active_buffers(), 1);

        buffers.route(dir.path(), record("12.0"), "other");
        buffers.route(dir.path(), record("13.0"), "other");
        let written = buffers.maybe_flush(dir.path()).await.unwrap().unwrap();
        // The root is fixed when the buffer is created.
        assert_eq!(written.path, dir.path().join("sample.01.parquet"));
        assert_eq!(parquet_files(dir.path()), vec!["sample.00.parquet", "sample.01.parquet"]);
    }

    #[tokio::test]
    async fn test_drain_all_writes_remaining_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();

        let estimate = record("10.0").byte_estimate();
        let mut buffers = manager(estimate, FileNaming::Counter);
        buffers.route(&a, record("10.0"), "part");
        buffers.maybe_flush(&a).await.unwrap().unwrap();
        buffers.route(&b, record("20.0"), "part");

        let drained = buffers.drain_all().await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].path, b.join("part.00.parquet"));
        assert_eq!(buffers.active_buffers(), 0);
        assert_eq!(buffers.buffered_bytes(), 0);

        assert!(buffers.drain_all().await.unwrap().is_empty());
        assert_eq!(parquet_files(&a), vec!["part.00.parquet"]);
        assert_eq!(parquet_files(&b), vec!["part.00.parquet"]);
    }

    #[tokio::test]
    async fn test_set_threshold_applies_to_next_check() {
        let dir = TempDir::new().unwrap();
        let mut buffers = manager(usize::MAX, FileNaming::Counter);
        buffers.route(dir.path(), record("10.0"), "root");
        assert!(buffers.maybe_flush(dir.path()).await.unwrap().is_none());

        buffers.set_threshold(1);
        assert_eq!(buffers.threshold(), 1);
        assert!(buffers.maybe_flush(dir.path()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_random_naming() {
        let dir = TempDir::new().unwrap();
        let mut buffers = manager(1, FileNaming::Random);
        buffers.route(dir.path(), record("10.0"), "root");
        let written = buffers.maybe_flush(dir.path()).await.unwrap().unwrap();

        let name = written.path.file_name().unwrap().to_str().unwrap();
        let stem = name.strip_suffix(".parquet").unwrap();
        assert!(Uuid::parse_str(stem).is_ok(), "{name}");
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_buffer() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("root.00.parquet"), b"taken").unwrap();

        let mut buffers = manager(1, FileNaming::Counter);
        buffers.route(dir.path(), record("10.0"), "root");
        let err = buffers.maybe_flush(dir.path()).await.unwrap_err();

        assert!(matches!(err, WriteError::DestinationExists { .. }));
        assert_eq!(buffers.buffered_records(dir.path()), 1);
        assert_eq!(buffers.flush_count(dir.path()), 0);
    }
}
