//! Sequential ingestion of a list of sources by one worker.

use std::sync::Arc;

use snafu::prelude::*;
use tracing::{debug, info, warn};

use skyshard_core::emit;
use skyshard_core::metrics::events::{
    BufferedBytes, RowsRead, RowsRetained, RowsSkipped, SourceFinished, SourceStatus,
};

use super::{IngestSettings, IngestSource};
use crate::buffer::{BufferManager, FlushThreshold};
use crate::error::{PipelineError, SourceOpenSnafu, SourceReadSnafu};
use crate::partition::PartitionResolver;
use crate::schema::{KeyFields, Schema};
use crate::sink::{ColumnarWriter, WrittenFile};
use crate::source::{ReadOutcome, ReaderCounters, ReaderOptions, RecordReader, SourceOpener};

/// Totals for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub rows_read: u64,
    pub rows_retained: u64,
    pub rows_skipped: u64,
    pub files_written: u64,
    pub bytes_written: u64,
    pub sources_processed: u64,
    pub sources_failed: u64,
}

impl IngestStats {
    /// Add another run's totals to these.
    pub fn merge(&mut self, other: &IngestStats) {
        self.rows_read += other.rows_read;
        self.rows_retained += other.rows_retained;
        self.rows_skipped += other.rows_skipped;
        self.files_written += other.files_written;
        self.bytes_written += other.bytes_written;
        self.sources_processed += other.sources_processed;
        self.sources_failed += other.sources_failed;
    }

    fn record_file(&mut self, file: &WrittenFile) {
        self.files_written += 1;
        self.bytes_written += file.bytes;
    }

    fn record_rows(&mut self, counters: &ReaderCounters) {
        self.rows_read += counters.rows_read;
        self.rows_retained += counters.rows_retained;
        self.rows_skipped += counters.rows_skipped();
    }
}

/// Drives one worker: reads its sources in order, routes accepted records to
/// partition buffers and drains the buffers after the last source.
///
/// Buffers outlive individual sources, so a partition fed by several sources
/// keeps filling the same buffer.
pub struct IngestCoordinator {
    target: String,
    opener: Arc<dyn SourceOpener>,
    resolver: PartitionResolver,
    buffers: BufferManager,
    threshold: FlushThreshold,
    schema: Arc<Schema>,
    keys: KeyFields,
    reader_options: ReaderOptions,
    progress_interval: u64,
    stats: IngestStats,
}

impl IngestCoordinator {
    pub fn new(
        target: impl Into<String>,
        settings: &IngestSettings,
        opener: Arc<dyn SourceOpener>,
    ) -> Self {
        let target = target.into();
        let schema = Schema::photon_events();
        let keys = settings.key_fields();
        let writer = ColumnarWriter::new(Arc::clone(&schema), settings.writer.clone());
        let buffers = BufferManager::new(
            writer,
            settings.naming,
            settings.threshold.configured_bytes(),
            target.clone(),
        );

        Self {
            target,
            opener,
            resolver: PartitionResolver::new(&settings.partition_root, settings.grid),
            buffers,
            threshold: settings.threshold,
            schema,
            keys,
            reader_options: settings.reader.clone(),
            progress_interval: settings.progress_interval_rows,
            stats: IngestStats::default(),
        }
    }

    /// Ingest `sources` in order and drain every buffer at the end.
    ///
    /// A source that cannot be opened or fails mid-read is counted in
    /// `sources_failed` and skipped. Partition and write errors stop the run.
    pub async fn run(mut self, sources: Vec<IngestSource>) -> Result<IngestStats, PipelineError> {
        info!(target = %self.target, sources = sources.len(), "Worker started");

        for source in &sources {
            match self.ingest_source(source).await {
                Ok(()) => {
                    self.stats.sources_processed += 1;
                    emit!(SourceFinished {
                        status: SourceStatus::Completed,
                        target: self.target.clone(),
                    });
                }
                Err(err) if err.is_source_failure() => {
                    warn!(target = %self.target, source = %source.location, error = %err, "Abandoning source");
                    self.stats.sources_failed += 1;
                    emit!(SourceFinished {
                        status: SourceStatus::Failed,
                        target: self.target.clone(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        for file in self.buffers.drain_all().await? {
            self.stats.record_file(&file);
        }

        info!(
            target = %self.target,
            rows_read = self.stats.rows_read,
            rows_retained = self.stats.rows_retained,
            files_written = self.stats.files_written,
            sources_failed = self.stats.sources_failed,
            "Worker finished"
        );
        Ok(self.stats)
    }

    async fn ingest_source(&mut self, source: &IngestSource) -> Result<(), PipelineError> {
        let location = source.location.as_str();
        let opened = self
            .opener
            .open(location)
            .await
            .context(SourceOpenSnafu)?;

        let threshold = self.threshold.for_source(opened.content_length);
        self.buffers.set_threshold(threshold);
        info!(
            target = %self.target,
            source = %location,
            content_length = ?opened.content_length,
            threshold,
            file_root = %source.file_root,
            "Reading source"
        );

        let mut reader = RecordReader::new(
            opened.reader,
            &self.reader_options,
            Arc::clone(&self.schema),
            self.keys,
            location,
        );

        let result = self.consume(&mut reader, &source.file_root).await;
        let counters = reader.counters();
        self.stats.record_rows(&counters);
        self.emit_counters(&counters);
        result?;

        debug!(
            target = %self.target,
            source = %location,
            rows_read = counters.rows_read,
            rows_retained = counters.rows_retained,
            rows_skipped = counters.rows_skipped(),
            "Finished source"
        );
        Ok(())
    }

    async fn consume<R>(
        &mut self,
        reader: &mut RecordReader<R>,
        root: &str,
    ) -> Result<(), PipelineError>
    where
        R: tokio::io::AsyncRead + Unpin + Send,
    {
        while let Some(outcome) = reader.next_outcome().await.context(SourceReadSnafu)? {
            match outcome {
                ReadOutcome::Record(record) => {
                    let partition = self.resolver.resolve(&record.key).await?;
                    self.buffers.route(&partition, record.record, root);
                    if let Some(file) = self.buffers.maybe_flush(&partition).await? {
                        self.stats.record_file(&file);
                    }
                }
                ReadOutcome::Skip(reason) => {
                    debug!(
                        target = %self.target,
                        source = %reader.location(),
                        reason = reason.as_str(),
                        detail = ?reason,
                        "Skipped row"
                    );
                }
            }

            let rows_read = reader.counters().rows_read;
            if self.progress_interval > 0 && rows_read % self.progress_interval == 0 {
                self.report_progress(reader.location(), &reader.counters());
            }
        }
        Ok(())
    }

    fn report_progress(&self, location: &str, counters: &ReaderCounters) {
        info!(
            target = %self.target,
            source = %location,
            rows_read = counters.rows_read,
            rows_retained = counters.rows_retained,
            active_buffers = self.buffers.active_buffers(),
            buffered_bytes = self.buffers.buffered_bytes(),
            "Ingest progress"
        );
        emit!(BufferedBytes {
            bytes: self.buffers.buffered_bytes(),
            buffers: self.buffers.active_buffers(),
            target: self.target.clone(),
        });
    }

    fn emit_counters(&self, counters: &ReaderCounters) {
        emit!(RowsRead {
            count: counters.rows_read,
            target: self.target.clone(),
        });
        emit!(RowsRetained {
            count: counters.rows_retained,
            target: self.target.clone(),
        });

        for (reason, count) in counters.skipped_by_reason() {
            if count > 0 {
                emit!(RowsSkipped {
                    count,
                    reason,
                    target: self.target.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_merge() {
        let mut total = IngestStats {
            rows_read: 10,
            rows_retained: 8,
            rows_skipped: 2,
            files_written: 1,
            bytes_written: 100,
            sources_processed: 1,
            sources_failed: 0,
        };
        total.merge(&IngestStats {
            rows_read: 5,
            rows_retained: 5,
            rows_skipped: 0,
            files_written: 2,
            bytes_written: 50,
            sources_processed: 1,
            sources_failed: 1,
        });

        assert_eq!(
            total,
            IngestStats {
                rows_read: 15,
                rows_retained: 13,
                rows_skipped: 2,
                files_written: 3,
                bytes_written: 150,
                sources_processed: 2,
                sources_failed: 1,
            }
        );
    }
}
