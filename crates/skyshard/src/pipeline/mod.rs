//! Ingestion pipeline.
//!
//! Sources are split round-robin into disjoint chunks, one per worker. Each
//! worker is an [`IngestCoordinator`] running as its own tokio task with its
//! own resolver and buffers, so workers share nothing but the opener. The
//! run finishes once every worker has joined.

mod coordinator;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info};

use crate::buffer::{FileNaming, FlushThreshold};
use crate::config::Config;
use crate::error::PipelineError;
use crate::partition::PartitionGrid;
use crate::schema::KeyFields;
use crate::sink::ColumnarWriterConfig;
use crate::source::{ReaderOptions, SourceOpener, unique_file_roots};

pub use coordinator::{IngestCoordinator, IngestStats};

/// Everything a worker needs to know, shared read-only by all workers.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub partition_root: PathBuf,
    pub grid: PartitionGrid,
    pub reader: ReaderOptions,
    pub threshold: FlushThreshold,
    pub writer: ColumnarWriterConfig,
    pub naming: FileNaming,
    /// Log progress every this many rows per source (0 disables).
    pub progress_interval_rows: u64,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        Ok(Self {
            partition_root: config.partition.root.clone(),
            grid: config.grid(),
            reader: config.reader_options()?,
            threshold: config.buffer.threshold,
            writer: config.writer_config(),
            naming: config.sink.naming,
            progress_interval_rows: config.reader.progress_interval_rows,
        })
    }

    /// Key field positions; `dec` is only cast when declination
    /// partitioning is enabled.
    fn key_fields(&self) -> KeyFields {
        KeyFields::photon(self.grid.dec.is_some())
    }
}

/// One source and the root its counter-named files are named after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSource {
    pub location: String,
    pub file_root: String,
}

impl IngestSource {
    /// Pair every location with a file root unique within `locations`.
    pub fn assign(locations: Vec<String>) -> Vec<IngestSource> {
        let roots = unique_file_roots(&locations);
        locations
            .into_iter()
            .zip(roots)
            .map(|(location, file_root)| IngestSource {
                location,
                file_root,
            })
            .collect()
    }
}

/// Split `sources` round-robin into `min(workers, sources.len())` chunks.
pub fn split_sources<T>(sources: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    let chunks = workers.min(sources.len());
    if chunks == 0 {
        return Vec::new();
    }

    let mut split: Vec<Vec<T>> = (0..chunks).map(|_| Vec::new()).collect();
    for (index, source) in sources.into_iter().enumerate() {
        split[index % chunks].push(source);
    }
    split
}

/// Ingest `sources` with the configured number of workers and return the
/// summed statistics.
///
/// Every worker runs to completion before the result is reported. If any
/// worker fails, the first failure is returned.
pub async fn run_ingest(
    config: &Config,
    sources: Vec<String>,
    opener: Arc<dyn SourceOpener>,
) -> Result<IngestStats, PipelineError> {
    let settings = IngestSettings::from_config(config)?;
    let chunks = split_sources(IngestSource::assign(sources), config.worker_count());

    info!(
        workers = chunks.len(),
        root = %settings.partition_root.display(),
        "Starting ingestion"
    );

    let mut tasks = JoinSet::new();
    for (worker, chunk) in chunks.into_iter().enumerate() {
        let coordinator =
            IngestCoordinator::new(format!("worker-{worker}"), &settings, Arc::clone(&opener));
        tasks.spawn(async move { (worker, coordinator.run(chunk).await) });
    }

    let mut total = IngestStats::default();
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let (worker, result) = joined.map_err(|e| PipelineError::TaskJoin { source: e })?;
        match result {
            Ok(stats) => total.merge(&stats),
            Err(err) => {
                error!(worker, error = %err, "Worker failed");
                first_error.get_or_insert(PipelineError::Worker {
                    worker,
                    source: Box::new(err),
                });
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(total),
    }
}
