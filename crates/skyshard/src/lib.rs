//! skyshard: partitioned ingestion of photon-event catalogs into Parquet.
//!
//! This crate handles:
//! - Streaming `|`-delimited rows from local files or object storage (S3, GCS, Azure, HTTP)
//! - Validating rows against the fixed fifteen-field photon-event schema
//! - Mapping each row onto a pre-built `zoneID=<n>/<ra-bin>[/<dec-bin>]` tree
//! - Buffering rows per partition and flushing them to compressed Parquet files
//! - Fanning sources out over parallel workers

pub mod buffer;
pub mod config;
pub mod error;
pub mod partition;
pub mod pipeline;
pub mod schema;
pub mod sink;
pub mod source;

// Re-export commonly used items
pub use buffer::{BufferManager, FileNaming, FlushThreshold};
pub use config::{CliArgs, Config};
pub use error::PipelineError;
pub use partition::{PartitionGrid, PartitionKey, PartitionResolver};
pub use pipeline::{IngestCoordinator, IngestSettings, IngestStats, run_ingest};
pub use sink::{ColumnarWriter, ColumnarWriterConfig, WrittenFile};
pub use source::{SourceOpener, StorageOpener};

// Re-export from skyshard-core
pub use skyshard_core::{KB, MB, MetricsConfig, ParquetCompression, init_metrics, init_tracing};
