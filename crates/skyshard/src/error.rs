//! Error types for the skyshard ingestion engine.

use std::path::PathBuf;

use snafu::prelude::*;

use crate::schema::CastError;

// Re-export shared errors
pub use skyshard_core::error::ConfigError;

/// Errors raised while mapping a partition key to its directory.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PartitionError {
    /// A partition directory could not be listed.
    #[snafu(display("Failed to list partition directory {}: {source}", path.display()))]
    ListDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No `zoneID=<n>` folder exists for the record's zone.
    #[snafu(display("No partition folder for zoneID {zone_id} under {}", root.display()))]
    ZoneNotFound { zone_id: i32, root: PathBuf },

    /// A coordinate fell outside the enumerated bin folders.
    #[snafu(display(
        "{axis} value {value} maps to bin {index}, but {} has {bins} bin folders",
        path.display()
    ))]
    BinOutOfRange {
        axis: &'static str,
        value: f64,
        index: i64,
        bins: usize,
        path: PathBuf,
    },

    /// A coordinate is NaN or infinite and belongs to no bin.
    #[snafu(display("{axis} value {value} is not a finite coordinate"))]
    NonFiniteCoordinate { axis: &'static str, value: f64 },

    /// Declination partitioning is enabled but the key carries no declination.
    #[snafu(display("Declination partitioning is enabled but the key has no dec value"))]
    MissingDeclination,
}

/// Errors raised while opening an input source.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// The source identifier is neither a path nor a supported URL.
    #[snafu(display("Invalid source location {location:?}"))]
    InvalidLocation { location: String },

    /// A local source path could not be resolved.
    #[snafu(display("Failed to resolve local source {location}: {source}"))]
    LocalPath {
        location: String,
        source: std::io::Error,
    },

    /// No object store could be built for the URL.
    #[snafu(display("Unsupported source URL {location}: {source}"))]
    StoreConfig {
        location: String,
        source: object_store::Error,
    },

    /// The object could not be fetched.
    #[snafu(display("Failed to open source {location}: {source}"))]
    Open {
        location: String,
        source: object_store::Error,
    },
}

/// Errors raised while reading rows from an opened source.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    /// The underlying stream failed mid-read.
    #[snafu(display("Failed to read from {location}: {source}"))]
    Read {
        location: String,
        source: csv_async::Error,
    },
}

/// Errors raised while flushing a buffer to a Parquet file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// A buffered field could not be cast to its canonical type.
    #[snafu(display("Field '{field}' in buffered row {row} failed to cast: {source}"))]
    FieldCast {
        field: &'static str,
        row: usize,
        source: CastError,
    },

    /// A buffered row does not match the schema arity.
    #[snafu(display("Buffered row {row} has {found} fields, expected {expected}"))]
    RowArity {
        row: usize,
        found: usize,
        expected: usize,
    },

    /// Arrow rejected the assembled columns or the sort.
    #[snafu(display("Failed to assemble record batch: {source}"))]
    Batch {
        source: arrow::error::ArrowError,
    },

    /// Failed to create the temporary output file.
    #[snafu(display("Failed to create temporary file in {}: {source}", dir.display()))]
    CreateTemp {
        dir: PathBuf,
        source: std::io::Error,
    },

    /// Failed to create the Parquet writer.
    #[snafu(display("Failed to create Parquet writer: {source}"))]
    WriterCreate {
        source: parquet::errors::ParquetError,
    },

    /// Failed to write to Parquet.
    #[snafu(display("Failed to write to Parquet: {source}"))]
    ParquetWrite {
        source: parquet::errors::ParquetError,
    },

    /// The destination file already exists.
    #[snafu(display("Refusing to overwrite existing file {}", path.display()))]
    DestinationExists { path: PathBuf },

    /// The blocking flush task panicked or was cancelled.
    #[snafu(display("Flush task for {} did not complete: {source}", path.display()))]
    FlushTask {
        path: PathBuf,
        source: tokio::task::JoinError,
    },

    /// Failed to move the finished file into place.
    #[snafu(display("Failed to persist {}: {source}", path.display()))]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// A source could not be opened.
    #[snafu(display("Source error: {source}"))]
    SourceOpen { source: SourceError },

    /// A source failed while its rows were being read.
    #[snafu(display("Read error: {source}"))]
    SourceRead { source: ReaderError },

    /// Partition resolution error.
    #[snafu(display("Partition error: {source}"))]
    Partition { source: PartitionError },

    /// Flush error.
    #[snafu(display("Write error: {source}"))]
    Write { source: WriteError },

    /// Task join error.
    #[snafu(display("Task join error: {source}"))]
    TaskJoin { source: tokio::task::JoinError },

    /// A worker stopped with an error.
    #[snafu(display("Worker {worker} failed: {source}"))]
    Worker {
        worker: usize,
        source: Box<PipelineError>,
    },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl PipelineError {
    /// Whether the error only affects the source being read.
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::SourceOpen { .. } | PipelineError::SourceRead { .. }
        )
    }
}

impl From<PartitionError> for PipelineError {
    fn from(source: PartitionError) -> Self {
        PipelineError::Partition { source }
    }
}

impl From<WriteError> for PipelineError {
    fn from(source: WriteError) -> Self {
        PipelineError::Write { source }
    }
}
