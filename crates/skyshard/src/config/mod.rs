//! Configuration for the skyshard ingestion engine.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use skyshard_core::error::{InvalidBinWidthSnafu, NoSourcesSnafu, ReadFileSnafu, YamlParseSnafu};

use crate::buffer::{FileNaming, FlushThreshold};
use crate::error::ConfigError;
use crate::partition::PartitionGrid;
use crate::source::load_manifest;
use crate::source::reader::{DEFAULT_NULL_VALUES, ReaderOptions};
use crate::sink::ColumnarWriterConfig;

pub use skyshard_core::config::{
    InterpolationResult, MetricsConfig, ParquetCompression, interpolate,
};
pub use skyshard_core::{KB, MB};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "skyshard")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Text file listing one source per line. Replaces `sources.manifest`.
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Number of parallel workers. Replaces `workers`.
    #[arg(short, long)]
    pub workers: Option<NonZeroUsize>,

    /// Validate configuration and sources without ingesting anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    /// Overlay command line values onto a loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(manifest) = &self.manifest {
            config.sources.manifest = Some(manifest.clone());
        }
        if let Some(workers) = self.workers {
            config.workers = Some(workers.get());
        }
    }
}

/// Where input rows come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    /// Source identifiers: local paths or object store URLs.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Optional manifest file with more sources, one per line.
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    /// Storage options for the object store (credentials, region, etc.).
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Declination level of the partition tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclinationConfig {
    /// Width of each declination bin in degrees.
    pub factor: f64,
}

/// Layout of the pre-built partition tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionConfig {
    /// Root directory holding the `zoneID=<n>` folders.
    pub root: PathBuf,
    /// Width of each right-ascension bin in degrees.
    #[serde(default = "default_ra_factor")]
    pub ra_factor: f64,
    /// Enables a declination level below each right-ascension bin.
    #[serde(default)]
    pub declination: Option<DeclinationConfig>,
}

fn default_ra_factor() -> f64 {
    36.0
}

/// How rows are split and validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderConfig {
    /// Single-character field separator.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Field values treated as missing, besides the empty string.
    #[serde(default = "default_null_values")]
    pub null_values: Vec<String>,
    /// Log progress every this many rows (0 disables).
    #[serde(default = "default_progress_interval")]
    pub progress_interval_rows: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            null_values: default_null_values(),
            progress_interval_rows: default_progress_interval(),
        }
    }
}

fn default_delimiter() -> String {
    "|".to_string()
}

fn default_null_values() -> Vec<String> {
    DEFAULT_NULL_VALUES.iter().map(|v| v.to_string()).collect()
}

fn default_progress_interval() -> u64 {
    50_000
}

/// Buffering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferConfig {
    #[serde(default)]
    pub threshold: FlushThreshold,
}

/// Output file configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    /// Parquet compression codec.
    #[serde(default)]
    pub compression: ParquetCompression,
    /// Order rows by `ra` within each file.
    #[serde(default)]
    pub sort_by_ra: bool,
    /// Output file naming scheme.
    #[serde(default)]
    pub naming: FileNaming,
}

/// Main configuration for skyshard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub sources: SourcesConfig,
    pub partition: PartitionConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    /// Parallel workers; defaults to the available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        // Interpolate environment variables
        let result = interpolate(contents);
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }

        let config: Config = serde_yaml::from_str(&result.text).context(YamlParseSnafu)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partition.root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPartitionRoot);
        }
        self.delimiter()?;
        check_bin_width("ra", self.partition.ra_factor)?;
        if let Some(declination) = &self.partition.declination {
            check_bin_width("dec", declination.factor)?;
        }
        if self.buffer.threshold.configured_bytes() == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if self.workers == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }

    /// The delimiter as a single byte.
    pub fn delimiter(&self) -> Result<u8, ConfigError> {
        match self.reader.delimiter.as_bytes() {
            [byte] if byte.is_ascii() => Ok(*byte),
            _ => Err(ConfigError::InvalidDelimiter {
                delimiter: self.reader.delimiter.clone(),
            }),
        }
    }

    /// Inline sources followed by the manifest's, duplicates removed.
    pub fn resolve_sources(&self) -> Result<Vec<String>, ConfigError> {
        let mut sources = self.sources.paths.clone();
        if let Some(manifest) = &self.sources.manifest {
            sources.extend(load_manifest(manifest)?);
        }

        let mut seen = std::collections::HashSet::new();
        sources.retain(|source| seen.insert(source.clone()));

        ensure!(!sources.is_empty(), NoSourcesSnafu);
        Ok(sources)
    }

    pub fn grid(&self) -> PartitionGrid {
        let grid = PartitionGrid::new(self.partition.ra_factor);
        match &self.partition.declination {
            Some(declination) => grid.with_declination(declination.factor),
            None => grid,
        }
    }

    pub fn reader_options(&self) -> Result<ReaderOptions, ConfigError> {
        Ok(ReaderOptions {
            delimiter: self.delimiter()?,
            null_values: self.reader.null_values.clone(),
        })
    }

    pub fn writer_config(&self) -> ColumnarWriterConfig {
        ColumnarWriterConfig::default()
            .with_compression(self.sink.compression)
            .with_sort_by_ra(self.sink.sort_by_ra)
    }

    /// Configured worker count, or the machine's available parallelism.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }
}

fn check_bin_width(axis: &str, value: f64) -> Result<(), ConfigError> {
    ensure!(
        value.is_finite() && value > 0.0,
        InvalidBinWidthSnafu { axis, value }
    );
    Ok(())
}
