//! Error types shared across skyshard crates.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read the source manifest.
    #[snafu(display("Failed to read source manifest {}: {source}", path.display()))]
    ReadManifest {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Neither inline sources nor a manifest produced any source.
    #[snafu(display("No input sources configured"))]
    NoSources,

    /// Partition root is empty.
    #[snafu(display("Partition root cannot be empty"))]
    EmptyPartitionRoot,

    /// Delimiter is not a single byte.
    #[snafu(display("Delimiter must be a single ASCII character, got {delimiter:?}"))]
    InvalidDelimiter { delimiter: String },

    /// A bin width is not a positive finite number.
    #[snafu(display("{axis} bin width must be positive, got {value}"))]
    InvalidBinWidth { axis: String, value: f64 },

    /// A flush threshold of zero bytes was configured.
    #[snafu(display("Flush threshold must be greater than zero"))]
    ZeroThreshold,

    /// Worker count of zero was configured.
    #[snafu(display("Worker count must be greater than zero"))]
    ZeroWorkers,
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to parse the listener address.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Failed to install the Prometheus exporter.
    #[snafu(display("Failed to initialize Prometheus exporter: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}
