//! skyshard-core: Shared plumbing for the skyshard ingestion engine.
//!
//! - `config/` - Byte-size constants, Parquet compression, metrics config and
//!   environment variable interpolation for YAML config files
//! - `metrics/` - Internal events, the `emit!` macro and the Prometheus exporter
//! - `tracing` - Subscriber initialization for the CLI
//! - `error` - Error types shared across crates

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing;

pub use config::{KB, MB, MetricsConfig, ParquetCompression, interpolate};
pub use error::{ConfigError, MetricsError};
pub use metrics::{DEFAULT_METRICS_ADDR, init_global as init_metrics};
pub use tracing::init_tracing;
