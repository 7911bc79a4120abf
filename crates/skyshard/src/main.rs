//! skyshard CLI: ingest photon-event catalogs into a partitioned Parquet tree.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use skyshard::{CliArgs, Config, StorageOpener, init_metrics, init_tracing, run_ingest};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    info!("Loading config from {}", args.config.display());
    let mut config = match Config::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);

    let sources = match config.resolve_sources() {
        Ok(sources) => sources,
        Err(e) => {
            eprintln!("Failed to resolve sources: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        sources = sources.len(),
        workers = config.worker_count(),
        root = %config.partition.root.display(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run, not ingesting");
        return ExitCode::SUCCESS;
    }

    if config.metrics.enabled {
        if let Err(e) = init_metrics(&config.metrics.address) {
            eprintln!("Failed to start metrics exporter: {e}");
            return ExitCode::FAILURE;
        }
        info!(address = %config.metrics.address, "Metrics exporter listening");
    }

    let opener = Arc::new(StorageOpener::new(config.sources.storage_options.clone()));
    match run_ingest(&config, sources, opener).await {
        Ok(stats) => {
            info!(
                rows_read = stats.rows_read,
                rows_retained = stats.rows_retained,
                rows_skipped = stats.rows_skipped,
                files_written = stats.files_written,
                bytes_written = stats.bytes_written,
                sources_processed = stats.sources_processed,
                sources_failed = stats.sources_failed,
                "Ingestion complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Ingestion failed");
            eprintln!("Ingestion failed: {e}");
            ExitCode::FAILURE
        }
    }
}
