//! postgres_exporter binary entry point.
//!
//! Bootstraps the exporter: resolves configuration, constructs and registers
//! the PostgreSQL collector, and serves the telemetry endpoint until a
//! shutdown signal arrives. Startup failures (missing DSN, bad queries file,
//! duplicate metric registration, bind errors) log and exit non-zero before
//! anything is served; once serving, database outages only move metric
//! values.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use postgres_exporter::{
    collector::{Collector, MetricMaps, PgCollector, Registry},
    config::ExporterConfig,
    server::{AppState, create_router, landing_page},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prometheus exporter for PostgreSQL server metrics.
///
/// The connection string is taken from the DATA_SOURCE_NAME environment
/// variable.
#[derive(Parser, Debug)]
#[command(name = "postgres_exporter", version, about, long_about = None)]
struct Cli {
    /// Address to listen on for web interface and telemetry.
    #[arg(long = "web.listen-address", default_value = "0.0.0.0:9187")]
    listen_address: String,

    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    telemetry_path: String,

    /// Path to custom queries to run.
    #[arg(long = "extend.query-path")]
    queries_path: Option<PathBuf>,

    /// Do not run, simply dump the maps.
    #[arg(long = "dumpmaps")]
    dump_maps: bool,

    /// Upper bound on each database operation during a scrape.
    #[arg(long = "query-timeout", default_value = "30s", value_parser = humantime::parse_duration)]
    query_timeout: Duration,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "exporter failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.dump_maps {
        // Diagnostic mode: print the mapping tables and exit. Never opens a
        // connection.
        let maps = MetricMaps::load(cli.queries_path.as_deref())?;
        maps.dump(&mut std::io::stdout())?;
        return Ok(());
    }

    let config = ExporterConfig::resolve(
        &cli.listen_address,
        &cli.telemetry_path,
        cli.queries_path,
        cli.dump_maps,
        cli.query_timeout,
    )?;

    let collector = Arc::new(PgCollector::new(&config)?);

    let mut registry = Registry::new();
    registry.register(collector.clone())?;

    let state = AppState {
        registry: Arc::new(registry),
        landing_page: landing_page(&config.telemetry_path),
    };
    let app = create_router(state, &config.telemetry_path);

    let listener = tokio::net::TcpListener::bind(config.listen_address).await?;
    tracing::info!(
        address = %config.listen_address,
        path = %config.telemetry_path,
        "starting server"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Single teardown point for every exit path out of the server loop.
    collector.close().await;
    served?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("received terminate signal");
        }
    }
}
