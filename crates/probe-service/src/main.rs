//! Kafka round trip latency probe
//!
//! Entry point: loads the properties file named on the command line, starts
//! the probe against librdkafka and serves `/metrics`, over HTTPS when
//! configured, until SIGINT/SIGTERM.

use clap::{CommandFactory, Parser};
use common::clock::{Clock, SystemClock};
use probe_service::broker::kafka::{RdKafkaSink, RdKafkaSource};
use probe_service::config::Config;
use probe_service::errors::ProbeError;
use probe_service::observability::metrics::init_metrics_recorder;
use probe_service::routes::{self, AppState};
use probe_service::server;
use probe_service::service::ProbeService;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "probe-service", version, about = "Kafka round trip latency probe")]
struct Cli {
    /// Path to the probe `.properties` file
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "probe_service=info,probe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let Some(config_path) = cli.config else {
        // Usage, not an error.
        if let Err(e) = write_usage(&mut std::io::stdout()) {
            error!("Failed to print usage: {}", e);
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    };

    match run(&config_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn write_usage(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{}", Cli::command().render_help())
}

async fn run(config_path: &Path) -> Result<(), ProbeError> {
    info!("Kafka round trip latency probe {}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_file(config_path)?;
    for (key, value) in config.describe() {
        info!("{key} [{value}]");
    }

    let tls = match &config.tls {
        Some(settings) => Some(server::load_tls(settings).await?),
        None => None,
    };

    let metrics_handle = init_metrics_recorder().map_err(ProbeError::Metrics)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = ProbeService::new(
        &config,
        RdKafkaSink::connector(config.producer_properties()),
        RdKafkaSource::connector(config.consumer_properties()),
        clock,
    )?;

    let listener = tokio::net::TcpListener::bind((
        config.http_server_address.as_str(),
        config.http_server_port,
    ))
    .await
    .map_err(|e| {
        error!("Failed to bind scrape endpoint: {}", e);
        ProbeError::Http(e)
    })?;

    service.start().await?;

    let state = Arc::new(AppState {
        gauge: service.gauge(),
        metrics_handle,
        health: service.health(),
        basic_auth: config.basic_auth.clone(),
    });
    let app = routes::build_routes(state);

    if let Ok(addr) = listener.local_addr() {
        let scheme = if tls.is_some() { "https" } else { "http" };
        info!("Scrape endpoint listening on {}://{}", scheme, addr);
    }

    let shutdown_token = CancellationToken::new();
    tokio::spawn({
        let shutdown_token = shutdown_token.clone();
        async move {
            shutdown_signal().await;
            shutdown_token.cancel();
        }
    });

    let served = server::serve(listener, app, tls, shutdown_token).await;

    service.shutdown().await;
    info!("Probe shutdown complete");
    served
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
