//! Prometheus exporter for Axiell Collections.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use axiell_exporter::config::LogFormat;
use axiell_exporter::{DatasetCollector, ExporterConfig, HttpServer};

/// Prometheus exporter for Axiell Collections.
#[derive(Parser, Debug)]
#[command(name = "axiell-exporter")]
#[command(about = "Export Axiell Collections dataset counts as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on for telemetry (overrides config).
    #[arg(long = "web.listen-address")]
    listen_address: Option<String>,

    /// Path under which to expose metrics (overrides config).
    #[arg(long = "web.telemetry-path")]
    telemetry_path: Option<String>,

    /// Base URL for the Axiell Collections API (overrides config).
    #[arg(long = "api.base-url")]
    base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error). Defaults to the config value.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    // CLI overrides
    if let Some(listen) = args.listen_address {
        config.web.listen = listen;
    }
    if let Some(path) = args.telemetry_path {
        config.web.path = path;
    }
    if let Some(base_url) = args.base_url {
        config.api.base_url = base_url;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    // Initialize logging
    let log_level = config.logging.level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("axiell_exporter={}", log_level).parse()?)
        .add_directive(format!("tower_http={}", log_level).parse()?);

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!(
        listen = %config.web.listen,
        path = %config.web.path,
        base_url = %config.api.base_url,
        classifier = config.classifier.enabled,
        "Starting axiell_exporter"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let collector = Arc::new(DatasetCollector::from_config(&config)?);

    let listen_addr = config
        .web
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let http_server = HttpServer::new(
        collector,
        listen_addr,
        config.web.path.clone(),
        Duration::from_secs(config.web.scrape_timeout_secs),
    );

    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate_signal() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    info!("Exporter stopped");
    Ok(())
}

/// Resolve when SIGTERM is received. Never resolves on non-unix targets.
async fn terminate_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
