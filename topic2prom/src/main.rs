//! Zenoh topic to Prometheus gauge exporter.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use topic2prom::{
    BrokerEvents, ExporterConfig, ExporterMetrics, HttpServer, MetricRegistry, MetricsExporter,
    SubscriptionManager, ZenohBroker,
};
use topic2prom_common::init_tracing;

/// Export numeric Zenoh topics as Prometheus gauges.
#[derive(Parser, Debug)]
#[command(name = "topic2prom")]
#[command(about = "Export numeric Zenoh topics as Prometheus gauges")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, default_value = "topic2prom.json5")]
    config: String,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

/// Time allowed for background tasks to finish after shutdown is signalled.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = ExporterConfig::load_from_file(&args.config)
        .map_err(|e| anyhow::anyhow!("Failed to load config '{}': {}", args.config, e))?;

    // CLI overrides
    if let Some(listen) = args.listen {
        config.http.listen = listen;
        config.validate()?;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging)?;

    info!(
        topics = config.scraping.simple.len(),
        listen = %config.http.listen,
        path = %config.http.path,
        "Starting topic2prom"
    );

    let listen_addr = config
        .http
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Core components
    let subjects = config.subjects();
    let registry = Arc::new(MetricRegistry::new());
    let metrics = ExporterMetrics::default();
    let exporter = Arc::new(MetricsExporter::new(
        registry.clone(),
        &subjects,
        &metrics,
    ));
    let manager = Arc::new(SubscriptionManager::new(
        registry.clone(),
        subjects,
        metrics.clone(),
    ));
    manager.preregister();

    // Bind before connecting so an occupied port fails fast
    let http_server = HttpServer::new(
        exporter,
        manager.clone(),
        listen_addr,
        config.http.path.clone(),
    );
    let listener = http_server.bind().await?;

    // Connect to the broker
    BrokerEvents::<ZenohBroker>::on_connecting(manager.as_ref());
    let broker = Arc::new(
        ZenohBroker::connect(&config.zenoh, &config.timeouts, manager.clone()).await?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Broker event loop
    let broker_task = {
        let broker = broker.clone();
        let manager = manager.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            broker.run(manager.as_ref(), shutdown).await;
        })
    };

    // HTTP server
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.serve(listener, http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    let signal = shutdown_signal().await;
    info!(signal, "Shutting down");

    shutdown_tx.send(true)?;

    if tokio::time::timeout(TASK_DRAIN_TIMEOUT, async {
        let _ = broker_task.await;
        let _ = http_task.await;
    })
    .await
    .is_err()
    {
        warn!("Background tasks did not stop in time");
    }

    if let Err(e) = broker.disconnect(config.timeouts.disconnect()).await {
        warn!(error = %e, "Broker did not disconnect cleanly");
    }

    info!(
        messages_received = metrics.messages_received.get(),
        decode_errors = metrics.decode_errors.get(),
        subscribe_failures = metrics.subscribe_failures.get(),
        connection_losses = metrics.connection_losses.get(),
        gauges = registry.len(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM and report which one arrived.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "ctrl-c",
        _ = terminate => "sigterm",
    }
}
