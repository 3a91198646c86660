//! Media pipeline worker binary.

use std::sync::Arc;

use anyhow::{bail, Context};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mpipe_ledger::{LedgerConfig, PgStatusLedger};
use mpipe_media::{check_ffmpeg, check_mp4box, PipelineConfig, RenditionPipeline};
use mpipe_queue::{InFlight, IngestionGate, QueueConfig, RedisStreamSource};
use mpipe_storage::{S3Config, S3Connector};
use mpipe_worker::{FileProcessor, Telemetry, WorkerConfig, WorkerExit, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for rediss:// and HTTPS endpoints)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting mpipe-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let ffmpeg = check_ffmpeg().context("ffmpeg must be on PATH")?;
    let mp4box = check_mp4box().context("MP4Box must be on PATH")?;
    info!(ffmpeg = %ffmpeg.display(), mp4box = %mp4box.display(), "Found media tools");

    let telemetry = match config.metrics_addr {
        Some(addr) => {
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("Failed to install Prometheus exporter")?;
            info!(%addr, "Serving metrics");
            Telemetry::register()
        }
        None => Telemetry::noop(),
    };

    let ledger_config = LedgerConfig::from_env()?;
    let ledger = PgStatusLedger::connect(&ledger_config)
        .await
        .context("Failed to connect to status ledger")?
        .with_metrics(telemetry.ledger.clone());
    ledger.migrate().await.context("Failed to run ledger migrations")?;

    let queue_config = QueueConfig::from_env();
    let keep_alive_interval = queue_config.keep_alive_interval();
    let source = RedisStreamSource::new(queue_config)?;
    source.init().await.context("Failed to initialize event stream")?;
    info!(consumer = source.consumer_name(), "Joined consumer group");
    let source = Arc::new(source);

    let pipeline = RenditionPipeline::with_cli_tools(PipelineConfig::from_env()?)
        .with_cleanup_counter(telemetry.cleanup_failures.clone());
    let connector = Arc::new(S3Connector::new(S3Config::from_env()?));

    let in_flight = InFlight::new();
    let processor = FileProcessor::new(Arc::new(ledger), source.clone(), pipeline)
        .with_telemetry(telemetry.clone())
        .with_in_flight(in_flight.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::channel(config.queue_length);

    let pool = WorkerPool::spawn(&config, processor, connector, event_rx, shutdown_rx.clone());
    let gate = tokio::spawn(
        IngestionGate::new(source, event_tx, shutdown_rx)
            .with_metrics(telemetry.gate.clone())
            .with_in_flight(in_flight)
            .with_keep_alive_interval(keep_alive_interval)
            .run(),
    );

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, finishing in-flight files");
        let _ = shutdown_tx.send(true);
    });

    match gate.await {
        Ok(stats) => info!(?stats, "Gate exited"),
        Err(e) => error!(error = %e, "Gate task failed"),
    }

    let exits = pool.join().await;
    if !exits.is_empty() && exits.iter().all(|e| *e == WorkerExit::ConnectFailed) {
        bail!("No worker could connect to the blob store");
    }

    info!("mpipe-worker stopped");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("mpipe=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
