//! AI Dispatcher - drift-driven model and prediction job scheduler
//!
//! Periodically compares predictions against observed metrics, sends
//! retraining jobs for drifting units and prediction jobs for every unit,
//! and listens for model completion notifications.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dispatcher_lib::{
    api::{self, AppState},
    clock::{Clock, SystemClock},
    datahub::{DatahubClient, GrpcDatahubClient},
    dispatcher::{CompletionListener, Dispatcher, ModelJobSender, PredictJobSender},
    health::{components, HealthRegistry},
    observability::{DispatcherMetrics, StructuredLogger},
    queue::{AmqpConnector, QueueConnector},
    stats::DriftEvaluator,
    tracker::ModelMapper,
    UnitKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::DispatcherConfig;

const DISPATCHER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "ai-dispatcher", version, about = "Dispatches model and predict jobs")]
struct Args {
    /// Configuration file
    #[arg(
        long,
        env = "ALAMEDA_AI_DISPATCHER_CONFIG",
        default_value = "/etc/alameda/ai-dispatcher/ai-dispatcher.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the datahub and the message queue are reachable, then exit
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = DispatcherConfig::load(Some(&args.config))?;

    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log.level.as_str())),
        )
        .with(fmt::layer().json())
        .init();

    let datahub: Arc<dyn DatahubClient> = Arc::new(
        GrpcDatahubClient::new(config.datahub_client_config())
            .context("Failed to create datahub client")?,
    );
    let amqp = Arc::new(AmqpConnector::new(config.amqp_config()));

    if let Some(Command::Probe) = args.command {
        return probe(datahub.as_ref(), &amqp).await;
    }

    info!(config = %args.config.display(), "Starting ai-dispatcher");
    let scheduler_config = config.scheduler_config()?;
    let drift_config = config.drift_config()?;

    // Initialize health registry; the listener only runs with model jobs
    let health_registry = HealthRegistry::new();
    for component in components::ALL {
        if component != components::COMPLETION_LISTENER || scheduler_config.model_enabled {
            health_registry.register(component).await;
        }
    }

    // Initialize metrics
    let metrics = DispatcherMetrics::new().context("Failed to register metrics")?;

    // Initialize structured logger
    let instance = std::env::var("HOSTNAME").unwrap_or_else(|_| "ai-dispatcher".to_string());
    let logger = StructuredLogger::new(instance);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start health and metrics server
    let app_state = Arc::new(AppState::new(health_registry.clone(), metrics.clone()));
    let api_port = config.api.port;
    let api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(async move {
        if let Err(err) = api::serve(api_port, app_state, api_shutdown).await {
            error!(error = %err, "API server failed");
        }
    });

    // Block until the queue and the datahub can serve the first pass
    tokio::select! {
        result = wait_for_dependencies(
            datahub.as_ref(),
            &amqp,
            &health_registry,
            config.startup_retry_interval(),
        ) => result?,
        _ = tokio::signal::ctrl_c() => {
            logger.log_shutdown("SIGINT received during startup");
            let _ = shutdown_tx.send(());
            let _ = api_handle.await;
            return Ok(());
        }
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let connector: Arc<dyn QueueConnector> = amqp;
    let tracker = Arc::new(ModelMapper::new(
        &scheduler_config.units,
        &scheduler_config.granularities(),
        config.model_timeout(),
        clock.clone(),
    ));

    let publish_timeout = Some(config.publish_timeout());
    let model_sender = Arc::new(
        ModelJobSender::new(
            datahub.clone(),
            tracker.clone(),
            DriftEvaluator::new(drift_config),
            metrics.clone(),
            logger.clone(),
            clock.clone(),
        )
        .with_publish_timeout(publish_timeout),
    );
    let predict_sender = Arc::new(
        PredictJobSender::new(metrics.clone(), logger.clone(), clock.clone())
            .with_publish_timeout(publish_timeout),
    );

    logger.log_startup(
        DISPATCHER_VERSION,
        &scheduler_config.granularities(),
        &scheduler_config.units,
    );

    let model_enabled = scheduler_config.model_enabled;
    let dispatcher = Arc::new(Dispatcher::new(
        scheduler_config,
        datahub.clone(),
        connector.clone(),
        model_sender,
        predict_sender.clone(),
        metrics.clone(),
        health_registry.clone(),
    )?);

    let mut handles = dispatcher.spawn(&shutdown_tx);
    health_registry.set_healthy(components::SCHEDULER).await;

    if model_enabled {
        let listener = CompletionListener::new(
            connector,
            datahub,
            tracker,
            predict_sender,
            metrics,
            logger.clone(),
            clock,
            health_registry.clone(),
            config.reconnect_interval(),
        );
        handles.push(tokio::spawn(listener.run(shutdown_tx.subscribe())));
    } else {
        info!("Model jobs disabled, completion listener not started");
    }

    // Mark dispatcher as ready after initialization
    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    // Receivers may already be gone if a loop exited early
    let _ = shutdown_tx.send(());

    let drained = tokio::time::timeout(config.shutdown_timeout(), async {
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "Dispatcher task ended abnormally");
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            timeout_secs = config.shutdown_timeout().as_secs(),
            "Timed out waiting for dispatcher tasks"
        );
    }

    if tokio::time::timeout(Duration::from_secs(5), api_handle).await.is_err() {
        warn!("API server did not stop in time");
    }
    info!("Shutdown complete");
    Ok(())
}

/// Datahub has nodes and clusters, and the queue accepts connections
async fn dependencies_ready(
    datahub: &dyn DatahubClient,
    amqp: &AmqpConnector,
    health: &HealthRegistry,
) -> bool {
    let queue_ready = match amqp.check().await {
        Ok(()) => {
            health.set_healthy(components::QUEUE).await;
            true
        }
        Err(err) => {
            warn!(error = %err, "Message queue not reachable");
            health.set_degraded(components::QUEUE, err.to_string()).await;
            false
        }
    };

    let mut datahub_ready = true;
    for kind in [UnitKind::Node, UnitKind::Cluster] {
        match datahub.list_units(kind).await {
            Ok(units) if !units.is_empty() => {}
            Ok(_) => {
                info!(unit_type = %kind, "Datahub has no units yet");
                health
                    .set_degraded(components::DATAHUB, format!("no {} units", kind))
                    .await;
                datahub_ready = false;
            }
            Err(err) => {
                warn!(unit_type = %kind, error = %err, "Datahub query failed");
                health
                    .set_degraded(components::DATAHUB, err.to_string())
                    .await;
                datahub_ready = false;
            }
        }
        if !datahub_ready {
            break;
        }
    }
    if datahub_ready {
        health.set_healthy(components::DATAHUB).await;
    }

    queue_ready && datahub_ready
}

async fn wait_for_dependencies(
    datahub: &dyn DatahubClient,
    amqp: &AmqpConnector,
    health: &HealthRegistry,
    retry_interval: Duration,
) -> Result<()> {
    loop {
        if dependencies_ready(datahub, amqp, health).await {
            info!("Datahub and message queue are ready");
            return Ok(());
        }
        tokio::time::sleep(retry_interval).await;
    }
}

/// One-shot connectivity check for container probes
async fn probe(datahub: &dyn DatahubClient, amqp: &AmqpConnector) -> Result<()> {
    let mut failures = Vec::new();

    if let Err(err) = amqp.check().await {
        failures.push(format!("queue: {}", err));
    }
    if let Err(err) = datahub.list_units(UnitKind::Node).await {
        failures.push(format!("datahub: {}", err));
    }

    if failures.is_empty() {
        info!("Probe succeeded");
        Ok(())
    } else {
        bail!("Probe failed: {}", failures.join("; "))
    }
}
