//! Telemetry relay service.
//!
//! Main entry point for the relay. Loads configuration, wires the broker,
//! forwarder and supervisor together, and runs the pipeline until a
//! shutdown signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use relay_core::{Clock, RealClock};
use relay_delivery::{AmqpBroker, Forwarder, Supervisor};
use tracing::{error, info};

mod config;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(config.log_filter()?);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting telemetry relay");
    info!(
        rabbitmq_url = %config.rabbitmq_url_masked(),
        queue = %config.queue_name,
        api_url = %config.api_url,
        ingest_path = %config.ingest_path,
        max_forward_attempts = config.max_forward_attempts,
        reconnect_delay_seconds = config.reconnect_delay_seconds,
        log_filter = %config.rust_log,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let forwarder = Forwarder::new(config.to_forwarder_config(), clock.clone())
        .context("Failed to create forwarder")?;
    let broker = AmqpBroker::new(config.to_amqp_config());

    let supervisor =
        Supervisor::new(Arc::new(broker), Arc::new(forwarder), config.to_supervisor_config(), clock);

    let token = supervisor.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, draining in-flight delivery");
        token.cancel();
    });

    if let Err(e) = supervisor.run().await {
        error!(error = %e, "Relay stopped");
        return Err(e).context("Relay supervisor failed");
    }

    let stats = supervisor.stats().await;
    info!(
        sessions = stats.sessions_started,
        received = stats.deliveries_received,
        acknowledged = stats.acknowledged,
        rejected_malformed = stats.rejected_malformed,
        rejected_invalid = stats.rejected_invalid,
        requeued = stats.requeued,
        "Telemetry relay shutdown complete"
    );
    Ok(())
}

/// Initializes tracing with the configured filter.
fn init_tracing(filter: tracing_subscriber::EnvFilter) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
