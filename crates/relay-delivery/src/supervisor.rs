//! Connection supervision and pipeline restarts.
//!
//! The supervisor owns the relay's lifecycle. Each iteration opens a broker
//! session, runs a consumer loop on it until the session ends, closes the
//! connection and waits `reconnect_delay` before starting again. Any
//! connectivity failure, whether during setup, on the delivery stream, or
//! while settling, takes the same path.
//!
//! By default restarts never stop. With `max_consecutive_failures` set, the
//! supervisor gives up after that many sessions in a row end without
//! handling a single delivery.

use std::{sync::Arc, time::Duration};

use relay_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    broker::Broker,
    consumer::{ConsumerLoop, RelayStats},
    error::{RelayError, Result},
    forwarder::Forwarder,
};

/// Configuration for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Wait between the end of one session and the next setup attempt.
    pub reconnect_delay: Duration,

    /// Wait before the very first connection attempt.
    pub startup_delay: Duration,

    /// Give up after this many consecutive sessions that handled nothing.
    /// `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(crate::DEFAULT_RECONNECT_DELAY_SECONDS),
            startup_delay: Duration::ZERO,
            max_consecutive_failures: None,
        }
    }
}

/// Connection state of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No session; either between sessions or stopped.
    Disconnected,
    /// Running the broker setup sequence.
    Connecting,
    /// Consumer registered and processing deliveries.
    Ready,
}

/// Runs the relay pipeline and restarts it after every failure.
pub struct Supervisor {
    broker: Arc<dyn Broker>,
    forwarder: Arc<Forwarder>,
    config: SupervisorConfig,
    clock: Arc<dyn Clock>,
    stats: Arc<RwLock<RelayStats>>,
    state: Arc<RwLock<SupervisorState>>,
    cancellation_token: CancellationToken,
}

impl Supervisor {
    /// Creates a supervisor. Nothing connects until [`Supervisor::run`].
    pub fn new(
        broker: Arc<dyn Broker>,
        forwarder: Arc<Forwarder>,
        config: SupervisorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            broker,
            forwarder,
            config,
            clock,
            stats: Arc::new(RwLock::new(RelayStats::default())),
            state: Arc::new(RwLock::new(SupervisorState::Disconnected)),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Token that stops the supervisor when cancelled.
    ///
    /// A delivery being processed at cancellation time is settled before
    /// the session closes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Returns current relay statistics.
    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> SupervisorState {
        *self.state.read().await
    }

    /// Runs sessions until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::RestartsExhausted` only when a failure bound is
    /// configured and reached. Without one this returns only after
    /// cancellation.
    pub async fn run(&self) -> Result<()> {
        info!(
            reconnect_delay_ms = self.config.reconnect_delay.as_millis(),
            max_consecutive_failures = ?self.config.max_consecutive_failures,
            endpoint = %self.forwarder.endpoint(),
            "relay supervisor starting"
        );

        if !self.config.startup_delay.is_zero() {
            info!(
                delay_ms = self.config.startup_delay.as_millis(),
                "waiting before first connection"
            );
            if !self.pause(self.config.startup_delay).await {
                info!("relay supervisor stopped before first connection");
                return Ok(());
            }
        }

        let mut consecutive_failures: u32 = 0;

        loop {
            let received_before = self.stats.read().await.deliveries_received;
            let result = self.run_session().await;
            self.set_state(SupervisorState::Disconnected).await;

            if self.cancellation_token.is_cancelled() {
                if let Err(error) = result {
                    warn!(error = %error, "session ended with error during shutdown");
                }
                break;
            }

            match &result {
                Ok(()) => warn!("delivery stream ended, restarting pipeline"),
                Err(error) => error!(error = %error, "pipeline session failed"),
            }

            let made_progress = self.stats.read().await.deliveries_received > received_before;
            consecutive_failures = if made_progress { 0 } else { consecutive_failures + 1 };

            if let Some(limit) = self.config.max_consecutive_failures {
                if consecutive_failures >= limit {
                    error!(consecutive_failures, "restart limit reached, giving up");
                    return Err(RelayError::restarts_exhausted(consecutive_failures));
                }
            }

            info!(
                delay_ms = self.config.reconnect_delay.as_millis(),
                consecutive_failures,
                "reconnecting after delay"
            );
            if !self.pause(self.config.reconnect_delay).await {
                break;
            }
        }

        info!("relay supervisor stopped");
        Ok(())
    }

    /// Runs one session: setup, consume until the session ends, close.
    ///
    /// Returns `Ok(())` if the broker ended the stream cleanly or the
    /// supervisor was cancelled.
    ///
    /// # Errors
    ///
    /// Returns the setup, stream, settlement or worker error that ended the
    /// session.
    pub async fn run_session(&self) -> Result<()> {
        self.set_state(SupervisorState::Connecting).await;
        info!("connecting to broker");

        let session = tokio::select! {
            () = self.cancellation_token.cancelled() => return Ok(()),
            session = self.broker.open_session() => session?,
        };

        self.stats.write().await.sessions_started += 1;
        self.set_state(SupervisorState::Ready).await;
        info!("pipeline ready, waiting for deliveries");

        let (deliveries, handle) = session.into_parts();
        let consumer = ConsumerLoop::new(
            self.forwarder.clone(),
            self.stats.clone(),
            self.cancellation_token.child_token(),
        );

        let task = tokio::spawn(async move { consumer.run(deliveries).await });
        let result = task.await.unwrap_or_else(|e| Err(RelayError::worker(e.to_string())));

        handle.close().await;
        result
    }

    /// Sleeps on the clock; returns `false` if cancelled first.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancellation_token.cancelled() => false,
            () = self.clock.sleep(duration) => true,
        }
    }

    async fn set_state(&self, state: SupervisorState) {
        *self.state.write().await = state;
    }
}
