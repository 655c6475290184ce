//! Sequential consumer loop for one broker session.
//!
//! Deliveries are handled strictly one at a time: decode, validate, forward,
//! settle. The next delivery is not pulled until the previous one has been
//! settled, which together with a prefetch of 1 keeps at most one message
//! in flight.

use std::sync::Arc;

use futures::StreamExt;
use relay_core::TelemetryRecord;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

use crate::{
    ack::{decide, AckDecision, ProcessingOutcome},
    broker::{DeliveryStream, InboundDelivery},
    error::Result,
    forwarder::{ForwardOutcome, Forwarder},
};

/// Counters for relay monitoring. Shared across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Sessions that completed broker setup.
    pub sessions_started: u64,
    /// Deliveries pulled from the broker.
    pub deliveries_received: u64,
    /// Deliveries acknowledged after a successful forward.
    pub acknowledged: u64,
    /// Deliveries discarded because the body did not decode.
    pub rejected_malformed: u64,
    /// Deliveries discarded because the record failed validation.
    pub rejected_invalid: u64,
    /// Deliveries requeued after forwarding was exhausted.
    pub requeued: u64,
    /// HTTP attempts made across all forwards.
    pub forward_attempts: u64,
    /// Decisions the broker did not accept. These deliveries stay unacked
    /// and are redelivered once the session closes.
    pub settle_failures: u64,
}

impl RelayStats {
    /// Total deliveries that were settled with any decision.
    pub fn settled(&self) -> u64 {
        self.acknowledged + self.rejected_malformed + self.rejected_invalid + self.requeued
    }
}

/// Processes deliveries from one session until the stream ends, fails, or
/// the loop is cancelled.
pub struct ConsumerLoop {
    forwarder: Arc<Forwarder>,
    stats: Arc<RwLock<RelayStats>>,
    cancellation_token: CancellationToken,
}

impl ConsumerLoop {
    /// Creates a consumer loop.
    pub fn new(
        forwarder: Arc<Forwarder>,
        stats: Arc<RwLock<RelayStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { forwarder, stats, cancellation_token }
    }

    /// Runs until the delivery stream ends or cancellation is requested.
    ///
    /// Cancellation is only observed between deliveries; a delivery already
    /// pulled is processed and settled first.
    ///
    /// # Errors
    ///
    /// Returns the stream error if the channel fails, or the settlement
    /// error if a decision cannot be sent. Both end the session.
    pub async fn run(&self, mut deliveries: DeliveryStream) -> Result<()> {
        debug!("consumer loop started");

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => {
                    info!("consumer loop cancelled");
                    return Ok(());
                }
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.process(delivery).await?;
                },
                Some(Err(error)) => {
                    error!(error = %error, "delivery stream failed");
                    return Err(error);
                },
                None => {
                    warn!("delivery stream closed by broker");
                    return Ok(());
                },
            }
        }
    }

    /// Handles one delivery end to end and settles it.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Acknowledgement` if the settlement cannot be
    /// sent. Decode, validation and forward failures are not errors here;
    /// they become reject decisions.
    pub async fn process(&self, delivery: InboundDelivery) -> Result<AckDecision> {
        let delivery_tag = delivery.delivery_tag();
        let span = info_span!("delivery", delivery_tag, location = field::Empty);

        async move {
            info!(
                redelivered = delivery.redelivered(),
                bytes = delivery.body().len(),
                "delivery received"
            );
            self.stats.write().await.deliveries_received += 1;

            let outcome = self.evaluate(delivery.body()).await;
            let decision = decide(&outcome);

            if let Err(error) = delivery.settle(decision).await {
                self.stats.write().await.settle_failures += 1;
                error!(
                    decision = %decision,
                    outcome = ?outcome,
                    error = %error,
                    "settlement failed, delivery left for redelivery"
                );
                return Err(error);
            }

            self.record_outcome(&outcome, decision).await;
            Ok(decision)
        }
        .instrument(span)
        .await
    }

    async fn evaluate(&self, body: &[u8]) -> ProcessingOutcome {
        let record = match TelemetryRecord::from_json(body) {
            Ok(record) => record,
            Err(error) => return ProcessingOutcome::DecodeFailed { reason: error.to_string() },
        };

        Span::current().record("location", record.location.as_str());

        if let Err(violation) = record.check() {
            return ProcessingOutcome::ValidationFailed(violation);
        }

        debug!(
            temperature = record.temperature,
            humidity = record.humidity,
            timestamp = %record.timestamp,
            "record validated"
        );

        ProcessingOutcome::Forwarded(self.forwarder.forward(&record).await)
    }

    async fn record_outcome(&self, outcome: &ProcessingOutcome, decision: AckDecision) {
        let mut stats = self.stats.write().await;

        match outcome {
            ProcessingOutcome::DecodeFailed { reason } => {
                stats.rejected_malformed += 1;
                warn!(decision = %decision, reason = %reason, "malformed delivery discarded");
            },
            ProcessingOutcome::ValidationFailed(violation) => {
                stats.rejected_invalid += 1;
                warn!(decision = %decision, reason = %violation, "invalid record discarded");
            },
            ProcessingOutcome::Forwarded(ForwardOutcome::Delivered { attempts, status_code }) => {
                stats.acknowledged += 1;
                stats.forward_attempts += u64::from(*attempts);
                info!(decision = %decision, attempts, status_code, "delivery acknowledged");
            },
            ProcessingOutcome::Forwarded(ForwardOutcome::Exhausted { attempts, last_error }) => {
                stats.requeued += 1;
                stats.forward_attempts += u64::from(*attempts);
                error!(
                    decision = %decision,
                    attempts,
                    last_error = %last_error,
                    "forwarding exhausted, delivery requeued"
                );
            },
        }
    }
}
