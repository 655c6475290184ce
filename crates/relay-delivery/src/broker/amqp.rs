//! AMQP 0-9-1 broker backed by `lapin`.

use std::{future::Future, pin::Pin};

use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Acknowledger, Broker, BrokerSession, InboundDelivery, SessionHandle};
use crate::{
    ack::AckDecision,
    error::{RelayError, Result},
};

/// Unacknowledged deliveries allowed in flight per consumer.
pub const PREFETCH_COUNT: u16 = 1;

/// Reply code sent when the relay closes its own channel or connection.
const REPLY_SUCCESS: u16 = 200;

/// Connection settings for the AMQP broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmqpConfig {
    /// `amqp://` or `amqps://` URL, credentials included.
    pub url: String,
    /// Durable queue to consume from; declared if missing.
    pub queue: String,
    /// Prefix for the consumer tag. A random suffix keeps it unique per
    /// session.
    pub consumer_tag: String,
}

/// Opens consuming sessions on a RabbitMQ-compatible broker.
#[derive(Debug, Clone)]
pub struct AmqpBroker {
    config: AmqpConfig,
}

impl AmqpBroker {
    /// Creates a broker for the given configuration. No connection is made
    /// until a session is opened.
    pub fn new(config: AmqpConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<BrokerSession> {
        let queue = self.config.queue.as_str();
        debug!(url = %masked_url(&self.config.url), queue, "connecting to broker");

        let connection = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .map_err(|e| RelayError::connection(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| RelayError::channel(format!("failed to open channel: {e}")))?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions { durable: true, ..QueueDeclareOptions::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RelayError::channel(format!("failed to declare queue {queue}: {e}")))?;

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await
            .map_err(|e| RelayError::channel(format!("failed to set prefetch: {e}")))?;

        let consumer_tag = format!("{}-{}", self.config.consumer_tag, Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RelayError::channel(format!("failed to register consumer: {e}")))?;

        info!(queue, consumer_tag = %consumer_tag, prefetch = PREFETCH_COUNT, "consumer registered");

        let deliveries = consumer
            .map(|item| match item {
                Ok(delivery) => Ok(InboundDelivery::new(
                    delivery.delivery_tag,
                    delivery.redelivered,
                    delivery.data,
                    AmqpAcker(delivery.acker),
                )),
                Err(e) => Err(RelayError::channel(format!("delivery stream failed: {e}"))),
            })
            .boxed();

        Ok(BrokerSession::new(deliveries, AmqpSessionHandle { connection, channel }))
    }
}

impl Broker for AmqpBroker {
    fn open_session(&self) -> Pin<Box<dyn Future<Output = Result<BrokerSession>> + Send + '_>> {
        Box::pin(self.connect())
    }
}

/// Broker method a decision is sent as.
enum Settlement {
    Ack(BasicAckOptions),
    Nack(BasicNackOptions),
}

/// Maps a decision onto a single-delivery ack or nack.
fn settlement_for(decision: AckDecision) -> Settlement {
    match decision {
        AckDecision::Acknowledge => Settlement::Ack(BasicAckOptions { multiple: false }),
        AckDecision::Reject { requeue } => {
            Settlement::Nack(BasicNackOptions { multiple: false, requeue })
        },
    }
}

struct AmqpAcker(Acker);

impl Acknowledger for AmqpAcker {
    fn settle(
        &self,
        delivery_tag: u64,
        decision: AckDecision,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let result = match settlement_for(decision) {
                Settlement::Ack(options) => self.0.ack(options).await.map(|_| ()),
                Settlement::Nack(options) => self.0.nack(options).await.map(|_| ()),
            };

            result.map_err(|e| RelayError::acknowledgement(delivery_tag, e.to_string()))
        })
    }
}

struct AmqpSessionHandle {
    connection: Connection,
    channel: Channel,
}

impl SessionHandle for AmqpSessionHandle {
    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            if let Err(e) = self.channel.close(REPLY_SUCCESS, "relay session closed").await {
                debug!(error = %e, "channel already closed");
            }
            if let Err(e) = self.connection.close(REPLY_SUCCESS, "relay session closed").await {
                debug!(error = %e, "connection already closed");
            }
        })
    }
}

/// Replaces the password in a broker URL so it can be logged.
///
/// Unparseable input is replaced entirely.
pub fn masked_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() && parsed.set_password(Some("***")).is_err() {
                return "<redacted>".to_string();
            }
            parsed.to_string()
        },
        Err(_) => "<redacted>".to_string(),
    }
}
