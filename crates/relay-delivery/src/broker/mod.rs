//! Broker abstraction for the consumer pipeline.
//!
//! A [`Broker`] opens a [`BrokerSession`]: a live stream of deliveries plus
//! a handle that tears the connection down. Production uses the AMQP
//! implementation in [`amqp`]; tests use the in-memory [`mock`] broker.
//!
//! Settling a delivery consumes it, so each delivery is acknowledged or
//! rejected at most once. A delivery dropped unsettled is redelivered by the
//! broker once the channel closes.

use std::{fmt, future::Future, pin::Pin};

use futures::stream::BoxStream;

use crate::{ack::AckDecision, error::Result};

pub mod amqp;
pub mod mock;

/// Stream of deliveries from one broker session.
///
/// An `Err` item means the channel failed; the session is over.
pub type DeliveryStream = BoxStream<'static, Result<InboundDelivery>>;

/// Sends a settlement for a delivery back on its channel.
pub trait Acknowledger: Send + Sync {
    /// Applies `decision` to the delivery identified by `delivery_tag`.
    fn settle(
        &self,
        delivery_tag: u64,
        decision: AckDecision,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// One message handed to the consumer by the broker.
pub struct InboundDelivery {
    delivery_tag: u64,
    redelivered: bool,
    body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl InboundDelivery {
    /// Creates a delivery with the acknowledger used to settle it.
    pub fn new(
        delivery_tag: u64,
        redelivered: bool,
        body: Vec<u8>,
        acker: impl Acknowledger + 'static,
    ) -> Self {
        Self { delivery_tag, redelivered, body, acker: Box::new(acker) }
    }

    /// Broker-assigned tag, unique per channel.
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Whether the broker has delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Raw message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Sends the settlement and consumes the delivery.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Acknowledgement` if the channel can no longer
    /// carry the settlement.
    pub async fn settle(self, decision: AckDecision) -> Result<()> {
        self.acker.settle(self.delivery_tag, decision).await
    }
}

impl fmt::Debug for InboundDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundDelivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Owns the connection behind a session.
pub trait SessionHandle: Send {
    /// Closes the channel and connection. Errors are logged, not returned.
    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// A consuming session: deliveries plus the connection they arrive on.
pub struct BrokerSession {
    deliveries: DeliveryStream,
    handle: Box<dyn SessionHandle>,
}

impl BrokerSession {
    /// Creates a session from a delivery stream and its connection handle.
    pub fn new(deliveries: DeliveryStream, handle: impl SessionHandle + 'static) -> Self {
        Self { deliveries, handle: Box::new(handle) }
    }

    /// Splits the session so the stream can move into the consumer task.
    pub fn into_parts(self) -> (DeliveryStream, Box<dyn SessionHandle>) {
        (self.deliveries, self.handle)
    }
}

/// Source of consuming sessions.
///
/// Opening a session performs the whole setup sequence: connect, open a
/// channel, declare the queue, set prefetch to 1 and register the consumer.
/// Any failure in that sequence is returned as an error.
pub trait Broker: Send + Sync + 'static {
    /// Opens a new session.
    fn open_session(&self) -> Pin<Box<dyn Future<Output = Result<BrokerSession>> + Send + '_>>;
}
