//! Mock broker for testing.
//!
//! Provides a deterministic, in-memory broker for exercising the consumer
//! and supervisor without a RabbitMQ server. Sessions are scripted in
//! order; every pull, settlement and session transition is written to a
//! journal that tests can inspect afterwards.

use std::{collections::VecDeque, future::Future, pin::Pin, sync::Arc};

use futures::{stream, StreamExt};
use tokio::sync::RwLock;

use super::{Acknowledger, Broker, BrokerSession, DeliveryStream, InboundDelivery, SessionHandle};
use crate::{
    ack::AckDecision,
    error::{RelayError, Result},
};

/// One scripted item on a session's delivery stream.
#[derive(Debug, Clone)]
pub enum MockItem {
    /// A message with this body.
    Body(Vec<u8>),
    /// The channel fails with this message.
    StreamError(String),
}

/// Script for one `open_session` call.
#[derive(Debug, Clone)]
pub enum MockSession {
    /// Setup fails with a connection error.
    SetupFailure(String),
    /// Setup succeeds and the stream yields `items`.
    Deliveries {
        /// Items yielded in order
        items: Vec<MockItem>,
        /// Keep the stream open after the last item instead of ending it
        keep_open: bool,
    },
}

/// Something the broker observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// Session number `n` (1-based) was opened.
    SessionOpened(usize),
    /// Setup of a session failed.
    SetupFailed(usize),
    /// The consumer pulled the delivery with this tag.
    Pulled(u64),
    /// The delivery with this tag was settled.
    Settled(u64, AckDecision),
    /// Session number `n` was closed.
    SessionClosed(usize),
}

#[derive(Default)]
struct MockState {
    sessions: VecDeque<MockSession>,
    journal: Vec<BrokerEvent>,
    open_attempts: usize,
    next_tag: u64,
    settle_error: Option<String>,
}

/// In-memory broker with scripted sessions.
///
/// Once the script runs out, further sessions open successfully and stay
/// idle, like a connected consumer on an empty queue.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<RwLock<MockState>>,
}

impl MockBroker {
    /// Creates a broker with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a session script.
    pub async fn push_session(&self, session: MockSession) {
        self.state.write().await.sessions.push_back(session);
    }

    /// Appends a session whose setup fails.
    pub async fn push_setup_failure(&self, message: impl Into<String>) {
        self.push_session(MockSession::SetupFailure(message.into())).await;
    }

    /// Appends a session that yields `bodies` and then ends its stream.
    pub async fn push_deliveries<I, B>(&self, bodies: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        let items = bodies.into_iter().map(|body| MockItem::Body(body.into())).collect();
        self.push_session(MockSession::Deliveries { items, keep_open: false }).await;
    }

    /// Appends a session that yields `bodies` and then stays open.
    pub async fn push_held_open<I, B>(&self, bodies: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        let items = bodies.into_iter().map(|body| MockItem::Body(body.into())).collect();
        self.push_session(MockSession::Deliveries { items, keep_open: true }).await;
    }

    /// Makes every following settlement fail with `message`.
    pub async fn inject_settle_error(&self, message: impl Into<String>) {
        self.state.write().await.settle_error = Some(message.into());
    }

    /// Returns the number of `open_session` calls, successful or not.
    pub async fn open_attempts(&self) -> usize {
        self.state.read().await.open_attempts
    }

    /// Returns every event observed so far.
    pub async fn journal(&self) -> Vec<BrokerEvent> {
        self.state.read().await.journal.clone()
    }

    /// Returns settlements in the order they were sent.
    pub async fn settlements(&self) -> Vec<(u64, AckDecision)> {
        self.state
            .read()
            .await
            .journal
            .iter()
            .filter_map(|event| match event {
                BrokerEvent::Settled(tag, decision) => Some((*tag, *decision)),
                _ => None,
            })
            .collect()
    }

    fn delivery_stream(&self, items: Vec<MockItem>, keep_open: bool) -> DeliveryStream {
        let state = self.state.clone();

        let scripted = stream::iter(items).then(move |item| {
            let state = state.clone();
            async move {
                match item {
                    MockItem::Body(body) => {
                        let mut guard = state.write().await;
                        guard.next_tag += 1;
                        let delivery_tag = guard.next_tag;
                        guard.journal.push(BrokerEvent::Pulled(delivery_tag));
                        drop(guard);

                        Ok(InboundDelivery::new(delivery_tag, false, body, MockAcker { state }))
                    },
                    MockItem::StreamError(message) => Err(RelayError::channel(message)),
                }
            }
        });

        if keep_open {
            scripted.chain(stream::pending()).boxed()
        } else {
            scripted.boxed()
        }
    }
}

impl Broker for MockBroker {
    fn open_session(&self) -> Pin<Box<dyn Future<Output = Result<BrokerSession>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.open_attempts += 1;
            let session_id = state.open_attempts;

            let script = state
                .sessions
                .pop_front()
                .unwrap_or(MockSession::Deliveries { items: Vec::new(), keep_open: true });

            match script {
                MockSession::SetupFailure(message) => {
                    state.journal.push(BrokerEvent::SetupFailed(session_id));
                    Err(RelayError::connection(message))
                },
                MockSession::Deliveries { items, keep_open } => {
                    state.journal.push(BrokerEvent::SessionOpened(session_id));
                    drop(state);

                    let handle = MockSessionHandle { state: self.state.clone(), session_id };
                    Ok(BrokerSession::new(self.delivery_stream(items, keep_open), handle))
                },
            }
        })
    }
}

struct MockAcker {
    state: Arc<RwLock<MockState>>,
}

impl Acknowledger for MockAcker {
    fn settle(
        &self,
        delivery_tag: u64,
        decision: AckDecision,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            if let Some(message) = &state.settle_error {
                return Err(RelayError::acknowledgement(delivery_tag, message.clone()));
            }
            state.journal.push(BrokerEvent::Settled(delivery_tag, decision));
            Ok(())
        })
    }
}

struct MockSessionHandle {
    state: Arc<RwLock<MockState>>,
    session_id: usize,
}

impl SessionHandle for MockSessionHandle {
    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            self.state.write().await.journal.push(BrokerEvent::SessionClosed(self.session_id));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_sessions_replayed_in_order() {
        let broker = MockBroker::new();
        broker.push_setup_failure("connection refused").await;
        broker.push_deliveries([b"{}".to_vec()]).await;

        assert!(matches!(broker.open_session().await, Err(RelayError::Connection { .. })));

        let (mut deliveries, handle) = broker.open_session().await.unwrap().into_parts();
        let delivery = deliveries.next().await.unwrap().unwrap();
        assert_eq!(delivery.delivery_tag(), 1);
        assert_eq!(delivery.body(), b"{}");
        delivery.settle(AckDecision::Acknowledge).await.unwrap();
        assert!(deliveries.next().await.is_none());
        handle.close().await;

        assert_eq!(broker.open_attempts().await, 2);
        assert_eq!(broker.journal().await, vec![
            BrokerEvent::SetupFailed(1),
            BrokerEvent::SessionOpened(2),
            BrokerEvent::Pulled(1),
            BrokerEvent::Settled(1, AckDecision::Acknowledge),
            BrokerEvent::SessionClosed(2),
        ]);
    }

    #[tokio::test]
    async fn injected_settle_error_returned() {
        let broker = MockBroker::new();
        broker.push_deliveries([b"{}".to_vec()]).await;
        broker.inject_settle_error("channel closed").await;

        let (mut deliveries, _handle) = broker.open_session().await.unwrap().into_parts();
        let delivery = deliveries.next().await.unwrap().unwrap();

        let err = delivery.settle(AckDecision::REQUEUE).await.unwrap_err();
        assert!(matches!(err, RelayError::Acknowledgement { delivery_tag: 1, .. }));
        assert!(broker.settlements().await.is_empty());
    }

    #[tokio::test]
    async fn stream_error_item_surfaces() {
        let broker = MockBroker::new();
        broker
            .push_session(MockSession::Deliveries {
                items: vec![MockItem::StreamError("channel reset".to_string())],
                keep_open: false,
            })
            .await;

        let (mut deliveries, _handle) = broker.open_session().await.unwrap().into_parts();
        assert!(matches!(deliveries.next().await, Some(Err(RelayError::Channel { .. }))));
    }
}
