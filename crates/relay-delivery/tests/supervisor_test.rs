//! Integration tests for connection supervision.
//!
//! Uses the mock broker to script setup failures and dropped sessions, and
//! a test clock to observe reconnect waits without sleeping.

#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use relay_core::TestClock;
use relay_delivery::{
    broker::mock::{BrokerEvent, MockBroker},
    AckDecision, Forwarder, ForwarderConfig, RelayError, Supervisor, SupervisorConfig,
    SupervisorState,
};
use serde_json::json;
use tokio::time::timeout;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

const INGEST_PATH: &str = "/api/weather/logs";

async fn accepting_api() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path(INGEST_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn build_supervisor(
    broker: &MockBroker,
    server: &MockServer,
    config: SupervisorConfig,
    clock: &TestClock,
) -> Supervisor {
    let forwarder = Forwarder::new(
        ForwarderConfig::new(&server.uri(), INGEST_PATH),
        Arc::new(TestClock::new()),
    )
    .unwrap();

    Supervisor::new(Arc::new(broker.clone()), Arc::new(forwarder), config, Arc::new(clock.clone()))
}

fn valid_body() -> Vec<u8> {
    serde_json::to_vec(&json!({"location": "Lisbon", "temperature": 22.5, "humidity": 60}))
        .unwrap()
}

#[tokio::test]
async fn restarts_after_failures_until_cancelled() {
    let server = accepting_api().await;
    let broker = MockBroker::new();
    broker.push_setup_failure("connection refused").await;
    broker.push_setup_failure("connection refused").await;
    broker.push_deliveries([valid_body()]).await;

    let clock = TestClock::new();
    let supervisor =
        Arc::new(build_supervisor(&broker, &server, SupervisorConfig::default(), &clock));
    let token = supervisor.cancellation_token();

    let running = supervisor.clone();
    let task = tokio::spawn(async move { running.run().await });

    // The fourth session is idle on an empty queue.
    timeout(Duration::from_secs(5), async {
        while broker.open_attempts().await < 4 || supervisor.state().await != SupervisorState::Ready
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    token.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(supervisor.state().await, SupervisorState::Disconnected);
    assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(5); 3]);
    assert_eq!(broker.journal().await, vec![
        BrokerEvent::SetupFailed(1),
        BrokerEvent::SetupFailed(2),
        BrokerEvent::SessionOpened(3),
        BrokerEvent::Pulled(1),
        BrokerEvent::Settled(1, AckDecision::Acknowledge),
        BrokerEvent::SessionClosed(3),
        BrokerEvent::SessionOpened(4),
        BrokerEvent::SessionClosed(4),
    ]);

    let stats = supervisor.stats().await;
    assert_eq!(stats.sessions_started, 2);
    assert_eq!(stats.acknowledged, 1);
}

#[tokio::test]
async fn bounded_restarts_give_up() {
    let server = accepting_api().await;
    let broker = MockBroker::new();
    for _ in 0..3 {
        broker.push_setup_failure("connection refused").await;
    }

    let clock = TestClock::new();
    let config = SupervisorConfig { max_consecutive_failures: Some(3), ..Default::default() };
    let supervisor = build_supervisor(&broker, &server, config, &clock);

    let result = supervisor.run().await;

    assert!(matches!(result, Err(RelayError::RestartsExhausted { failures: 3 })));
    assert_eq!(broker.open_attempts().await, 3);
    assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(5); 2]);
}

#[tokio::test]
async fn session_with_progress_resets_failure_count() {
    let server = accepting_api().await;
    let broker = MockBroker::new();
    broker.push_setup_failure("connection refused").await;
    broker.push_deliveries([valid_body()]).await;
    broker.push_setup_failure("connection refused").await;
    broker.push_setup_failure("connection refused").await;

    let clock = TestClock::new();
    let config = SupervisorConfig { max_consecutive_failures: Some(2), ..Default::default() };
    let supervisor = build_supervisor(&broker, &server, config, &clock);

    let result = supervisor.run().await;

    assert!(matches!(result, Err(RelayError::RestartsExhausted { failures: 2 })));
    assert_eq!(broker.open_attempts().await, 4);
    assert_eq!(broker.settlements().await, vec![(1, AckDecision::Acknowledge)]);
}

#[tokio::test]
async fn startup_delay_precedes_first_connection() {
    let server = accepting_api().await;
    let broker = MockBroker::new();
    broker.push_setup_failure("connection refused").await;

    let clock = TestClock::new();
    let config = SupervisorConfig {
        startup_delay: Duration::from_secs(3),
        max_consecutive_failures: Some(1),
        ..Default::default()
    };
    let supervisor = build_supervisor(&broker, &server, config, &clock);

    let result = supervisor.run().await;

    assert!(matches!(result, Err(RelayError::RestartsExhausted { failures: 1 })));
    assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(3)]);
}

#[tokio::test]
async fn cancelled_supervisor_settles_nothing() {
    let server = accepting_api().await;
    let broker = MockBroker::new();
    broker.push_held_open([valid_body()]).await;

    let clock = TestClock::new();
    let supervisor = build_supervisor(&broker, &server, SupervisorConfig::default(), &clock);

    supervisor.cancellation_token().cancel();
    supervisor.run().await.unwrap();

    assert_eq!(supervisor.state().await, SupervisorState::Disconnected);
    assert!(broker.settlements().await.is_empty());
    assert!(clock.recorded_sleeps().is_empty());
}
