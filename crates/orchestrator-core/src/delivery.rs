//! Delivery Engine.
//!
//! Dispatches a claimed event to its configured channel and classifies the
//! outcome. The engine never re-attempts itself — a single [`DeliveryResult`]
//! goes back to the Outcome Writer, which decides whether a future poll
//! tick gets another shot.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::event::{DeliveryType, Event};

/// HTTP statuses that drive a retriable classification.
pub const RETRIABLE_HTTP_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Outcome of dispatching one event to its destination. There is no
/// `Failed` variant carrying a retry decision baked in — classification
/// happens here, re-attempt policy lives in the Outcome Writer.
#[derive(Debug, Clone)]
pub enum DeliveryResult {
    Success,
    Retriable { error: String },
    Terminal { error: String },
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Produces to a broker topic. Implemented by `orchestrator-broker-kafka`;
/// kept as a trait here so the core crate never depends on a concrete
/// broker client.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Produce `value` to `topic` keyed by `key`. Any produce failure is
    /// retriable.
    async fn produce(&self, topic: &str, key: &str, value: &[u8]) -> anyhow::Result<()>;
}

/// Dispatches claimed events to their configured delivery channel.
pub struct DeliveryEngine {
    http: reqwest::Client,
    broker: Arc<dyn BrokerProducer>,
}

impl DeliveryEngine {
    pub fn new(broker: Arc<dyn BrokerProducer>, connect_timeout: Duration, read_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()?;
        Ok(Self { http, broker })
    }

    /// Dispatch `event` to its channel. Never returns an `Err` — any
    /// failure in the delivery path is captured and mapped to a retriable
    /// [`DeliveryResult`] so a single event's failure can never halt the
    /// poll loop.
    pub async fn deliver(&self, event: &Event) -> DeliveryResult {
        match event.delivery_type {
            DeliveryType::Http => self.deliver_http(event).await,
            DeliveryType::Broker => self.deliver_broker(event).await,
        }
    }

    async fn deliver_http(&self, event: &Event) -> DeliveryResult {
        let url = match Url::parse(&event.destination) {
            Ok(url) => url,
            Err(e) => {
                return DeliveryResult::Terminal {
                    error: format!("malformed destination url: {e}"),
                }
            }
        };

        match self.http.post(url).json(&event.payload).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    DeliveryResult::Success
                } else if RETRIABLE_HTTP_STATUSES.contains(&status.as_u16()) {
                    DeliveryResult::Retriable {
                        error: format!("http status {status}"),
                    }
                } else {
                    DeliveryResult::Terminal {
                        error: format!("http status {status}"),
                    }
                }
            }
            Err(e) => classify_transport_error(&e),
        }
    }

    async fn deliver_broker(&self, event: &Event) -> DeliveryResult {
        // `destination` is the topic name; the produce key is the
        // external_job_id, which keeps per-job ordering on the broker side.
        let value = match serde_json::to_vec(&event.payload) {
            Ok(v) => v,
            Err(e) => {
                return DeliveryResult::Terminal {
                    error: format!("failed to encode payload: {e}"),
                }
            }
        };

        match self
            .broker
            .produce(&event.destination, &event.external_job_id, &value)
            .await
        {
            Ok(()) => DeliveryResult::Success,
            Err(e) => DeliveryResult::Retriable {
                error: format!("broker produce failed: {e:#}"),
            },
        }
    }
}

/// Classify a `reqwest::Error`: connect-refused, read-timeout, DNS
/// failure, and TLS handshake failure are all retriable; anything else
/// (e.g. a response body that failed to build) is treated conservatively
/// as retriable too, since we cannot distinguish a destination-side
/// problem from a transient local one.
fn classify_transport_error(error: &reqwest::Error) -> DeliveryResult {
    DeliveryResult::Retriable {
        error: format!("transport error: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DeliveryType, EventStatus};
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct NeverCalledBroker;

    #[async_trait]
    impl BrokerProducer for NeverCalledBroker {
        async fn produce(&self, _topic: &str, _key: &str, _value: &[u8]) -> anyhow::Result<()> {
            panic!("broker should not be invoked for an HTTP event");
        }
    }

    fn http_event(destination: String) -> Event {
        Event {
            id: Uuid::new_v4(),
            external_job_id: "job-1".into(),
            source: "orders".into(),
            scheduled_at: Utc::now(),
            delivery_type: DeliveryType::Http,
            destination,
            payload: serde_json::json!({"hello": "world"}),
            status: EventStatus::Processing,
            retry_count: 0,
            max_retries: 3,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            executed_at: None,
            locked_by: Some("worker-1".into()),
            lock_expires_at: Some(Utc::now()),
            partition_key: Event::partition_key_for(Utc::now()),
            version: 1,
        }
    }

    fn engine() -> DeliveryEngine {
        DeliveryEngine::new(
            Arc::new(NeverCalledBroker),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn http_2xx_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let event = http_event(format!("{}/hook", server.uri()));
        let result = engine().deliver(&event).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn http_503_is_retriable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let event = http_event(format!("{}/hook", server.uri()));
        match engine().deliver(&event).await {
            DeliveryResult::Retriable { error } => assert!(error.contains("503")),
            other => panic!("expected retriable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_400_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let event = http_event(format!("{}/hook", server.uri()));
        match engine().deliver(&event).await {
            DeliveryResult::Terminal { error } => assert!(error.contains("400")),
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_url_is_terminal_without_a_network_call() {
        let event = http_event("not a url".into());
        match engine().deliver(&event).await {
            DeliveryResult::Terminal { .. } => {}
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    struct FailingBroker;

    #[async_trait]
    impl BrokerProducer for FailingBroker {
        async fn produce(&self, _topic: &str, _key: &str, _value: &[u8]) -> anyhow::Result<()> {
            anyhow::bail!("broker unavailable")
        }
    }

    struct SucceedingBroker;

    #[async_trait]
    impl BrokerProducer for SucceedingBroker {
        async fn produce(&self, _topic: &str, _key: &str, _value: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn broker_event(broker: Arc<dyn BrokerProducer>) -> (DeliveryEngine, Event) {
        let engine = DeliveryEngine::new(broker, Duration::from_secs(5), Duration::from_secs(5)).unwrap();
        let mut event = http_event("unused".into());
        event.delivery_type = DeliveryType::Broker;
        event.destination = "orders.events".into();
        (engine, event)
    }

    #[tokio::test]
    async fn broker_produce_failure_is_always_retriable() {
        let (engine, event) = broker_event(Arc::new(FailingBroker));
        match engine.deliver(&event).await {
            DeliveryResult::Retriable { .. } => {}
            other => panic!("expected retriable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broker_produce_success() {
        let (engine, event) = broker_event(Arc::new(SucceedingBroker));
        assert!(engine.deliver(&event).await.is_success());
    }
}
