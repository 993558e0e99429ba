//! Event bus adapter: publish-with-key over a partitioned log.
//!
//! The [`EventBus`] trait is the seam between the outbox publisher and the
//! transport.  Production uses [`KafkaEventBus`]; tests substitute the
//! deterministic in-process bus from `ldk-testkit`.
//!
//! Keying every message by aggregate id places all events of one aggregate
//! on the same partition in order; across aggregates there is no global
//! order guarantee.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::debug;

// ---------------------------------------------------------------------------
// EventBus seam
// ---------------------------------------------------------------------------

/// Synchronous-ack publish over a partitioned log.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one message and wait for the broker's durable acknowledgement
    /// (single-replica minimum) or `timeout`, whichever comes first.
    ///
    /// The payload bytes are shipped verbatim; the bus never inspects them.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), BusError>;
}

/// Why a publish did not get acknowledged.
#[derive(Debug)]
pub enum BusError {
    /// No acknowledgement within the deadline.  Retryable.
    Timeout,
    /// The broker rejected the message or the connection failed.  Retryable.
    Publish(String),
    /// The adapter could not be constructed from its settings.
    Config(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Timeout => write!(f, "publish timed out waiting for broker ack"),
            BusError::Publish(msg) => write!(f, "publish failed: {msg}"),
            BusError::Config(msg) => write!(f, "bus configuration invalid: {msg}"),
        }
    }
}

impl std::error::Error for BusError {}

// ---------------------------------------------------------------------------
// Kafka adapter
// ---------------------------------------------------------------------------

/// Kafka-backed [`EventBus`].
///
/// The producer is configured for durability over latency:
/// - `acks=all` — the ack means every in-sync replica has the write;
/// - `enable.idempotence=true` — broker-side dedup of producer retries, so
///   the at-least-once guarantee does not degrade into visible duplicates on
///   transient resends.
pub struct KafkaEventBus {
    producer: FutureProducer,
}

impl KafkaEventBus {
    /// Build a producer against `bootstrap_servers` (comma-separated
    /// host:port list).  `message_timeout` bounds how long librdkafka keeps
    /// retrying a record internally before reporting failure.
    pub fn from_bootstrap(
        bootstrap_servers: &str,
        message_timeout: Duration,
    ) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set(
                "message.timeout.ms",
                message_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| BusError::Config(e.to_string()))?;

        Ok(Self { producer })
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), BusError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let (partition, offset) = self
            .producer
            .send(record, timeout)
            .await
            .map_err(|(err, _record)| match err {
                rdkafka::error::KafkaError::MessageProduction(
                    rdkafka::types::RDKafkaErrorCode::MessageTimedOut,
                ) => BusError::Timeout,
                other => BusError::Publish(other.to_string()),
            })?;

        debug!(topic, key, partition, offset, "event acknowledged by bus");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_error_display_is_stable() {
        assert_eq!(
            BusError::Timeout.to_string(),
            "publish timed out waiting for broker ack"
        );
        assert!(BusError::Publish("broker down".to_string())
            .to_string()
            .contains("broker down"));
        assert!(BusError::Config("bad servers".to_string())
            .to_string()
            .contains("bad servers"));
    }
}
