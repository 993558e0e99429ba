//! Deterministic in-process event bus.
//!
//! Records every acknowledged message in arrival order, per (topic, key), so
//! tests can assert both delivery and per-aggregate ordering.  Failure
//! injection models a bus outage: `set_unreachable` fails every publish
//! until cleared, `fail_next(n)` fails exactly the next `n` publishes.

use async_trait::async_trait;
use ldk_bus::{BusError, EventBus};
use std::sync::Mutex;
use std::time::Duration;

/// One acknowledged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    messages: Vec<RecordedMessage>,
    unreachable: bool,
    fail_remaining: u32,
}

/// In-process [`EventBus`] with recorded deliveries and failure injection.
#[derive(Default)]
pub struct MemoryBus {
    inner: Mutex<Inner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every publish until [`MemoryBus::set_unreachable`] is called with
    /// `false` again.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().unwrap().unreachable = unreachable;
    }

    /// Fail exactly the next `n` publishes, then recover.
    pub fn fail_next(&self, n: u32) {
        self.inner.lock().unwrap().fail_remaining = n;
    }

    /// Every acknowledged message, in arrival order.
    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.inner.lock().unwrap().messages.clone()
    }

    /// Acknowledged messages for one (topic, key) pair, in arrival order.
    pub fn messages_for(&self, topic: &str, key: &str) -> Vec<RecordedMessage> {
        self.inner
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.topic == topic && m.key == key)
            .cloned()
            .collect()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        _timeout: Duration,
    ) -> Result<(), BusError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.unreachable {
            return Err(BusError::Publish("bus unreachable (injected)".to_string()));
        }
        if inner.fail_remaining > 0 {
            inner.fail_remaining -= 1;
            return Err(BusError::Publish("transient failure (injected)".to_string()));
        }

        inner.messages.push(RecordedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn publish_ok(bus: &MemoryBus, topic: &str, key: &str, payload: &[u8]) -> bool {
        bus.publish(topic, key, payload, Duration::from_secs(1))
            .await
            .is_ok()
    }

    #[tokio::test]
    async fn records_messages_in_order() {
        let bus = MemoryBus::new();
        assert!(publish_ok(&bus, "t", "k1", b"a").await);
        assert!(publish_ok(&bus, "t", "k2", b"b").await);
        assert!(publish_ok(&bus, "t", "k1", b"c").await);

        let for_k1 = bus.messages_for("t", "k1");
        assert_eq!(for_k1.len(), 2);
        assert_eq!(for_k1[0].payload, b"a");
        assert_eq!(for_k1[1].payload, b"c");
        assert_eq!(bus.message_count(), 3);
    }

    #[tokio::test]
    async fn unreachable_rejects_until_cleared() {
        let bus = MemoryBus::new();
        bus.set_unreachable(true);
        assert!(!publish_ok(&bus, "t", "k", b"x").await);
        assert!(!publish_ok(&bus, "t", "k", b"x").await);
        bus.set_unreachable(false);
        assert!(publish_ok(&bus, "t", "k", b"x").await);
        assert_eq!(bus.message_count(), 1);
    }

    #[tokio::test]
    async fn fail_next_counts_down() {
        let bus = MemoryBus::new();
        bus.fail_next(2);
        assert!(!publish_ok(&bus, "t", "k", b"x").await);
        assert!(!publish_ok(&bus, "t", "k", b"x").await);
        assert!(publish_ok(&bus, "t", "k", b"x").await);
    }
}
