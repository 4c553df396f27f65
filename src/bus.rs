//! Bus client facade.
//!
//! The dispatcher only ever talks to the broker through these seams:
//! [`MessageBus`] hands out named-queue publishers and consumers, and a
//! [`QueuePublisher::publish`] call resolves once the broker has
//! acknowledged the delivery. Real AMQP clients implement these traits
//! outside this crate; [`InMemoryMessageBus`] is the loopback
//! implementation used by the test-suite and for local development.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::message::{TransportEvent, UserMessage};

/// Publisher handle bound to a single named queue. Safe for concurrent
/// publishing from multiple dispatch tasks.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// The queue this handle publishes to.
    fn queue(&self) -> &str;

    /// Publishes one payload; resolves once the broker acknowledged it.
    async fn publish(&self, payload: Bytes) -> Result<(), BusError>;
}

/// Broker connection facade handing out per-queue publishers and consumers.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Declares `queue` and returns a publisher for it. Idempotent.
    async fn declare_publisher(&self, queue: &str) -> Result<Arc<dyn QueuePublisher>, BusError>;

    /// Attaches the single consumer for `queue`.
    async fn attach_consumer(&self, queue: &str) -> Result<BusConsumer, BusError>;
}

/// Receiving side of a queue. Payloads arrive in publish order.
pub struct BusConsumer {
    queue: String,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl BusConsumer {
    /// The queue this consumer is attached to.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Waits for the next payload. `None` once the queue is closed.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

#[derive(Default)]
struct QueueState {
    published: Mutex<Vec<Bytes>>,
    consumer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl QueueState {
    fn push(&self, payload: Bytes) {
        self.published
            .lock()
            .expect("queue log lock poisoned")
            .push(payload.clone());
        let consumer = self.consumer.lock().expect("consumer lock poisoned");
        if let Some(tx) = consumer.as_ref() {
            // A dropped receiver just means the consumer shut down first;
            // the broker keeps accepting publishes.
            let _ = tx.send(payload);
        }
    }
}

/// Loopback bus: every publish is recorded per queue and forwarded to the
/// queue's consumer when one is attached.
#[derive(Default)]
pub struct InMemoryMessageBus {
    queues: DashMap<String, Arc<QueueState>>,
}

impl InMemoryMessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, queue: &str) -> Arc<QueueState> {
        self.queues.entry(queue.to_string()).or_default().clone()
    }

    /// Raw payloads published to `queue`, in order.
    #[must_use]
    pub fn published(&self, queue: &str) -> Vec<Bytes> {
        self.queues
            .get(queue)
            .map(|state| {
                state
                    .published
                    .lock()
                    .expect("queue log lock poisoned")
                    .clone()
            })
            .unwrap_or_default()
    }

    /// Payloads published to `queue`, decoded as user messages.
    pub fn published_messages(&self, queue: &str) -> Result<Vec<UserMessage>, serde_json::Error> {
        self.published(queue)
            .iter()
            .map(|payload| serde_json::from_slice(payload))
            .collect()
    }

    /// Payloads published to `queue`, decoded as transport events.
    pub fn published_events(&self, queue: &str) -> Result<Vec<TransportEvent>, serde_json::Error> {
        self.published(queue)
            .iter()
            .map(|payload| serde_json::from_slice(payload))
            .collect()
    }
}

struct InMemoryPublisher {
    queue: String,
    state: Arc<QueueState>,
}

#[async_trait]
impl QueuePublisher for InMemoryPublisher {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn publish(&self, payload: Bytes) -> Result<(), BusError> {
        self.state.push(payload);
        Ok(())
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn declare_publisher(&self, queue: &str) -> Result<Arc<dyn QueuePublisher>, BusError> {
        Ok(Arc::new(InMemoryPublisher {
            queue: queue.to_string(),
            state: self.state(queue),
        }))
    }

    async fn attach_consumer(&self, queue: &str) -> Result<BusConsumer, BusError> {
        let state = self.state(queue);
        let mut consumer = state.consumer.lock().expect("consumer lock poisoned");
        if consumer.is_some() {
            return Err(BusError::ConsumerAttached(queue.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *consumer = Some(tx);
        Ok(BusConsumer {
            queue: queue.to_string(),
            rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_records_and_forwards_in_order() {
        let bus = InMemoryMessageBus::new();
        let publisher = bus.declare_publisher("t1.inbound").await.expect("declare");
        let mut consumer = bus.attach_consumer("t1.inbound").await.expect("attach");

        publisher.publish(Bytes::from_static(b"one")).await.expect("publish");
        publisher.publish(Bytes::from_static(b"two")).await.expect("publish");

        assert_eq!(consumer.next().await.as_deref(), Some(b"one".as_slice()));
        assert_eq!(consumer.next().await.as_deref(), Some(b"two".as_slice()));
        assert_eq!(bus.published("t1.inbound").len(), 2);
    }

    #[tokio::test]
    async fn only_one_consumer_per_queue() {
        let bus = InMemoryMessageBus::new();
        bus.attach_consumer("q").await.expect("first attach");
        assert!(matches!(
            bus.attach_consumer("q").await,
            Err(BusError::ConsumerAttached(_))
        ));
    }

    #[tokio::test]
    async fn publishing_without_consumer_still_records() {
        let bus = InMemoryMessageBus::new();
        let publisher = bus.declare_publisher("lonely").await.expect("declare");
        publisher.publish(Bytes::from_static(b"x")).await.expect("publish");
        assert_eq!(bus.published("lonely").len(), 1);
        assert!(bus.published("other").is_empty());
    }
}
