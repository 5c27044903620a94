//! Pub/sub transport for the ESP display gateway
//!
//! The gateway never talks to a broker directly. Everything goes through the
//! [`Transport`] trait, which offers topic subscription with a message
//! callback and fire-and-forget publishing. [`LocalBus`] is an in-process
//! implementation backed by tokio broadcast channels, used for tests and for
//! running gateway and devices inside one process.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Default channel capacity per topic
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Errors raised by a transport
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A message delivered on a topic
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Callback invoked for every message on a subscribed topic
///
/// Callbacks run on the delivery path and must not block. Anything that
/// needs to await should spawn.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Adapter interface to a topic-based pub/sub client
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe `handler` to every message published on `topic`
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> TransportResult<()>;

    /// Publish `payload` on `topic`
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> TransportResult<()>;
}

/// In-process transport
///
/// Each subscription gets its own task, so messages for one subscription are
/// delivered in publish order while different subscriptions run
/// independently.
pub struct LocalBus {
    topics: DashMap<String, broadcast::Sender<Message>>,
    capacity: usize,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Message> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .clone()
    }

    /// Number of active subscribers on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalBus {
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> TransportResult<()> {
        let mut rx = self.sender(topic).subscribe();
        let topic = topic.to_string();
        debug!(topic = %topic, "Subscribed");

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => handler(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic, skipped, "Subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> TransportResult<()> {
        trace!(topic, bytes = payload.len(), "Publishing");
        let message = Message {
            topic: topic.to_string(),
            payload,
        };
        // No receivers just means nobody listens on the topic yet
        let _ = self.sender(topic).send(message);
        Ok(())
    }
}

/// Thread-safe handle to a transport
pub type SharedTransport = Arc<dyn Transport>;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(
            "espdisplay/0/client",
            Arc::new(move |msg: Message| {
                let _ = tx.send(msg);
            }),
        )
        .await
        .unwrap();

        bus.publish("espdisplay/0/client", b"hello".to_vec())
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "espdisplay/0/client");
        assert_eq!(msg.payload, b"hello");
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(
            "a",
            Arc::new(move |msg: Message| {
                let _ = tx.send(msg);
            }),
        )
        .await
        .unwrap();

        bus.publish("b", b"other".to_vec()).await.unwrap();
        bus.publish("a", b"mine".to_vec()).await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.payload, b"mine");
        assert_eq!(bus.subscriber_count("a"), 1);
        assert_eq!(bus.subscriber_count("b"), 0);
    }

    #[tokio::test]
    async fn test_delivery_preserves_order() {
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(
            "seq",
            Arc::new(move |msg: Message| {
                let _ = tx.send(msg.payload[0]);
            }),
        )
        .await
        .unwrap();

        for i in 0..10u8 {
            bus.publish("seq", vec![i]).await.unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(rx.recv().await.unwrap(), i);
        }
    }
}
