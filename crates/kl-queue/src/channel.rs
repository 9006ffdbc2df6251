//! In-process consumer backed by an unbounded channel.
//!
//! Used by the development binary and by tests. Records (or errors) pushed
//! through a [`ChannelProducer`] are returned by `read_message` in order.
//! Subscriptions, commits and closes are recorded for inspection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kl_common::TopicPartition;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{Consumer, ConsumerError, ConsumerRecord};

type Delivery = Result<ConsumerRecord, ConsumerError>;

/// Sending half of a [`ChannelConsumer`]
#[derive(Clone)]
pub struct ChannelProducer {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelProducer {
    pub fn send(&self, record: ConsumerRecord) -> Result<(), ConsumerError> {
        self.tx.send(Ok(record)).map_err(|_| ConsumerError::Closed)
    }

    /// Make the next poll fail with `error`
    pub fn send_error(&self, error: ConsumerError) -> Result<(), ConsumerError> {
        self.tx.send(Err(error)).map_err(|_| ConsumerError::Closed)
    }
}

pub struct ChannelConsumer {
    identifier: String,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    subscribed: Mutex<Vec<String>>,
    committed: Mutex<Vec<TopicPartition>>,
    subscribe_failure: Mutex<Option<String>>,
    close_count: AtomicUsize,
    closed: AtomicBool,
}

impl ChannelConsumer {
    pub fn new(identifier: impl Into<String>) -> (Self, ChannelProducer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = Self {
            identifier: identifier.into(),
            rx: tokio::sync::Mutex::new(rx),
            subscribed: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
            subscribe_failure: Mutex::new(None),
            close_count: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        };
        (consumer, ChannelProducer { tx })
    }

    /// Make subsequent `subscribe` calls fail
    pub fn fail_subscribe(&self, reason: impl Into<String>) {
        *self.subscribe_failure.lock() = Some(reason.into());
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscribed.lock().clone()
    }

    pub fn committed(&self) -> Vec<TopicPartition> {
        self.committed.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Consumer for ChannelConsumer {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), ConsumerError> {
        if let Some(reason) = self.subscribe_failure.lock().clone() {
            return Err(ConsumerError::Subscription(reason));
        }
        debug!(consumer = %self.identifier, topics = ?topics, "Subscribed");
        *self.subscribed.lock() = topics.to_vec();
        Ok(())
    }

    async fn read_message(&self, timeout: Duration) -> Result<ConsumerRecord, ConsumerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConsumerError::Closed);
        }

        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                // All producers dropped: behave like an idle topic
                drop(rx);
                tokio::time::sleep(timeout).await;
                Err(ConsumerError::Timeout)
            }
            Err(_) => Err(ConsumerError::Timeout),
        }
    }

    async fn commit(&self, position: &TopicPartition) -> Result<(), ConsumerError> {
        self.committed.lock().push(position.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), ConsumerError> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_count.fetch_add(1, Ordering::SeqCst);
        debug!(consumer = %self.identifier, "Closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_delivers_in_order() {
        let (consumer, producer) = ChannelConsumer::new("test");
        producer.send(ConsumerRecord::new("a", 0, 1)).unwrap();
        producer.send(ConsumerRecord::new("a", 0, 2)).unwrap();

        let first = assert_ok!(consumer.read_message(Duration::from_millis(10)).await);
        let second = assert_ok!(consumer.read_message(Duration::from_millis(10)).await);
        assert_eq!(first.offset, 1);
        assert_eq!(second.offset, 2);
    }

    #[tokio::test]
    async fn test_empty_channel_times_out() {
        let (consumer, _producer) = ChannelConsumer::new("test");
        let result = consumer.read_message(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ConsumerError::Timeout)));
    }

    #[tokio::test]
    async fn test_injected_error() {
        let (consumer, producer) = ChannelConsumer::new("test");
        producer.send_error(ConsumerError::Broker("broker down".into())).unwrap();

        let result = consumer.read_message(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ConsumerError::Broker(_))));
    }

    #[tokio::test]
    async fn test_subscribe_failure() {
        let (consumer, _producer) = ChannelConsumer::new("test");
        consumer.fail_subscribe("unknown topic");

        let err = assert_err!(consumer.subscribe(&["a".to_string()]).await);
        assert!(matches!(err, ConsumerError::Subscription(_)));
        assert!(consumer.subscribed_topics().is_empty());
    }

    #[tokio::test]
    async fn test_closed_consumer_rejects_reads() {
        let (consumer, _producer) = ChannelConsumer::new("test");
        assert_ok!(consumer.close().await);

        assert_eq!(consumer.close_count(), 1);
        let result = consumer.read_message(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ConsumerError::Closed)));
    }
}
