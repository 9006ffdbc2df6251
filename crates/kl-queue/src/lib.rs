//! KafkaLight consumer boundary
//!
//! The router polls a [`Consumer`] for native [`ConsumerRecord`]s and converts
//! them into [`kl_common::Message`]s. Backends:
//! - [`ChannelConsumer`]: in-process channel, used for local development and tests
//! - `KafkaConsumer`: librdkafka-backed consumer (feature `kafka`)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kl_common::{Header, Key, Message, MessageError, TimestampType, TopicPartition};

pub mod channel;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use channel::{ChannelConsumer, ChannelProducer};
#[cfg(feature = "kafka")]
pub use kafka::KafkaConsumer;

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// No record arrived within the read timeout. Never surfaced to error handlers.
    #[error("read timed out")]
    Timeout,

    #[error("subscription failed: {0}")]
    Subscription(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("consumer closed")]
    Closed,

    #[cfg(feature = "kafka")]
    #[error(transparent)]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl ConsumerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConsumerError::Timeout)
    }
}

/// Timestamp as reported by the broker, in milliseconds since the epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordTimestamp {
    #[default]
    NotAvailable,
    CreateTime(i64),
    LogAppendTime(i64),
}

/// A record as delivered by the broker client, before conversion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumerRecord {
    pub topic: Option<String>,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub timestamp: RecordTimestamp,
    pub headers: Vec<(String, Option<Vec<u8>>)>,
}

impl ConsumerRecord {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: Some(topic.into()),
            partition,
            offset,
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((key.into(), Some(value.into())));
        self
    }

    pub fn with_timestamp(mut self, timestamp: RecordTimestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Convert into the router's message representation
    pub fn into_message(self) -> Result<Message, MessageError> {
        let topic = self.topic.ok_or(MessageError::MissingTopic)?;

        let (timestamp, timestamp_type) = match self.timestamp {
            RecordTimestamp::NotAvailable => (DateTime::<Utc>::default(), TimestampType::NotAvailable),
            RecordTimestamp::CreateTime(ms) => (millis_to_datetime(ms)?, TimestampType::CreateTime),
            RecordTimestamp::LogAppendTime(ms) => (millis_to_datetime(ms)?, TimestampType::LogAppendTime),
        };

        let headers = self
            .headers
            .into_iter()
            .map(|(key, value)| Header::new(key, value.unwrap_or_default()))
            .collect();

        Ok(Message {
            topic_partition: TopicPartition::new(topic, self.partition, self.offset),
            value: self.value.unwrap_or_default(),
            key: Key::from(self.key),
            timestamp,
            timestamp_type,
            headers,
        })
    }
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, MessageError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(MessageError::InvalidTimestamp(ms))
}

/// Broker consumer as seen by the router.
///
/// Polling is only ever done from one task at a time.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Identifier used in logs
    fn identifier(&self) -> &str;

    /// Subscribe to the given topics, replacing any previous subscription
    async fn subscribe(&self, topics: &[String]) -> Result<(), ConsumerError>;

    /// Wait up to `timeout` for the next record.
    /// Returns [`ConsumerError::Timeout`] when nothing arrived.
    async fn read_message(&self, timeout: Duration) -> Result<ConsumerRecord, ConsumerError>;

    /// Mark the record at `position` as processed.
    /// Consumers relying on broker auto-commit keep the default no-op.
    async fn commit(&self, _position: &TopicPartition) -> Result<(), ConsumerError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ConsumerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_record() {
        let record = ConsumerRecord::new("t", 1, 42)
            .with_key("k")
            .with_value(br#"{"foo":"bar"}"#.to_vec())
            .with_header("h", "v")
            .with_timestamp(RecordTimestamp::CreateTime(1_700_000_000_000));

        let msg = record.into_message().unwrap();
        assert_eq!(msg.topic(), "t");
        assert_eq!(msg.partition(), 1);
        assert_eq!(msg.offset(), 42);
        assert_eq!(msg.key.to_string(), "k");
        assert_eq!(msg.headers, vec![Header::new("h", "v")]);
        assert_eq!(msg.timestamp_type, TimestampType::CreateTime);
        assert_eq!(msg.timestamp.timestamp_millis(), 1_700_000_000_000);

        #[derive(serde::Deserialize)]
        struct Payload {
            foo: String,
        }
        let v: Payload = msg.bind().unwrap();
        assert_eq!(v.foo, "bar");
    }

    #[test]
    fn test_convert_null_key_and_header_value() {
        let mut record = ConsumerRecord::new("t", 0, 0);
        record.headers.push(("empty".to_string(), None));

        let msg = record.into_message().unwrap();
        assert!(!msg.key.exists());
        assert!(msg.value.is_empty());
        assert_eq!(msg.header("empty"), Some(&[][..]));
        assert_eq!(msg.timestamp_type, TimestampType::NotAvailable);
    }

    #[test]
    fn test_convert_missing_topic() {
        let record = ConsumerRecord::default();
        assert!(matches!(record.into_message(), Err(MessageError::MissingTopic)));
    }

    #[test]
    fn test_convert_out_of_range_timestamp() {
        let record = ConsumerRecord::new("t", 0, 0).with_timestamp(RecordTimestamp::LogAppendTime(i64::MAX));
        assert!(matches!(record.into_message(), Err(MessageError::InvalidTimestamp(_))));
    }

    #[test]
    fn test_timeout_is_distinguished() {
        assert!(ConsumerError::Timeout.is_timeout());
        assert!(!ConsumerError::Broker("down".into()).is_timeout());
    }
}
