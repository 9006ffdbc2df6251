use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub mod carrier;

pub use carrier::MessageCarrier;

// ============================================================================
// Core Message Types
// ============================================================================

/// Position of a record within the log
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// How the broker assigned the record timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampType {
    #[default]
    NotAvailable,
    CreateTime,
    LogAppendTime,
}

/// A record header. Keys are not required to be unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: Vec<u8>,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Message key.
///
/// An empty key and an absent key are the same thing: both report
/// `exists() == false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Key {
    data: Vec<u8>,
}

impl Key {
    /// A key with no data
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn exists(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// The key as UTF-8, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Text form that keeps distinct keys distinct.
    ///
    /// UTF-8 keys without a backslash are returned as is. Anything else is
    /// ASCII-escaped, which always yields a backslash, so the two forms never
    /// overlap. `Display` is lossy and must not be used for identity.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self.as_str() {
            Some(s) if !s.contains('\\') => Cow::Borrowed(s),
            _ => Cow::Owned(self.data.escape_ascii().to_string()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.data))
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self { data: value.as_bytes().to_vec() }
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self { data: value.into_bytes() }
    }
}

impl From<&[u8]> for Key {
    fn from(value: &[u8]) -> Self {
        Self { data: value.to_vec() }
    }
}

impl From<Vec<u8>> for Key {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl From<Option<Vec<u8>>> for Key {
    fn from(data: Option<Vec<u8>>) -> Self {
        Self { data: data.unwrap_or_default() }
    }
}

/// Dynamically typed keys (e.g. decoded from a JSON envelope) are accepted
/// only when they are a string or an array of byte values.
impl TryFrom<serde_json::Value> for Key {
    type Error = MessageError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        match value {
            Value::String(s) => Ok(Key::from(s)),
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(Key::from)
                .ok_or(MessageError::InvalidKeyType("array")),
            Value::Null => Err(MessageError::InvalidKeyType("null")),
            Value::Bool(_) => Err(MessageError::InvalidKeyType("bool")),
            Value::Number(_) => Err(MessageError::InvalidKeyType("number")),
            Value::Object(_) => Err(MessageError::InvalidKeyType("object")),
        }
    }
}

/// The message handed to route handlers
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic_partition: TopicPartition,
    pub value: Vec<u8>,
    pub key: Key,
    pub timestamp: DateTime<Utc>,
    pub timestamp_type: TimestampType,
    pub headers: Vec<Header>,
}

impl Message {
    pub fn new(topic_partition: TopicPartition, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic_partition,
            value: value.into(),
            key: Key::empty(),
            timestamp: DateTime::<Utc>::default(),
            timestamp_type: TimestampType::NotAvailable,
            headers: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>, timestamp_type: TimestampType) -> Self {
        self.timestamp = timestamp;
        self.timestamp_type = timestamp_type;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic_partition.topic
    }

    pub fn partition(&self) -> i32 {
        self.topic_partition.partition
    }

    pub fn offset(&self) -> i64 {
        self.topic_partition.offset
    }

    /// First header value stored under `key`
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_slice())
    }

    /// Decode the JSON value into `T`
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        serde_json::from_slice(&self.value).map_err(MessageError::Bind)
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Where a consumer group starts when it has no committed offset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl std::str::FromStr for OffsetReset {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" | "smallest" | "beginning" => Ok(OffsetReset::Earliest),
            "latest" | "largest" | "end" => Ok(OffsetReset::Latest),
            other => Err(MessageError::Config(format!("unknown offset reset policy: {}", other))),
        }
    }
}

/// Broker consumer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub bootstrap_servers: Vec<String>,
    pub group_id: String,
    pub auto_offset_reset: OffsetReset,
    pub enable_auto_commit: bool,
    /// Store offsets only when the router commits a message
    pub manual_offset_store: bool,
    /// Extra client properties passed through verbatim
    pub properties: HashMap<String, String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: vec!["localhost:9092".to_string()],
            group_id: "default-group".to_string(),
            auto_offset_reset: OffsetReset::Earliest,
            enable_auto_commit: true,
            manual_offset_store: false,
            properties: HashMap::new(),
        }
    }
}

impl ConsumerConfig {
    /// Comma-separated bootstrap list
    pub fn bootstrap_servers_string(&self) -> String {
        self.bootstrap_servers.join(",")
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid type for key: expected string or bytes, got {0}")]
    InvalidKeyType(&'static str),

    #[error("topic not found in message")]
    MissingTopic,

    #[error("timestamp out of range: {0}")]
    InvalidTimestamp(i64),

    #[error("failed to bind message value: {0}")]
    Bind(#[source] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
