//! librdkafka-backed consumer

use std::time::Duration;

use async_trait::async_trait;
use kl_common::{ConsumerConfig, TopicPartition};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message as _, Timestamp};
use tracing::{debug, info};

use crate::{Consumer, ConsumerError, ConsumerRecord, RecordTimestamp};

pub struct KafkaConsumer {
    consumer: StreamConsumer,
    identifier: String,
    manual_offset_store: bool,
}

impl KafkaConsumer {
    pub fn new(config: &ConsumerConfig) -> Result<Self, ConsumerError> {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", config.bootstrap_servers_string())
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", config.auto_offset_reset.as_str())
            .set("enable.auto.commit", config.enable_auto_commit.to_string());

        if config.manual_offset_store {
            client.set("enable.auto.offset.store", "false");
        }

        for (key, value) in &config.properties {
            client.set(key, value);
        }

        let consumer: StreamConsumer = client.create()?;

        info!(
            bootstrap_servers = %config.bootstrap_servers_string(),
            group_id = %config.group_id,
            auto_offset_reset = config.auto_offset_reset.as_str(),
            "Created Kafka consumer"
        );

        Ok(Self {
            consumer,
            identifier: format!("kafka:{}", config.group_id),
            manual_offset_store: config.manual_offset_store,
        })
    }
}

fn to_record(msg: &BorrowedMessage<'_>) -> ConsumerRecord {
    let timestamp = match msg.timestamp() {
        Timestamp::NotAvailable => RecordTimestamp::NotAvailable,
        Timestamp::CreateTime(ms) => RecordTimestamp::CreateTime(ms),
        Timestamp::LogAppendTime(ms) => RecordTimestamp::LogAppendTime(ms),
    };

    let headers = msg
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| (h.key.to_string(), h.value.map(|v| v.to_vec())))
                .collect()
        })
        .unwrap_or_default();

    ConsumerRecord {
        topic: Some(msg.topic().to_string()),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(|k| k.to_vec()),
        value: msg.payload().map(|v| v.to_vec()),
        timestamp,
        headers,
    }
}

#[async_trait]
impl Consumer for KafkaConsumer {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), ConsumerError> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|e| ConsumerError::Subscription(e.to_string()))?;
        info!(consumer = %self.identifier, topics = ?topics, "Subscribed to topics");
        Ok(())
    }

    async fn read_message(&self, timeout: Duration) -> Result<ConsumerRecord, ConsumerError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(Ok(msg)) => Ok(to_record(&msg)),
            Ok(Err(e)) => Err(ConsumerError::Kafka(e)),
            Err(_) => Err(ConsumerError::Timeout),
        }
    }

    async fn commit(&self, position: &TopicPartition) -> Result<(), ConsumerError> {
        if !self.manual_offset_store {
            return Ok(());
        }
        self.consumer
            .store_offset(&position.topic, position.partition, position.offset + 1)
            .map_err(|e| ConsumerError::Commit(e.to_string()))
    }

    async fn close(&self) -> Result<(), ConsumerError> {
        self.consumer.unsubscribe();
        debug!(consumer = %self.identifier, "Unsubscribed");
        Ok(())
    }
}
