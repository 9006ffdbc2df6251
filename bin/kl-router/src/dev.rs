//! Development mode: in-process consumer fed with generated traffic

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kl_queue::{ChannelConsumer, ChannelProducer, Consumer, ConsumerRecord, RecordTimestamp};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::handlers::{AUDIT_TOPIC, ORDERS_TOPIC};

/// Distinct order keys; once all are used, later orders are duplicates
const ORDER_KEYS: i64 = 5;

pub fn dev_consumer(interval: Duration, shutdown: CancellationToken) -> Arc<dyn Consumer> {
    let (consumer, producer) = ChannelConsumer::new("dev");
    info!(interval_ms = interval.as_millis() as u64, "Feeding sample traffic to the dev consumer");
    tokio::spawn(feed(producer, interval, shutdown));
    Arc::new(consumer)
}

async fn feed(producer: ChannelProducer, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    let mut offset = 0i64;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                for record in sample_records(offset) {
                    if producer.send(record).is_err() {
                        debug!("Dev consumer closed, stopping sample traffic");
                        return;
                    }
                }
                offset += 1;
            }
        }
    }
}

fn sample_records(offset: i64) -> Vec<ConsumerRecord> {
    let now = Utc::now().timestamp_millis();
    let order_id = format!("order-{}", offset % ORDER_KEYS);
    let order = format!(
        r#"{{"order_id":"{}","amount_cents":{},"currency":"EUR"}}"#,
        order_id,
        1000 + offset * 10
    );

    vec![
        ConsumerRecord::new(ORDERS_TOPIC, 0, offset)
            .with_key(order_id.clone())
            .with_value(order)
            .with_timestamp(RecordTimestamp::CreateTime(now)),
        ConsumerRecord::new(AUDIT_TOPIC, 0, offset)
            .with_key(order_id)
            .with_value(format!("order event {}", offset))
            .with_header("source", "kl-router-dev")
            .with_timestamp(RecordTimestamp::LogAppendTime(now)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_keys_repeat() {
        let first = sample_records(0);
        let later = sample_records(ORDER_KEYS);
        assert_eq!(first[0].key, later[0].key);
        assert_ne!(first[0].offset, later[0].offset);
    }

    #[test]
    fn test_sample_records_convert() {
        for record in sample_records(3) {
            let msg = record.into_message().unwrap();
            assert!(msg.key.exists());
        }
    }
}
