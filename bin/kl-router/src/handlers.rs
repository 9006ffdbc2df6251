//! Example route handlers

use kl_common::{Message, MessageError};
use kl_router::{Context, Handler};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub const ORDERS_TOPIC: &str = "orders";
pub const AUDIT_TOPIC: &str = "audit";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderCreated {
    pub order_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Error, Debug)]
pub enum InvalidOrder {
    #[error("order {0} has a negative amount")]
    NegativeAmount(String),

    #[error("order {0} has no currency")]
    MissingCurrency(String),
}

/// Errors that will fail again on redelivery; their offsets are committed anyway
pub fn is_poison(err: &anyhow::Error) -> bool {
    err.is::<MessageError>() || err.is::<InvalidOrder>()
}

/// Dedup key for all routes; message keys are only unique per topic
pub fn dedup_key(msg: &Message) -> anyhow::Result<Option<String>> {
    Ok(msg.key.exists().then(|| format!("{}:{}", msg.topic(), msg.key.to_text())))
}

fn validate(order: &OrderCreated) -> Result<(), InvalidOrder> {
    if order.amount_cents < 0 {
        return Err(InvalidOrder::NegativeAmount(order.order_id.clone()));
    }
    if order.currency.is_empty() {
        return Err(InvalidOrder::MissingCurrency(order.order_id.clone()));
    }
    Ok(())
}

pub fn order_created() -> Handler {
    Handler::new(|_ctx: Context, msg: Message| async move {
        let order: OrderCreated = msg.bind()?;
        validate(&order)?;

        info!(
            order_id = %order.order_id,
            amount_cents = order.amount_cents,
            currency = %order.currency,
            partition = msg.partition(),
            offset = msg.offset(),
            "Order received"
        );
        Ok(())
    })
}

pub fn audit_log() -> Handler {
    Handler::new(|_ctx: Context, msg: Message| async move {
        let headers: Vec<&str> = msg.headers.iter().map(|h| h.key.as_str()).collect();
        info!(
            key = %msg.key,
            bytes = msg.value.len(),
            headers = ?headers,
            timestamp = %msg.timestamp,
            "Audit record"
        );
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kl_common::TopicPartition;

    fn order(payload: &str) -> Message {
        Message::new(TopicPartition::new(ORDERS_TOPIC, 0, 0), payload.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_valid_order() {
        let msg = order(r#"{"order_id":"o-1","amount_cents":1250,"currency":"EUR"}"#);
        assert!(order_created().call(Context::default(), msg).await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_order_is_poison() {
        let err = order_created()
            .call(Context::default(), order("not json"))
            .await
            .unwrap_err();
        assert!(is_poison(&err));
    }

    #[tokio::test]
    async fn test_negative_amount_is_poison() {
        let msg = order(r#"{"order_id":"o-2","amount_cents":-5,"currency":"EUR"}"#);
        let err = order_created().call(Context::default(), msg).await.unwrap_err();
        assert_eq!(err.to_string(), "order o-2 has a negative amount");
        assert!(is_poison(&err));
    }

    #[test]
    fn test_dedup_key_is_scoped_by_topic() {
        let placed = order("{}").with_key("o-1");
        let audit = Message::new(TopicPartition::new(AUDIT_TOPIC, 0, 0), Vec::new()).with_key("o-1");

        assert_eq!(dedup_key(&placed).unwrap().as_deref(), Some("orders:o-1"));
        assert_eq!(dedup_key(&audit).unwrap().as_deref(), Some("audit:o-1"));
        assert_eq!(dedup_key(&order("{}")).unwrap(), None);
    }

    #[test]
    fn test_dedup_key_keeps_binary_keys_apart() {
        let a = order("{}").with_key(vec![0xffu8]);
        let b = order("{}").with_key(vec![0xfeu8]);
        assert_ne!(dedup_key(&a).unwrap(), dedup_key(&b).unwrap());
    }

    #[test]
    fn test_other_errors_are_not_poison() {
        assert!(!is_poison(&anyhow::anyhow!("database unavailable")));
    }
}
