use std::sync::Arc;
use std::time::Duration;

use kl_common::Message;
use tracing::debug;

use crate::dedup::Deduplicator;
use crate::handler::{Handler, Middleware};

type KeyExtractor = Arc<dyn Fn(&Message) -> anyhow::Result<Option<String>> + Send + Sync>;

/// Skips messages whose dedup key was already seen within `ttl`.
///
/// Messages without a key pass through without touching the store.
/// Duplicates are absorbed and reported as success.
#[derive(Clone)]
pub struct DeduplicationMiddleware {
    store: Arc<dyn Deduplicator>,
    ttl: Duration,
    extractor: KeyExtractor,
}

impl DeduplicationMiddleware {
    /// Deduplicate on the message key
    pub fn new(store: Arc<dyn Deduplicator>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            extractor: Arc::new(|msg: &Message| -> anyhow::Result<Option<String>> {
                Ok(msg.key.exists().then(|| msg.key.to_text().into_owned()))
            }),
        }
    }

    /// Derive the dedup key from the message. `Ok(None)` or an empty key means
    /// the message is never deduplicated; an error fails the message.
    pub fn with_key_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&Message) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        self.extractor = Arc::new(extractor);
        self
    }
}

impl Middleware for DeduplicationMiddleware {
    fn wrap(&self, next: Handler) -> Handler {
        let this = self.clone();
        Handler::new(move |ctx, msg: Message| {
            let this = this.clone();
            let next = next.clone();
            async move {
                let key = match (this.extractor)(&msg)? {
                    Some(key) if !key.is_empty() => key,
                    _ => return next.call(ctx, msg).await,
                };

                if !this.store.set_if_not_exists(&key, this.ttl).await? {
                    debug!(
                        topic = %msg.topic(),
                        partition = msg.partition(),
                        offset = msg.offset(),
                        dedup_key = %key,
                        "Skipping duplicate message"
                    );
                    return Ok(());
                }

                next.call(ctx, msg).await
            }
        })
    }
}
