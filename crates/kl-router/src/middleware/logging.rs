use std::time::Instant;

use chrono::Utc;
use kl_common::Message;
use tracing::{error, info};

use crate::handler::{Handler, Middleware};

/// Logs one line per handled message with its outcome and duration.
/// The inner handler's result is returned unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for LoggingMiddleware {
    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |ctx, msg: Message| {
            let topic = msg.topic().to_string();
            let partition = msg.partition();
            let offset = msg.offset();
            let key = msg.key.exists().then(|| msg.key.to_string());
            let fut = next.call(ctx, msg);

            async move {
                let started_at = Utc::now();
                let start = Instant::now();
                let result = fut.await;
                let duration_ms = start.elapsed().as_millis() as u64;

                match &result {
                    Ok(()) => info!(
                        topic = %topic,
                        partition,
                        offset,
                        key = key.as_deref(),
                        started_at = %started_at.to_rfc3339(),
                        duration_ms,
                        status = "success",
                        "Message handled"
                    ),
                    Err(e) => error!(
                        topic = %topic,
                        partition,
                        offset,
                        key = key.as_deref(),
                        started_at = %started_at.to_rfc3339(),
                        duration_ms,
                        status = "error",
                        error = %e,
                        "Message handler failed"
                    ),
                }

                result
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use kl_common::TopicPartition;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn subscriber(capture: &Capture) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .finish()
    }

    #[tokio::test]
    async fn test_logs_success() {
        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(subscriber(&capture));

        let handler = LoggingMiddleware.wrap(Handler::new(|_ctx, _msg| async { Ok(()) }));
        let msg = Message::new(TopicPartition::new("orders", 2, 7), Vec::new()).with_key("order-1");
        handler.call(Context::default(), msg).await.unwrap();

        let out = capture.contents();
        assert!(out.contains("Message handled"));
        assert!(out.contains("topic=orders"));
        assert!(out.contains("partition=2"));
        assert!(out.contains("order-1"));
        assert!(out.contains("duration_ms="));
        assert!(out.contains("success"));
    }

    #[tokio::test]
    async fn test_logs_and_returns_error() {
        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(subscriber(&capture));

        let handler = LoggingMiddleware
            .wrap(Handler::new(|_ctx, _msg| async { Err(anyhow::anyhow!("downstream unavailable")) }));
        let msg = Message::new(TopicPartition::new("orders", 0, 1), Vec::new());
        let err = handler.call(Context::default(), msg).await.unwrap_err();

        assert_eq!(err.to_string(), "downstream unavailable");
        let out = capture.contents();
        assert!(out.contains("Message handler failed"));
        assert!(out.contains("downstream unavailable"));
        assert!(!out.contains("key="));
    }
}
