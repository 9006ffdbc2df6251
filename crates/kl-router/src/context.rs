//! Cancellable per-dispatch context

use tokio_util::sync::CancellationToken;

/// Passed to every handler and middleware.
///
/// Carries the cancellation token derived from the router's lifetime and the
/// trace context established by [`crate::TracingMiddleware`]. Cancellation is
/// cooperative: handlers observe it with [`Context::cancelled`] or
/// [`Context::is_cancelled`].
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
    trace: opentelemetry::Context,
}

impl Context {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            trace: opentelemetry::Context::new(),
        }
    }

    /// A context cancelled whenever this one is, carrying the same trace context
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            trace: self.trace.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn cancel(&self) {
        self.token.cancel()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn trace_context(&self) -> &opentelemetry::Context {
        &self.trace
    }

    pub fn with_trace_context(mut self, trace: opentelemetry::Context) -> Self {
        self.trace = trace;
        self
    }
}
