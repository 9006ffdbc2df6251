//! Trace-context propagation
//!
//! Extracts the upstream trace context from the message headers and runs the
//! inner handler inside a `kafka.consume` span parented to it. The extracted
//! context is also handed to inner layers via [`Context::trace_context`].

use std::sync::Arc;

use kl_common::{Message, MessageCarrier};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::context::Context;
use crate::handler::{Handler, Middleware};

#[derive(Clone)]
enum Propagation {
    Global,
    Custom(Arc<dyn TextMapPropagator + Send + Sync>),
}

#[derive(Clone)]
pub struct TracingMiddleware {
    propagation: Propagation,
}

impl TracingMiddleware {
    /// W3C `traceparent`/`tracestate` propagation
    pub fn new() -> Self {
        Self::with_propagator(TraceContextPropagator::new())
    }

    pub fn with_propagator<P>(propagator: P) -> Self
    where
        P: TextMapPropagator + Send + Sync + 'static,
    {
        Self {
            propagation: Propagation::Custom(Arc::new(propagator)),
        }
    }

    /// Use whatever propagator is installed process-wide
    pub fn global() -> Self {
        Self {
            propagation: Propagation::Global,
        }
    }

    fn extract(&self, msg: &mut Message) -> opentelemetry::Context {
        let carrier = MessageCarrier::new(msg);
        match &self.propagation {
            Propagation::Global => {
                opentelemetry::global::get_text_map_propagator(|p| p.extract(&carrier))
            }
            Propagation::Custom(p) => p.extract(&carrier),
        }
    }
}

impl Default for TracingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for TracingMiddleware {
    fn wrap(&self, next: Handler) -> Handler {
        let this = self.clone();
        Handler::new(move |ctx: Context, mut msg: Message| {
            let parent = this.extract(&mut msg);

            let key = msg.key.exists().then(|| msg.key.to_string());
            let span = tracing::info_span!(
                "kafka.consume",
                otel.kind = "consumer",
                messaging.system = "kafka",
                topic = %msg.topic(),
                partition = msg.partition(),
                offset = msg.offset(),
                key = key.as_deref(),
            );
            let _ = span.set_parent(parent.clone());

            next.call(ctx.with_trace_context(parent), msg).instrument(span)
        })
    }
}
