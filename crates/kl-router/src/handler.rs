//! Handler and middleware types
//!
//! A [`Handler`] processes one message. A [`Middleware`] turns one handler
//! into another; the router folds its middleware list over each route handler
//! at registration time so the first middleware ends up outermost.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use kl_common::Message;

use crate::context::Context;

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

type HandlerFn = dyn Fn(Context, Message) -> HandlerFuture + Send + Sync;

/// Cheaply clonable message handler
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerFn>,
}

impl Handler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |ctx: Context, msg: Message| -> HandlerFuture { f(ctx, msg).boxed() }),
        }
    }

    pub fn call(&self, ctx: Context, msg: Message) -> HandlerFuture {
        (self.inner)(ctx, msg)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Handler")
    }
}

/// Handler-to-handler transformation
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: Handler) -> Handler;
}

impl<F> Middleware for F
where
    F: Fn(Handler) -> Handler + Send + Sync,
{
    fn wrap(&self, next: Handler) -> Handler {
        self(next)
    }
}

/// Wrap `handler` so that `middlewares[0]` is the outermost layer
pub(crate) fn compose(middlewares: &[Arc<dyn Middleware>], handler: Handler) -> Handler {
    middlewares
        .iter()
        .rev()
        .fold(handler, |next, middleware| middleware.wrap(next))
}
