use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use thiserror::Error;

use crate::handler::{Handler, Middleware};

/// A handler panicked; carries the panic payload as text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("panic: {0}")]
pub struct PanicError(pub String);

impl PanicError {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        if let Some(s) = payload.downcast_ref::<&'static str>() {
            PanicError((*s).to_string())
        } else if let Some(s) = payload.downcast_ref::<String>() {
            PanicError(s.clone())
        } else {
            PanicError("unknown panic payload".to_string())
        }
    }
}

/// Await `fut`, turning a panic into a [`PanicError`]
pub(crate) async fn recover<F>(fut: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(PanicError::from_payload(payload).into()),
    }
}

/// Converts panics in inner layers into errors. Register it first.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryMiddleware;

impl RecoveryMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for RecoveryMiddleware {
    fn wrap(&self, next: Handler) -> Handler {
        Handler::new(move |ctx, msg| {
            let next = next.clone();
            // Calling `next` inside the future also catches panics raised
            // while inner layers build their futures.
            recover(async move { next.call(ctx, msg).await })
        })
    }
}
