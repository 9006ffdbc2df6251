//! Built-in middlewares
//!
//! Recommended registration order: recovery, logging, tracing, deduplication.

pub mod dedup;
pub mod logging;
pub mod recovery;
pub mod trace;

pub use dedup::DeduplicationMiddleware;
pub use logging::LoggingMiddleware;
pub use recovery::{PanicError, RecoveryMiddleware};
pub use trace::TracingMiddleware;

pub(crate) use recovery::recover;
