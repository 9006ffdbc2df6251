//! KafkaLight Message Router
//!
//! This crate provides the dispatch engine with:
//! - Router: topic registration, the poll/dispatch loop and graceful shutdown
//! - Handler / Middleware: onion-style handler composition
//! - Middlewares: recovery, logging, tracing and deduplication
//! - Deduplicators: in-memory and Redis-backed test-and-set stores

pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod router;

pub use config::RouterConfig;
pub use context::Context;
pub use dedup::{DedupError, Deduplicator, InMemoryDeduplicator, RedisDeduplicator};
pub use error::{DispatchError, RouterError};
pub use handler::{Handler, HandlerFuture, Middleware};
pub use middleware::{
    DeduplicationMiddleware, LoggingMiddleware, PanicError, RecoveryMiddleware, TracingMiddleware,
};
pub use router::{Router, RouterBuilder, RouterState};

pub use kl_common::{Key, Message};

pub type Result<T> = std::result::Result<T, RouterError>;
