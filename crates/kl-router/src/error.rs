use kl_common::MessageError;
use kl_queue::ConsumerError;
use thiserror::Error;

/// Errors returned by router lifecycle operations
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("router already started")]
    AlreadyStarted,

    #[error("router not started")]
    NotStarted,

    #[error("router stopped")]
    Stopped,

    #[error("failed to subscribe to topics: {0}")]
    Subscribe(#[source] ConsumerError),

    #[error("router cancelled")]
    Cancelled,

    #[error("failed to close consumer: {0}")]
    Close(#[source] ConsumerError),
}

/// Non-fatal anomalies reported to the error handler while dispatching
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("error reading message: {0}")]
    Poll(#[source] ConsumerError),

    #[error("topic not found in message")]
    MissingTopic,

    #[error("error converting message: {0}")]
    Conversion(#[source] MessageError),

    #[error("no handler for topic: {0}")]
    NoRoute(String),

    #[error("error handling message {topic}[{partition}]@{offset}: {error}")]
    Handler {
        topic: String,
        partition: i32,
        offset: i64,
        error: anyhow::Error,
    },

    #[error("error committing {topic}[{partition}]@{offset}: {error}")]
    Commit {
        topic: String,
        partition: i32,
        offset: i64,
        error: ConsumerError,
    },
}

impl DispatchError {
    /// The handler error, when this report is about a failed handler
    pub fn handler_error(&self) -> Option<&anyhow::Error> {
        match self {
            DispatchError::Handler { error, .. } => Some(error),
            _ => None,
        }
    }
}
