//! Router - topic registration and the dispatch loop
//!
//! - Middlewares are captured when a route is registered (first registered is outermost)
//! - One poll loop per router; each accepted message runs in its own tracked task
//! - `close` stops polling, waits (bounded) for in-flight handlers, then closes the consumer

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kl_common::TopicPartition;
use kl_queue::{Consumer, ConsumerError, ConsumerRecord};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::RouterConfig;
use crate::context::Context;
use crate::error::{DispatchError, RouterError};
use crate::handler::{compose, Handler, Middleware};
use crate::middleware::recover;
use crate::Result;

type ErrorHandler = Arc<dyn Fn(DispatchError) + Send + Sync>;
type CommitPredicate = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Router lifecycle: `Created -> Started -> Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Created,
    Started,
    Stopped,
}

#[derive(Default)]
struct Routes {
    middlewares: Vec<Arc<dyn Middleware>>,
    handlers: HashMap<String, Handler>,
    /// Subscription order
    topics: Vec<String>,
}

pub struct RouterBuilder {
    consumer: Arc<dyn Consumer>,
    config: RouterConfig,
    error_handler: Option<ErrorHandler>,
    commit_on_error: Vec<CommitPredicate>,
}

impl RouterBuilder {
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Called for every non-fatal dispatch anomaly. Defaults to an error log.
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(DispatchError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Commit the offset even when a handler fails with an error matching `predicate`
    pub fn commit_on_error<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.commit_on_error.push(Arc::new(predicate));
        self
    }

    pub fn build(self) -> Router {
        let error_handler: ErrorHandler = match self.error_handler {
            Some(handler) => handler,
            None => Arc::new(|err: DispatchError| {
                error!(error = %err, "Dispatch error");
            }),
        };

        Router {
            consumer: self.consumer,
            config: self.config,
            error_handler,
            commit_on_error: self.commit_on_error.into(),
            routes: RwLock::new(Routes::default()),
            state: Mutex::new(RouterState::Created),
            stop: CancellationToken::new(),
            consumer_closed: CancellationToken::new(),
            poller: TaskTracker::new(),
            tasks: TaskTracker::new(),
        }
    }
}

/// Routes messages from one consumer to per-topic handlers
pub struct Router {
    consumer: Arc<dyn Consumer>,
    config: RouterConfig,
    error_handler: ErrorHandler,
    commit_on_error: Arc<[CommitPredicate]>,

    /// Route table, written during setup and read by the dispatch loop
    routes: RwLock<Routes>,

    state: Mutex<RouterState>,

    /// Raised by `close` to end the dispatch loop
    stop: CancellationToken,

    /// Raised by `close` before the consumer is closed; abandoned tasks stop committing
    consumer_closed: CancellationToken,

    /// Held by the running dispatch loop
    poller: TaskTracker,

    /// In-flight handler tasks
    tasks: TaskTracker,
}

impl Router {
    pub fn builder(consumer: Arc<dyn Consumer>) -> RouterBuilder {
        RouterBuilder {
            consumer,
            config: RouterConfig::default(),
            error_handler: None,
            commit_on_error: Vec::new(),
        }
    }

    pub fn new(consumer: Arc<dyn Consumer>) -> Self {
        Self::builder(consumer).build()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Append a middleware. Only routes registered afterwards are wrapped by it.
    pub fn use_middleware<M>(&self, middleware: M)
    where
        M: Middleware + 'static,
    {
        self.routes.write().middlewares.push(Arc::new(middleware));
    }

    pub fn use_middlewares<I>(&self, middlewares: I)
    where
        I: IntoIterator<Item = Arc<dyn Middleware>>,
    {
        self.routes.write().middlewares.extend(middlewares);
    }

    /// Bind `handler`, wrapped in the current middlewares, to `topic`.
    ///
    /// Registering a topic again replaces its handler. Routes must be
    /// registered before `start_listening`: the subscription is taken once.
    pub fn register_route(&self, topic: impl Into<String>, handler: Handler) {
        let topic = topic.into();

        if self.state() != RouterState::Created {
            warn!(
                router = %self.config.name,
                topic = %topic,
                "Route registered after start; topic will not be subscribed"
            );
        }

        let mut routes = self.routes.write();
        let composed = compose(&routes.middlewares, handler);
        if routes.handlers.insert(topic.clone(), composed).is_none() {
            routes.topics.push(topic.clone());
        }
        debug!(router = %self.config.name, topic = %topic, "Registered route");
    }

    /// Registered topics in registration order
    pub fn topics(&self) -> Vec<String> {
        self.routes.read().topics.clone()
    }

    pub fn state(&self) -> RouterState {
        *self.state.lock()
    }

    /// Number of handler tasks still running
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Subscribe and run the dispatch loop until `cancel` fires or `close` is called.
    ///
    /// Returns `Ok(())` after `close` and [`RouterError::Cancelled`] when
    /// `cancel` fires. Handlers receive contexts derived from `cancel`.
    pub async fn start_listening(&self, cancel: CancellationToken) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                RouterState::Created => *state = RouterState::Started,
                RouterState::Started => return Err(RouterError::AlreadyStarted),
                RouterState::Stopped => return Err(RouterError::Stopped),
            }
        }

        let topics = self.topics();
        if let Err(e) = self.consumer.subscribe(&topics).await {
            {
                // `close` may have run while subscribing
                let mut state = self.state.lock();
                if *state == RouterState::Started {
                    *state = RouterState::Created;
                }
            }
            error!(router = %self.config.name, error = %e, "Failed to subscribe");
            return Err(RouterError::Subscribe(e));
        }

        let _running = self.poller.token();
        let lifetime = Context::new(cancel.child_token());
        let read_timeout = self.config.read_timeout();

        info!(
            router = %self.config.name,
            consumer = %self.consumer.identifier(),
            topics = ?topics,
            read_timeout_ms = self.config.read_timeout_ms,
            "Router started"
        );

        loop {
            if cancel.is_cancelled() {
                info!(router = %self.config.name, "Router cancelled");
                return Err(RouterError::Cancelled);
            }
            if self.stop.is_cancelled() {
                break;
            }

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => continue,
                _ = self.stop.cancelled() => break,
                polled = self.consumer.read_message(read_timeout) => polled,
            };

            self.dispatch(polled, &lifetime);
        }

        info!(router = %self.config.name, "Dispatch loop stopped");
        Ok(())
    }

    fn dispatch(&self, polled: std::result::Result<ConsumerRecord, ConsumerError>, lifetime: &Context) {
        let record = match polled {
            Ok(record) => record,
            Err(e) if e.is_timeout() => return,
            Err(e) => return self.report(DispatchError::Poll(e)),
        };

        if record.topic.is_none() {
            return self.report(DispatchError::MissingTopic);
        }

        let msg = match record.into_message() {
            Ok(msg) => msg,
            Err(e) => return self.report(DispatchError::Conversion(e)),
        };

        let handler = self.routes.read().handlers.get(msg.topic()).cloned();
        let Some(handler) = handler else {
            return self.report(DispatchError::NoRoute(msg.topic().to_string()));
        };

        let ctx = lifetime.child();
        let consumer = self.consumer.clone();
        let error_handler = self.error_handler.clone();
        let commit_on_error = self.commit_on_error.clone();
        let consumer_closed = self.consumer_closed.clone();

        self.tasks.spawn(async move {
            let position = msg.topic_partition.clone();
            let result = recover(async move { handler.call(ctx, msg).await }).await;

            let commit = match &result {
                Ok(()) => true,
                Err(e) => commit_on_error.iter().any(|predicate| predicate(e)),
            };

            if let Err(error) = result {
                error_handler(DispatchError::Handler {
                    topic: position.topic.clone(),
                    partition: position.partition,
                    offset: position.offset,
                    error,
                });
            }

            if commit && consumer_closed.is_cancelled() {
                warn!(
                    topic = %position.topic,
                    partition = position.partition,
                    offset = position.offset,
                    "Consumer closed, offset not committed"
                );
            } else if commit {
                commit_position(consumer.as_ref(), &position, error_handler.as_ref()).await;
            }
        });
    }

    fn report(&self, err: DispatchError) {
        (self.error_handler)(err)
    }

    /// Stop polling, wait up to `timeout` for in-flight handlers, then close the consumer.
    ///
    /// Handlers still running after `timeout` are abandoned, not aborted.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != RouterState::Started {
                return Err(RouterError::NotStarted);
            }
            *state = RouterState::Stopped;
        }

        info!(
            router = %self.config.name,
            in_flight = self.tasks.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Router stopping, waiting for in-flight handlers"
        );

        self.stop.cancel();
        self.poller.close();
        self.tasks.close();

        let drained = tokio::time::timeout(timeout, async {
            self.poller.wait().await;
            self.tasks.wait().await;
        })
        .await;

        if drained.is_err() {
            warn!(
                router = %self.config.name,
                abandoned = self.tasks.len(),
                "Timed out waiting for in-flight handlers, closing consumer anyway"
            );
        }

        self.consumer_closed.cancel();
        self.consumer.close().await.map_err(RouterError::Close)?;
        info!(router = %self.config.name, "Router stopped");
        Ok(())
    }
}

async fn commit_position(
    consumer: &dyn Consumer,
    position: &TopicPartition,
    error_handler: &(dyn Fn(DispatchError) + Send + Sync),
) {
    if let Err(error) = consumer.commit(position).await {
        error_handler(DispatchError::Commit {
            topic: position.topic.clone(),
            partition: position.partition,
            offset: position.offset,
            error,
        });
    }
}
