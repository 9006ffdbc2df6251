//! KafkaLight Router
//!
//! Consumes topics from Kafka and dispatches each message to its route handler
//! through the recovery, logging, tracing and deduplication middlewares.
//!
//! - Configuration: optional TOML file (`--config` / `KL_CONFIG_FILE`) plus environment overrides
//! - Deduplication: Redis when `REDIS_URL` is set, otherwise in-memory
//! - `--dev` runs against an in-process consumer fed with sample traffic

mod config;
mod dev;
mod handlers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use kl_queue::Consumer;
use kl_router::{
    DeduplicationMiddleware, Deduplicator, DispatchError, InMemoryDeduplicator, LoggingMiddleware,
    RecoveryMiddleware, RedisDeduplicator, Router, TracingMiddleware,
};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

const SERVICE_NAME: &str = "kl-router";

/// KafkaLight message router
#[derive(Parser, Debug)]
#[command(name = "kl-router")]
#[command(about = "Routes Kafka messages to topic handlers through a middleware chain")]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "KL_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Use the in-process consumer with generated sample traffic
    #[arg(long, env = "KL_DEV_MODE")]
    dev: bool,

    /// Interval between sample batches in dev mode
    #[arg(long, env = "KL_DEV_INTERVAL_MS", default_value = "2000")]
    dev_interval_ms: u64,

    /// Log output format: text or json
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let tracer_provider = init_tracing(args.log_format == "json");

    info!(dev = args.dev, "Starting KafkaLight Router");

    // 1. Load configuration
    let config = AppConfig::load(args.config.as_deref())?;
    info!(
        bootstrap_servers = %config.consumer.bootstrap_servers_string(),
        group_id = %config.consumer.group_id,
        auto_offset_reset = config.consumer.auto_offset_reset.as_str(),
        read_timeout_ms = config.router.read_timeout_ms,
        "Configuration loaded"
    );

    // Stops background helpers (dedup janitor, dev traffic) after the router closes
    let background = CancellationToken::new();

    // 2. Consumer
    let consumer = if args.dev {
        dev::dev_consumer(Duration::from_millis(args.dev_interval_ms), background.clone())
    } else {
        broker_consumer(&config)?
    };

    // 3. Deduplication store
    let dedup_store: Arc<dyn Deduplicator> = match &config.dedup.redis_url {
        Some(url) => Arc::new(
            RedisDeduplicator::connect(url)
                .await?
                .with_prefix(config.dedup.key_prefix.clone()),
        ),
        None => {
            info!("REDIS_URL not set, using in-memory deduplication");
            let store = Arc::new(InMemoryDeduplicator::new());
            store.spawn_janitor(
                Duration::from_secs(config.dedup.purge_interval_secs),
                background.clone(),
            );
            store
        }
    };

    // 4. Router, middlewares and routes
    let router = Arc::new(
        Router::builder(consumer)
            .config(config.router.clone())
            .error_handler(report_dispatch_error)
            .commit_on_error(handlers::is_poison)
            .build(),
    );

    router.use_middleware(RecoveryMiddleware::new());
    router.use_middleware(LoggingMiddleware::new());
    router.use_middleware(TracingMiddleware::global());
    router.use_middleware(
        DeduplicationMiddleware::new(dedup_store, config.dedup.ttl())
            .with_key_extractor(handlers::dedup_key),
    );

    router.register_route(handlers::ORDERS_TOPIC, handlers::order_created());
    router.register_route(handlers::AUDIT_TOPIC, handlers::audit_log());

    // 5. Dispatch loop
    let cancel = CancellationToken::new();
    let mut listener = {
        let router = router.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { router.start_listening(cancel).await })
    };

    info!(topics = ?router.topics(), "KafkaLight Router started. Press Ctrl+C to shutdown.");

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received...");
        }
        joined = &mut listener => {
            joined??;
            anyhow::bail!("dispatch loop exited unexpectedly");
        }
    }

    // 6. Graceful shutdown
    router.close(config.router.shutdown_timeout()).await?;
    if let Err(e) = listener.await? {
        warn!(error = %e, "Dispatch loop ended with error");
    }

    background.cancel();
    if let Err(e) = tracer_provider.shutdown() {
        warn!(error = %e, "Failed to shut down tracer provider");
    }

    info!("KafkaLight Router shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) -> SdkTracerProvider {
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(Resource::builder_empty().with_service_name(SERVICE_NAME).build())
        .build();
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_opentelemetry::layer().with_tracer(tracer));

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracer_provider
}

#[cfg(feature = "kafka")]
fn broker_consumer(config: &AppConfig) -> Result<Arc<dyn Consumer>> {
    Ok(Arc::new(kl_queue::KafkaConsumer::new(&config.consumer)?))
}

#[cfg(not(feature = "kafka"))]
fn broker_consumer(_config: &AppConfig) -> Result<Arc<dyn Consumer>> {
    anyhow::bail!("built without the `kafka` feature; run with --dev or rebuild with --features kafka")
}

fn report_dispatch_error(err: DispatchError) {
    match &err {
        DispatchError::Handler { topic, partition, offset, error } if handlers::is_poison(error) => {
            warn!(topic = %topic, partition, offset, error = %error, "Skipping poison message");
        }
        _ => error!(error = %err, "Dispatch error"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
