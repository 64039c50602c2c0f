//! `worker`: drains the consumer channel through the Worker Pool against the
//! Handler Registry.
//!
//! Flags mirror the teacher's `Cli`/`Commands::Server` shape in
//! `siem_unified_pipeline/src/main.rs`, scoped to this binary's surface:
//! `--config`, `--workers` (default `CPU×2`), `--topics` (comma-separated
//! subset, default all).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use keyip_pipeline::config::PipelineConfig;
use keyip_pipeline::consumer::Consumer;
use keyip_pipeline::dlq::DlqProducer;
use keyip_pipeline::registry::HandlerRegistry;
use keyip_pipeline::topics::{self, RdKafkaAdmin};
use keyip_pipeline::{metrics, supervisor};

#[derive(Parser)]
#[command(author, version, about = "KeyIP async task pipeline worker")]
struct Cli {
    /// Configuration file path; falls back to KEYIP_CONFIG if unset.
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    /// Worker pool size; defaults to the configured value (CPU×2).
    #[arg(long)]
    workers: Option<usize>,

    /// Comma-separated topic subset to subscribe to; defaults to every
    /// topic in the catalog.
    #[arg(long)]
    topics: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.pool.workers = workers;
    }

    let admin = RdKafkaAdmin::new(&config.broker)?;
    topics::ensure_topics(&admin).await?;

    let consumer = Arc::new(Consumer::new(&config.broker, &config.consumer)?);
    let subscribed_topics = resolve_topics(cli.topics.as_deref());
    for topic in &subscribed_topics {
        consumer.subscribe(topic).await?;
    }

    let dlq = Arc::new(DlqProducer::new(&config.broker, &config.producer)?);
    let registry = Arc::new(build_registry());

    // Infra (broker consumer + DLQ producer) is reachable once both clients
    // construct successfully; readyz flips back to unready as soon as
    // shutdown begins.
    let ready = Arc::new(AtomicBool::new(true));

    let cancel = CancellationToken::new();
    let health_handle =
        spawn_health_server(config.http.bind_addr.clone(), cancel.clone(), ready.clone());

    let result = supervisor::run(config, consumer, dlq, registry, cancel.clone()).await;

    ready.store(false, Ordering::SeqCst);
    cancel.cancel();
    let _ = health_handle.await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "worker exited with error");
            std::process::exit(1);
        }
    }
}

/// Topic subset the worker subscribes to: every catalog entry by default,
/// or the caller-supplied comma-separated list.
fn resolve_topics(requested: Option<&str>) -> Vec<String> {
    match requested {
        Some(list) => list.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        None => topics::CATALOG.iter().map(|t| t.name.to_string()).collect(),
    }
}

/// Business-logic handlers live outside this crate; this registry is the
/// wiring point a deployment plugs its domain handlers into.
fn build_registry() -> HandlerRegistry {
    HandlerRegistry::builder().build()
}

/// `GET /healthz`, `GET /readyz`, `GET /metrics` on their own listener,
/// shut down last.
fn spawn_health_server(
    bind_addr: String,
    cancel: CancellationToken,
    ready: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = Router::new()
            .route("/healthz", get(|| async { "ok" }))
            .route("/readyz", get(readyz))
            .route("/metrics", get(|| async { metrics::render() }))
            .layer(TraceLayer::new_for_http())
            .with_state(ready);

        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, bind_addr, "failed to bind health listener");
                return;
            }
        };

        tracing::info!(bind_addr, "health/metrics listener up");
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel.cancelled().await;
        });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "health listener exited with error");
        }
    })
}

/// 200 while infra (consumer, DLQ producer) is up; 503 once shutdown has
/// begun and those clients are no longer guaranteed reachable.
async fn readyz(State(ready): State<Arc<AtomicBool>>) -> (StatusCode, &'static str) {
    if ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

fn init_logging() {
    let json = std::env::var("KEYIP_LOG_FORMAT").as_deref() == Ok("json");
    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env());
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
