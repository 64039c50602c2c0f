//! `apiserver`: the platform's HTTP/RPC front door. Domain routes, auth,
//! and RPC service implementations are collaborators outside this crate's
//! scope; this binary owns the process shell — config load, listener bind,
//! graceful shutdown — the way the teacher's `main` in
//! `siem_unified_pipeline` wires `axum::serve` against a `shutdown_signal`
//! future.

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use keyip_pipeline::config::PipelineConfig;
use keyip_pipeline::metrics;

#[derive(Parser)]
#[command(author, version, about = "KeyIP patent/molecule intelligence API server")]
struct Cli {
    /// Configuration file path; falls back to KEYIP_CONFIG if unset.
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    #[arg(long, default_value_t = 9090)]
    grpc_port: u16,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "apiserver exited with error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let _config: PipelineConfig = PipelineConfig::load(cli.config.as_deref())?;

    // The gRPC service implementations (domain repositories, business RPCs)
    // are out of this crate's scope; `grpc_port` is reserved here even
    // though no tonic server is wired in yet.
    let _ = cli.grpc_port;

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .route("/metrics", get(|| async { metrics::render() }))
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!("0.0.0.0:{}", cli.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind_addr, "apiserver listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("apiserver shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
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
