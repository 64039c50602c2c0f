//! Lifecycle Supervisor: wires Consumer → Worker Pool → DLQ Producer and
//! owns the shutdown sequence.
//!
//! Signal handling follows the teacher's `shutdown_signal()` in
//! `siem_unified_pipeline/src/main.rs`: race `ctrl_c()` against
//! `SIGTERM`, first one wins.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::consumer::Consumer;
use crate::dlq::DlqProducer;
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::registry::HandlerRegistry;

/// Runs one process's worth of pipeline: starts the consumer, builds the
/// Worker Pool against its channel, and blocks until a shutdown signal (or
/// an externally-triggered `cancel`) arrives, at which point it drains in
/// construction order reversed — pool first, then consumer, then DLQ
/// producer — bounded by `pool.drain_deadline()`.
pub async fn run(
    config: PipelineConfig,
    consumer: Arc<Consumer>,
    dlq: Arc<DlqProducer>,
    registry: Arc<HandlerRegistry>,
    cancel: CancellationToken,
) -> Result<()> {
    let receiver = consumer
        .clone()
        .start(
            cancel.clone(),
            Duration::from_millis(config.consumer.poll_wait_max_ms),
            channel_capacity(&config),
        )
        .await?;

    let pool = WorkerPool::new(receiver, registry, consumer.clone(), dlq.clone(), config.pool.clone());
    let workers = pool.spawn(cancel.clone());

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining workers");
        }
        _ = cancel.cancelled() => {
            tracing::info!("shutdown requested programmatically");
        }
    }

    cancel.cancel();

    let drain = async {
        for handle in workers {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(config.pool.drain_deadline(), drain)
        .await
        .is_err()
    {
        tracing::warn!("drain deadline exceeded, remaining workers abandoned");
    }

    consumer.close().await?;
    dlq.close().await?;
    tracing::info!("shutdown complete");
    Ok(())
}

/// `2N`: enough to smooth fetch jitter without unbounded queueing — the
/// channel applies backpressure once workers fall behind.
fn channel_capacity(config: &PipelineConfig) -> usize {
    config.pool.workers.max(1) * 2
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
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
