//! Worker Pool & per-message retry state machine.
//!
//! ```text
//!  INITIAL ─► ATTEMPT(attempt=0)
//!  ATTEMPT ─► success ──► COMMIT ─► DONE
//!           │
//!           └─► failure
//!                   │
//!                   ├─ attempt < MaxRetries ─► BACKOFF(capped) ─► ATTEMPT(attempt+1)
//!                   └─ attempt == MaxRetries ─► DLQ_PUBLISH ─► COMMIT ─► DONE
//! ```
//!
//! Backoff is the teacher's `retry_with_backoff` shape (plain loop,
//! `tokio::time::sleep`, doubling with a cap) generalized into the full
//! state machine; jitter is omitted so the exact delay an attempt waited can
//! be asserted from `compute_backoff` alone.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::consumer::Consumer;
use crate::dlq::DlqProducer;
use crate::message::Message;
use crate::registry::HandlerRegistry;

/// Per-message retry bookkeeping. Discarded on success, DLQ, or shutdown.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempt: u32,
    pub next_backoff: Duration,
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn initial() -> Self {
        Self {
            attempt: 0,
            next_backoff: Duration::ZERO,
            last_error: None,
        }
    }
}

/// `next_backoff = min(base·2^attempt, maxBackoff)`. A pure function,
/// separated from the `sleep` call, so the exact delay an attempt waits can
/// be asserted without sleeping in a test.
pub fn compute_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let scaled = base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    scaled.min(cap)
}

pub struct WorkerPool {
    receiver: Arc<Mutex<tokio::sync::mpsc::Receiver<Message>>>,
    registry: Arc<HandlerRegistry>,
    consumer: Arc<Consumer>,
    dlq: Arc<DlqProducer>,
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(
        receiver: tokio::sync::mpsc::Receiver<Message>,
        registry: Arc<HandlerRegistry>,
        consumer: Arc<Consumer>,
        dlq: Arc<DlqProducer>,
        config: PoolConfig,
    ) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            registry,
            consumer,
            dlq,
            config,
        }
    }

    /// Spawns `N = max(1, configured)` long-lived workers draining the
    /// shared channel. Returns their join handles so the Supervisor can
    /// enforce the drain deadline.
    pub fn spawn(&self, cancel: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let n = self.config.workers.max(1);
        (0..n)
            .map(|id| {
                let receiver = self.receiver.clone();
                let registry = self.registry.clone();
                let consumer = self.consumer.clone();
                let dlq = self.dlq.clone();
                let config = self.config.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    worker_loop(id, receiver, registry, consumer, dlq, config, cancel).await;
                })
            })
            .collect()
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<tokio::sync::mpsc::Receiver<Message>>>,
    registry: Arc<HandlerRegistry>,
    consumer: Arc<Consumer>,
    dlq: Arc<DlqProducer>,
    config: PoolConfig,
    cancel: CancellationToken,
) {
    loop {
        let msg = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(msg) = msg else {
            tracing::info!(worker_id, "channel closed, worker draining complete");
            break;
        };

        process_message(&msg, &registry, &consumer, &dlq, &config, &cancel).await;
    }
}

/// Drives one message through the state machine above. Returns once the
/// message reaches `DONE`, or exits early (no commit, no DLQ) if cancelled
/// mid-backoff — the message will be redelivered after rebalance.
async fn process_message(
    msg: &Message,
    registry: &HandlerRegistry,
    consumer: &Consumer,
    dlq: &Arc<DlqProducer>,
    config: &PoolConfig,
    cancel: &CancellationToken,
) {
    let Some(handler) = registry.get(&msg.topic) else {
        tracing::warn!(topic = %msg.topic, "no handler registered, committing and dropping");
        if let Err(e) = consumer.commit(msg) {
            tracing::error!(error = %e, "failed to commit offset for unhandled topic");
        }
        return;
    };

    let mut state = RetryState::initial();

    loop {
        crate::metrics::active_tasks_inc(&msg.topic);
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(config.handler_timeout(), handler.handle(msg)).await;
        crate::metrics::observe_task_duration(&msg.topic, started.elapsed().as_secs_f64());
        crate::metrics::active_tasks_dec(&msg.topic);

        let result = match outcome {
            Ok(handler_result) => handler_result,
            Err(_elapsed) => Err(crate::error::PipelineError::timeout(format!(
                "handler for {} exceeded {:?}",
                msg.topic,
                config.handler_timeout()
            ))),
        };

        match result {
            Ok(()) => {
                consumer.metrics.messages_processed.fetch_add(1, Ordering::Relaxed);
                crate::metrics::inc_messages_processed(&msg.topic);
                if let Err(e) = consumer.commit(msg) {
                    tracing::error!(error = %e, "failed to commit offset after success");
                }
                return;
            }
            Err(e) => {
                consumer.metrics.messages_failed.fetch_add(1, Ordering::Relaxed);
                crate::metrics::inc_messages_failed(&msg.topic);
                crate::metrics::inc_error("worker_pool", &format!("{:?}", e.kind()), "error");
                state.last_error = Some(e.to_string());

                if state.attempt < config.max_retries {
                    state.next_backoff = compute_backoff(
                        state.attempt,
                        Duration::from_millis(config.base_backoff_ms),
                        Duration::from_millis(config.max_backoff_ms),
                    );
                    state.attempt += 1;
                    consumer.metrics.messages_retried.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::inc_messages_retried(&msg.topic);

                    tokio::select! {
                        _ = tokio::time::sleep(state.next_backoff) => {}
                        _ = cancel.cancelled() => {
                            tracing::info!(
                                topic = %msg.topic,
                                offset = msg.offset,
                                "cancelled during backoff, leaving uncommitted for redelivery"
                            );
                            return;
                        }
                    }
                    continue;
                }

                // Retries exhausted: quarantine to DLQ, then commit
                // regardless of DLQ publish outcome — a DLQ publish failure
                // is logged, not retried indefinitely.
                let dlq_record = build_dlq_record(msg, &state);
                match dlq.publish(&dlq_record).await {
                    Ok(()) => {
                        consumer
                            .metrics
                            .messages_dead_lettered
                            .fetch_add(1, Ordering::Relaxed);
                        crate::metrics::inc_messages_dead_lettered(&msg.topic);
                    }
                    Err(publish_err) => {
                        tracing::error!(error = %publish_err, "dlq publish failed, committing anyway");
                    }
                }
                if let Err(e) = consumer.commit(msg) {
                    tracing::error!(error = %e, "failed to commit offset after dlq publish");
                }
                return;
            }
        }
    }
}

/// Builds the DLQ record: original bytes as the value, original key
/// preserved, headers carry provenance plus every original header (spec
/// §4.5).
fn build_dlq_record(msg: &Message, state: &RetryState) -> Message {
    let mut headers = msg.headers.clone();
    headers.insert("original_topic".to_string(), msg.topic.clone());
    headers.insert("original_partition".to_string(), msg.partition.to_string());
    headers.insert("original_offset".to_string(), msg.offset.to_string());
    headers.insert(
        "error".to_string(),
        state.last_error.clone().unwrap_or_default(),
    );

    Message {
        topic: msg.topic.clone(),
        partition: msg.partition,
        offset: msg.offset,
        key: msg.key.clone(),
        value: msg.value.clone(),
        headers,
        timestamp: msg.timestamp,
        high_water_mark: msg.high_water_mark,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready};

    /// A pending retry wait must be interruptible by shutdown rather than
    /// running the backoff to completion, so `tokio::select!` against
    /// `cancel.cancelled()` is exercised with manual polling instead of a
    /// live timer.
    #[test]
    fn cancellation_preempts_a_pending_retry_wait() {
        let cancel = CancellationToken::new();
        let mut fut = tokio_test::task::spawn(cancel.clone().cancelled_owned());
        assert_pending!(fut.poll());

        cancel.cancel();
        assert_ready!(fut.poll());
    }

    #[test]
    fn backoff_doubles_and_clamps_to_cap() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        assert_eq!(compute_backoff(0, base, cap), Duration::from_secs(1));
        assert_eq!(compute_backoff(1, base, cap), Duration::from_secs(2));
        assert_eq!(compute_backoff(2, base, cap), Duration::from_secs(4));
        assert_eq!(compute_backoff(10, base, cap), cap, "must clamp to maxBackoff");
    }

    #[test]
    fn second_retry_waits_twice_as_long_as_the_first() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        assert_eq!(compute_backoff(0, base, cap), Duration::from_secs(1));
        assert_eq!(compute_backoff(1, base, cap), Duration::from_secs(2));
    }

    #[test]
    fn build_dlq_record_preserves_original_headers_and_adds_provenance() {
        let mut original_headers = std::collections::HashMap::new();
        original_headers.insert("trace_id".to_string(), "abc".to_string());
        let msg = Message {
            topic: "patent.ingested".to_string(),
            partition: 2,
            offset: 42,
            key: Some(b"US1234".to_vec()),
            value: b"payload".to_vec(),
            headers: original_headers,
            timestamp: chrono::Utc::now(),
            high_water_mark: 100,
        };
        let state = RetryState {
            attempt: 3,
            next_backoff: Duration::ZERO,
            last_error: Some("boom".to_string()),
        };

        let record = build_dlq_record(&msg, &state);
        assert_eq!(record.headers["trace_id"], "abc");
        assert_eq!(record.headers["original_topic"], "patent.ingested");
        assert_eq!(record.headers["original_partition"], "2");
        assert_eq!(record.headers["original_offset"], "42");
        assert_eq!(record.headers["error"], "boom");
        assert_eq!(record.value, b"payload");
    }
}
