//! Long-poll consumer: fetches broker records, materializes `Message`s, and
//! tracks lag.
//!
//! Built on `rdkafka::consumer::StreamConsumer`, configured the way the
//! teacher's `KafkaConsumerWorker` configures `ClientConfig`: manual commit,
//! explicit `auto.offset.reset`, session/heartbeat timeouts, with a
//! `ConsumerContext` that logs rebalances.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    CommitMode, Consumer as RdConsumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::message::Message as RdMessage;
use rdkafka::TopicPartitionList;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::{AutoOffsetReset, BrokerConfig, ConsumerConfig, IsolationLevel};
use crate::error::{PipelineError, Result};
use crate::message::Message;

/// Read-only counters the Consumer exposes; the Worker Pool increments the
/// processed/failed/retried/dead-lettered members as it drives the retry
/// state machine, so both components share one `Arc<ConsumerMetrics>`.
#[derive(Default)]
pub struct ConsumerMetrics {
    pub messages_consumed: AtomicU64,
    pub messages_processed: AtomicU64,
    pub messages_failed: AtomicU64,
    pub messages_retried: AtomicU64,
    pub messages_dead_lettered: AtomicU64,
    last_consumed_at_ms: AtomicI64,
    lag: AtomicI64,
}

impl ConsumerMetrics {
    pub fn snapshot(&self) -> ConsumerMetricsSnapshot {
        ConsumerMetricsSnapshot {
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_retried: self.messages_retried.load(Ordering::Relaxed),
            messages_dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
            lag: self.lag.load(Ordering::Relaxed),
            last_consumed_at_ms: self.last_consumed_at_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerMetricsSnapshot {
    pub messages_consumed: u64,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub messages_retried: u64,
    pub messages_dead_lettered: u64,
    pub lag: i64,
    pub last_consumed_at_ms: i64,
}

struct RebalanceContext;

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        tracing::info!(?rebalance, "pre-rebalance");
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        tracing::info!(?rebalance, "post-rebalance");
    }
}

type LoggingConsumer = StreamConsumer<RebalanceContext>;

/// Belongs to exactly one consumer group; partitions are load-balanced
/// across group members by the broker. `Start` is single-shot.
pub struct Consumer {
    inner: LoggingConsumer,
    topics: RwLock<HashSet<String>>,
    started: AtomicBool,
    auto_commit_enabled: bool,
    pub metrics: Arc<ConsumerMetrics>,
}

impl Consumer {
    pub fn new(broker: &BrokerConfig, cfg: &ConsumerConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &broker.brokers)
            .set("group.id", &cfg.group_id)
            .set(
                "enable.auto.commit",
                if cfg.auto_commit_enabled { "true" } else { "false" },
            )
            .set(
                "auto.offset.reset",
                match cfg.auto_offset_reset {
                    AutoOffsetReset::Earliest => "earliest",
                    AutoOffsetReset::Latest => "latest",
                },
            )
            .set("session.timeout.ms", cfg.session_timeout_ms.to_string())
            .set(
                "heartbeat.interval.ms",
                cfg.heartbeat_interval_ms.to_string(),
            )
            .set("fetch.min.bytes", cfg.fetch_min_bytes.to_string())
            .set("fetch.message.max.bytes", cfg.fetch_max_bytes.to_string())
            .set(
                "isolation.level",
                match cfg.isolation_level {
                    IsolationLevel::ReadUncommitted => "read_uncommitted",
                    IsolationLevel::ReadCommitted => "read_committed",
                },
            );

        if cfg.auto_commit_enabled {
            client_config.set(
                "auto.commit.interval.ms",
                cfg.auto_commit_interval_ms.to_string(),
            );
        }

        if let (Some(user), Some(pass)) = (&broker.sasl_username, &broker.sasl_password) {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", user)
                .set("sasl.password", pass);
        } else if broker.tls_enabled {
            client_config.set("security.protocol", "SSL");
        }

        let inner: LoggingConsumer = client_config
            .create_with_context(RebalanceContext)
            .map_err(|e| PipelineError::unavailable(format!("create consumer: {e}")))?;

        Ok(Self {
            inner,
            topics: RwLock::new(HashSet::new()),
            started: AtomicBool::new(false),
            auto_commit_enabled: cfg.auto_commit_enabled,
            metrics: Arc::new(ConsumerMetrics::default()),
        })
    }

    /// Registers interest in a topic. Pre-start only.
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(PipelineError::AlreadyRunning);
        }
        self.topics.write().await.insert(topic.to_string());
        Ok(())
    }

    /// Subscribes the underlying client to every registered topic and
    /// starts the long-poll loop, forwarding materialized messages into the
    /// returned channel. A second call returns `AlreadyRunning`.
    pub async fn start(
        self: Arc<Self>,
        cancel: CancellationToken,
        wait_max: Duration,
        channel_capacity: usize,
    ) -> Result<mpsc::Receiver<Message>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyRunning);
        }

        let topics: Vec<String> = self.topics.read().await.iter().cloned().collect();
        if topics.is_empty() {
            return Err(PipelineError::validation("no topics subscribed"));
        }
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.inner
            .subscribe(&topic_refs)
            .map_err(|e| PipelineError::unavailable(format!("subscribe: {e}")))?;

        let (tx, rx) = mpsc::channel(channel_capacity);
        let this = self.clone();
        tokio::spawn(async move {
            this.run_loop(cancel, wait_max, tx).await;
        });

        Ok(rx)
    }

    async fn run_loop(
        &self,
        cancel: CancellationToken,
        wait_max: Duration,
        tx: mpsc::Sender<Message>,
    ) {
        loop {
            if cancel.is_cancelled() {
                tracing::info!("consumer loop cancelled, stopping fetch");
                break;
            }

            match self.poll(wait_max).await {
                Ok(Some(msg)) => {
                    crate::metrics::inc_messages_consumed(&msg.topic);
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "transient fetch error, retrying");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
        // Dropping `tx` here closes the channel, signalling workers to
        // drain and exit.
    }

    /// Blocks up to `wait_max` or until one message is available.
    pub async fn poll(&self, wait_max: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(wait_max, self.inner.recv()).await {
            Ok(Ok(borrowed)) => {
                let high_water_mark = self
                    .inner
                    .fetch_watermarks(borrowed.topic(), borrowed.partition(), Duration::from_secs(1))
                    .map(|(_, high)| high)
                    .unwrap_or(borrowed.offset() + 1);

                let headers = borrowed
                    .headers()
                    .map(|h| {
                        (0..h.count())
                            .filter_map(|i| {
                                let header = h.get(i);
                                let value = header.value.map(|v| {
                                    String::from_utf8_lossy(v).into_owned()
                                });
                                value.map(|v| (header.key.to_string(), v))
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                let message = Message {
                    topic: borrowed.topic().to_string(),
                    partition: borrowed.partition(),
                    offset: borrowed.offset(),
                    key: borrowed.key().map(|k| k.to_vec()),
                    value: borrowed.payload().unwrap_or_default().to_vec(),
                    headers,
                    timestamp: borrowed
                        .timestamp()
                        .to_millis()
                        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms))
                        .unwrap_or_else(Utc::now),
                    high_water_mark,
                };

                self.metrics
                    .last_consumed_at_ms
                    .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                self.metrics.lag.store(message.lag(), Ordering::Relaxed);
                crate::metrics::set_mq_depth(&message.topic, message.lag());

                Ok(Some(message))
            }
            Ok(Err(e)) => Err(PipelineError::unavailable(format!("kafka recv: {e}"))),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Commits a message's offset (offset + 1, the next offset to resume
    /// from). Manual commits are used unless auto-commit was selected at
    /// construction; exactly one commit strategy is selected at startup
    /// and the two are never combined.
    pub fn commit(&self, msg: &Message) -> Result<()> {
        if self.auto_commit_enabled {
            return Ok(());
        }
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &msg.topic,
            msg.partition,
            rdkafka::Offset::Offset(msg.offset + 1),
        )
        .map_err(|e| PipelineError::internal(format!("track offset: {e}")))?;
        self.inner
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| PipelineError::unavailable(format!("commit offset: {e}")))
    }

    pub fn metrics_snapshot(&self) -> ConsumerMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn close(&self) -> Result<()> {
        tracing::info!("consumer closed");
        Ok(())
    }
}
