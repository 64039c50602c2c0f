//! DLQ Producer: publishes quarantined messages to `<topic>.dlq` with
//! provenance headers describing why the message was quarantined.
//!
//! Built on `rdkafka::producer::FutureProducer`, mirroring the teacher's
//! `DeadLetterQueue::send_to_dlq`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};

use crate::config::{BrokerConfig, Compression, ProducerConfig, RequiredAcks};
use crate::error::{PipelineError, Result};
use crate::message::Message;
use crate::topics;

pub type AsyncErrorHandler = Arc<dyn Fn(Message, PipelineError) + Send + Sync>;

pub struct BatchPublishResult {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<(usize, PipelineError)>,
}

pub struct DlqProducer {
    producer: FutureProducer,
    config: ProducerConfig,
    closed: AtomicBool,
    round_robin: AtomicU64,
    async_error_handler: Option<AsyncErrorHandler>,
}

impl DlqProducer {
    pub fn new(broker: &BrokerConfig, config: &ProducerConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &broker.brokers)
            .set("message.timeout.ms", "5000")
            .set(
                "acks",
                match config.required_acks {
                    RequiredAcks::None => "0",
                    RequiredAcks::One => "1",
                    RequiredAcks::All => "all",
                },
            )
            .set(
                "compression.type",
                match config.compression {
                    Compression::None => "none",
                    Compression::Gzip => "gzip",
                    Compression::Snappy => "snappy",
                    Compression::Lz4 => "lz4",
                    Compression::Zstd => "zstd",
                },
            );

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| PipelineError::unavailable(format!("create dlq producer: {e}")))?;

        Ok(Self {
            producer,
            config: config.clone(),
            closed: AtomicBool::new(false),
            round_robin: AtomicU64::new(0),
            async_error_handler: None,
        })
    }

    pub fn with_async_error_handler(mut self, handler: AsyncErrorHandler) -> Self {
        self.async_error_handler = Some(handler);
        self
    }

    /// Publishes `msg` (already carrying DLQ provenance headers, see
    /// `crate::pool::build_dlq_record`) to `<msg.topic>.dlq`.
    pub async fn publish(&self, msg: &Message) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PipelineError::ProducerClosed);
        }
        if msg.value.len() > self.config.max_message_bytes {
            return Err(PipelineError::validation(format!(
                "message of {} bytes exceeds max_message_bytes {}",
                msg.value.len(),
                self.config.max_message_bytes
            )));
        }

        let target_topic = format!("{}.dlq", msg.topic);
        let headers = build_rdkafka_headers(&msg.headers);
        let partition = self.select_partition(&msg.topic, msg.key.as_deref());

        let mut record = FutureRecord::to(&target_topic)
            .payload(&msg.value)
            .headers(headers);
        if let Some(key) = msg.key.as_deref() {
            record = record.key(key);
        }
        if let Some(p) = partition {
            record = record.partition(p);
        }

        let mut attempt = 0u32;
        loop {
            match self
                .producer
                .send(record.clone(), Duration::from_secs(5))
                .await
            {
                Ok(_) => return Ok(()),
                Err((e, _)) if attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "dlq publish retrying");
                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * attempt as u64,
                    ))
                    .await;
                }
                Err((e, _)) => {
                    return Err(PipelineError::PublishFailed(e.to_string()));
                }
            }
        }
    }

    /// Publishes each message independently, preserving partial-success
    /// semantics by surfacing per-item errors by index.
    pub async fn publish_batch(&self, msgs: &[Message]) -> BatchPublishResult {
        let mut succeeded = 0;
        let mut errors = Vec::new();
        for (idx, msg) in msgs.iter().enumerate() {
            match self.publish(msg).await {
                Ok(()) => succeeded += 1,
                Err(e) => errors.push((idx, e)),
            }
        }
        BatchPublishResult {
            succeeded,
            failed: errors.len(),
            errors,
        }
    }

    /// Enqueues a publish without waiting; failures are forwarded to the
    /// configured async error handler, if any.
    pub fn publish_async(self: &Arc<Self>, msg: Message) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.publish(&msg).await {
                if let Some(handler) = &this.async_error_handler {
                    handler(msg, e);
                } else {
                    tracing::error!(error = %e, "async dlq publish failed, no handler configured");
                }
            }
        });
    }

    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// `Hash(key) mod numPartitions` when a key is present (delegated to
    /// librdkafka's default partitioner by omitting an explicit partition);
    /// round-robin otherwise.
    fn select_partition(&self, original_topic: &str, key: Option<&[u8]>) -> Option<i32> {
        if key.is_some() {
            return None;
        }
        let num_partitions = topics::find(original_topic)
            .map(|t| t.num_partitions)
            .unwrap_or(1);
        let next = self.round_robin.fetch_add(1, Ordering::Relaxed);
        Some((next % num_partitions as u64) as i32)
    }
}

fn build_rdkafka_headers(headers: &std::collections::HashMap<String, String>) -> rdkafka::message::OwnedHeaders {
    let mut owned = rdkafka::message::OwnedHeaders::new();
    for (k, v) in headers {
        owned = owned.insert(rdkafka::message::Header {
            key: k.as_str(),
            value: Some(v.as_str()),
        });
    }
    owned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use std::collections::HashMap;

    fn unreachable_broker() -> BrokerConfig {
        // librdkafka's producer construction doesn't dial the broker, so a
        // port nobody listens on is enough to exercise `publish` without a
        // live broker.
        BrokerConfig {
            brokers: "127.0.0.1:0".to_string(),
            sasl_username: None,
            sasl_password: None,
            tls_enabled: false,
        }
    }

    #[tokio::test]
    async fn oversize_payload_rejected_before_send() {
        let config = ProducerConfig {
            max_message_bytes: 4,
            ..ProducerConfig::default()
        };
        let producer = DlqProducer::new(&unreachable_broker(), &config)
            .expect("client construction does not dial the broker");

        let oversized = Message {
            topic: "patent.ingested".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            value: vec![0u8; 8],
            headers: HashMap::new(),
            timestamp: chrono::Utc::now(),
            high_water_mark: 0,
        };

        let err = producer.publish(&oversized).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn publish_closed_producer_fails_without_touching_the_network() {
        let producer = DlqProducer::new(&unreachable_broker(), &ProducerConfig::default())
            .expect("client construction does not dial the broker");
        producer.close().await.unwrap();

        let msg = Message {
            topic: "patent.ingested".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            value: b"payload".to_vec(),
            headers: HashMap::new(),
            timestamp: chrono::Utc::now(),
            high_water_mark: 0,
        };

        let err = producer.publish(&msg).await.unwrap_err();
        assert!(matches!(err, PipelineError::ProducerClosed));
    }
}
