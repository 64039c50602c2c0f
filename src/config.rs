//! Layered configuration: defaults → TOML file → environment overrides.
//!
//! Resolved once at process start (`PipelineConfig::load`) and handed down
//! by `Arc`; nothing in this crate re-reads configuration mid-process.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    pub broker: BrokerConfig,
    pub consumer: ConsumerConfig,
    pub producer: ProducerConfig,
    pub pool: PoolConfig,
    pub vector: VectorConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BrokerConfig {
    pub brokers: String,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    pub tls_enabled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutoOffsetReset {
    Earliest,
    Latest,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConsumerConfig {
    pub group_id: String,
    pub auto_offset_reset: AutoOffsetReset,
    pub session_timeout_ms: u32,
    pub heartbeat_interval_ms: u32,
    pub fetch_min_bytes: u32,
    pub fetch_max_bytes: u32,
    pub isolation_level: IsolationLevel,
    pub auto_commit_enabled: bool,
    pub auto_commit_interval_ms: u32,
    pub poll_wait_max_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: "keyip-pipeline".to_string(),
            auto_offset_reset: AutoOffsetReset::Earliest,
            session_timeout_ms: 10_000,
            heartbeat_interval_ms: 3_000,
            fetch_min_bytes: 1,
            fetch_max_bytes: 1_048_576,
            isolation_level: IsolationLevel::ReadCommitted,
            auto_commit_enabled: false,
            auto_commit_interval_ms: 5_000,
            poll_wait_max_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAcks {
    None,
    One,
    All,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProducerConfig {
    pub required_acks: RequiredAcks,
    pub compression: Compression,
    pub max_message_bytes: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            required_acks: RequiredAcks::One,
            compression: Compression::None,
            max_message_bytes: 1_048_576,
            max_retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    pub workers: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub handler_timeout_ms: u64,
    pub drain_grace_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 2 * num_cpus::get(),
            max_retries: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            handler_timeout_ms: 5 * 60 * 1_000,
            drain_grace_ms: 30_000,
        }
    }
}

impl PoolConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn drain_deadline(&self) -> Duration {
        self.handler_timeout() + Duration::from_millis(self.drain_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VectorConfig {
    pub endpoint: String,
    pub insert_batch_size: usize,
    pub max_top_k: usize,
    pub default_consistency_level: String,
    pub rrf_k: f64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:19530".to_string(),
            insert_batch_size: 1_000,
            max_top_k: 1_000,
            default_consistency_level: "bounded".to_string(),
            rrf_k: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HttpConfig {
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig {
                brokers: "localhost:9092".to_string(),
                sasl_username: None,
                sasl_password: None,
                tls_enabled: false,
            },
            consumer: ConsumerConfig::default(),
            producer: ProducerConfig::default(),
            pool: PoolConfig::default(),
            vector: VectorConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// Renders an enum config default to the lowercase string tag its
/// `#[serde(rename_all = "snake_case")]` impl would produce, so
/// `set_default` and the deserialized field always agree on spelling.
fn tag<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        other => unreachable!("enum config default must serialize to a string, got {other:?}"),
    }
}

impl PipelineConfig {
    /// Layers defaults, an optional TOML file (`--config`, or `KEYIP_CONFIG`
    /// when `path` is `None`), and `KEYIP__SECTION__FIELD`-style
    /// environment overrides, the way the teacher's `PipelineConfig::load`
    /// layers `config::Config` sources.
    ///
    /// Every non-`Option` field gets a default here so a config file or
    /// environment that only overrides a handful of keys still fully
    /// resolves; anything that fails to parse (malformed file, env var of
    /// the wrong type) surfaces as a `Config` error rather than silently
    /// falling back to compiled-in defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let resolved_path = path
            .map(|p| p.to_string())
            .or_else(|| std::env::var("KEYIP_CONFIG").ok());

        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("broker.brokers", defaults.broker.brokers.clone())?
            .set_default("broker.tls_enabled", defaults.broker.tls_enabled)?
            .set_default("consumer.group_id", defaults.consumer.group_id.clone())?
            .set_default(
                "consumer.auto_offset_reset",
                tag(&defaults.consumer.auto_offset_reset),
            )?
            .set_default(
                "consumer.session_timeout_ms",
                defaults.consumer.session_timeout_ms as i64,
            )?
            .set_default(
                "consumer.heartbeat_interval_ms",
                defaults.consumer.heartbeat_interval_ms as i64,
            )?
            .set_default(
                "consumer.fetch_min_bytes",
                defaults.consumer.fetch_min_bytes as i64,
            )?
            .set_default(
                "consumer.fetch_max_bytes",
                defaults.consumer.fetch_max_bytes as i64,
            )?
            .set_default(
                "consumer.isolation_level",
                tag(&defaults.consumer.isolation_level),
            )?
            .set_default(
                "consumer.auto_commit_enabled",
                defaults.consumer.auto_commit_enabled,
            )?
            .set_default(
                "consumer.auto_commit_interval_ms",
                defaults.consumer.auto_commit_interval_ms as i64,
            )?
            .set_default(
                "consumer.poll_wait_max_ms",
                defaults.consumer.poll_wait_max_ms as i64,
            )?
            .set_default(
                "producer.required_acks",
                tag(&defaults.producer.required_acks),
            )?
            .set_default("producer.compression", tag(&defaults.producer.compression))?
            .set_default(
                "producer.max_message_bytes",
                defaults.producer.max_message_bytes as i64,
            )?
            .set_default("producer.max_retries", defaults.producer.max_retries as i64)?
            .set_default(
                "producer.retry_backoff_ms",
                defaults.producer.retry_backoff_ms as i64,
            )?
            .set_default("pool.workers", defaults.pool.workers as i64)?
            .set_default("pool.max_retries", defaults.pool.max_retries as i64)?
            .set_default("pool.base_backoff_ms", defaults.pool.base_backoff_ms as i64)?
            .set_default("pool.max_backoff_ms", defaults.pool.max_backoff_ms as i64)?
            .set_default(
                "pool.handler_timeout_ms",
                defaults.pool.handler_timeout_ms as i64,
            )?
            .set_default("pool.drain_grace_ms", defaults.pool.drain_grace_ms as i64)?
            .set_default("vector.endpoint", defaults.vector.endpoint.clone())?
            .set_default(
                "vector.insert_batch_size",
                defaults.vector.insert_batch_size as i64,
            )?
            .set_default("vector.max_top_k", defaults.vector.max_top_k as i64)?
            .set_default(
                "vector.default_consistency_level",
                defaults.vector.default_consistency_level.clone(),
            )?
            .set_default("vector.rrf_k", defaults.vector.rrf_k)?
            .set_default("http.bind_addr", defaults.http.bind_addr.clone())?;

        if let Some(path) = resolved_path {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("KEYIP")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize::<Self>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_with_no_file_and_no_env_resolves_full_defaults() {
        // Clearing KEYIP_CONFIG isolates this test from a developer's shell.
        std::env::remove_var("KEYIP_CONFIG");
        let cfg = PipelineConfig::load(None).expect("defaults alone must fully resolve");
        assert_eq!(cfg.broker.brokers, PipelineConfig::default().broker.brokers);
        assert_eq!(cfg.pool.workers, PipelineConfig::default().pool.workers);
    }

    #[test]
    fn load_rejects_a_config_file_with_a_malformed_value() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("keyip-pipeline-test-{}.toml", std::process::id()));
        std::fs::write(&path, "[pool]\nworkers = \"not-a-number\"\n").unwrap();

        let result = PipelineConfig::load(Some(path.to_str().unwrap()));
        std::fs::remove_file(&path).ok();

        assert!(
            result.is_err(),
            "a field that fails to parse must surface as an error, not fall back to defaults"
        );
    }
}
