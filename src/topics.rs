//! Topic catalog and `EnsureTopics` bootstrap.
//!
//! The catalog is a fixed, compile-time enumeration of well-known topics
//! partitioned by function (ingestion, analysis, vectorization,
//! infringement, notification, audit) plus their DLQ siblings. No topic is
//! ever deleted by this component.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::RDKafkaErrorCode;

use crate::config::BrokerConfig;
use crate::error::{PipelineError, Result};

/// Retention class, one of the five buckets allowed for
/// `TopicConfig.retention_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionClass {
    ThreeDays,
    SevenDays,
    ThirtyDays,
    NinetyDays,
    OneYear,
}

impl RetentionClass {
    pub const fn as_millis(self) -> i64 {
        const DAY_MS: i64 = 24 * 60 * 60 * 1000;
        match self {
            Self::ThreeDays => 3 * DAY_MS,
            Self::SevenDays => 7 * DAY_MS,
            Self::ThirtyDays => 30 * DAY_MS,
            Self::NinetyDays => 90 * DAY_MS,
            Self::OneYear => 365 * DAY_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    Delete,
    Compact,
}

#[derive(Debug, Clone)]
pub struct TopicConfig {
    pub name: &'static str,
    pub num_partitions: u32,
    pub replication_factor: u16,
    pub retention: RetentionClass,
    pub cleanup_policy: CleanupPolicy,
    pub max_message_bytes: usize,
}

impl TopicConfig {
    const fn new(name: &'static str, num_partitions: u32, retention: RetentionClass) -> Self {
        Self {
            name,
            num_partitions,
            replication_factor: 3,
            retention,
            cleanup_policy: CleanupPolicy::Delete,
            max_message_bytes: 1_048_576,
        }
    }

    /// Name of this topic's dead-letter sibling: `<topic>.dlq`.
    pub fn dlq_name(&self) -> String {
        format!("{}.dlq", self.name)
    }
}

/// The well-known topic catalog. Functional groups: ingestion, analysis,
/// vectorization, infringement, notification, audit.
pub static CATALOG: Lazy<Vec<TopicConfig>> = Lazy::new(|| {
    vec![
        TopicConfig::new("patent.ingested", 12, RetentionClass::SevenDays),
        TopicConfig::new("molecule.ingested", 12, RetentionClass::SevenDays),
        TopicConfig::new("patent.analyzed", 12, RetentionClass::ThirtyDays),
        TopicConfig::new("molecule.analyzed", 12, RetentionClass::ThirtyDays),
        TopicConfig::new("vectorization.requested", 6, RetentionClass::ThreeDays),
        TopicConfig::new("infringement.detected", 6, RetentionClass::NinetyDays),
        TopicConfig::new("notification.dispatch", 6, RetentionClass::ThreeDays),
        TopicConfig::new("audit.log", 3, RetentionClass::OneYear),
    ]
});

/// Every DLQ sibling name the catalog implies.
pub fn dlq_topics() -> Vec<String> {
    CATALOG.iter().map(TopicConfig::dlq_name).collect()
}

pub fn find(name: &str) -> Option<&'static TopicConfig> {
    CATALOG.iter().find(|t| t.name == name)
}

/// Narrow interface this crate needs from a broker's admin API, so
/// `ensure_topics` is unit-testable against an in-memory fake.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    async fn topic_exists(&self, name: &str) -> Result<bool>;
    async fn create_topic(&self, config: &TopicConfig) -> Result<()>;
}

/// Declares the catalog (and its DLQ siblings) at bootstrap. Idempotent: an
/// existing topic is left untouched, a missing one is created with its
/// declared settings. Never deletes a topic.
pub async fn ensure_topics(admin: &dyn TopicAdmin) -> Result<()> {
    for topic in CATALOG.iter() {
        ensure_one(admin, topic).await?;
        ensure_dlq(admin, topic).await?;
    }
    Ok(())
}

async fn ensure_one(admin: &dyn TopicAdmin, topic: &TopicConfig) -> Result<()> {
    if admin.topic_exists(topic.name).await? {
        return Ok(());
    }
    admin.create_topic(topic).await
}

/// Production `TopicAdmin` over `rdkafka::admin::AdminClient`. "Already
/// exists" broker errors are swallowed; every other admin error surfaces.
pub struct RdKafkaAdmin {
    client: AdminClient<DefaultClientContext>,
}

impl RdKafkaAdmin {
    pub fn new(broker: &BrokerConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &broker.brokers);
        if broker.tls_enabled {
            client_config.set("security.protocol", "SSL");
        }
        let client = client_config
            .create()
            .map_err(|e| PipelineError::unavailable(format!("create admin client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TopicAdmin for RdKafkaAdmin {
    /// Always reports "missing": idempotency is enforced downstream by
    /// `create_topic` swallowing `TopicAlreadyExists`, which avoids a
    /// separate metadata round-trip per topic.
    async fn topic_exists(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    async fn create_topic(&self, config: &TopicConfig) -> Result<()> {
        let retention_ms = config.retention.as_millis().to_string();
        let max_message_bytes = config.max_message_bytes.to_string();
        let cleanup_policy = match config.cleanup_policy {
            CleanupPolicy::Delete => "delete",
            CleanupPolicy::Compact => "compact",
        };

        let new_topic = NewTopic::new(
            config.name,
            config.num_partitions as i32,
            TopicReplication::Fixed(config.replication_factor as i32),
        )
        .set("retention.ms", &retention_ms)
        .set("cleanup.policy", cleanup_policy)
        .set("max.message.bytes", &max_message_bytes);

        let results = self
            .client
            .create_topics(&[new_topic], &AdminOptions::new())
            .await
            .map_err(|e| PipelineError::unavailable(format!("create topic {}: {e}", config.name)))?;

        match results.into_iter().next() {
            Some(Ok(_)) => Ok(()),
            Some(Err((_, RDKafkaErrorCode::TopicAlreadyExists))) => Ok(()),
            Some(Err((name, code))) => Err(PipelineError::unavailable(format!(
                "create topic {name} failed: {code:?}"
            ))),
            None => Err(PipelineError::internal("admin client returned no result")),
        }
    }
}

async fn ensure_dlq(admin: &dyn TopicAdmin, topic: &TopicConfig) -> Result<()> {
    let dlq_name = topic.dlq_name();
    if admin.topic_exists(&dlq_name).await? {
        return Ok(());
    }
    let dlq_config = TopicConfig {
        name: Box::leak(dlq_name.into_boxed_str()),
        num_partitions: topic.num_partitions,
        replication_factor: topic.replication_factor,
        retention: RetentionClass::ThirtyDays,
        cleanup_policy: CleanupPolicy::Delete,
        max_message_bytes: topic.max_message_bytes,
    };
    admin.create_topic(&dlq_config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAdmin {
        existing: Mutex<Vec<String>>,
        create_calls: Mutex<u32>,
    }

    #[async_trait]
    impl TopicAdmin for FakeAdmin {
        async fn topic_exists(&self, name: &str) -> Result<bool> {
            Ok(self.existing.lock().unwrap().iter().any(|n| n == name))
        }

        async fn create_topic(&self, config: &TopicConfig) -> Result<()> {
            *self.create_calls.lock().unwrap() += 1;
            self.existing.lock().unwrap().push(config.name.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn ensure_topics_is_idempotent() {
        let admin = FakeAdmin::default();
        ensure_topics(&admin).await.unwrap();
        let first_calls = *admin.create_calls.lock().unwrap();
        ensure_topics(&admin).await.unwrap();
        let second_calls = *admin.create_calls.lock().unwrap();
        assert_eq!(first_calls, second_calls);
        assert_eq!(
            first_calls as usize,
            CATALOG.len() * 2,
            "one create per topic and one per dlq sibling"
        );
    }

    #[test]
    fn dlq_name_appends_suffix() {
        let topic = &CATALOG[0];
        assert_eq!(topic.dlq_name(), format!("{}.dlq", topic.name));
    }
}
