//! Handler Registry: topic → handler mapping, frozen after construction.
//!
//! The pipeline never introspects handler structure; business logic is
//! fully external to this crate, reached only through the `Handler` trait
//! object below.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;

/// Handlers are required to be idempotent: the pipeline guarantees
/// at-least-once delivery, so correctness under re-delivery is the
/// handler's responsibility.
#[async_trait]
pub trait Handler: Send + Sync {
    fn topic(&self) -> &str;
    async fn handle(&self, msg: &Message) -> Result<()>;
}

/// Constructed at startup, handed to the Worker Pool, and never mutated
/// thereafter — no concurrent registration once the pool has started.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, topic: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(topic).cloned()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistryBuilder {
    /// One handler per topic; registering a second handler for the same
    /// topic replaces the first (last registration wins), mirroring a plain
    /// map insert.
    pub fn register(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(handler.topic().to_string(), handler);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        fn topic(&self) -> &str {
            "patent.ingested"
        }

        async fn handle(&self, _msg: &Message) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn lookup_by_topic_returns_registered_handler() {
        let registry = HandlerRegistry::builder()
            .register(Arc::new(EchoHandler))
            .build();
        assert!(registry.get("patent.ingested").is_some());
        assert!(registry.get("unregistered.topic").is_none());
    }
}
