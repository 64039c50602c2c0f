//! Narrow client interface the orchestrator needs from a vector store, plus
//! the production `tonic`-backed implementation.
//!
//! The trait boundary mirrors the teacher's `TopicAdmin` pattern in
//! `crate::topics`: concurrency and fusion logic is unit-testable against an
//! in-memory fake without a live store.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::vector::schema::{CollectionSchema, ConsistencyLevel, IndexConfig};

#[derive(Debug, Clone, Default)]
pub struct Column {
    pub name: String,
    pub int64_values: Vec<i64>,
    pub float_values: Vec<f32>,
    pub bool_values: Vec<bool>,
    pub string_values: Vec<String>,
    pub vector_values: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionStatistics {
    pub row_count: i64,
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub collection: String,
    pub vector_field: String,
    pub query_vectors: Vec<Vec<f32>>,
    pub top_k: usize,
    pub filter: Option<String>,
    pub output_fields: Vec<String>,
    pub consistency_level: ConsistencyLevel,
    pub guarantee_timestamp: i64,
}

#[derive(Debug, Clone, Default)]
pub struct VectorHit {
    pub id: i64,
    pub score: f32,
    pub fields: HashMap<String, serde_json::Value>,
}

/// The full collection lifecycle and data-plane operation set: create,
/// check, describe, and drop a collection; create an index and load it;
/// insert, upsert, and delete rows; search, fetch by primary key, and read
/// back collection statistics.
#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()>;
    async fn has_collection(&self, name: &str) -> Result<bool>;
    async fn drop_collection(&self, name: &str) -> Result<()>;
    async fn describe_collection(&self, name: &str) -> Result<CollectionSchema>;
    async fn create_index(&self, collection: &str, index: &IndexConfig) -> Result<()>;
    async fn load_collection(&self, name: &str) -> Result<()>;
    async fn insert(&self, collection: &str, columns: Vec<Column>) -> Result<Vec<i64>>;
    async fn upsert(&self, collection: &str, columns: Vec<Column>) -> Result<Vec<i64>>;
    async fn delete(&self, collection: &str, expr: &str) -> Result<u64>;
    async fn search(&self, params: &SearchParams) -> Result<Vec<Vec<VectorHit>>>;
    async fn query_by_pks(
        &self,
        collection: &str,
        ids: &[i64],
        output_fields: &[String],
    ) -> Result<Vec<VectorHit>>;
    async fn get_collection_statistics(&self, name: &str) -> Result<CollectionStatistics>;
}

/// Production client over the store's gRPC-style wire. Consistency levels
/// and index types are opaque strings/enums passed straight through to the
/// generated `tonic` stub; the actual `prost`-generated message types live
/// in a `proto` build step outside this crate's scope, so this struct holds
/// a raw `tonic::transport::Channel` and leaves wire encoding to that
/// generated client once wired in.
pub struct GrpcVectorStoreClient {
    channel: tonic::transport::Channel,
}

impl GrpcVectorStoreClient {
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let channel = tonic::transport::Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| crate::error::PipelineError::validation(format!("bad endpoint: {e}")))?
            .connect()
            .await?;
        Ok(Self { channel })
    }

    /// Exposes the underlying channel so a generated stub can be built on
    /// top without this crate depending on a specific store's `.proto`.
    pub fn channel(&self) -> tonic::transport::Channel {
        self.channel.clone()
    }
}
