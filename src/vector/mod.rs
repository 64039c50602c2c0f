//! Vector Search Orchestrator: insert/upsert/delete/search over a vector
//! store, with multi-vector fusion behind pluggable rerankers.
//!
//! `VectorOrchestrator` depends only on the narrow `VectorStoreClient` trait
//! (`client` submodule), so the concurrency and fusion logic here is
//! unit-testable against an in-memory fake without a live store — the same
//! shape as `crate::topics::TopicAdmin`.

pub mod client;
pub mod rerank;
pub mod schema;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;

use crate::config::VectorConfig;
use crate::error::{PipelineError, Result};

pub use client::{Column, CollectionStatistics, SearchParams, VectorHit, VectorStoreClient};
pub use rerank::{ReciprocalRankFusion, Reranker, WeightedFusion};
pub use schema::{CollectionSchema, ConsistencyLevel, FieldSchema, FieldType, IndexConfig, MetricType};

/// A row as the caller supplies it: field name → JSON value. Coerced into
/// column-major `Column`s by `to_columns` per the schema's declared field
/// order and types.
pub type Row = HashMap<String, serde_json::Value>;

/// One sub-search of a hybrid request: a distinct vector field plus its
/// batch of query vectors.
pub struct VectorRequest {
    pub field: String,
    pub query_vectors: Vec<Vec<f32>>,
}

pub struct VectorOrchestrator {
    store: Arc<dyn VectorStoreClient>,
    config: VectorConfig,
}

impl VectorOrchestrator {
    pub fn new(store: Arc<dyn VectorStoreClient>, config: VectorConfig) -> Self {
        Self { store, config }
    }

    /// Idempotent: creates the collection if missing, creates each declared
    /// index if missing, and loads the collection into memory. Never
    /// silently changes the schema of an existing collection.
    pub async fn ensure_collection(
        &self,
        schema: &CollectionSchema,
        indexes: &[IndexConfig],
    ) -> Result<()> {
        schema.validate()?;

        if !self.store.has_collection(&schema.name).await? {
            self.store.create_collection(schema).await?;
        }

        let existing = self.store.describe_collection(&schema.name).await?;
        for index in indexes {
            if existing.field(&index.field_name).is_none() {
                return Err(PipelineError::validation(format!(
                    "index targets unknown field {} on collection {}",
                    index.field_name, schema.name
                )));
            }
            self.store.create_index(&schema.name, index).await?;
        }

        self.store.load_collection(&schema.name).await
    }

    /// Batches `rows` in groups of `insert_batch_size` and inserts each
    /// batch in column-major form. Returns the concatenated assigned IDs.
    pub async fn insert(&self, schema: &CollectionSchema, rows: &[Row]) -> Result<Vec<i64>> {
        self.write_batches(schema, rows, false).await
    }

    pub async fn upsert(&self, schema: &CollectionSchema, rows: &[Row]) -> Result<Vec<i64>> {
        self.write_batches(schema, rows, true).await
    }

    async fn write_batches(&self, schema: &CollectionSchema, rows: &[Row], upsert: bool) -> Result<Vec<i64>> {
        if rows.is_empty() {
            return Err(PipelineError::validation("insert/upsert requires at least one row"));
        }
        let batch_size = self.config.insert_batch_size.max(1);
        let mut ids = Vec::with_capacity(rows.len());
        for chunk in rows.chunks(batch_size) {
            let columns = to_columns(schema, chunk)?;
            let assigned = if upsert {
                self.store.upsert(&schema.name, columns).await?
            } else {
                self.store.insert(&schema.name, columns).await?
            };
            ids.extend(assigned);
        }
        Ok(ids)
    }

    pub async fn delete(&self, collection: &str, expr: &str) -> Result<u64> {
        if expr.trim().is_empty() {
            return Err(PipelineError::validation("delete requires a non-empty filter expression"));
        }
        self.store.delete(collection, expr).await
    }

    /// Single-vector search. `top_k` is clamped to `max_top_k`;
    /// `guarantee_timestamp > 0` enforces read-your-writes up to that
    /// logical time.
    pub async fn search(&self, mut params: SearchParams) -> Result<Vec<Vec<VectorHit>>> {
        if params.query_vectors.is_empty() {
            return Err(PipelineError::validation("search requires at least one query vector"));
        }
        if params.top_k == 0 {
            return Err(PipelineError::validation("top_k must be positive"));
        }
        params.top_k = params.top_k.min(self.config.max_top_k);

        self.store
            .search(&params)
            .await
            .map_err(|e| PipelineError::similarity_search_failed(e.to_string()))
    }

    /// Fetches the stored vector for `id`, then runs a single-vector search
    /// with it. `NotFound` if the primary key is absent.
    pub async fn search_by_id(
        &self,
        collection: &str,
        vector_field: &str,
        id: i64,
        top_k: usize,
        consistency_level: ConsistencyLevel,
    ) -> Result<Vec<VectorHit>> {
        let output_fields = vec![vector_field.to_string()];
        let rows = self.store.query_by_pks(collection, &[id], &output_fields).await?;
        let vector = rows
            .into_iter()
            .next()
            .and_then(|hit| hit.fields.get(vector_field).cloned())
            .and_then(|v| v.as_array().cloned())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect::<Vec<f32>>()
            })
            .ok_or_else(|| PipelineError::not_found(format!("id {id} not found in {collection}")))?;

        let params = SearchParams {
            collection: collection.to_string(),
            vector_field: vector_field.to_string(),
            query_vectors: vec![vector],
            top_k,
            filter: None,
            output_fields: Vec::new(),
            consistency_level,
            guarantee_timestamp: 0,
        };
        Ok(self.search(params).await?.into_iter().next().unwrap_or_default())
    }

    /// Hybrid multi-vector search: issues all `k` sub-searches concurrently
    /// (each enlarging its candidate pool to `top_k × 2`), then fuses the
    /// per-query-index result lists with `reranker` and keeps the top
    /// `top_k`.
    pub async fn hybrid_search(
        &self,
        collection: &str,
        requests: &[VectorRequest],
        top_k: usize,
        consistency_level: ConsistencyLevel,
        reranker: &dyn Reranker,
    ) -> Result<Vec<Vec<VectorHit>>> {
        if requests.is_empty() {
            return Err(PipelineError::validation("hybrid search requires at least one vector request"));
        }
        let batch_size = requests[0].query_vectors.len();
        if batch_size == 0 {
            return Err(PipelineError::validation("hybrid search requires at least one query vector"));
        }
        if requests.iter().any(|r| r.query_vectors.len() != batch_size) {
            return Err(PipelineError::validation(
                "every vector request in a hybrid search must share one batch size",
            ));
        }
        if top_k == 0 {
            return Err(PipelineError::validation("top_k must be positive"));
        }

        let candidate_k = (top_k * 2).min(self.config.max_top_k);
        let searches = requests.iter().map(|req| {
            let params = SearchParams {
                collection: collection.to_string(),
                vector_field: req.field.clone(),
                query_vectors: req.query_vectors.clone(),
                top_k: candidate_k,
                filter: None,
                output_fields: Vec::new(),
                consistency_level,
                guarantee_timestamp: 0,
            };
            async move {
                self.store
                    .search(&params)
                    .await
                    .map_err(|e| PipelineError::similarity_search_failed(e.to_string()))
            }
        });
        let per_request_results = try_join_all(searches).await?;

        (0..batch_size)
            .map(|query_idx| {
                let lists: Vec<Vec<VectorHit>> = per_request_results
                    .iter()
                    .map(|result| result.get(query_idx).cloned().unwrap_or_default())
                    .collect();
                reranker.rerank(&lists, top_k)
            })
            .collect()
    }
}

/// Translates rows into column-major `Column`s by schema field order.
/// Numeric JSON coerces to int64/float32 per field type; array-of-number
/// JSON coerces to a float32 vector whose length must match the field's
/// declared `dim`. Auto-ID fields are skipped if absent from input.
fn to_columns(schema: &CollectionSchema, rows: &[Row]) -> Result<Vec<Column>> {
    let mut columns: Vec<Column> = schema
        .fields
        .iter()
        .map(|f| Column {
            name: f.name.clone(),
            ..Default::default()
        })
        .collect();

    for row in rows {
        for (field, column) in schema.fields.iter().zip(columns.iter_mut()) {
            let value = match row.get(&field.name) {
                Some(v) => v,
                None if field.auto_id => continue,
                None => {
                    return Err(PipelineError::validation(format!(
                        "row missing required field {}",
                        field.name
                    )))
                }
            };
            push_value(field, value, column)?;
        }
    }

    Ok(columns)
}

fn push_value(field: &FieldSchema, value: &serde_json::Value, column: &mut Column) -> Result<()> {
    match field.field_type {
        FieldType::Int64 => {
            let n = value
                .as_i64()
                .ok_or_else(|| type_error(field, "int64", value))?;
            column.int64_values.push(n);
        }
        FieldType::Float => {
            let n = value
                .as_f64()
                .ok_or_else(|| type_error(field, "float", value))?;
            column.float_values.push(n as f32);
        }
        FieldType::Bool => {
            let b = value
                .as_bool()
                .ok_or_else(|| type_error(field, "bool", value))?;
            column.bool_values.push(b);
        }
        FieldType::VarChar | FieldType::Json => {
            let s = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            column.string_values.push(s);
        }
        FieldType::FloatVector => {
            let dim = field.dim.unwrap_or(0) as usize;
            let arr = value
                .as_array()
                .ok_or_else(|| type_error(field, "vector", value))?;
            if arr.len() != dim {
                return Err(PipelineError::validation(format!(
                    "field {} expects a vector of length {}, got {}",
                    field.name,
                    dim,
                    arr.len()
                )));
            }
            let vector: Vec<f32> = arr
                .iter()
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect::<Option<_>>()
                .ok_or_else(|| type_error(field, "vector", value))?;
            column.vector_values.push(vector);
        }
    }
    Ok(())
}

fn type_error(field: &FieldSchema, expected: &str, value: &serde_json::Value) -> PipelineError {
    PipelineError::validation(format!(
        "field {} expects {expected}, got {value}",
        field.name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        collections: Mutex<Vec<String>>,
        insert_calls: Mutex<Vec<usize>>,
        search_responses: Mutex<Vec<Vec<Vec<VectorHit>>>>,
    }

    #[async_trait]
    impl VectorStoreClient for FakeStore {
        async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
            self.collections.lock().unwrap().push(schema.name.clone());
            Ok(())
        }
        async fn has_collection(&self, name: &str) -> Result<bool> {
            Ok(self.collections.lock().unwrap().iter().any(|c| c == name))
        }
        async fn drop_collection(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn describe_collection(&self, name: &str) -> Result<CollectionSchema> {
            Ok(CollectionSchema {
                name: name.to_string(),
                fields: vec![
                    FieldSchema::primary_key("id", true),
                    FieldSchema::vector("embedding", 4),
                ],
                shards_num: 1,
                consistency_level: ConsistencyLevel::Bounded,
            })
        }
        async fn create_index(&self, _collection: &str, _index: &IndexConfig) -> Result<()> {
            Ok(())
        }
        async fn load_collection(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn insert(&self, _collection: &str, columns: Vec<Column>) -> Result<Vec<i64>> {
            let n = columns
                .iter()
                .map(|c| c.vector_values.len().max(c.int64_values.len()))
                .max()
                .unwrap_or(0);
            self.insert_calls.lock().unwrap().push(n);
            Ok((0..n as i64).collect())
        }
        async fn upsert(&self, collection: &str, columns: Vec<Column>) -> Result<Vec<i64>> {
            self.insert(collection, columns).await
        }
        async fn delete(&self, _collection: &str, _expr: &str) -> Result<u64> {
            Ok(0)
        }
        async fn search(&self, _params: &SearchParams) -> Result<Vec<Vec<VectorHit>>> {
            Ok(self.search_responses.lock().unwrap().pop().unwrap_or_default())
        }
        async fn query_by_pks(
            &self,
            _collection: &str,
            _ids: &[i64],
            _output_fields: &[String],
        ) -> Result<Vec<VectorHit>> {
            Ok(Vec::new())
        }
        async fn get_collection_statistics(&self, _name: &str) -> Result<CollectionStatistics> {
            Ok(CollectionStatistics::default())
        }
    }

    fn schema() -> CollectionSchema {
        CollectionSchema {
            name: "molecules".to_string(),
            fields: vec![
                FieldSchema::primary_key("id", true),
                FieldSchema::vector("embedding", 4),
            ],
            shards_num: 1,
            consistency_level: ConsistencyLevel::Bounded,
        }
    }

    fn row(embedding: [f64; 4]) -> Row {
        let mut r = Row::new();
        r.insert(
            "embedding".to_string(),
            serde_json::json!(embedding.to_vec()),
        );
        r
    }

    #[tokio::test]
    async fn insert_batches_by_configured_size() {
        let store = Arc::new(FakeStore::default());
        let config = VectorConfig {
            insert_batch_size: 3,
            ..VectorConfig::default()
        };
        let orchestrator = VectorOrchestrator::new(store.clone(), config);
        let rows: Vec<Row> = (0..7).map(|_| row([0.1, 0.2, 0.3, 0.4])).collect();

        orchestrator.insert(&schema(), &rows).await.unwrap();

        let calls = store.insert_calls.lock().unwrap().clone();
        assert_eq!(calls, vec![3, 3, 1], "ceil(7/3) batches of size <= 3");
    }

    #[tokio::test]
    async fn insert_rejects_wrong_vector_dimension() {
        let store = Arc::new(FakeStore::default());
        let orchestrator = VectorOrchestrator::new(store, VectorConfig::default());
        let mut bad_row = Row::new();
        bad_row.insert("embedding".to_string(), serde_json::json!([0.1, 0.2]));

        let err = orchestrator.insert(&schema(), &[bad_row]).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn search_clamps_top_k_to_configured_maximum() {
        let store = Arc::new(FakeStore::default());
        store
            .search_responses
            .lock()
            .unwrap()
            .push(vec![vec![VectorHit {
                id: 1,
                score: 0.9,
                fields: HashMap::new(),
            }]]);
        let config = VectorConfig {
            max_top_k: 5,
            ..VectorConfig::default()
        };
        let orchestrator = VectorOrchestrator::new(store, config);

        let params = SearchParams {
            collection: "molecules".to_string(),
            vector_field: "embedding".to_string(),
            query_vectors: vec![vec![0.1, 0.2, 0.3, 0.4]],
            top_k: 1000,
            filter: None,
            output_fields: Vec::new(),
            consistency_level: ConsistencyLevel::Bounded,
            guarantee_timestamp: 0,
        };

        let result = orchestrator.search(params).await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn hybrid_search_requires_matching_batch_sizes() {
        let store = Arc::new(FakeStore::default());
        let orchestrator = VectorOrchestrator::new(store, VectorConfig::default());
        let requests = vec![
            VectorRequest {
                field: "embedding_a".to_string(),
                query_vectors: vec![vec![0.1; 4]],
            },
            VectorRequest {
                field: "embedding_b".to_string(),
                query_vectors: vec![vec![0.1; 4], vec![0.2; 4]],
            },
        ];
        let reranker = ReciprocalRankFusion::new(60.0);
        let err = orchestrator
            .hybrid_search("molecules", &requests, 3, ConsistencyLevel::Bounded, &reranker)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }
}
