//! Collection schema and index declarations.
//!
//! A `VectorCollection` is created once via `EnsureCollection` and never has
//! its schema silently changed; the orchestrator only ever adds the indexes
//! and load step a missing collection needs.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int64,
    Float,
    Bool,
    VarChar,
    Json,
    FloatVector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub is_primary_key: bool,
    pub auto_id: bool,
    /// Required and positive when `field_type == FloatVector`.
    pub dim: Option<u32>,
}

impl FieldSchema {
    pub fn primary_key(name: impl Into<String>, auto_id: bool) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Int64,
            is_primary_key: true,
            auto_id,
            dim: None,
        }
    }

    pub fn scalar(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            is_primary_key: false,
            auto_id: false,
            dim: None,
        }
    }

    pub fn vector(name: impl Into<String>, dim: u32) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::FloatVector,
            is_primary_key: false,
            auto_id: false,
            dim: Some(dim),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Strong,
    Bounded,
    Eventual,
    Session,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricType {
    L2,
    Ip,
    Cosine,
}

impl MetricType {
    /// COSINE/IP rank highest-score-first; L2 ranks lowest-distance-first.
    pub fn descending(self) -> bool {
        !matches!(self, MetricType::L2)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub field_name: String,
    pub index_type: String,
    pub metric_type: MetricType,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    pub shards_num: u32,
    pub consistency_level: ConsistencyLevel,
}

impl CollectionSchema {
    /// Exactly one primary-key field, and every vector field carries a
    /// positive `dim`.
    pub fn validate(&self) -> Result<()> {
        let pk_count = self.fields.iter().filter(|f| f.is_primary_key).count();
        if pk_count != 1 {
            return Err(PipelineError::validation(format!(
                "collection {} must declare exactly one primary key field, found {}",
                self.name, pk_count
            )));
        }
        for field in &self.fields {
            if field.field_type == FieldType::FloatVector {
                match field.dim {
                    Some(dim) if dim > 0 => {}
                    _ => {
                        return Err(PipelineError::validation(format!(
                            "vector field {} in collection {} must declare a positive dim",
                            field.name, self.name
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_key(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_primary_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_with(fields: Vec<FieldSchema>) -> CollectionSchema {
        CollectionSchema {
            name: "molecules".to_string(),
            fields,
            shards_num: 2,
            consistency_level: ConsistencyLevel::Bounded,
        }
    }

    #[test]
    fn rejects_missing_primary_key() {
        let schema = schema_with(vec![FieldSchema::vector("embedding", 768)]);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn rejects_zero_dim_vector_field() {
        let schema = schema_with(vec![
            FieldSchema::primary_key("id", true),
            FieldSchema::vector("embedding", 0),
        ]);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_schema() {
        let schema = schema_with(vec![
            FieldSchema::primary_key("id", true),
            FieldSchema::vector("embedding", 768),
        ]);
        assert!(schema.validate().is_ok());
    }
}
