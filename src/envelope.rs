//! Canonical on-wire message envelope.
//!
//! `EventEnvelope` is the JSON wrapper every producer/consumer in the
//! platform agrees on. `payload` is opaque to this crate: the decoder never
//! interprets it, it only round-trips the bytes the producer set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Top-level keys neither this struct nor a producer's `metadata` knows
    /// about, preserved verbatim on decode and re-emitted on encode so a
    /// message can pass through an older binary without losing a newer
    /// producer's fields.
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EventEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        schema_version: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            schema_version: schema_version.into(),
            trace_id: None,
            payload,
            metadata: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Serializes an envelope to its UTF-8 JSON wire form.
pub fn encode(envelope: &EventEnvelope) -> Result<Vec<u8>> {
    serde_json::to_vec(envelope)
        .map_err(|e| PipelineError::serialization(format!("encode envelope: {e}")))
}

/// Parses a wire payload back into an `EventEnvelope`. Fields this struct
/// doesn't name land in `extra` rather than being dropped, so re-encoding a
/// decoded envelope round-trips bytes it didn't originate.
pub fn decode(bytes: &[u8]) -> Result<EventEnvelope> {
    if bytes.is_empty() {
        return Err(PipelineError::validation("empty envelope payload"));
    }
    serde_json::from_slice(bytes)
        .map_err(|e| PipelineError::serialization(format!("decode envelope: {e}")))
}

/// Deserializes `envelope.payload` into a caller-chosen type without
/// consuming the envelope.
pub fn decode_payload<T: serde::de::DeserializeOwned>(envelope: &EventEnvelope) -> Result<T> {
    serde_json::from_value(envelope.payload.clone())
        .map_err(|e| PipelineError::serialization(format!("decode payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_preserves_payload_bytes() {
        let envelope = EventEnvelope::new(
            "patent.ingested",
            "ingestion-service",
            "1.0",
            json!({"patent_id": "US1234"}),
        );
        let bytes = encode(&envelope).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn decode_preserves_unknown_top_level_fields() {
        let mut envelope = EventEnvelope::new(
            "patent.ingested",
            "ingestion-service",
            "1.0",
            json!({"patent_id": "US1234"}),
        );
        envelope
            .extra
            .insert("retry_count".to_string(), json!(2));
        envelope
            .extra
            .insert("producer_build".to_string(), json!("2026.07.1"));

        let bytes = encode(&envelope).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded, envelope, "unknown fields must round-trip, not be dropped");
        assert_eq!(decoded.extra["retry_count"], json!(2));
        assert_eq!(decoded.extra["producer_build"], json!("2026.07.1"));

        // A producer that has never heard of `extra` still round-trips:
        // decoding raw bytes with a field this struct never declared must
        // not fail, and must surface that field rather than discard it.
        let raw = br#"{
            "event_id": "7a7c5a3b-0c9b-4f3b-8a7a-0f9f6f2b9e11",
            "event_type": "patent.ingested",
            "source": "ingestion-service",
            "timestamp": "2026-07-26T00:00:00Z",
            "schema_version": "1.0",
            "payload": {"patent_id": "US1234"},
            "experimental_routing_hint": "shard-3"
        }"#;
        let decoded_raw = decode(raw).unwrap();
        assert_eq!(
            decoded_raw.extra["experimental_routing_hint"],
            json!("shard-3")
        );
    }

    #[test]
    fn decode_rejects_empty_input() {
        let err = decode(&[]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let err = decode(b"{not json").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SerializationError);
    }

    #[test]
    fn decode_payload_projects_into_target_type() {
        #[derive(Deserialize)]
        struct PatentIngested {
            patent_id: String,
        }

        let envelope = EventEnvelope::new(
            "patent.ingested",
            "ingestion-service",
            "1.0",
            json!({"patent_id": "US1234"}),
        );
        let payload: PatentIngested = decode_payload(&envelope).unwrap();
        assert_eq!(payload.patent_id, "US1234");
    }
}
