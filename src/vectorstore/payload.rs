//! Helpers for constructing and reading chunk payloads.

use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use super::types::{ChunkRecord, ScoredChunk};

/// Build the payload object stored alongside each indexed chunk.
pub(crate) fn build_chunk_payload(record: &ChunkRecord, timestamp_rfc3339: &str) -> Value {
    let mut payload = Map::new();
    payload.insert(
        "document_id".into(),
        Value::String(record.document_id.to_string()),
    );
    payload.insert("content".into(), Value::String(record.content.clone()));
    payload.insert("metadata".into(), record.metadata.clone());
    payload.insert(
        "indexed_at".into(),
        Value::String(timestamp_rfc3339.to_string()),
    );
    Value::Object(payload)
}

/// Reconstruct a scored chunk from a query hit's id, score, and payload.
pub(crate) fn parse_scored_chunk(
    id: String,
    score: f32,
    payload: Option<Map<String, Value>>,
) -> ScoredChunk {
    let document_id = payload
        .as_ref()
        .and_then(|map| map.get("document_id"))
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok());
    let content = payload
        .as_ref()
        .and_then(|map| map.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let metadata = payload
        .as_ref()
        .and_then(|map| map.get("metadata"))
        .filter(|value| !value.is_null())
        .cloned();

    ScoredChunk {
        id,
        document_id,
        content,
        score,
        metadata,
    }
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Construct an identifier suitable for stored points.
pub(crate) fn generate_point_id() -> String {
    Uuid::new_v4().to_string()
}
