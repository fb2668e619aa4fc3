//! HTTP client for a hosted embedding endpoint.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::Config;
use crate::embedding::{Embedder, EmbeddingError, EmbeddingVector};

/// Inputs longer than this are truncated before being sent to the provider.
const MAX_EMBED_CHARS: usize = 20_000;

/// Extracts a vector from one prediction object of a provider response.
type ShapeMatcher = fn(&Value) -> Option<Vec<f32>>;

/// Known prediction shapes, tried in order.
const SHAPE_MATCHERS: &[ShapeMatcher] = &[nested_embedding_values, flat_prediction_values];

/// Embedder backed by a Vertex-style prediction endpoint.
///
/// Requests carry an `instances` array with a single `content` entry and an
/// optional `x-api-key` header. Responses are parsed leniently because
/// deployments differ in where they nest the vector.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl RemoteEmbedder {
    /// Builds an embedder from the embedding section of the configuration.
    pub fn new(config: &Config) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: config.embedding_endpoint.clone(),
            api_key: config.embedding_api_key.clone(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let char_count = text.chars().count();
        let source_text = if char_count > MAX_EMBED_CHARS {
            tracing::warn!(
                from = char_count,
                to = MAX_EMBED_CHARS,
                "Truncating text before embedding"
            );
            text.chars().take(MAX_EMBED_CHARS).collect()
        } else {
            text.to_string()
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "instances": [{ "content": source_text }] }));
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::UnexpectedStatus { status, body });
        }

        let payload: Value = response.json().await?;
        let values = extract_embedding_values(&payload).unwrap_or_default();
        if values.is_empty() {
            return Err(EmbeddingError::EmptyResult);
        }

        tracing::trace!(dimensions = values.len(), "Generated embedding");
        Ok(EmbeddingVector {
            dimension: values.len(),
            values,
            source_text,
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn extract_embedding_values(payload: &Value) -> Option<Vec<f32>> {
    let prediction = payload.get("predictions")?.get(0)?;
    SHAPE_MATCHERS.iter().find_map(|matcher| matcher(prediction))
}

fn nested_embedding_values(prediction: &Value) -> Option<Vec<f32>> {
    collect_floats(prediction.get("embeddings")?.get("values")?)
}

fn flat_prediction_values(prediction: &Value) -> Option<Vec<f32>> {
    collect_floats(prediction.get("values")?)
}

fn collect_floats(value: &Value) -> Option<Vec<f32>> {
    let array = value.as_array()?;
    let mut floats = Vec::with_capacity(array.len());
    for item in array {
        floats.push(item.as_f64()? as f32);
    }
    Some(floats)
}
