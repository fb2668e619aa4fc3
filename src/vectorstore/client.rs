//! HTTP client wrapper for the Qdrant-compatible vector store.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::Config;
use crate::vectorstore::payload::{
    build_chunk_payload, current_timestamp_rfc3339, generate_point_id, parse_scored_chunk,
};
use crate::vectorstore::types::{
    ChunkRecord, ChunkStore, QueryResponse, QueryResponseResult, ScoredChunk, VectorStoreError,
};

/// Lightweight HTTP client for vector store operations.
pub struct VectorStoreClient {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
}

impl VectorStoreClient {
    /// Construct a new client from the vector store section of the configuration.
    pub fn new(config: &Config) -> Result<Self, VectorStoreError> {
        let client = Client::builder().build()?;

        let base_url = normalize_base_url(&config.vector_store_url)
            .map_err(VectorStoreError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection = %config.vector_store_collection,
            "Initialized vector store HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: config.vector_store_api_key.clone(),
            collection: config.vector_store_collection.clone(),
        })
    }

    /// Create the chunk collection only when it is missing from the store.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<(), VectorStoreError> {
        if self.collection_exists().await? {
            return Ok(());
        }

        tracing::debug!(
            collection = %self.collection,
            vector_size,
            "Creating collection"
        );
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))?
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, "Collection created");
        })
        .await
    }

    /// Ensure the payload index backing document-scoped filters exists.
    pub async fn ensure_payload_indexes(&self) -> Result<(), VectorStoreError> {
        let body = json!({
            "field_name": "document_id",
            "field_schema": "keyword",
        });

        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/index", self.collection),
            )?
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() || response.status() == StatusCode::CONFLICT {
            tracing::debug!(collection = %self.collection, "Payload index ensured");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::warn!(collection = %self.collection, error = %error, "Failed to ensure payload index");
            Err(error)
        }
    }

    async fn collection_exists(&self) -> Result<bool, VectorStoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))?
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = VectorStoreError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, VectorStoreError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        Ok(req)
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), VectorStoreError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Vector store request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl ChunkStore for VectorStoreClient {
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<usize, VectorStoreError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let now = current_timestamp_rfc3339();
        let points: Vec<Value> = chunks
            .iter()
            .map(|record| {
                json!({
                    "id": generate_point_id(),
                    "vector": record.embedding,
                    "payload": build_chunk_payload(record, &now),
                })
            })
            .collect();

        let point_count = points.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )?
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = %self.collection,
                points = point_count,
                "Chunks indexed"
            );
        })
        .await?;

        Ok(point_count)
    }

    async fn delete_by_document(&self, document_id: Uuid) -> Result<(), VectorStoreError> {
        let body = json!({
            "filter": {
                "must": [
                    {
                        "key": "document_id",
                        "match": { "value": document_id.to_string() }
                    }
                ]
            }
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )?
            .query(&[("wait", true)])
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = %self.collection,
                document_id = %document_id,
                "Deleted chunks for document"
            );
        })
        .await
    }

    async fn find_similar(
        &self,
        vector: Vec<f32>,
        limit: usize,
        document_id: Option<Uuid>,
        score_threshold: f32,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        let mut body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
            "score_threshold": score_threshold,
        });
        if let (Some(document_id), Some(obj)) = (document_id, body.as_object_mut()) {
            obj.insert(
                "filter".into(),
                json!({
                    "must": [
                        {
                            "key": "document_id",
                            "match": { "value": document_id.to_string() }
                        }
                    ]
                }),
            );
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Similarity query failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        let results = points
            .into_iter()
            .map(|point| parse_scored_chunk(stringify_point_id(point.id), point.score, point.payload))
            .collect();

        Ok(results)
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer) -> VectorStoreClient {
        let mut config = test_config();
        config.vector_store_url = server.base_url();
        config.vector_store_collection = "chunks".to_string();
        VectorStoreClient::new(&config).expect("client builds")
    }

    #[tokio::test]
    async fn ensure_collection_skips_creation_when_present() {
        let server = MockServer::start_async().await;
        let exists = server.mock(|when, then| {
            when.method(GET).path("/collections/chunks");
            then.status(200).json_body(json!({ "result": {} }));
        });

        let client = client_for(&server);
        client.ensure_collection(768).await.expect("ensure");
        exists.assert();
    }

    #[tokio::test]
    async fn ensure_collection_creates_missing_collection() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/collections/chunks");
            then.status(404);
        });
        let create = server.mock(|when, then| {
            when.method(PUT)
                .path("/collections/chunks")
                .json_body(json!({
                    "vectors": { "size": 768, "distance": "Cosine" }
                }));
            then.status(200).json_body(json!({ "result": true }));
        });

        let client = client_for(&server);
        client.ensure_collection(768).await.expect("ensure");
        create.assert();
    }

    #[tokio::test]
    async fn insert_chunks_uploads_points_with_payloads() {
        let server = MockServer::start_async().await;
        let upsert = server.mock(|when, then| {
            when.method(PUT)
                .path("/collections/chunks/points")
                .query_param("wait", "true");
            then.status(200).json_body(json!({ "result": {} }));
        });

        let client = client_for(&server);
        let document_id = Uuid::new_v4();
        let written = client
            .insert_chunks(vec![
                ChunkRecord {
                    document_id,
                    content: "first".to_string(),
                    embedding: vec![0.1, 0.2],
                    metadata: json!({ "index": 0 }),
                },
                ChunkRecord {
                    document_id,
                    content: "second".to_string(),
                    embedding: vec![0.3, 0.4],
                    metadata: json!({ "index": 1 }),
                },
            ])
            .await
            .expect("insert");

        upsert.assert();
        assert_eq!(written, 2);
    }

    #[tokio::test]
    async fn insert_of_nothing_skips_the_request() {
        let server = MockServer::start_async().await;
        let upsert = server.mock(|when, then| {
            when.method(PUT).path("/collections/chunks/points");
            then.status(200);
        });

        let client = client_for(&server);
        let written = client.insert_chunks(Vec::new()).await.expect("insert");
        assert_eq!(written, 0);
        upsert.assert_hits(0);
    }

    #[tokio::test]
    async fn delete_by_document_sends_a_match_filter() {
        let server = MockServer::start_async().await;
        let document_id = Uuid::new_v4();
        let delete = server.mock(|when, then| {
            when.method(POST)
                .path("/collections/chunks/points/delete")
                .json_body(json!({
                    "filter": {
                        "must": [
                            {
                                "key": "document_id",
                                "match": { "value": document_id.to_string() }
                            }
                        ]
                    }
                }));
            then.status(200).json_body(json!({ "result": {} }));
        });

        let client = client_for(&server);
        client.delete_by_document(document_id).await.expect("delete");
        delete.assert();
    }

    #[tokio::test]
    async fn find_similar_parses_scored_chunks() {
        let server = MockServer::start_async().await;
        let document_id = Uuid::new_v4();
        let query = server.mock(|when, then| {
            when.method(POST).path("/collections/chunks/points/query");
            then.status(200).json_body(json!({
                "result": [
                    {
                        "id": "point-1",
                        "score": 0.91,
                        "payload": {
                            "document_id": document_id.to_string(),
                            "content": "matching text",
                            "metadata": { "index": 4 }
                        }
                    }
                ]
            }));
        });

        let client = client_for(&server);
        let hits = client
            .find_similar(vec![0.1, 0.2], 5, Some(document_id), 0.7)
            .await
            .expect("query");

        query.assert();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "point-1");
        assert_eq!(hits[0].document_id, Some(document_id));
        assert_eq!(hits[0].content, "matching text");
        assert!((hits[0].score - 0.91).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn find_similar_accepts_object_wrapped_results() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/collections/chunks/points/query");
            then.status(200).json_body(json!({
                "result": {
                    "points": [
                        { "id": 7, "score": 0.8, "payload": { "content": "hit" } }
                    ]
                }
            }));
        });

        let client = client_for(&server);
        let hits = client
            .find_similar(vec![0.5], 3, None, 0.0)
            .await
            .expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "7");
    }

    #[tokio::test]
    async fn error_status_surfaces_body() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/collections/chunks/points/query");
            then.status(500).body("storage offline");
        });

        let client = client_for(&server);
        let error = client.find_similar(vec![0.5], 3, None, 0.0).await.unwrap_err();
        match error {
            VectorStoreError::UnexpectedStatus { status, body } => {
                assert_eq!(status.as_u16(), 500);
                assert_eq!(body, "storage offline");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
