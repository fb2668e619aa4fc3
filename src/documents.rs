//! Document records and their storage interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Lifecycle state of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Uploaded, waiting for the pipeline.
    Pending,
    /// Pipeline is running.
    Processing,
    /// Chunks are persisted and searchable.
    Completed,
    /// The last pipeline run failed.
    Failed,
}

/// An uploaded file tracked by the service.
#[derive(Debug, Clone)]
pub struct Document {
    /// Unique document identifier.
    pub id: Uuid,
    /// Project the document belongs to.
    pub project_id: Uuid,
    /// Original file name.
    pub name: String,
    /// Location of the raw bytes in the blob store.
    pub blob_path: String,
    /// MIME type reported at upload time.
    pub mime_type: String,
    /// Size of the raw bytes.
    pub file_size: u64,
    /// Current lifecycle state.
    pub status: DocumentStatus,
    /// When the document was uploaded.
    pub uploaded_at: OffsetDateTime,
}

/// Fields required to register a new document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Project the document belongs to.
    pub project_id: Uuid,
    /// Original file name.
    pub name: String,
    /// Location of the raw bytes in the blob store.
    pub blob_path: String,
    /// MIME type reported at upload time.
    pub mime_type: String,
    /// Size of the raw bytes.
    pub file_size: u64,
}

/// Errors from document store operations.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    /// No document with the given id.
    #[error("Document {0} not found")]
    NotFound(Uuid),
}

/// Storage backend for document records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Registers a new pending document.
    async fn create(&self, new: NewDocument) -> Result<Document, DocumentStoreError>;

    /// Fetches a document by id.
    async fn get(&self, id: Uuid) -> Result<Document, DocumentStoreError>;

    /// Updates a document's lifecycle state.
    async fn set_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
    ) -> Result<Document, DocumentStoreError>;

    /// All documents in a project, newest first.
    async fn find_by_project(&self, project_id: Uuid) -> Result<Vec<Document>, DocumentStoreError>;
}

/// In-process document store backed by a `HashMap`.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<Uuid, Document>>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, new: NewDocument) -> Result<Document, DocumentStoreError> {
        let document = Document {
            id: Uuid::new_v4(),
            project_id: new.project_id,
            name: new.name,
            blob_path: new.blob_path,
            mime_type: new.mime_type,
            file_size: new.file_size,
            status: DocumentStatus::Pending,
            uploaded_at: OffsetDateTime::now_utc(),
        };
        self.documents
            .write()
            .await
            .insert(document.id, document.clone());
        Ok(document)
    }

    async fn get(&self, id: Uuid) -> Result<Document, DocumentStoreError> {
        self.documents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DocumentStoreError::NotFound(id))
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
    ) -> Result<Document, DocumentStoreError> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(DocumentStoreError::NotFound(id))?;
        document.status = status;
        Ok(document.clone())
    }

    async fn find_by_project(&self, project_id: Uuid) -> Result<Vec<Document>, DocumentStoreError> {
        let documents = self.documents.read().await;
        let mut matched: Vec<Document> = documents
            .values()
            .filter(|document| document.project_id == project_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(matched)
    }
}
