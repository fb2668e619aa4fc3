#![deny(missing_docs)]

//! Core library for the docpipe document ingestion and retrieval service.
//!
//! Uploaded files flow through a five-stage pipeline: download from blob
//! storage, text extraction, chunking, embedding, and persistence to a
//! vector store. Each run is tracked by a processing job with progress
//! checkpoints, and persisted chunks are searchable by semantic similarity.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Document records and their storage interface.
pub mod documents;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Text extraction from uploaded files.
pub mod extraction;
/// Processing job records and state machine.
pub mod jobs;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Chunking, pipeline orchestration, and retrieval.
pub mod processing;
/// Asynchronous delivery queue and worker.
pub mod queue;
/// Blob storage for raw uploads.
pub mod storage;
/// Vector store integration.
pub mod vectorstore;
