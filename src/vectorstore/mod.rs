//! Vector store client and chunk persistence types.

mod client;
mod payload;
mod types;

pub use client::VectorStoreClient;
pub use types::{ChunkRecord, ChunkStore, ScoredChunk, VectorStoreError};
