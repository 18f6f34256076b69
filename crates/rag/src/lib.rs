//! Knowledge-base side of the workbench: embeddings, the on-disk vector
//! store, and the document ingestion pipeline.

pub mod embedding;
pub mod ingest;
pub mod store;

pub use embedding::EmbeddingClient;
pub use ingest::{
    extract_text, FileIngestion, FolderIngestion, Ingestor, SUPPORTED_EXTENSIONS,
};
pub use store::{ChunkInsert, ChunkMetadata, CleanupReport, KbStats, ScoredChunk, VectorStore};
