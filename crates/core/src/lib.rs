pub mod chunk;
pub mod embedding;
pub mod error;
pub mod paths;

pub use chunk::{ChunkConfig, TextSplitter};
pub use embedding::{HashEmbedder, HashEmbedderConfig, EMBEDDING_DIMENSIONS};
pub use error::{AtelierError, ErrorKind, Result};
pub use paths::AppRoot;
