use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Dimension of every vector produced by the workbench, local or remote.
pub const EMBEDDING_DIMENSIONS: usize = 384;

#[derive(Debug, Clone, Copy)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: EMBEDDING_DIMENSIONS,
            seed: 1337,
        }
    }
}

/// Deterministic bag-of-words encoder. Tokens hash into buckets, the vector
/// is L2-normalized; empty input stays the zero vector of the declared
/// dimension.
#[derive(Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions.max(1)
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dims = self.dimensions();
        let mut vector = vec![0f32; dims];
        for token in text.split_whitespace() {
            let bucket = self.bucket_for(token);
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }

    fn bucket_for(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(self.config.seed);
        token.to_lowercase().hash(&mut hasher);
        (hasher.finish() as usize) % self.dimensions()
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_zero_vector() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        let vector = embedder.embed_text("");
        assert_eq!(vector.len(), EMBEDDING_DIMENSIONS);
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn output_is_normalized_and_deterministic() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        let a = embedder.embed_text("le marché européen des widgets");
        let b = embedder.embed_text("le marché européen des widgets");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn different_texts_differ() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        assert_ne!(
            embedder.embed_text("widgets"),
            embedder.embed_text("gadgets")
        );
    }
}
