use serde::{Deserialize, Serialize};

/// Separator precedence for the recursive splitter: paragraph break, line
/// break, sentence end, word boundary, then a hard character split.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    pub separators: Vec<String>,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Character splitter with overlap. The cursor always advances by at least
/// `chunk_size - overlap` bytes; the overlap is materialized by extending
/// each chunk backwards over the previous one, so the chunk count stays
/// within `[ceil(n / chunk_size), ceil(n / (chunk_size - overlap))]`.
pub struct TextSplitter {
    config: ChunkConfig,
}

impl TextSplitter {
    pub fn new(config: ChunkConfig) -> Self {
        let mut config = config;
        if config.chunk_size == 0 {
            config.chunk_size = 1;
        }
        config.overlap = config.overlap.min(config.chunk_size.saturating_sub(1));
        Self { config }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let n = text.len();
        if text.trim().is_empty() {
            return Vec::new();
        }
        let size = self.config.chunk_size;
        let overlap = self.config.overlap;
        let mut chunks = Vec::new();
        let mut cursor = 0usize;
        loop {
            let back = floor_char(text, cursor.saturating_sub(overlap));
            if n - cursor <= size {
                chunks.push(text[back..].to_string());
                break;
            }
            let window_end = floor_char(text, cursor + size);
            let region_start = floor_char(text, cursor + size - overlap);
            let break_at = self
                .find_break(text, region_start, window_end)
                .unwrap_or(window_end);
            chunks.push(text[back..break_at].to_string());
            cursor = break_at;
        }
        chunks
    }

    /// Last occurrence of the highest-precedence separator inside the break
    /// region, or `None` when only a hard split is possible.
    fn find_break(&self, text: &str, region_start: usize, window_end: usize) -> Option<usize> {
        if region_start >= window_end {
            return None;
        }
        let region = &text[region_start..window_end];
        for sep in &self.config.separators {
            if sep.is_empty() {
                continue;
            }
            if let Some(pos) = region.rfind(sep.as_str()) {
                let end = region_start + pos + sep.len();
                if end > region_start {
                    return Some(end);
                }
            }
        }
        None
    }
}

fn floor_char(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter() -> TextSplitter {
        TextSplitter::new(ChunkConfig::default())
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(splitter().split("").is_empty());
        assert!(splitter().split("   \n ").is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = splitter().split("bonjour le monde");
        assert_eq!(chunks, vec!["bonjour le monde".to_string()]);
    }

    #[test]
    fn chunk_count_stays_within_bounds() {
        let config = ChunkConfig::default();
        let word = "lorem ipsum dolor sit amet consectetur ";
        let text = word.repeat(400);
        let n = text.len();
        let chunks = splitter().split(&text);
        let lower = n.div_ceil(config.chunk_size);
        let upper = n.div_ceil(config.chunk_size - config.overlap);
        assert!(
            chunks.len() >= lower && chunks.len() <= upper,
            "count {} outside [{lower}, {upper}]",
            chunks.len()
        );
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = "phrase utile. ".repeat(200);
        let chunks = splitter().split(&text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            // each chunk is extended backwards over its predecessor, so the
            // head of the next chunk must close out the previous one
            let head = &pair[1][..50.min(pair[1].len())];
            assert!(pair[0].ends_with(head), "missing overlap between chunks");
        }
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let para = format!("{}\n\n{}", "a".repeat(470), "b".repeat(300));
        let chunks = splitter().split(&para);
        assert!(chunks[0].ends_with("\n\n"));
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "été responsabilité à côté déjà ".repeat(100);
        for chunk in splitter().split(&text) {
            assert!(!chunk.is_empty());
        }
    }
}
