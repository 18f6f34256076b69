use std::fs;
use std::path::Path;

use atelier_core::{AtelierError, ChunkConfig, Result, TextSplitter};
use atelier_llm::{ChatMessage, ChatOptions, LlmClient};
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::embedding::EmbeddingClient;
use crate::store::{ChunkInsert, ChunkMetadata, VectorStore};

pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt"];

/// Character budget sent to the summarizer, counted in chars so a multibyte
/// document never splits inside a code point.
const SUMMARY_INPUT_CHARS: usize = 20_000;

const SUMMARY_INSTRUCTION: &str = "Analyse le document suivant et produis une extraction \
structurée exhaustive : thèmes principaux, entités et organisations mentionnées, chiffres \
clés, dates importantes, conclusions. Réponds en français, en sections titrées.";

pub type ProgressFn<'a> = &'a dyn Fn(&str, f32);

#[derive(Debug, Clone)]
pub struct FileIngestion {
    pub file_name: String,
    pub chunks_created: usize,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FolderIngestion {
    pub success: bool,
    pub files_processed: usize,
    pub chunks_created: usize,
    pub errors: Vec<String>,
    pub summaries: Vec<(String, String)>,
}

/// Extracts plain text by extension. PDF goes through page extraction, DOCX
/// through paragraph runs, TXT is read lossily.
pub fn extract_text(path: &Path) -> Result<String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    let text = match extension.as_str() {
        "pdf" => pdf_extract::extract_text(path)
            .map_err(|e| AtelierError::Other(format!("extraction PDF: {e}")))?,
        "docx" => extract_docx(path)?,
        "txt" => String::from_utf8_lossy(&fs::read(path)?).into_owned(),
        _ => return Err(AtelierError::UnsupportedInput(path.to_path_buf())),
    };
    if text.trim().is_empty() {
        return Err(AtelierError::NoContent(path.to_path_buf()));
    }
    Ok(text)
}

fn extract_docx(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    let docx = docx_rs::read_docx(&bytes)
        .map_err(|e| AtelierError::Other(format!("extraction DOCX: {e}")))?;
    let mut paragraphs = Vec::new();
    for child in docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            let mut line = String::new();
            for content in &paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = content {
                    for child in &run.children {
                        if let docx_rs::RunChild::Text(text) = child {
                            line.push_str(&text.text);
                        }
                    }
                }
            }
            if !line.trim().is_empty() {
                paragraphs.push(line);
            }
        }
    }
    Ok(paragraphs.join("\n"))
}

pub struct Ingestor {
    store: VectorStore,
    embedder: EmbeddingClient,
    splitter: TextSplitter,
}

impl Ingestor {
    pub fn new(store: VectorStore, embedder: EmbeddingClient) -> Self {
        Self {
            store,
            embedder,
            splitter: TextSplitter::new(ChunkConfig::default()),
        }
    }

    /// Full path for one file: extract, optionally summarize, chunk, embed
    /// in one batch, store. Progress lands in the optional callback as
    /// `(message, fraction)`.
    pub fn ingest_file(
        &self,
        kb_id: &str,
        path: &Path,
        summarizer: Option<&LlmClient>,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<FileIngestion> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        let report = |message: &str, fraction: f32| {
            if let Some(callback) = progress {
                callback(message, fraction);
            }
        };

        report("Extraction du texte", 0.1);
        let text = extract_text(path)?;

        let summary = summarizer.and_then(|client| {
            report("Synthèse du document", 0.25);
            self.summarize(client, &text, &file_name)
        });

        report("Découpage en segments", 0.4);
        let chunks = self.splitter.split(&text);
        let total_chunks = chunks.len();

        report("Calcul des embeddings", 0.6);
        let embeddings = self.embedder.embed_batch(&chunks)?;

        report("Enregistrement", 0.9);
        let inserts: Vec<ChunkInsert> = chunks
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| ChunkInsert {
                id: Uuid::new_v4().to_string(),
                text,
                metadata: ChunkMetadata {
                    source_file: file_name.clone(),
                    file_path: path.display().to_string(),
                    chunk_index,
                    total_chunks,
                },
            })
            .collect();
        let chunks_created = self.store.add(kb_id, &inserts, &embeddings)?;

        report("Terminé", 1.0);
        info!(file = %file_name, chunks_created, "fichier ingéré");
        Ok(FileIngestion {
            file_name,
            chunks_created,
            summary,
        })
    }

    /// Recursive walk filtered on the supported extensions. Per-file errors
    /// are collected in the aggregate, never raised.
    pub fn ingest_folder(
        &self,
        kb_id: &str,
        folder: &Path,
        summarizer: Option<&LlmClient>,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<FolderIngestion> {
        let files: Vec<_> = WalkDir::new(folder)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();

        let mut aggregate = FolderIngestion::default();
        let total = files.len().max(1);
        for (index, entry) in files.iter().enumerate() {
            if let Some(callback) = progress {
                callback(
                    &format!("Fichier {}/{}", index + 1, files.len()),
                    index as f32 / total as f32,
                );
            }
            match self.ingest_file(kb_id, entry.path(), summarizer, None) {
                Ok(result) => {
                    aggregate.files_processed += 1;
                    aggregate.chunks_created += result.chunks_created;
                    if let Some(summary) = result.summary {
                        aggregate.summaries.push((result.file_name, summary));
                    }
                }
                Err(err) => {
                    warn!(path = %entry.path().display(), %err, "fichier ignoré");
                    aggregate
                        .errors
                        .push(format!("{}: {err}", entry.path().display()));
                }
            }
        }
        aggregate.success = aggregate.errors.is_empty();
        if let Some(callback) = progress {
            callback("Terminé", 1.0);
        }
        Ok(aggregate)
    }

    // Summary failures are non-fatal: the chunks still land in the store.
    fn summarize(&self, client: &LlmClient, text: &str, file_name: &str) -> Option<String> {
        let excerpt: String = text.chars().take(SUMMARY_INPUT_CHARS).collect();
        let messages = [
            ChatMessage::system(SUMMARY_INSTRUCTION),
            ChatMessage::user(excerpt),
        ];
        match client.chat_blocking(&messages, &ChatOptions::default()) {
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!(file = file_name, %err, "synthèse indisponible");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::tempdir;

    fn ingestor(dir: &Path) -> Ingestor {
        let store = VectorStore::open(dir.join("vector_databases")).unwrap();
        store.create_kb("k1", "Docs", "").unwrap();
        Ingestor::new(store, EmbeddingClient::hash())
    }

    #[test]
    fn txt_file_is_chunked_embedded_and_stored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "Les widgets progressent. ".repeat(80)).unwrap();

        let ingestor = ingestor(dir.path());
        let fractions = RefCell::new(Vec::new());
        let progress = |_message: &str, fraction: f32| fractions.borrow_mut().push(fraction);
        let result = ingestor
            .ingest_file("k1", &path, None, Some(&progress))
            .unwrap();

        assert!(result.chunks_created > 1);
        assert!(result.summary.is_none());
        let recorded = fractions.borrow();
        assert_eq!(recorded.first(), Some(&0.1));
        assert_eq!(recorded.last(), Some(&1.0));
        assert!(recorded.windows(2).all(|w| w[0] <= w[1]));

        let stats = ingestor.store.stats("k1").unwrap();
        assert_eq!(stats.chunk_count, result.chunks_created);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image.png");
        fs::write(&path, b"not text").unwrap();
        let err = extract_text(&path).unwrap_err();
        assert!(matches!(err, AtelierError::UnsupportedInput(_)));
    }

    #[test]
    fn empty_file_reports_no_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vide.txt");
        fs::write(&path, "   \n").unwrap();
        let err = extract_text(&path).unwrap_err();
        assert!(matches!(err, AtelierError::NoContent(_)));
    }

    #[test]
    fn chunk_metadata_carries_position_and_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "Un paragraphe. ".repeat(100)).unwrap();

        let ingestor = ingestor(dir.path());
        let result = ingestor.ingest_file("k1", &path, None, None).unwrap();

        let query = EmbeddingClient::hash().embed("paragraphe").unwrap();
        let hits = ingestor.store.search("k1", &query, 1).unwrap();
        assert_eq!(hits[0].metadata.source_file, "notes.txt");
        assert_eq!(hits[0].metadata.total_chunks, result.chunks_created);
        assert!(hits[0].metadata.chunk_index < result.chunks_created);
    }

    #[test]
    fn folder_ingestion_collects_errors_instead_of_raising() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("docs");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("bon.txt"), "Du texte utile. ".repeat(40)).unwrap();
        fs::write(folder.join("vide.txt"), "").unwrap();
        fs::write(folder.join("ignore.png"), b"binaire").unwrap();

        let ingestor = ingestor(dir.path());
        let aggregate = ingestor.ingest_folder("k1", &folder, None, None).unwrap();

        assert_eq!(aggregate.files_processed, 1);
        assert!(aggregate.chunks_created > 0);
        assert_eq!(aggregate.errors.len(), 1);
        assert!(!aggregate.success);
        assert!(aggregate.errors[0].contains("vide.txt"));
    }
}
