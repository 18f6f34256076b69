use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use atelier_core::{AtelierError, Result};
use bytemuck::{cast_slice, try_cast_slice};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Metadata tuple attached to every stored chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub source_file: String,
    pub file_path: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkInsert {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// 1 − cosine similarity, so lower is closer.
    pub distance: f32,
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    /// Segments that could not be removed, each with the `StorageLocked`
    /// error describing why. Never raised; the sweep finishes either way.
    pub failed: Vec<(String, AtelierError)>,
}

#[derive(Debug, Clone, Copy)]
pub struct KbStats {
    pub chunk_count: usize,
}

/// On-disk vector store under `vector_databases/`. A registry database maps
/// each collection `kb_<id>` to a segment identifier; the segment's chunks
/// and embeddings live in their own `<segment_id>.sqlite3` file, which is
/// what `cleanup_orphans` sweeps for.
#[derive(Clone)]
pub struct VectorStore {
    dir: PathBuf,
}

impl VectorStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let store = Self {
            dir: dir.as_ref().to_path_buf(),
        };
        fs::create_dir_all(&store.dir)?;
        store.init()?;
        Ok(store)
    }

    fn registry(&self) -> anyhow::Result<Connection> {
        Ok(Connection::open(self.dir.join("registry.db"))?)
    }

    fn segment(&self, segment_id: &str) -> anyhow::Result<Connection> {
        Ok(Connection::open(self.segment_path(segment_id))?)
    }

    fn segment_path(&self, segment_id: &str) -> PathBuf {
        self.dir.join(format!("{segment_id}.sqlite3"))
    }

    fn init(&self) -> Result<()> {
        let conn = self.registry()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                segment_id TEXT NOT NULL,
                label TEXT,
                description TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .context("initialisation du registre")?;
        Ok(())
    }

    fn collection_name(kb_id: &str) -> String {
        format!("kb_{kb_id}")
    }

    fn segment_for(&self, kb_id: &str) -> Result<Option<String>> {
        let conn = self.registry()?;
        let segment = conn
            .prepare("SELECT segment_id FROM collections WHERE name = ?1")
            .and_then(|mut stmt| {
                stmt.query_row([Self::collection_name(kb_id)], |row| row.get(0))
                    .optional()
            })
            .map_err(anyhow::Error::from)?;
        Ok(segment)
    }

    /// Re-creation over an existing collection is a conflict, not an upsert.
    pub fn create_kb(&self, kb_id: &str, name: &str, description: &str) -> Result<()> {
        let collection = Self::collection_name(kb_id);
        if self.segment_for(kb_id)?.is_some() {
            return Err(AtelierError::StorageConflict(collection));
        }
        let segment_id = Uuid::new_v4().to_string();
        let conn = self.segment(&segment_id)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            "#,
        )
        .map_err(anyhow::Error::from)?;
        let registry = self.registry()?;
        registry
            .execute(
                "INSERT INTO collections (name, segment_id, label, description) VALUES (?1, ?2, ?3, ?4)",
                params![collection, segment_id, name, description],
            )
            .map_err(anyhow::Error::from)?;
        info!(collection, segment_id, "collection créée");
        Ok(())
    }

    pub fn add(
        &self,
        kb_id: &str,
        chunks: &[ChunkInsert],
        embeddings: &[Vec<f32>],
    ) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            return Err(AtelierError::Other(format!(
                "{} chunks pour {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }
        let segment_id = self
            .segment_for(kb_id)?
            .ok_or_else(|| AtelierError::Other(format!("collection kb_{kb_id} introuvable")))?;
        let mut conn = self.segment(&segment_id)?;
        let tx = conn.transaction().map_err(anyhow::Error::from)?;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let blob = cast_slice::<f32, u8>(embedding);
            tx.execute(
                "INSERT INTO chunks (id, text, metadata, embedding) VALUES (?1, ?2, ?3, ?4)",
                params![
                    chunk.id,
                    chunk.text,
                    serde_json::to_string(&chunk.metadata)?,
                    blob
                ],
            )
            .map_err(anyhow::Error::from)?;
        }
        tx.commit().map_err(anyhow::Error::from)?;
        Ok(chunks.len())
    }

    pub fn search(
        &self,
        kb_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let segment_id = self
            .segment_for(kb_id)?
            .ok_or_else(|| AtelierError::Other(format!("collection kb_{kb_id} introuvable")))?;
        let conn = self.segment(&segment_id)?;
        let mut stmt = conn
            .prepare("SELECT id, text, metadata, embedding FROM chunks")
            .map_err(anyhow::Error::from)?;
        let mut rows = stmt.query([]).map_err(anyhow::Error::from)?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next().map_err(anyhow::Error::from)? {
            let id: String = row.get(0).map_err(anyhow::Error::from)?;
            let text: String = row.get(1).map_err(anyhow::Error::from)?;
            let metadata_raw: String = row.get(2).map_err(anyhow::Error::from)?;
            let blob: Vec<u8> = row.get(3).map_err(anyhow::Error::from)?;
            let embedding: &[f32] = try_cast_slice(&blob)
                .map_err(|_| AtelierError::InvalidDocument("embedding blob mal formé"))?;
            hits.push(ScoredChunk {
                id,
                text,
                metadata: serde_json::from_str(&metadata_raw)?,
                distance: 1.0 - cosine_similarity(query_embedding, embedding),
            });
        }
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Deregisters the collection. The segment file stays behind, possibly
    /// still locked by an open connection, and is reclaimed by
    /// [`VectorStore::cleanup_orphans`]. An absent collection is only worth
    /// a warning.
    pub fn delete_kb(&self, kb_id: &str) -> Result<()> {
        let collection = Self::collection_name(kb_id);
        if self.segment_for(kb_id)?.is_none() {
            warn!(collection, "suppression d'une collection inconnue, ignorée");
            return Ok(());
        }
        let registry = self.registry()?;
        registry
            .execute("DELETE FROM collections WHERE name = ?1", [&collection])
            .map_err(anyhow::Error::from)?;
        info!(collection, "collection supprimée, segment laissé au balayage");
        Ok(())
    }

    /// Sweeps segment files no collection references anymore. File locks
    /// (frequent on Windows) land in `failed` instead of aborting the sweep.
    pub fn cleanup_orphans(&self) -> Result<CleanupReport> {
        let registry = self.registry()?;
        let mut stmt = registry
            .prepare("SELECT segment_id FROM collections")
            .map_err(anyhow::Error::from)?;
        let live: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .map_err(anyhow::Error::from)?
            .collect::<std::result::Result<_, _>>()
            .map_err(anyhow::Error::from)?;

        let mut report = CleanupReport::default();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let is_segment = path.extension().and_then(|e| e.to_str()) == Some("sqlite3")
                && Uuid::parse_str(stem).is_ok();
            if !is_segment || live.iter().any(|id| id == stem) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!(segment = stem, "segment orphelin supprimé");
                    report.deleted.push(stem.to_string());
                }
                Err(err) => {
                    warn!(segment = stem, %err, "segment orphelin verrouillé");
                    report
                        .failed
                        .push((stem.to_string(), AtelierError::StorageLocked(err.to_string())));
                }
            }
        }
        Ok(report)
    }

    pub fn stats(&self, kb_id: &str) -> Result<KbStats> {
        let segment_id = self
            .segment_for(kb_id)?
            .ok_or_else(|| AtelierError::Other(format!("collection kb_{kb_id} introuvable")))?;
        let conn = self.segment(&segment_id)?;
        let chunk_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(anyhow::Error::from)?;
        Ok(KbStats {
            chunk_count: chunk_count as usize,
        })
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}
