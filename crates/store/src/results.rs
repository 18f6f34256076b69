use std::fs;
use std::path::PathBuf;

use atelier_core::{AppRoot, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// One scraping run, archived under `resultats/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingResult {
    pub assistant_id: String,
    pub assistant_name: String,
    pub url: String,
    pub query: String,
    #[serde(default)]
    pub extraction_prompt: String,
    /// Human-readable flattening of the extraction.
    pub results: String,
    /// Structured items as extracted, kept for debugging.
    #[serde(default)]
    pub raw_results: Value,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    /// ISO-8601, set at save time.
    #[serde(default)]
    pub timestamp: String,
}

pub struct ResultsManager {
    root: AppRoot,
}

impl ResultsManager {
    pub fn new(root: AppRoot) -> Self {
        Self { root }
    }

    /// Writes `scraping_<assistant_id>_<YYYYMMDD_HHMMSS>.json` and returns
    /// its path.
    pub fn save(&self, mut result: ScrapingResult) -> Result<PathBuf> {
        let now = Utc::now();
        result.timestamp = now.to_rfc3339();
        let dir = self.root.results_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "scraping_{}_{}.json",
            result.assistant_id,
            now.format("%Y%m%d_%H%M%S")
        ));
        fs::write(&path, serde_json::to_string_pretty(&result)?)?;
        info!(path = %path.display(), "résultat de scraping archivé");
        Ok(path)
    }

    /// Archived results for one assistant, most recent first.
    pub fn list(&self, assistant_id: &str) -> Result<Vec<PathBuf>> {
        let dir = self.root.results_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let prefix = format!("scraping_{assistant_id}_");
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix) && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        paths.reverse();
        Ok(paths)
    }

    pub fn read(&self, path: &std::path::Path) -> Result<ScrapingResult> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample() -> ScrapingResult {
        ScrapingResult {
            assistant_id: "a1".to_string(),
            assistant_name: "Veilleur".to_string(),
            url: "https://example.com/produits".to_string(),
            query: "chaussures".to_string(),
            extraction_prompt: "titre et prix".to_string(),
            results: "1. Basket — 49€".to_string(),
            raw_results: json!([{"title": "Basket", "price": "49€"}]),
            provider: "OpenAI".to_string(),
            model: "gpt-4o-mini".to_string(),
            timestamp: String::new(),
        }
    }

    #[test]
    fn save_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let manager = ResultsManager::new(AppRoot::new(dir.path()));
        let path = manager.save(sample()).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("scraping_a1_"));
        assert!(name.ends_with(".json"));

        let read = manager.read(&path).unwrap();
        assert_eq!(read.assistant_name, "Veilleur");
        assert_eq!(read.raw_results[0]["price"], "49€");
        assert!(!read.timestamp.is_empty());
    }

    #[test]
    fn list_filters_by_assistant() {
        let dir = tempdir().unwrap();
        let manager = ResultsManager::new(AppRoot::new(dir.path()));
        manager.save(sample()).unwrap();
        let mut other = sample();
        other.assistant_id = "a2".to_string();
        manager.save(other).unwrap();

        assert_eq!(manager.list("a1").unwrap().len(), 1);
        assert_eq!(manager.list("a2").unwrap().len(), 1);
        assert!(manager.list("a3").unwrap().is_empty());
    }
}
