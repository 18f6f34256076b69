//! Scraper side of the workbench: the factory, the HTTP+LLM scraper and the
//! browser-automation scraper, plus the instruction mini-language consumed
//! from an assistant's `url_instructions`.

use std::path::PathBuf;

use atelier_core::{AppRoot, Result};
use atelier_llm::LlmClient;
use atelier_store::{ResultsManager, ScrapingResult};
use serde_json::{Map, Value};

pub mod agents;
pub mod browser;
pub mod instructions;
pub mod llm_guided;
pub mod site;

pub use browser::{BrowserKind, BrowserScraper};
pub use instructions::{validate, BrowserAction, ScrapeInstructions};
pub use llm_guided::LlmGuidedScraper;

pub type LogFn = Box<dyn Fn(&str) + Send>;

/// A structured item is an open field map so site handlers, CSS cascades and
/// vision extraction can all contribute without a fixed schema.
pub type Item = Map<String, Value>;

pub trait Scraper {
    /// Runs one scrape and returns the formatted text plus the path of the
    /// persisted result file, when persistence succeeded.
    fn search(
        &self,
        url: &str,
        query: &str,
        extraction_prompt: &str,
    ) -> Result<(String, Option<PathBuf>)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScraperKind {
    LlmGuided,
    Browser,
}

impl ScraperKind {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "llm_guided" | "scrapegraph" | "llm" => Some(Self::LlmGuided),
            "browser" | "navigateur" => Some(Self::Browser),
            _ => None,
        }
    }
}

pub struct ScraperParams {
    pub assistant_id: String,
    pub assistant_name: String,
    pub root: AppRoot,
    pub client: LlmClient,
    pub url_instructions: String,
    pub browser: BrowserKind,
    pub visible: bool,
    pub log: Option<LogFn>,
}

pub fn create(kind: ScraperKind, params: ScraperParams) -> Box<dyn Scraper> {
    match kind {
        ScraperKind::LlmGuided => Box::new(LlmGuidedScraper::new(params)),
        ScraperKind::Browser => Box::new(BrowserScraper::new(params)),
    }
}

/// Flattens extracted items into the human-readable transcript form.
pub fn format_items(items: &[Item]) -> String {
    if items.is_empty() {
        return "Aucun résultat extrait.".to_string();
    }
    let preferred = ["title", "price", "link"];
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let mut parts = Vec::new();
            for key in preferred {
                if let Some(value) = item.get(key) {
                    parts.push(format!("{key}: {}", value_text(value)));
                }
            }
            let mut rest: Vec<&String> = item
                .keys()
                .filter(|k| !preferred.contains(&k.as_str()))
                .collect();
            rest.sort();
            for key in rest {
                parts.push(format!("{key}: {}", value_text(&item[key.as_str()])));
            }
            format!("{}. {}", index + 1, parts.join(" | "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn persist(
    params: &ScraperParams,
    url: &str,
    query: &str,
    extraction_prompt: &str,
    formatted: &str,
    raw: Value,
) -> Option<PathBuf> {
    let manager = ResultsManager::new(params.root.clone());
    let record = ScrapingResult {
        assistant_id: params.assistant_id.clone(),
        assistant_name: params.assistant_name.clone(),
        url: url.to_string(),
        query: query.to_string(),
        extraction_prompt: extraction_prompt.to_string(),
        results: formatted.to_string(),
        raw_results: raw,
        provider: params.client.provider().as_str().to_string(),
        model: params.client.model().to_string(),
        timestamp: String::new(),
    };
    match manager.save(record) {
        Ok(path) => Some(path),
        Err(err) => {
            tracing::warn!(%err, "archivage du résultat impossible");
            None
        }
    }
}

pub(crate) fn emit(log: &Option<LogFn>, message: &str) {
    tracing::info!("{message}");
    if let Some(callback) = log {
        callback(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_parsing_accepts_known_labels() {
        assert_eq!(ScraperKind::parse("llm_guided"), Some(ScraperKind::LlmGuided));
        assert_eq!(ScraperKind::parse("Browser"), Some(ScraperKind::Browser));
        assert_eq!(ScraperKind::parse("téléphone"), None);
    }

    #[test]
    fn items_format_with_title_first() {
        let item: Item = json!({"link": "https://e.fr/1", "title": "Basket", "price": "49€"})
            .as_object()
            .cloned()
            .unwrap();
        let text = format_items(&[item]);
        assert_eq!(text, "1. title: Basket | price: 49€ | link: https://e.fr/1");
    }

    #[test]
    fn no_items_formats_a_sentence() {
        assert!(format_items(&[]).contains("Aucun résultat"));
    }
}
