use std::path::PathBuf;
use std::time::Duration;

use atelier_core::{AtelierError, Result};
use atelier_llm::{ChatMessage, ChatOptions};
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::{emit, format_items, persist, Item, Scraper, ScraperParams};

/// Page text budget handed to the model, in chars.
const PAGE_CHAR_BUDGET: usize = 30_000;

const EXTRACTION_SYSTEM: &str = "Tu es un extracteur de données. À partir du texte d'une page \
web et d'une consigne, tu réponds uniquement avec un tableau JSON d'objets, sans commentaire \
ni balise de code.";

/// Scraper without a browser: one HTTP fetch, HTML reduced to text, the
/// extraction handed to the configured LLM.
pub struct LlmGuidedScraper {
    params: ScraperParams,
    http: Client,
}

impl LlmGuidedScraper {
    pub fn new(params: ScraperParams) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(crate::agents::random_user_agent())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_default();
        Self { params, http }
    }

    /// Search-style runs append the query as `?q=` when the base URL has no
    /// query of its own; direct-scrape runs leave the URL alone.
    fn target_url(url: &str, query: &str) -> Result<String> {
        let mut target =
            Url::parse(url).map_err(|e| AtelierError::Other(format!("URL invalide : {e}")))?;
        if !query.is_empty() && target.query().is_none() {
            target.query_pairs_mut().append_pair("q", query);
        }
        Ok(target.into())
    }

    fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .map_err(|e| AtelierError::Network(e.to_string()))?;
        let status = response.status();
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            return Err(atelier_llm::classify_response(status, &body));
        }
        Ok(body)
    }
}

impl Scraper for LlmGuidedScraper {
    fn search(
        &self,
        url: &str,
        query: &str,
        extraction_prompt: &str,
    ) -> Result<(String, Option<PathBuf>)> {
        if extraction_prompt.trim().is_empty() {
            return Err(AtelierError::ToolConfigMissing);
        }
        let target = Self::target_url(url, query)?;
        emit(&self.params.log, &format!("Chargement de {target}"));
        let html = self.fetch(&target)?;
        let page_text: String = html2text::from_read(html.as_bytes(), 120)
            .chars()
            .take(PAGE_CHAR_BUDGET)
            .collect();

        emit(&self.params.log, "Extraction par le modèle");
        let messages = [
            ChatMessage::system(EXTRACTION_SYSTEM),
            ChatMessage::user(format!(
                "{page_text}\n\nConsigne d'extraction : {extraction_prompt}\n\
                 Réponds uniquement avec un tableau JSON."
            )),
        ];
        let reply = self
            .params
            .client
            .chat_blocking(&messages, &ChatOptions::default())?;

        let (formatted, raw) = match parse_items(&reply) {
            Some(items) => {
                let formatted = format_items(&items);
                (formatted, Value::Array(items.into_iter().map(Value::Object).collect()))
            }
            None => {
                debug!("réponse non JSON, conservée telle quelle");
                (reply.trim().to_string(), Value::String(reply))
            }
        };

        let path = persist(&self.params, &target, query, extraction_prompt, &formatted, raw);
        Ok((formatted, path))
    }
}

/// Pulls a JSON array of objects out of a model reply, tolerating prose and
/// code fences around it.
fn parse_items(reply: &str) -> Option<Vec<Item>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end <= start {
        return None;
    }
    let parsed: Value = serde_json::from_str(&reply[start..=end]).ok()?;
    let array = parsed.as_array()?;
    let items = array
        .iter()
        .map(|value| match value {
            Value::Object(map) => map.clone(),
            other => {
                let mut item = Item::new();
                item.insert("value".to_string(), other.clone());
                item
            }
        })
        .collect();
    Some(items)
}
