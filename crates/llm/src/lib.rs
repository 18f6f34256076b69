use atelier_core::{AtelierError, Result};
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

pub mod catalog;
pub mod vision;

/// Closed set of provider families. Human-readable labels are matched once,
/// at the UI boundary, through [`Provider::parse`]; everything past that
/// point dispatches on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    DeepSeek,
    /// Internal gateway exposing an OpenAI-compatible API at `<base>/<model>/v1`.
    Gateway,
    Gemini,
    Anthropic,
    Groq,
    Mistral,
    HuggingFace,
    /// Offline deterministic double used by tests and the CLI dry-run mode.
    Local,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::DeepSeek => "deepseek",
            Provider::Gateway => "gateway",
            Provider::Gemini => "gemini",
            Provider::Anthropic => "anthropic",
            Provider::Groq => "groq",
            Provider::Mistral => "mistral",
            Provider::HuggingFace => "huggingface",
            Provider::Local => "local",
        }
    }

    /// Maps a display label onto a variant. More specific family tokens win
    /// when a label carries several ("Mistral via Hugging Face" is Hugging
    /// Face, not Mistral).
    pub fn parse(label: &str) -> Result<Self> {
        let lower = label.to_lowercase();
        const TABLE: &[(&[&str], Provider)] = &[
            (&["hugging face", "huggingface"], Provider::HuggingFace),
            (&["deepseek"], Provider::DeepSeek),
            (&["gateway", "passerelle"], Provider::Gateway),
            (&["gemini", "google"], Provider::Gemini),
            (&["anthropic", "claude"], Provider::Anthropic),
            (&["groq"], Provider::Groq),
            (&["mistral"], Provider::Mistral),
            (&["openai", "gpt"], Provider::OpenAi),
            (&["local"], Provider::Local),
        ];
        for (needles, provider) in TABLE {
            if needles.iter().any(|needle| lower.contains(needle)) {
                return Ok(*provider);
            }
        }
        Err(AtelierError::UnsupportedProvider(label.to_string()))
    }
}

/// Coordinates needed to dispatch to one provider, as resolved from the
/// settings store.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: String,
    pub endpoint: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn wire(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: None,
        }
    }
}

const HF_COLD_START_RETRIES: usize = 3;

#[derive(Clone, Debug)]
pub struct LlmClient {
    http: Client,
    provider: Provider,
    model: String,
    credentials: Credentials,
}

impl LlmClient {
    pub fn new(provider: Provider, credentials: Credentials) -> Result<Self> {
        if provider != Provider::Local && credentials.api_key.trim().is_empty() {
            return Err(AtelierError::CredentialMissing(
                provider.as_str().to_string(),
            ));
        }
        let model = credentials
            .model
            .clone()
            .unwrap_or_else(|| catalog::default_model(provider).to_string());
        Ok(Self {
            http: Client::new(),
            provider,
            model,
            credentials,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<String> {
        match self.provider {
            Provider::OpenAi => {
                self.chat_openai_compat(&self.base_url("https://api.openai.com/v1"), messages, opts)
                    .await
            }
            Provider::DeepSeek => {
                self.chat_openai_compat(&self.base_url("https://api.deepseek.com/v1"), messages, opts)
                    .await
            }
            Provider::Groq => {
                self.chat_openai_compat(
                    &self.base_url("https://api.groq.com/openai/v1"),
                    messages,
                    opts,
                )
                .await
            }
            Provider::Mistral => {
                self.chat_openai_compat(&self.base_url("https://api.mistral.ai/v1"), messages, opts)
                    .await
            }
            Provider::Gateway => {
                let base = self.gateway_base()?;
                self.chat_openai_compat(&base, messages, opts).await
            }
            Provider::HuggingFace => self.chat_huggingface(messages, opts).await,
            Provider::Gemini => self.chat_gemini(messages, opts).await,
            Provider::Anthropic => self.chat_anthropic(messages, opts).await,
            Provider::Local => Ok(chat_local(messages)),
        }
    }

    pub fn chat_blocking(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<String> {
        let rt = Runtime::new().map_err(AtelierError::Io)?;
        rt.block_on(self.chat(messages, opts))
    }

    /// Minimal completion used by the connection tester. The returned string
    /// is the diagnostic shown to the user.
    pub async fn probe(&self) -> Result<String> {
        let messages = [ChatMessage::user("ping")];
        let opts = ChatOptions {
            max_tokens: 8,
            temperature: None,
        };
        let reply = self.chat(&messages, &opts).await?;
        Ok(format!(
            "{} ({}) a répondu ({} caractères)",
            self.provider.as_str(),
            self.model,
            reply.len()
        ))
    }

    pub fn probe_blocking(&self) -> Result<String> {
        let rt = Runtime::new().map_err(AtelierError::Io)?;
        rt.block_on(self.probe())
    }

    /// Available model identifiers. Providers without a list endpoint get
    /// the curated static list from [`catalog`].
    pub async fn list_models(&self) -> Result<Vec<String>> {
        match self.provider {
            Provider::OpenAi => {
                self.list_models_openai_compat(&self.base_url("https://api.openai.com/v1"))
                    .await
            }
            Provider::DeepSeek => {
                self.list_models_openai_compat(&self.base_url("https://api.deepseek.com/v1"))
                    .await
            }
            Provider::Groq => {
                self.list_models_openai_compat(&self.base_url("https://api.groq.com/openai/v1"))
                    .await
            }
            Provider::Mistral => {
                self.list_models_openai_compat(&self.base_url("https://api.mistral.ai/v1"))
                    .await
            }
            Provider::Gemini => self.list_models_gemini().await,
            _ => Ok(catalog::static_models(self.provider)
                .iter()
                .map(|m| m.to_string())
                .collect()),
        }
    }

    pub fn list_models_blocking(&self) -> Result<Vec<String>> {
        let rt = Runtime::new().map_err(AtelierError::Io)?;
        rt.block_on(self.list_models())
    }

    fn base_url(&self, default: &str) -> String {
        self.credentials
            .endpoint
            .clone()
            .unwrap_or_else(|| default.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    fn gateway_base(&self) -> Result<String> {
        let endpoint = self.credentials.endpoint.as_deref().ok_or_else(|| {
            AtelierError::Network("endpoint de la passerelle non configuré".to_string())
        })?;
        Ok(format!(
            "{}/{}/v1",
            endpoint.trim_end_matches('/'),
            self.model
        ))
    }

    async fn chat_openai_compat(
        &self,
        base: &str,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<String> {
        let url = format!("{base}/chat/completions");
        let payload = openai_payload(&self.model, messages, opts);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.credentials.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;
        let value = decode_body(self.provider, response).await?;
        extract_openai_text(&value)
            .ok_or_else(|| AtelierError::Other("réponse sans texte".to_string()))
    }

    /// Hugging Face serves an OpenAI-compatible route per model; 503s are
    /// cold starts and get a bounded retry.
    async fn chat_huggingface(
        &self,
        messages: &[ChatMessage],
        opts: &ChatOptions,
    ) -> Result<String> {
        let base = self.base_url(&format!(
            "https://api-inference.huggingface.co/models/{}/v1",
            self.model
        ));
        let url = format!("{base}/chat/completions");
        let payload = openai_payload(&self.model, messages, opts);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.credentials.api_key)
                .json(&payload)
                .send()
                .await
                .map_err(transport_error)?;
            if response.status() == StatusCode::SERVICE_UNAVAILABLE {
                let retry_after = response.headers().get(RETRY_AFTER).cloned();
                let body = response.text().await.unwrap_or_default();
                if attempt > HF_COLD_START_RETRIES {
                    return Err(AtelierError::RateLimitLocal(body));
                }
                let wait = backoff_delay(attempt, retry_after.as_ref());
                debug!(attempt, "hugging face cold start, waiting {:?}", wait);
                sleep(wait).await;
                continue;
            }
            let value = decode_body(self.provider, response).await?;
            return extract_openai_text(&value)
                .ok_or_else(|| AtelierError::Other("réponse sans texte".to_string()));
        }
    }

    async fn chat_gemini(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<String> {
        // The wire format has no strict system role: the whole exchange is
        // flattened into a single user part, system text first.
        let prompt = flatten_for_gemini(messages);
        let mut payload = json!({
            "contents": [ { "parts": [ { "text": prompt } ] } ],
        });
        if let Some(t) = opts.temperature {
            payload["generationConfig"] = json!({ "temperature": t });
        }
        self.raw_gemini_request(payload).await
    }

    async fn chat_anthropic(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<String> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let wire: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({ "role": m.role.wire(), "content": m.content }))
            .collect();
        let mut payload = json!({
            "model": self.model,
            "max_tokens": opts.max_tokens,
            "messages": wire,
        });
        if !system.is_empty() {
            payload["system"] = json!(system.join("\n\n"));
        }
        if let Some(t) = opts.temperature {
            payload["temperature"] = json!(t);
        }
        self.raw_anthropic_request(payload).await
    }

    pub(crate) async fn raw_openai_compat_request(&self, payload: Value) -> Result<String> {
        let base = match self.provider {
            Provider::Groq => self.base_url("https://api.groq.com/openai/v1"),
            Provider::Mistral => self.base_url("https://api.mistral.ai/v1"),
            Provider::Gateway => self.gateway_base()?,
            _ => self.base_url("https://api.openai.com/v1"),
        };
        let response = self
            .http
            .post(format!("{base}/chat/completions"))
            .bearer_auth(&self.credentials.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;
        let value = decode_body(self.provider, response).await?;
        extract_openai_text(&value)
            .ok_or_else(|| AtelierError::Other("réponse sans texte".to_string()))
    }

    pub(crate) async fn raw_gemini_request(&self, payload: Value) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.credentials.api_key
        );
        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;
        let value = decode_body(self.provider, response).await?;
        let parsed: GeminiResponse = serde_json::from_value(value)?;
        parsed
            .candidates
            .and_then(|mut c| c.pop())
            .and_then(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .find_map(|part| part.text)
            })
            .ok_or_else(|| AtelierError::Other("réponse Gemini sans texte".to_string()))
    }

    pub(crate) async fn raw_anthropic_request(&self, payload: Value) -> Result<String> {
        let response = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.credentials.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;
        let value = decode_body(self.provider, response).await?;
        let parsed: AnthropicResponse = serde_json::from_value(value)?;
        parsed
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| AtelierError::Other("réponse Anthropic sans texte".to_string()))
    }

    async fn list_models_openai_compat(&self, base: &str) -> Result<Vec<String>> {
        let url = format!("{base}/models");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.credentials.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        let value = decode_body(self.provider, response).await?;
        let mut models = Vec::new();
        if let Some(data) = value.get("data").and_then(|v| v.as_array()) {
            for entry in data {
                if let Some(id) = entry.get("id").and_then(|v| v.as_str()) {
                    models.push(id.to_string());
                }
            }
        }
        models.sort();
        Ok(models)
    }

    async fn list_models_gemini(&self) -> Result<Vec<String>> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models?key={}",
            self.credentials.api_key
        );
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        let value = decode_body(self.provider, response).await?;
        let mut models = Vec::new();
        if let Some(entries) = value.get("models").and_then(|v| v.as_array()) {
            for entry in entries {
                if let Some(name) = entry.get("name").and_then(|v| v.as_str()) {
                    models.push(name.trim_start_matches("models/").to_string());
                }
            }
        }
        models.sort();
        Ok(models)
    }
}

fn openai_payload(model: &str, messages: &[ChatMessage], opts: &ChatOptions) -> Value {
    let wire: Vec<Value> = messages
        .iter()
        .map(|m| json!({ "role": m.role.wire(), "content": m.content }))
        .collect();
    let mut payload = json!({
        "model": model,
        "messages": wire,
        "max_tokens": opts.max_tokens,
    });
    if let Some(t) = opts.temperature {
        payload["temperature"] = json!(t);
    }
    payload
}

fn flatten_for_gemini(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        match message.role {
            Role::System => {
                prompt.push_str("[SYSTEM]\n");
                prompt.push_str(message.content.trim());
                prompt.push_str("\n\n");
            }
            Role::User => {
                prompt.push_str(&message.content);
                prompt.push_str("\n\n");
            }
            Role::Assistant => {
                prompt.push_str("[ASSISTANT]\n");
                prompt.push_str(message.content.trim());
                prompt.push_str("\n\n");
            }
        }
    }
    prompt.trim_end().to_string()
}

/// Offline double: replies with the last user message, which is exactly what
/// the pipeline tests need to observe prompt plumbing.
fn chat_local(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.min(6) as u32;
    Duration::from_secs(1u64 << capped)
}

fn transport_error(err: reqwest::Error) -> AtelierError {
    if err.is_connect() || err.is_timeout() {
        AtelierError::Network(err.to_string())
    } else {
        AtelierError::Other(err.to_string())
    }
}

/// Classifies a non-success response into the shared taxonomy, keeping the
/// raw body verbatim so callers can show friendlier messages on top of it.
pub fn classify_response(status: StatusCode, body: &str) -> AtelierError {
    let lower = body.to_lowercase();
    match status.as_u16() {
        401 | 403 => AtelierError::CredentialInvalid(body.to_string()),
        402 | 429 => AtelierError::QuotaExhausted(body.to_string()),
        404 => AtelierError::ModelUnavailable(body.to_string()),
        413 => AtelierError::ContextTooLarge(body.to_string()),
        _ => {
            if lower.contains("invalid api key") {
                AtelierError::CredentialInvalid(body.to_string())
            } else if lower.contains("quota") {
                AtelierError::QuotaExhausted(body.to_string())
            } else if lower.contains("not found") {
                AtelierError::ModelUnavailable(body.to_string())
            } else if lower.contains("too large") || lower.contains("maximum context") {
                AtelierError::ContextTooLarge(body.to_string())
            } else {
                AtelierError::Other(body.to_string())
            }
        }
    }
}

async fn decode_body(provider: Provider, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        let err = classify_response(status, &body);
        warn!(provider = provider.as_str(), %status, "provider returned an error");
        return Err(err);
    }
    serde_json::from_str(&body).map_err(AtelierError::SerdeJson)
}

pub(crate) fn extract_openai_text(value: &Value) -> Option<String> {
    let choices = value.get("choices")?.as_array()?;
    let choice = choices.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    if let Some(parts) = content.as_array() {
        for part in parts {
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                return Some(text.to_string());
            }
        }
    }
    None
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::ErrorKind;

    #[test]
    fn parse_matches_family_tokens() {
        assert_eq!(Provider::parse("OpenAI GPT-4o").unwrap(), Provider::OpenAi);
        assert_eq!(Provider::parse("Claude 3.5").unwrap(), Provider::Anthropic);
        assert_eq!(Provider::parse("Groq Llama").unwrap(), Provider::Groq);
        assert_eq!(Provider::parse("DeepSeek Chat").unwrap(), Provider::DeepSeek);
    }

    #[test]
    fn parse_prefers_most_specific_family() {
        assert_eq!(
            Provider::parse("Mistral via Hugging Face").unwrap(),
            Provider::HuggingFace
        );
        assert_eq!(
            Provider::parse("DeepSeek (OpenAI compatible)").unwrap(),
            Provider::DeepSeek
        );
    }

    #[test]
    fn parse_rejects_unknown_label() {
        let err = Provider::parse("Frobnicate AI").unwrap_err();
        assert!(err.to_string().contains("not supported"));
        assert_eq!(err.kind(), ErrorKind::UnsupportedProvider);
    }

    #[test]
    fn classification_follows_status_then_body() {
        let quota = classify_response(StatusCode::TOO_MANY_REQUESTS, "Error 429: quota");
        assert_eq!(quota.kind(), ErrorKind::QuotaExhausted);
        let invalid = classify_response(StatusCode::UNAUTHORIZED, "bad key");
        assert_eq!(invalid.kind(), ErrorKind::CredentialInvalid);
        let missing = classify_response(StatusCode::NOT_FOUND, "model missing");
        assert_eq!(missing.kind(), ErrorKind::ModelUnavailable);
        let by_body = classify_response(StatusCode::BAD_REQUEST, "invalid api key supplied");
        assert_eq!(by_body.kind(), ErrorKind::CredentialInvalid);
        let too_large = classify_response(StatusCode::PAYLOAD_TOO_LARGE, "entity too large");
        assert_eq!(too_large.kind(), ErrorKind::ContextTooLarge);
    }

    #[test]
    fn retry_after_header_overrides_exponential_backoff() {
        let header = HeaderValue::from_static("7");
        assert_eq!(backoff_delay(1, Some(&header)), Duration::from_secs(7));
        // a zero header still waits a beat
        let zero = HeaderValue::from_static("0");
        assert_eq!(backoff_delay(1, Some(&zero)), Duration::from_secs(1));
        // unparseable header falls back to the exponential schedule
        let junk = HeaderValue::from_static("soon");
        assert_eq!(backoff_delay(2, Some(&junk)), Duration::from_secs(4));
        assert_eq!(backoff_delay(1, None), Duration::from_secs(2));
        assert_eq!(backoff_delay(10, None), Duration::from_secs(64));
    }

    #[test]
    fn classification_keeps_raw_diagnostic() {
        let err = classify_response(StatusCode::TOO_MANY_REQUESTS, "Error 429: quota");
        assert_eq!(err.diagnostic(), Some("Error 429: quota"));
    }

    #[test]
    fn local_provider_echoes_last_user_message() {
        let client = LlmClient::new(Provider::Local, Credentials::default()).unwrap();
        let messages = [
            ChatMessage::system("Rôle : assistant"),
            ChatMessage::user("Hello"),
        ];
        let reply = client
            .chat_blocking(&messages, &ChatOptions::default())
            .unwrap();
        assert_eq!(reply, "Hello");
    }

    #[test]
    fn missing_key_is_a_typed_error() {
        let err = LlmClient::new(Provider::OpenAi, Credentials::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialMissing);
    }

    #[test]
    fn gateway_base_is_model_scoped() {
        let client = LlmClient::new(
            Provider::Gateway,
            Credentials {
                api_key: "k".to_string(),
                endpoint: Some("https://gw.interne.example/".to_string()),
                model: Some("labo-7b".to_string()),
            },
        )
        .unwrap();
        assert_eq!(
            client.gateway_base().unwrap(),
            "https://gw.interne.example/labo-7b/v1"
        );
    }

    #[test]
    fn gemini_flattening_inlines_system_text() {
        let prompt = flatten_for_gemini(&[
            ChatMessage::system("Rôle : expert"),
            ChatMessage::user("Question"),
        ]);
        assert!(prompt.starts_with("[SYSTEM]\nRôle : expert"));
        assert!(prompt.contains("Question"));
    }
}
