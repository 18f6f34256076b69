use atelier_core::{AtelierError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tokio::runtime::Runtime;

use crate::{ChatOptions, LlmClient, Provider};

impl LlmClient {
    /// Submits a PNG screenshot plus an extraction prompt to the provider's
    /// vision route. Used by the browser scraper when CSS extraction comes
    /// back empty.
    pub async fn describe_image(&self, png: &[u8], prompt: &str) -> Result<String> {
        match self.provider() {
            Provider::OpenAi | Provider::Groq | Provider::Gateway | Provider::Mistral => {
                self.describe_openai_compat(png, prompt).await
            }
            Provider::Gemini => self.describe_gemini(png, prompt).await,
            Provider::Anthropic => self.describe_anthropic(png, prompt).await,
            // Offline double answers with an empty item list.
            Provider::Local => Ok("[]".to_string()),
            other => Err(AtelierError::UnsupportedProvider(format!(
                "{} (vision)",
                other.as_str()
            ))),
        }
    }

    pub fn describe_image_blocking(&self, png: &[u8], prompt: &str) -> Result<String> {
        let rt = Runtime::new().map_err(AtelierError::Io)?;
        rt.block_on(self.describe_image(png, prompt))
    }

    async fn describe_openai_compat(&self, png: &[u8], prompt: &str) -> Result<String> {
        let data_url = format!("data:image/png;base64,{}", BASE64.encode(png));
        let payload = json!({
            "model": self.model(),
            "max_tokens": ChatOptions::default().max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ],
            }],
        });
        self.raw_openai_compat_request(payload).await
    }

    async fn describe_gemini(&self, png: &[u8], prompt: &str) -> Result<String> {
        let payload = json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inline_data": { "mime_type": "image/png", "data": BASE64.encode(png) } },
                ],
            }],
        });
        self.raw_gemini_request(payload).await
    }

    async fn describe_anthropic(&self, png: &[u8], prompt: &str) -> Result<String> {
        let payload = json!({
            "model": self.model(),
            "max_tokens": ChatOptions::default().max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": "image/png",
                            "data": BASE64.encode(png),
                        },
                    },
                    { "type": "text", "text": prompt },
                ],
            }],
        });
        self.raw_anthropic_request(payload).await
    }
}
