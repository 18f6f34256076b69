use crate::Provider;

/// Default model per family, used when the settings document carries none.
pub fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "gpt-4o-mini",
        Provider::DeepSeek => "deepseek-chat",
        Provider::Gateway => "labo-7b",
        Provider::Gemini => "gemini-1.5-flash",
        Provider::Anthropic => "claude-3-5-sonnet-latest",
        Provider::Groq => "llama-3.1-8b-instant",
        Provider::Mistral => "mistral-small-latest",
        Provider::HuggingFace => "mistralai/Mistral-7B-Instruct-v0.3",
        Provider::Local => "local",
    }
}

/// Curated lists for families without a usable list endpoint.
pub fn static_models(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::Anthropic => &[
            "claude-3-5-sonnet-latest",
            "claude-3-5-haiku-latest",
            "claude-3-opus-latest",
        ],
        Provider::HuggingFace => &[
            "mistralai/Mistral-7B-Instruct-v0.3",
            "meta-llama/Llama-3.1-8B-Instruct",
            "Qwen/Qwen2.5-7B-Instruct",
        ],
        Provider::Gateway => &["labo-7b", "labo-70b"],
        Provider::Local => &["local"],
        _ => &[],
    }
}

/// Free-tier model identifiers. The annotation lives here, at the boundary,
/// not inside the adapter dispatch.
pub fn free_models(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::Groq => &["llama-3.1-8b-instant", "gemma2-9b-it"],
        Provider::Gemini => &["gemini-1.5-flash"],
        Provider::HuggingFace => &["mistralai/Mistral-7B-Instruct-v0.3"],
        _ => &[],
    }
}

pub fn is_free_model(provider: Provider, model: &str) -> bool {
    free_models(provider).contains(&model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_provider_has_a_default_model() {
        for provider in [
            Provider::OpenAi,
            Provider::DeepSeek,
            Provider::Gateway,
            Provider::Gemini,
            Provider::Anthropic,
            Provider::Groq,
            Provider::Mistral,
            Provider::HuggingFace,
            Provider::Local,
        ] {
            assert!(!default_model(provider).is_empty());
        }
    }

    #[test]
    fn free_annotation_is_model_scoped() {
        assert!(is_free_model(Provider::Groq, "llama-3.1-8b-instant"));
        assert!(!is_free_model(Provider::Groq, "mixtral-8x7b-32768"));
    }
}
