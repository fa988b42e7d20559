//! Upstream endpoint configuration for STT and the intent classifier.

/// Configuration for the chat-completion classifier upstream.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Base URL; `/chat/completions` is appended for the call.
    pub base_url: String,
    /// Model name sent with every request.
    pub model: String,
    /// Bearer credential. Empty means no `Authorization` header.
    pub api_key: String,
    /// Completion token cap.
    pub max_tokens: u32,
}

impl ClassifierConfig {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        if base_url.trim().is_empty() {
            base_url = DEFAULT_CLASSIFIER_URL.to_string();
        }
        let mut model = model.into();
        if model.trim().is_empty() {
            model = DEFAULT_CLASSIFIER_MODEL.to_string();
        }
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key: api_key.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Configuration for the speech-to-text upstream.
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Full URL the WAV payload is POSTed to.
    pub endpoint: String,
}

impl SttConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

pub const DEFAULT_CLASSIFIER_URL: &str = "https://inference.do-ai.run/v1";
pub const DEFAULT_CLASSIFIER_MODEL: &str = "alibaba-qwen3-32b";
const DEFAULT_MAX_TOKENS: u32 = 850;
