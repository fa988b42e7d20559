use crate::config::SttConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Maximum audio input size for STT (20 MiB). Prevents OOM from oversized
/// payloads that slipped past the ingest cap.
const MAX_STT_INPUT_BYTES: usize = 20 * 1024 * 1024;

/// Ceiling for a single transcription round trip.
const STT_TIMEOUT: Duration = Duration::from_secs(60);

/// A speech-to-text backend: WAV bytes in, transcript out.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, VoiceError>;
}

/// Expected upstream response body.
#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// HTTP speech-to-text client.
///
/// POSTs the raw WAV body to the configured endpoint and expects a JSON
/// object with a `text` field back.
#[derive(Debug, Clone)]
pub struct HttpSttClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSttClient {
    pub fn new(config: SttConfig) -> Result<Self, VoiceError> {
        let endpoint = config.endpoint.trim().to_string();
        if endpoint.is_empty() {
            return Err(VoiceError::Config(
                "STT endpoint is not configured".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(STT_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build STT client: {e}")))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl SpeechToText for HttpSttClient {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, VoiceError> {
        if audio.is_empty() {
            return Err(VoiceError::Stt("audio vacío".to_string()));
        }
        if audio.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Stt(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| VoiceError::Stt(format!("request error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(512).collect();
            return Err(VoiceError::Stt(format!("status {status}: {snippet}")));
        }

        let decoded: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Stt(format!("decode response: {e}")))?;

        Ok(decoded.text.trim().to_string())
    }
}
