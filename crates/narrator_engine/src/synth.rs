//! Speech synthesis provider client.
//!
//! `OpenAiSpeech` posts one chunk of text to the OpenAI speech endpoint and
//! returns the raw audio bytes. The pipeline owns chunking, rate limiting and
//! retries; this client does exactly one request per call.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::json;

use crate::types::{FailureKind, ProviderFault, SpeechError};

const SPEECH_PATH: &str = "/v1/audio/speech";

#[derive(Debug, Clone)]
pub struct SpeechSettings {
    /// Scheme and host only; the speech path is appended per request.
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_audio_bytes: u64,
    /// Wire format requested from the provider. `pcm` is headerless
    /// little-endian samples in the layout the pipeline's WAV encoder
    /// expects.
    pub response_format: String,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            max_audio_bytes: 64 * 1024 * 1024,
            response_format: "pcm".to_string(),
        }
    }
}

/// One synthesis call: which voice reads which text on whose account.
#[derive(Clone)]
pub struct SpeechRequest {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub text: String,
}

impl fmt::Debug for SpeechRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechRequest")
            .field("api_key", &"[redacted]")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("text_len", &self.text.len())
            .finish()
    }
}

#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Bytes, SpeechError>;
}

pub struct OpenAiSpeech {
    settings: SpeechSettings,
    client: reqwest::Client,
}

impl OpenAiSpeech {
    pub fn new(settings: SpeechSettings) -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| SpeechError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    pub fn settings(&self) -> &SpeechSettings {
        &self.settings
    }

    fn endpoint(&self) -> String {
        format!("{}{SPEECH_PATH}", self.settings.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Bytes, SpeechError> {
        let body = json!({
            "model": request.model,
            "input": request.text,
            "voice": request.voice,
            "response_format": self.settings.response_format,
        });

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", request.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let fault = ProviderFault::from_status(status.as_u16());
            let detail = error_detail(status.as_u16(), response.text().await.ok());
            return Err(SpeechError::new(FailureKind::Provider(fault), detail));
        }

        let mut audio = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = audio.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_audio_bytes {
                return Err(SpeechError::new(
                    FailureKind::Provider(ProviderFault::Server),
                    format!(
                        "audio response over {} bytes",
                        self.settings.max_audio_bytes
                    ),
                ));
            }
            audio.extend_from_slice(&chunk);
        }

        if audio.is_empty() {
            return Err(SpeechError::new(
                FailureKind::Provider(ProviderFault::Server),
                "provider returned no audio",
            ));
        }

        Ok(Bytes::from(audio))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> SpeechError {
    if err.is_timeout() {
        return SpeechError::new(FailureKind::Timeout, err.to_string());
    }
    SpeechError::new(FailureKind::Network, err.to_string())
}

/// Keeps a short slice of the provider's error body for the log line.
/// Anything user-facing goes through [`FailureKind::user_message`] instead.
fn error_detail(status: u16, body: Option<String>) -> String {
    match body {
        Some(text) if !text.trim().is_empty() => {
            let trimmed = text.trim();
            let snippet: String = trimmed.chars().take(200).collect();
            format!("status {status}: {snippet}")
        }
        _ => format!("status {status}"),
    }
}
