//! Speech synthesis adapter
//!
//! Posts assistant text to the OpenAI speech endpoint and returns the raw
//! encoded audio bytes. An optional in-memory cache short-circuits repeated
//! synthesis of the same text (the apology utterances hit it constantly).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Available synthesis models
pub const MODELS: [&str; 2] = ["tts-1", "tts-1-hd"];

/// Available voices
pub const VOICES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// Maximum input length in characters
pub const MAX_TEXT_CHARS: usize = 4096;

/// Speed bounds; out-of-range values are clamped, not rejected
pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 4.0;

/// Requested audio container for the synthesized speech
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Opus,
    Aac,
    Flac,
    Wav,
    Pcm,
}

impl AudioFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Flac => "flac",
            Self::Wav => "wav",
            Self::Pcm => "pcm",
        }
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    speed: f64,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Synthesizes text into encoded audio bytes
#[async_trait]
pub trait Synthesize: Send + Sync {
    /// Synthesize `text` in the requested container format.
    ///
    /// Returns [`Error::Cancelled`] promptly when `cancel` fires.
    async fn synthesize(
        &self,
        text: &str,
        format: AudioFormat,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>>;
}

/// Speech synthesis client
pub struct TtsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    speed: f64,
    cache: Option<Mutex<HashMap<String, Vec<u8>>>>,
}

impl TtsClient {
    /// Create a new synthesis client; `speed` is clamped into [0.25, 4.0].
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty or the model/voice is unknown
    pub fn new(api_key: String, model: String, voice: String, speed: f64) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for synthesis".to_string(),
            ));
        }
        if !MODELS.contains(&model.as_str()) {
            return Err(Error::Config(format!("unsupported TTS model: {model}")));
        }
        if !VOICES.contains(&voice.as_str()) {
            return Err(Error::Config(format!("unsupported TTS voice: {voice}")));
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .map_err(|e| Error::Synthesizer(e.to_string()))?,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key,
            model,
            voice,
            speed: speed.clamp(MIN_SPEED, MAX_SPEED),
            cache: None,
        })
    }

    /// Enable the in-memory response cache
    #[must_use]
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(Mutex::new(HashMap::new()));
        self
    }

    /// Cache key; speed is formatted to two decimals for determinism
    fn cache_key(&self, text: &str) -> String {
        format!("{}|{}|{:.2}|{}", self.model, self.voice, self.speed, text)
    }

    fn cache_get(&self, key: &str) -> Option<Vec<u8>> {
        let cache = self.cache.as_ref()?;
        cache.lock().ok()?.get(key).cloned()
    }

    fn cache_put(&self, key: String, audio: &[u8]) {
        if let Some(cache) = &self.cache {
            if let Ok(mut cache) = cache.lock() {
                cache.insert(key, audio.to_vec());
            }
        }
    }

    async fn request(&self, text: &str, format: AudioFormat) -> Result<Vec<u8>> {
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: format.as_str(),
            speed: self.speed,
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Synthesizer(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorResponse>(&body)
                .map_or(body, |e| e.error.message);
            return Err(Error::Synthesizer(format!(
                "speech API error {status}: {detail}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesizer(e.to_string()))?;

        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesize for TtsClient {
    async fn synthesize(
        &self,
        text: &str,
        format: AudioFormat,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        if text.is_empty() {
            return Err(Error::Synthesizer("text cannot be empty".to_string()));
        }
        let chars = text.chars().count();
        if chars > MAX_TEXT_CHARS {
            return Err(Error::Synthesizer(format!(
                "text too long: {chars} characters (max {MAX_TEXT_CHARS})"
            )));
        }

        let key = self.cache_key(text);
        if let Some(audio) = self.cache_get(&key) {
            tracing::debug!(bytes = audio.len(), "synthesis cache hit");
            return Ok(audio);
        }

        tracing::debug!(chars, model = %self.model, voice = %self.voice, "requesting synthesis");

        let audio = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.request(text, format) => result?,
        };

        self.cache_put(key, &audio);
        Ok(audio)
    }
}
