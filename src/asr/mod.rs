//! Transcription adapter
//!
//! Uploads a recorded utterance as a PCM-16 WAV to the OpenAI
//! transcription endpoint. An empty transcription is a valid result, not
//! an error; the controller skips the turn.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::audio::samples_to_wav;
use crate::{Error, Result};

/// Default transcription model
pub const DEFAULT_MODEL: &str = "whisper-1";

/// Upstream upload limit after WAV encoding
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Deserialize)]
struct TranscribeResponse {
    text: String,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Turns a PCM buffer into text
#[async_trait]
pub trait Transcribe: Send + Sync {
    /// Transcribe `samples` recorded at `sample_rate`.
    ///
    /// Returns [`Error::Cancelled`] promptly when `cancel` fires.
    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// Transcription client
pub struct AsrClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    language: Option<String>,
}

impl AsrClient {
    /// Create a new transcription client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: String, model: String, language: Option<String>) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for transcription".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .map_err(|e| Error::Transcriber(e.to_string()))?,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key,
            model,
            language,
        })
    }

    async fn request(&self, wav: Vec<u8>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Transcriber(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "json");

        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Transcriber(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorResponse>(&body)
                .map_or(body, |e| e.error.message);
            return Err(Error::Transcriber(format!(
                "transcription API error {status}: {detail}"
            )));
        }

        let result: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| Error::Transcriber(format!("failed to parse transcription: {e}")))?;

        Ok(result.text)
    }
}

#[async_trait]
impl Transcribe for AsrClient {
    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let wav = samples_to_wav(samples, sample_rate)?;
        if wav.len() > MAX_UPLOAD_BYTES {
            return Err(Error::PayloadTooLarge {
                size: wav.len(),
                limit: MAX_UPLOAD_BYTES,
            });
        }

        tracing::debug!(bytes = wav.len(), model = %self.model, "uploading audio for transcription");

        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = self.request(wav) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_rejected() {
        let err = AsrClient::new(String::new(), DEFAULT_MODEL.to_string(), None);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_the_network() {
        let client = AsrClient::new("key".to_string(), DEFAULT_MODEL.to_string(), None).unwrap();
        // 13M samples encode to ~26 MiB of PCM-16, over the 25 MiB limit.
        let samples = vec![0.0f32; 13_200_000];
        let cancel = CancellationToken::new();

        let err = client.transcribe(&samples, 16000, &cancel).await;
        assert!(matches!(err, Err(Error::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let client = AsrClient::new("key".to_string(), DEFAULT_MODEL.to_string(), None).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.transcribe(&[0.0; 160], 16000, &cancel).await;
        assert!(matches!(err, Err(Error::Cancelled)));
    }
}
