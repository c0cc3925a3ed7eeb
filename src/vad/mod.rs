//! Speech detection adapter
//!
//! Talks to the external VAD server over HTTP. Each check encodes the frame
//! as a small in-memory WAV and posts it to `/detect`; presence of at least
//! one speech segment means speech. Transport failures surface as
//! [`Error::DetectorUnavailable`], which the controller treats as "no
//! speech" for that frame.

use async_trait::async_trait;
use serde::Deserialize;

use crate::audio::samples_to_wav;
use crate::{Error, Result};

/// Tuning preset handed to the detector per request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorProfile {
    /// Detection threshold in (0, 1]
    pub threshold: f64,
    /// Minimum speech duration for a segment to count
    pub min_speech_ms: u32,
    /// Minimum silence duration separating segments
    pub min_silence_ms: u32,
}

impl DetectorProfile {
    /// Preset used while listening for an utterance
    #[must_use]
    pub const fn utterance() -> Self {
        Self {
            threshold: 0.5,
            min_speech_ms: 500,
            min_silence_ms: 1000,
        }
    }

    /// Stricter preset used during playback to confirm a barge-in
    #[must_use]
    pub const fn barge_in() -> Self {
        Self {
            threshold: 0.7,
            min_speech_ms: 200,
            min_silence_ms: 1000,
        }
    }

    /// Validate tuning ranges
    ///
    /// # Errors
    ///
    /// Returns error if the threshold is outside (0, 1] or a duration is zero
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(Error::Config(format!(
                "detector threshold {} outside (0, 1]",
                self.threshold
            )));
        }
        if self.min_speech_ms == 0 || self.min_silence_ms == 0 {
            return Err(Error::Config(
                "detector durations must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// One detected speech segment
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechSegment {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

/// Statistics reported alongside a detection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetectStatistics {
    pub total_segments: u32,
    pub total_speech_duration: f64,
    pub total_audio_duration: f64,
    pub speech_ratio: f64,
    pub sample_rate: u32,
    pub threshold_used: f64,
}

/// Response from `/detect`
#[derive(Debug, Deserialize)]
pub struct DetectResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub speech_segments: Vec<SpeechSegment>,
    #[serde(default)]
    pub statistics: DetectStatistics,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Response from `/info`
#[derive(Debug, Deserialize)]
pub struct InfoResponse {
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub window_size_ms: u32,
}

/// Classifies PCM buffers as speech or not under a profile
#[async_trait]
pub trait SpeechDetect: Send + Sync {
    /// True iff the buffer contains qualifying speech under `profile`
    async fn has_speech(
        &self,
        samples: &[f32],
        sample_rate: u32,
        profile: &DetectorProfile,
    ) -> Result<bool>;

    /// Verify the detector is reachable and healthy
    async fn health(&self) -> Result<()>;
}

/// HTTP client for the VAD server
pub struct VadClient {
    client: reqwest::Client,
    base_url: String,
}

impl VadClient {
    /// Create a new VAD client
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }

    /// Full detection call with segments and statistics
    ///
    /// # Errors
    ///
    /// Returns [`Error::DetectorUnavailable`] on transport failure and
    /// [`Error::DetectorProtocol`] on a malformed or unsuccessful response
    pub async fn detect(
        &self,
        samples: &[f32],
        sample_rate: u32,
        profile: &DetectorProfile,
    ) -> Result<DetectResponse> {
        let wav = samples_to_wav(samples, sample_rate)?;

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::DetectorProtocol(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .part("audio_file", part)
            .text("threshold", format!("{:.2}", profile.threshold))
            .text("min_speech_duration_ms", profile.min_speech_ms.to_string())
            .text("min_silence_duration_ms", profile.min_silence_ms.to_string());

        let response = self
            .client
            .post(format!("{}/detect", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::DetectorUnavailable(e.to_string()))?;

        let status = response.status();
        let detect: DetectResponse = response
            .json()
            .await
            .map_err(|e| Error::DetectorProtocol(format!("malformed detect response: {e}")))?;

        if !status.is_success() {
            return Err(Error::DetectorProtocol(format!(
                "detection failed with status {status}: {}",
                detect.message.unwrap_or_default()
            )));
        }

        if detect.status != "success" {
            return Err(Error::DetectorProtocol(format!(
                "detection unsuccessful: {}",
                detect.message.clone().unwrap_or_default()
            )));
        }

        Ok(detect)
    }

    /// Fetch detector model metadata (informational)
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed
    pub async fn info(&self) -> Result<InfoResponse> {
        let response = self
            .client
            .get(format!("{}/info", self.base_url))
            .send()
            .await
            .map_err(|e| Error::DetectorUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::DetectorProtocol(format!(
                "info request failed with status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::DetectorProtocol(format!("malformed info response: {e}")))
    }
}

#[async_trait]
impl SpeechDetect for VadClient {
    async fn has_speech(
        &self,
        samples: &[f32],
        sample_rate: u32,
        profile: &DetectorProfile,
    ) -> Result<bool> {
        let detect = self.detect(samples, sample_rate, profile).await?;
        Ok(!detect.speech_segments.is_empty())
    }

    async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| Error::DetectorUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::DetectorUnavailable(format!(
                "health check failed with status {}",
                response.status()
            )));
        }

        let health: HealthResponse = response
            .json()
            .await
            .map_err(|e| Error::DetectorProtocol(format!("malformed health response: {e}")))?;

        if health.status != "healthy" {
            return Err(Error::DetectorUnavailable(format!(
                "detector reports status {:?} at {}",
                health.status,
                health.timestamp.unwrap_or_default()
            )));
        }

        Ok(())
    }
}
