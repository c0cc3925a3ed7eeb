//! Configuration for the duplex voice assistant

use std::path::PathBuf;
use std::time::Duration;

use crate::vad::DetectorProfile;
use crate::{Error, Result};

/// Default base URL of the speech detector
pub const DEFAULT_VAD_URL: &str = "http://localhost:8000";

/// Assembled assistant configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Credential for the transcription, chat, and synthesis endpoints
    pub openai_api_key: String,

    /// Base URL of the speech detector
    pub vad_server_url: String,

    /// Turn-taking tuning
    pub turn: TurnConfig,

    /// Detector tuning presets
    pub detector: DetectorConfig,

    /// Transcription settings
    pub asr: AsrConfig,

    /// Chat completion settings
    pub llm: LlmConfig,

    /// Speech synthesis settings
    pub tts: TtsConfig,

    /// Directory for recordings and the conversation log when audio
    /// logging is enabled
    pub audio_log_dir: Option<PathBuf>,
}

/// Turn-taking tuning
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Tick interval of the controller loop
    pub tick_interval: Duration,

    /// Silence duration that ends a recording
    pub min_silence_duration: Duration,

    /// Hard cap on a single recording
    pub max_recording_duration: Duration,

    /// Contiguous qualifying audio required to confirm a barge-in
    pub interrupt_min_duration: Duration,

    /// Whether playback can be interrupted at all
    pub allow_interrupt: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            min_silence_duration: Duration::from_millis(1000),
            max_recording_duration: Duration::from_secs(30),
            interrupt_min_duration: Duration::from_millis(200),
            allow_interrupt: true,
        }
    }
}

/// Detector tuning presets
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Profile used while listening for an utterance
    pub utterance: DetectorProfile,

    /// Stricter profile used during playback
    pub barge_in: DetectorProfile,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            utterance: DetectorProfile::utterance(),
            barge_in: DetectorProfile::barge_in(),
        }
    }
}

/// Transcription settings
#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub model: String,

    /// Optional ISO-639-1 language hint
    pub language: Option<String>,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            model: crate::asr::DEFAULT_MODEL.to_string(),
            language: None,
        }
    }
}

/// Chat completion settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub max_history_messages: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: crate::llm::DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 500,
            system_prompt: "You are a helpful voice assistant. Keep replies short, friendly, \
                            and conversational."
                .to_string(),
            max_history_messages: crate::history::DEFAULT_MAX_MESSAGES,
        }
    }
}

/// Speech synthesis settings
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub model: String,
    pub voice: String,
    pub speed: f64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
        }
    }
}

impl Config {
    /// Build a configuration from the environment.
    ///
    /// Recognizes `OPENAI_API_KEY` (required), `VAD_SERVER_URL`, and
    /// `DISABLE_INTERRUPT`.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or tuning is out of range
    pub fn from_env() -> Result<Self> {
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))?;

        let vad_server_url =
            std::env::var("VAD_SERVER_URL").unwrap_or_else(|_| DEFAULT_VAD_URL.to_string());

        let mut turn = TurnConfig::default();
        if std::env::var("DISABLE_INTERRUPT").as_deref() == Ok("true") {
            turn.allow_interrupt = false;
        }

        let config = Self {
            openai_api_key,
            vad_server_url,
            turn,
            detector: DetectorConfig::default(),
            asr: AsrConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
            audio_log_dir: None,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate tuning ranges
    ///
    /// # Errors
    ///
    /// Returns error on out-of-range detector or turn tuning
    pub fn validate(&self) -> Result<()> {
        self.detector.utterance.validate()?;
        self.detector.barge_in.validate()?;

        if self.turn.min_silence_duration.is_zero()
            || self.turn.max_recording_duration.is_zero()
            || self.turn.interrupt_min_duration.is_zero()
            || self.turn.tick_interval.is_zero()
        {
            return Err(Error::Config(
                "turn durations must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
