//! Duplex - full-duplex conversational voice assistant
//!
//! Continuously listens to the microphone, detects speech, transcribes it,
//! obtains a reply from a chat model, synthesizes the reply, and plays it -
//! while watching the microphone for a barge-in that cancels playback and
//! opens a new listening turn.
//!
//! # Architecture
//!
//! ```text
//! Capture ──▶ Turn Controller ──▶ Detector (utterance profile)
//!                  │                        │
//!                  │    Utterance Buffer ◀──┘
//!                  ▼
//!            Transcriber ──▶ Dialogue Memory ◀──▶ Responder
//!                  │                                  │
//!                  ▼                                  ▼
//!            Playback Sink ◀── Decoder/Resampler ◀── Synthesizer
//!                  ▲
//!   Detector (barge-in profile) ── cancels playback scope
//! ```

pub mod asr;
pub mod audio;
pub mod audio_log;
pub mod config;
pub mod controller;
pub mod error;
pub mod history;
pub mod llm;
pub mod state;
pub mod tts;
pub mod vad;

pub use config::Config;
pub use controller::TurnController;
pub use error::{Error, Result};
pub use history::ConversationHistory;
pub use llm::{Message, Role};
pub use state::{StateCell, TurnState};
