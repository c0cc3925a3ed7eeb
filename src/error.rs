//! Error types for the duplex voice assistant

use thiserror::Error;

/// Result type alias for duplex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, out-of-range tuning)
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture or playback device cannot be opened or driven
    #[error("audio device error: {0}")]
    Device(String),

    /// Speech detector transport failure
    #[error("speech detector unavailable: {0}")]
    DetectorUnavailable(String),

    /// Speech detector returned a malformed or unsuccessful response
    #[error("speech detector protocol error: {0}")]
    DetectorProtocol(String),

    /// Transcription failure (remote error or parse failure)
    #[error("transcription error: {0}")]
    Transcriber(String),

    /// Chat completion failure
    #[error("chat completion error: {0}")]
    Responder(String),

    /// Speech synthesis failure
    #[error("speech synthesis error: {0}")]
    Synthesizer(String),

    /// Upload exceeds the upstream size limit
    #[error("payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Audio container malformed beyond tolerances
    #[error("audio decode error: {0}")]
    Decoder(String),

    /// Container is valid but carries an encoding we do not decode
    #[error("unsupported audio encoding: {0}")]
    UnsupportedEncoding(String),

    /// Scope cancellation; never surfaced as a user-visible failure
    #[error("operation cancelled")]
    Cancelled,

    /// Unrecoverable error that initiates clean shutdown
    #[error("fatal: {0}")]
    Fatal(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV encoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

impl Error {
    /// True for scope cancellation, which is silent: no apology speech,
    /// no warn-level log line.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
