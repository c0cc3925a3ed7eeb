//! Audio subsystem
//!
//! Handles:
//! - Capture from the default input device
//! - Playback with barge-in cancellation
//! - Decoding of WAV/MP3 synthesizer output (tolerant of broken headers)
//! - Linear resampling to the pipeline rate
//! - WAV encoding for detector and transcriber uploads

mod capture;
mod decoder;
mod playback;
mod resample;
mod wav;

pub use capture::{AudioCapture, FrameSource, SAMPLE_RATE};
pub use decoder::{decode, decode_to_rate};
pub use playback::{PlaybackSink, Sink};
pub use resample::resample;
pub use wav::{samples_to_wav, write_wav_file};
