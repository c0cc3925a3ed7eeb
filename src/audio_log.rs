//! Optional on-disk logging of recordings, synthesized audio, and the
//! conversation transcript. Disabled by default.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::audio::write_wav_file;
use crate::Result;

/// Writes timestamped audio files and `conversation.log` under one directory
pub struct AudioLog {
    dir: PathBuf,
}

impl AudioLog {
    /// Create the log, ensuring the output directory exists
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Save a recorded utterance as `recording_<timestamp>.wav`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save_recording(&self, samples: &[f32], sample_rate: u32) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self.dir.join(format!("recording_{stamp}.wav"));
        write_wav_file(&path, samples, sample_rate)?;
        tracing::debug!(path = %path.display(), samples = samples.len(), "saved recording");
        Ok(path)
    }

    /// Save raw synthesizer output as `tts_<timestamp>.wav`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save_tts(&self, audio: &[u8]) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self.dir.join(format!("tts_{stamp}.wav"));
        std::fs::write(&path, audio)?;
        tracing::debug!(path = %path.display(), bytes = audio.len(), "saved synthesized audio");
        Ok(path)
    }

    /// Append one turn to `conversation.log`
    ///
    /// # Errors
    ///
    /// Returns error if the log file cannot be appended
    pub fn log_turn(
        &self,
        user: &str,
        assistant: &str,
        audio_file: Option<&Path>,
    ) -> Result<()> {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut entry = format!("[{stamp}] User: {user}\n[{stamp}] Assistant: {assistant}\n");
        if let Some(audio) = audio_file {
            entry.push_str(&format!("[{stamp}] Audio: {}\n", audio.display()));
        }
        entry.push_str("---\n");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join("conversation.log"))?;
        file.write_all(entry.as_bytes())?;

        Ok(())
    }
}
