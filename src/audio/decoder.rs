//! Decoding of synthesized audio into playback samples
//!
//! Accepts WAV and MP3 byte streams and produces mono f32 PCM. The WAV path
//! tolerates the broken headers observed in TTS responses, where the RIFF
//! and `data` size fields are `0xFFFFFFFF`: declared sizes are advisory and
//! the on-disk payload bounds win.

use crate::audio::resample::resample;
use crate::{Error, Result};

/// Detected container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Wav,
    Mp3,
    Unknown,
}

/// Decode an encoded audio byte stream into mono f32 samples.
///
/// Returns the samples and their source sample rate. Every output sample is
/// clamped to [-1.0, 1.0].
///
/// # Errors
///
/// Returns error if the payload matches no decodable container or carries
/// an unsupported encoding.
pub fn decode(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    match detect_format(data) {
        Format::Wav => decode_wav(data),
        Format::Mp3 => decode_mp3(data),
        Format::Unknown => decode_wav(data).or_else(|_| decode_mp3(data)),
    }
}

/// Decode and resample to `target_rate` in one step
///
/// # Errors
///
/// Returns error if decoding or resampling fails
pub fn decode_to_rate(data: &[u8], target_rate: u32) -> Result<Vec<f32>> {
    let (samples, source_rate) = decode(data)?;
    tracing::debug!(
        samples = samples.len(),
        source_rate,
        target_rate,
        "decoded audio"
    );
    resample(&samples, source_rate, target_rate)
}

fn detect_format(data: &[u8]) -> Format {
    if data.len() >= 4 && &data[0..4] == b"RIFF" {
        return Format::Wav;
    }

    if data.len() >= 3 {
        if &data[0..3] == b"ID3" {
            return Format::Mp3;
        }
        // MPEG frame sync: eleven set bits
        if data[0] == 0xFF && (data[1] & 0xE0) == 0xE0 {
            return Format::Mp3;
        }
    }

    Format::Unknown
}

struct FmtChunk {
    audio_format: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Robust WAV parse: walk chunks, treat declared sizes as advisory,
/// truncate cleanly at EOF.
fn decode_wav(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    if data.len() < 12 {
        return Err(Error::Decoder("payload too small for a WAV header".to_string()));
    }

    if &data[0..4] != b"RIFF" {
        return Err(Error::Decoder("missing RIFF tag".to_string()));
    }
    if &data[8..12] != b"WAVE" {
        return Err(Error::Decoder("missing WAVE tag".to_string()));
    }

    let mut fmt: Option<FmtChunk> = None;
    let mut data_chunk: Option<(usize, u32)> = None;
    let mut pos = 12usize;

    while pos + 8 <= data.len() {
        let id = &data[pos..pos + 4];
        let declared = read_u32(data, pos + 4);
        pos += 8;

        match id {
            b"fmt " => {
                if declared < 16 || pos + 16 > data.len() {
                    return Err(Error::Decoder(format!("fmt chunk too small: {declared} bytes")));
                }
                fmt = Some(FmtChunk {
                    audio_format: read_u16(data, pos),
                    channels: read_u16(data, pos + 2),
                    sample_rate: read_u32(data, pos + 4),
                    bits_per_sample: read_u16(data, pos + 14),
                });
                pos = pos.saturating_add(declared as usize);
            }
            b"data" => {
                data_chunk = Some((pos, declared));
                pos = pos.saturating_add(declared as usize);
            }
            _ => {
                pos = pos.saturating_add(declared as usize);
            }
        }
    }

    let fmt = fmt.ok_or_else(|| Error::Decoder("fmt chunk not found".to_string()))?;
    let (data_offset, declared_size) =
        data_chunk.ok_or_else(|| Error::Decoder("data chunk not found".to_string()))?;

    if fmt.audio_format != 1 {
        return Err(Error::UnsupportedEncoding(format!(
            "WAV audio format {} (only PCM is supported)",
            fmt.audio_format
        )));
    }
    if fmt.bits_per_sample != 16 {
        return Err(Error::UnsupportedEncoding(format!(
            "{}-bit WAV (only 16-bit is supported)",
            fmt.bits_per_sample
        )));
    }
    if fmt.sample_rate == 0 {
        return Err(Error::Decoder("fmt chunk declares zero sample rate".to_string()));
    }

    // The declared data size is advisory; the payload bounds win.
    let available = data.len() - data_offset;
    let effective = (declared_size as usize).min(available);
    if effective != declared_size as usize {
        tracing::warn!(
            declared = declared_size,
            effective,
            "data chunk size exceeds payload bounds, truncating"
        );
    }

    // Truncate a trailing partial sample instead of erroring.
    let num_samples = effective / 2;
    let channels = fmt.channels.max(1) as usize;
    let bytes = &data[data_offset..data_offset + num_samples * 2];

    let mut samples = Vec::with_capacity(num_samples / channels);
    if channels == 1 {
        for chunk in bytes.chunks_exact(2) {
            samples.push(i16_to_f32(i16::from_le_bytes([chunk[0], chunk[1]])));
        }
    } else {
        // Downmix by arithmetic mean across channels.
        for frame in bytes.chunks_exact(2 * channels) {
            let mut sum = 0.0f32;
            for ch in frame.chunks_exact(2) {
                sum += i16_to_f32(i16::from_le_bytes([ch[0], ch[1]]));
            }
            samples.push((sum / channels as f32).clamp(-1.0, 1.0));
        }
    }

    if samples.is_empty() {
        return Err(Error::Decoder("no audio samples found".to_string()));
    }

    Ok((samples, fmt.sample_rate))
}

/// Decode the full MP3 stream; stereo is downmixed by arithmetic mean
fn decode_mp3(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(std::io::Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = frame.sample_rate as u32;
                }

                if frame.channels == 2 {
                    for pair in frame.data.chunks(2) {
                        let left = i16_to_f32(pair[0]);
                        let right = i16_to_f32(pair.get(1).copied().unwrap_or(pair[0]));
                        samples.push(((left + right) / 2.0).clamp(-1.0, 1.0));
                    }
                } else {
                    samples.extend(frame.data.iter().map(|&s| i16_to_f32(s)));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Decoder(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::Decoder("MP3 stream contained no frames".to_string()));
    }

    Ok((samples, sample_rate))
}

fn i16_to_f32(sample: i16) -> f32 {
    (f32::from(sample) / 32768.0).clamp(-1.0, 1.0)
}
