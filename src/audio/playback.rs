//! Audio playback to the default output device
//!
//! The device callback reads a cursor into the current sample slice and
//! emits zeros outside a play. Cancellation is observed through an atomic
//! stop flag checked before the sample lock, so a barge-in silences the
//! device within one callback without contending on the mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio_util::sync::CancellationToken;

use crate::audio::capture::SAMPLE_RATE;
use crate::{Error, Result};

/// Poll interval while waiting for the device to drain
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Consumes decoded samples and plays them on the output device
#[async_trait]
pub trait Sink: Send + Sync {
    /// Play `samples`, returning when they have drained or `cancel` fired.
    ///
    /// A cancel observed before or during the play silences the device
    /// within one callback and resolves to [`Error::Cancelled`].
    async fn play(&self, cancel: &CancellationToken, samples: Vec<f32>) -> Result<()>;

    /// Idempotent, non-blocking request to stop the current play
    fn stop(&self);

    /// True while a play call is draining samples
    fn is_playing(&self) -> bool;
}

struct Cursor {
    samples: Vec<f32>,
    position: usize,
}

struct Shared {
    cursor: Mutex<Cursor>,
    interrupted: AtomicBool,
    finished: AtomicBool,
    playing: AtomicBool,
}

/// Plays f32 samples at 16 kHz on the default output device
pub struct PlaybackSink {
    config: StreamConfig,
    shared: Arc<Shared>,
}

impl PlaybackSink {
    /// Create a new playback sink
    ///
    /// # Errors
    ///
    /// Returns error if no output device supports 16 kHz playback
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: duplicate the mono signal across a stereo device
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Device("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            config,
            shared: Arc::new(Shared {
                cursor: Mutex::new(Cursor {
                    samples: Vec::new(),
                    position: 0,
                }),
                interrupted: AtomicBool::new(false),
                finished: AtomicBool::new(true),
                playing: AtomicBool::new(false),
            }),
        })
    }

    /// Build the output stream and block until drained or cancelled.
    ///
    /// cpal streams are not Send, so the stream lives entirely inside the
    /// blocking worker that created it.
    fn drain_blocking(
        config: StreamConfig,
        shared: Arc<Shared>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let channels = config.channels as usize;
        let callback_shared = Arc::clone(&shared);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if callback_shared.interrupted.load(Ordering::Acquire) {
                        data.fill(0.0);
                        callback_shared.finished.store(true, Ordering::Release);
                        return;
                    }

                    let Ok(mut cursor) = callback_shared.cursor.lock() else {
                        data.fill(0.0);
                        return;
                    };

                    for frame in data.chunks_mut(channels) {
                        let sample = if cursor.position < cursor.samples.len() {
                            let s = cursor.samples[cursor.position];
                            cursor.position += 1;
                            s
                        } else {
                            callback_shared.finished.store(true, Ordering::Release);
                            0.0
                        };
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        loop {
            if cancel.is_cancelled() || shared.interrupted.load(Ordering::Acquire) {
                shared.interrupted.store(true, Ordering::Release);
                // One more callback period so the device emits silence
                // before the stream is torn down.
                std::thread::sleep(DRAIN_POLL);
                return Err(Error::Cancelled);
            }
            if shared.finished.load(Ordering::Acquire) {
                // The flag flips while the last buffer is still on the
                // device; give it one more period to drain.
                std::thread::sleep(DRAIN_POLL);
                return Ok(());
            }
            std::thread::sleep(DRAIN_POLL);
        }
    }
}

#[async_trait]
impl Sink for PlaybackSink {
    async fn play(&self, cancel: &CancellationToken, samples: Vec<f32>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        {
            let mut cursor = self
                .shared
                .cursor
                .lock()
                .map_err(|_| Error::Device("playback cursor lock poisoned".to_string()))?;
            cursor.samples = samples;
            cursor.position = 0;
        }
        self.shared.interrupted.store(false, Ordering::Release);
        self.shared.finished.store(false, Ordering::Release);
        self.shared.playing.store(true, Ordering::Release);

        // A cancel issued before the play began still applies.
        if cancel.is_cancelled() {
            self.shared.playing.store(false, Ordering::Release);
            self.shared.finished.store(true, Ordering::Release);
            return Err(Error::Cancelled);
        }

        let config = self.config.clone();
        let shared = Arc::clone(&self.shared);
        let cancel = cancel.clone();

        let result = tokio::task::spawn_blocking(move || {
            Self::drain_blocking(config, shared, cancel)
        })
        .await
        .map_err(|e| Error::Device(format!("playback worker failed: {e}")))?;

        self.shared.playing.store(false, Ordering::Release);
        result
    }

    fn stop(&self) {
        self.shared.interrupted.store(true, Ordering::Release);
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
            && !self.shared.finished.load(Ordering::Acquire)
            && !self.shared.interrupted.load(Ordering::Acquire)
    }
}
