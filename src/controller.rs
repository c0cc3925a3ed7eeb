//! Turn controller
//!
//! Single state machine coordinating capture, speech detection, utterance
//! segmentation, transcription, chat, synthesis, and playback, plus the
//! barge-in watcher that cancels an in-progress utterance.
//!
//! The tick loop owns every turn field. The processing/speaking work for a
//! committed utterance runs on a spawned task so the loop stays responsive
//! to barge-in; that task communicates back only through the shared
//! [`StateCell`], the dialogue history, and its playback cancellation
//! token.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::asr::Transcribe;
use crate::audio::{decode_to_rate, FrameSource, Sink, SAMPLE_RATE};
use crate::audio_log::AudioLog;
use crate::config::Config;
use crate::history::ConversationHistory;
use crate::llm::{Respond, Role};
use crate::state::{StateCell, TurnState};
use crate::tts::{AudioFormat, Synthesize};
use crate::vad::SpeechDetect;
use crate::{Error, Result};

/// Spoken when transcription fails
const APOLOGY_TRANSCRIBE: &str = "Sorry, I couldn't make that out.";
/// Spoken when the chat completion fails
const APOLOGY_REPLY: &str = "Sorry, I can't answer right now.";
/// Spoken when synthesis or playback of the real reply fails
const APOLOGY_SYNTHESIZE: &str = "Sorry, something went wrong on my end.";

/// Consecutive detector failures before escalating to a health warning
const DETECTOR_FAILURE_WINDOW: u32 = 100;

struct ActiveTurn {
    handle: JoinHandle<()>,
    playback: CancellationToken,
}

/// The turn-taking state machine
pub struct TurnController<F, D, T, R, S, P> {
    config: Config,
    frames: F,
    detector: D,
    transcriber: Arc<T>,
    responder: Arc<R>,
    synthesizer: Arc<S>,
    sink: Arc<P>,
    state: StateCell,
    history: Arc<Mutex<ConversationHistory>>,
    audio_log: Option<Arc<AudioLog>>,

    // Turn fields, owned by the tick loop
    utterance: Vec<f32>,
    recording_start: Option<Instant>,
    silence_start: Option<Instant>,
    probation_start: Option<Instant>,
    turn: Option<ActiveTurn>,
    detector_failures: u32,
    turn_seq: u64,
}

impl<F, D, T, R, S, P> TurnController<F, D, T, R, S, P>
where
    F: FrameSource,
    D: SpeechDetect,
    T: Transcribe + 'static,
    R: Respond + 'static,
    S: Synthesize + 'static,
    P: Sink + 'static,
{
    /// Create a controller over the given collaborators
    ///
    /// # Errors
    ///
    /// Returns error on invalid tuning or an unwritable audio log directory
    pub fn new(
        config: Config,
        frames: F,
        detector: D,
        transcriber: T,
        responder: R,
        synthesizer: S,
        sink: P,
    ) -> Result<Self> {
        config.validate()?;

        let audio_log = config
            .audio_log_dir
            .as_ref()
            .map(|dir| AudioLog::new(dir.clone()))
            .transpose()?
            .map(Arc::new);

        let history = ConversationHistory::new(
            config.llm.system_prompt.clone(),
            config.llm.max_history_messages,
        );

        Ok(Self {
            config,
            frames,
            detector,
            transcriber: Arc::new(transcriber),
            responder: Arc::new(responder),
            synthesizer: Arc::new(synthesizer),
            sink: Arc::new(sink),
            state: StateCell::new(),
            history: Arc::new(Mutex::new(history)),
            audio_log,
            utterance: Vec::new(),
            recording_start: None,
            silence_start: None,
            probation_start: None,
            turn: None,
            detector_failures: 0,
            turn_seq: 0,
        })
    }

    /// Shared state cell (for observation)
    #[must_use]
    pub fn state(&self) -> StateCell {
        self.state.clone()
    }

    /// Shared dialogue history
    #[must_use]
    pub fn history(&self) -> Arc<Mutex<ConversationHistory>> {
        Arc::clone(&self.history)
    }

    /// Run the controller until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] if the detector health check fails at start
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.detector.health().await.map_err(|e| {
            Error::Fatal(format!("speech detector health check failed: {e}"))
        })?;

        tracing::info!(
            interrupt = self.config.turn.allow_interrupt,
            "assistant ready, start talking"
        );

        let mut ticker = interval(self.config.turn.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One 50 ms tick: reap the finished turn, pull a frame, dispatch on
    /// the current state.
    async fn tick(&mut self) {
        if self.turn.as_ref().is_some_and(|t| t.handle.is_finished()) {
            self.turn = None;
        }

        let frame = match self.frames.read() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "audio capture read failed, retrying next tick");
                return;
            }
        };

        match self.state.get() {
            TurnState::Idle | TurnState::Listening => self.watch_for_utterance(frame).await,
            // No new audio is consumed while the reply is prepared
            TurnState::Processing => {}
            TurnState::Speaking => self.watch_for_barge_in(frame).await,
        }
    }

    async fn watch_for_utterance(&mut self, frame: Vec<f32>) {
        let voiced = if frame.is_empty() {
            false
        } else {
            self.detect(&frame, self.config.detector.utterance).await
        };
        let now = Instant::now();

        if voiced {
            let start = if let Some(start) = self.recording_start {
                start
            } else {
                self.utterance.clear();
                self.recording_start = Some(now);
                self.state.set(TurnState::Listening);
                tracing::info!("recording started");
                now
            };
            self.silence_start = None;

            // The cap check precedes the append so the transcribed buffer
            // never exceeds the configured duration.
            if now.duration_since(start) >= self.config.turn.max_recording_duration {
                tracing::info!("max recording duration reached, ending recording");
                self.finish_recording();
                return;
            }
            self.utterance.extend_from_slice(&frame);
        } else if let Some(start) = self.recording_start {
            // Max-duration wins over the silence timer on the same tick.
            if now.duration_since(start) >= self.config.turn.max_recording_duration {
                tracing::info!("max recording duration reached, ending recording");
                self.finish_recording();
                return;
            }

            self.utterance.extend_from_slice(&frame);
            let silence_start = *self.silence_start.get_or_insert(now);
            if now.duration_since(silence_start) >= self.config.turn.min_silence_duration {
                tracing::info!("silence detected, ending recording");
                self.finish_recording();
            }
        }
    }

    async fn watch_for_barge_in(&mut self, frame: Vec<f32>) {
        if !self.config.turn.allow_interrupt || frame.is_empty() {
            return;
        }

        let qualifying = self.detect(&frame, self.config.detector.barge_in).await;

        // Playback may have drained while the detector call was in flight;
        // a natural end wins over a same-tick confirmation.
        if self.state.get() != TurnState::Speaking {
            self.probation_start = None;
            return;
        }

        let now = Instant::now();
        if qualifying {
            let started = if let Some(started) = self.probation_start {
                started
            } else {
                tracing::debug!("possible barge-in, starting probation");
                self.probation_start = Some(now);
                now
            };

            if now.duration_since(started) >= self.config.turn.interrupt_min_duration {
                self.confirm_barge_in();
            }
        } else if self.probation_start.take().is_some() {
            // Hysteresis: one sub-threshold frame cancels the probation.
            tracing::debug!("barge-in probation cancelled");
        }
    }

    async fn detect(&mut self, frame: &[f32], profile: crate::vad::DetectorProfile) -> bool {
        match self
            .detector
            .has_speech(frame, SAMPLE_RATE, &profile)
            .await
        {
            Ok(voiced) => {
                self.detector_failures = 0;
                voiced
            }
            Err(e) => {
                // A detector outage is "no speech" for this frame.
                self.detector_failures += 1;
                if self.detector_failures % DETECTOR_FAILURE_WINDOW == 0 {
                    tracing::warn!(
                        consecutive = self.detector_failures,
                        error = %e,
                        "speech detector failing repeatedly"
                    );
                } else {
                    tracing::debug!(error = %e, "speech detection failed");
                }
                false
            }
        }
    }

    /// Commit the utterance buffer and hand it to a background turn task
    fn finish_recording(&mut self) {
        let samples = std::mem::take(&mut self.utterance);
        self.recording_start = None;
        self.silence_start = None;
        self.probation_start = None;

        if samples.is_empty() {
            tracing::debug!("empty utterance buffer, skipping turn");
            self.state.set(TurnState::Idle);
            return;
        }

        self.state.set(TurnState::Processing);
        self.turn_seq += 1;

        let playback = CancellationToken::new();
        let ctx = TurnContext {
            turn: self.turn_seq,
            state: self.state.clone(),
            history: Arc::clone(&self.history),
            transcriber: Arc::clone(&self.transcriber),
            responder: Arc::clone(&self.responder),
            synthesizer: Arc::clone(&self.synthesizer),
            sink: Arc::clone(&self.sink),
            audio_log: self.audio_log.clone(),
            cancel: playback.clone(),
        };

        let handle = tokio::spawn(run_turn(ctx, samples));
        self.turn = Some(ActiveTurn { handle, playback });
    }

    fn confirm_barge_in(&mut self) {
        tracing::info!("barge-in confirmed, stopping playback");

        if let Some(turn) = &self.turn {
            turn.playback.cancel();
        }
        self.sink.stop();

        // The barge-in frames themselves are discarded; a fresh Listening
        // begins on the next voiced frame.
        self.probation_start = None;
        self.state.set(TurnState::Idle);
    }

    async fn shutdown(&mut self) {
        if let Some(turn) = self.turn.take() {
            turn.playback.cancel();
            self.sink.stop();
            let _ = turn.handle.await;
        }
        self.frames.close();
        self.state.set(TurnState::Idle);
        tracing::info!("controller stopped");
    }
}

/// Everything a background turn task needs, cloned out of the controller
struct TurnContext<T, R, S, P> {
    turn: u64,
    state: StateCell,
    history: Arc<Mutex<ConversationHistory>>,
    transcriber: Arc<T>,
    responder: Arc<R>,
    synthesizer: Arc<S>,
    sink: Arc<P>,
    audio_log: Option<Arc<AudioLog>>,
    cancel: CancellationToken,
}

/// Transcribe the utterance, obtain and store the reply, speak it.
///
/// Runs detached from the tick loop. Cancellation (barge-in or shutdown)
/// exits silently; the watcher that cancelled already owns the state.
async fn run_turn<T, R, S, P>(ctx: TurnContext<T, R, S, P>, samples: Vec<f32>)
where
    T: Transcribe,
    R: Respond,
    S: Synthesize,
    P: Sink,
{
    let turn = ctx.turn;
    tracing::debug!(turn, samples = samples.len(), "processing utterance");

    let recording_path = ctx.audio_log.as_ref().and_then(|log| {
        log.save_recording(&samples, SAMPLE_RATE)
            .map_err(|e| tracing::warn!(error = %e, "failed to save recording"))
            .ok()
    });

    let text = match ctx
        .transcriber
        .transcribe(&samples, SAMPLE_RATE, &ctx.cancel)
        .await
    {
        Ok(text) => text,
        Err(e) if e.is_cancelled() => return,
        Err(e) => {
            tracing::warn!(turn, error = %e, "transcription failed");
            speak(&ctx, APOLOGY_TRANSCRIBE).await;
            return;
        }
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        tracing::debug!(turn, "empty transcription, skipping turn");
        ctx.state.compare_swap(TurnState::Processing, TurnState::Idle);
        return;
    }
    tracing::info!(turn, user = %text, "transcribed");

    // The snapshot the responder sees includes this turn's user message
    // and nothing later.
    let snapshot = {
        let Ok(mut history) = ctx.history.lock() else {
            tracing::error!(turn, "history lock poisoned, dropping turn");
            ctx.state.compare_swap(TurnState::Processing, TurnState::Idle);
            return;
        };
        history.append(Role::User, text.clone());
        history.snapshot()
    };

    let reply = match ctx.responder.reply(&snapshot, &ctx.cancel).await {
        Ok(reply) if !reply.is_empty() => reply,
        Ok(_) => {
            tracing::warn!(turn, "empty chat reply");
            speak(&ctx, APOLOGY_REPLY).await;
            return;
        }
        Err(e) if e.is_cancelled() => return,
        Err(e) => {
            tracing::warn!(turn, error = %e, "chat completion failed");
            speak(&ctx, APOLOGY_REPLY).await;
            return;
        }
    };
    tracing::info!(turn, assistant = %reply, "reply ready");

    if let Ok(mut history) = ctx.history.lock() {
        history.append(Role::Assistant, reply.clone());
    }

    if let Some(log) = &ctx.audio_log {
        if let Err(e) = log.log_turn(&text, &reply, recording_path.as_deref()) {
            tracing::warn!(error = %e, "failed to append conversation log");
        }
    }

    speak(&ctx, &reply).await;
}

/// Synthesize and play `text`, falling back to one apology utterance if
/// the first synthesis or decode fails.
async fn speak<T, R, S, P>(ctx: &TurnContext<T, R, S, P>, text: &str)
where
    T: Transcribe,
    R: Respond,
    S: Synthesize,
    P: Sink,
{
    ctx.state.set(TurnState::Speaking);

    let mut attempt = text;
    let mut apologized = false;
    loop {
        match synthesize_and_play(ctx, attempt).await {
            Ok(()) => {
                tracing::debug!(turn = ctx.turn, "playback complete");
                ctx.state.compare_swap(TurnState::Speaking, TurnState::Idle);
                return;
            }
            // Barge-in or shutdown: the cancelling side owns the state.
            Err(e) if e.is_cancelled() => {
                tracing::debug!(turn = ctx.turn, "playback interrupted");
                return;
            }
            Err(e) => {
                tracing::warn!(turn = ctx.turn, error = %e, "failed to speak");
                if apologized || attempt == APOLOGY_SYNTHESIZE {
                    ctx.state.compare_swap(TurnState::Speaking, TurnState::Idle);
                    return;
                }
                apologized = true;
                attempt = APOLOGY_SYNTHESIZE;
            }
        }
    }
}

async fn synthesize_and_play<T, R, S, P>(
    ctx: &TurnContext<T, R, S, P>,
    text: &str,
) -> Result<()>
where
    T: Transcribe,
    R: Respond,
    S: Synthesize,
    P: Sink,
{
    let audio = ctx
        .synthesizer
        .synthesize(text, AudioFormat::Wav, &ctx.cancel)
        .await?;

    if let Some(log) = &ctx.audio_log {
        if let Err(e) = log.save_tts(&audio) {
            tracing::warn!(error = %e, "failed to save synthesized audio");
        }
    }

    // Upstream responses have shipped broken RIFF headers; always run the
    // tolerant decode + resample stage before the sink.
    let samples = decode_to_rate(&audio, SAMPLE_RATE)?;

    ctx.sink.play(&ctx.cancel, samples).await
}
