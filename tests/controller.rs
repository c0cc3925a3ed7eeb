//! Turn controller scenarios
//!
//! Drives the state machine through mock adapters on a paused clock, so a
//! ten-second conversation runs in milliseconds and the timers stay exact.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use duplex::asr::Transcribe;
use duplex::audio::{samples_to_wav, FrameSource, Sink, SAMPLE_RATE};
use duplex::config::{AsrConfig, DetectorConfig, LlmConfig, TtsConfig, TurnConfig};
use duplex::llm::{Message, Respond, Role};
use duplex::tts::{AudioFormat, Synthesize};
use duplex::vad::{DetectorProfile, SpeechDetect};
use duplex::{Config, Error, Result, StateCell, TurnController, TurnState};

/// Samples per 50 ms tick at 16 kHz
const FRAME: usize = 800;

fn frame(amplitude: f32) -> Vec<f32> {
    vec![amplitude; FRAME]
}

fn silence() -> Vec<f32> {
    frame(0.0)
}

/// Frames of the given amplitude covering `secs` of ticks
fn frames(amplitude: f32, secs: f64) -> Vec<Vec<f32>> {
    let count = (secs / 0.05).round() as usize;
    (0..count).map(|_| frame(amplitude)).collect()
}

fn test_config() -> Config {
    Config {
        openai_api_key: "test-key".to_string(),
        vad_server_url: "http://localhost:8000".to_string(),
        turn: TurnConfig::default(),
        detector: DetectorConfig::default(),
        asr: AsrConfig::default(),
        llm: LlmConfig::default(),
        tts: TtsConfig::default(),
        audio_log_dir: None,
    }
}

/// Scripted frame source. While the controller is Speaking it reads from
/// the speaking script; otherwise from the main script. Either script
/// yields silence once exhausted.
struct ScriptSource {
    state: Arc<Mutex<Option<StateCell>>>,
    script: VecDeque<Vec<f32>>,
    speaking_script: VecDeque<Vec<f32>>,
}

impl ScriptSource {
    fn new(
        state: Arc<Mutex<Option<StateCell>>>,
        script: Vec<Vec<f32>>,
        speaking_script: Vec<Vec<f32>>,
    ) -> Self {
        Self {
            state,
            script: script.into(),
            speaking_script: speaking_script.into(),
        }
    }

    fn speaking(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|cell| cell.get() == TurnState::Speaking)
    }
}

impl FrameSource for ScriptSource {
    fn read(&mut self) -> Result<Vec<f32>> {
        let frame = if self.speaking() {
            self.speaking_script.pop_front().unwrap_or_else(silence)
        } else {
            self.script.pop_front().unwrap_or_else(silence)
        };
        Ok(frame)
    }
}

/// Detector that classifies by peak amplitude against the profile
/// threshold: amplitude 0.6 is speech for the utterance profile (0.5) but
/// not for barge-in (0.7); 0.9 qualifies for both.
struct AmplitudeDetector {
    calls: Arc<AtomicUsize>,
    healthy: bool,
    failing: bool,
}

impl AmplitudeDetector {
    fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            healthy: true,
            failing: false,
        }
    }
}

#[async_trait]
impl SpeechDetect for AmplitudeDetector {
    async fn has_speech(
        &self,
        samples: &[f32],
        _sample_rate: u32,
        profile: &DetectorProfile,
    ) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(Error::DetectorUnavailable("detector offline".to_string()));
        }
        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        Ok(f64::from(peak) >= profile.threshold)
    }

    async fn health(&self) -> Result<()> {
        if self.healthy {
            Ok(())
        } else {
            Err(Error::DetectorUnavailable("connection refused".to_string()))
        }
    }
}

enum TranscribeOutcome {
    Text(String),
    Empty,
    Fail,
}

struct ScriptTranscriber {
    outcome: TranscribeOutcome,
    received: Arc<Mutex<Vec<usize>>>,
}

impl ScriptTranscriber {
    fn text(text: &str) -> Self {
        Self {
            outcome: TranscribeOutcome::Text(text.to_string()),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Transcribe for ScriptTranscriber {
    async fn transcribe(
        &self,
        samples: &[f32],
        _sample_rate: u32,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.received.lock().unwrap().push(samples.len());
        match &self.outcome {
            TranscribeOutcome::Text(text) => Ok(text.clone()),
            TranscribeOutcome::Empty => Ok(String::new()),
            TranscribeOutcome::Fail => {
                Err(Error::Transcriber("transcription API error 500".to_string()))
            }
        }
    }
}

struct ScriptResponder {
    reply: String,
    snapshots: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl ScriptResponder {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            snapshots: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Respond for ScriptResponder {
    async fn reply(&self, messages: &[Message], cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.snapshots.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.clone())
    }
}

/// Synthesizer producing a WAV of the configured duration
struct ScriptSynthesizer {
    utterance_secs: f64,
    texts: Arc<Mutex<Vec<String>>>,
}

impl ScriptSynthesizer {
    fn new(utterance_secs: f64) -> Self {
        Self {
            utterance_secs,
            texts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Synthesize for ScriptSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        _format: AudioFormat,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.texts.lock().unwrap().push(text.to_string());
        let samples = vec![0.1f32; (self.utterance_secs * f64::from(SAMPLE_RATE)) as usize];
        samples_to_wav(&samples, SAMPLE_RATE)
    }
}

/// Sink that "plays" by sleeping for the audio duration on the paused clock
struct TimedSink {
    playing: AtomicBool,
    completed: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
}

impl TimedSink {
    fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            completed: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Sink for TimedSink {
    async fn play(&self, cancel: &CancellationToken, samples: Vec<f32>) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.playing.store(true, Ordering::SeqCst);
        let duration = Duration::from_secs_f64(samples.len() as f64 / f64::from(SAMPLE_RATE));
        let result = tokio::select! {
            () = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(Error::Cancelled)
            }
            () = tokio::time::sleep(duration) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };
        self.playing.store(false, Ordering::SeqCst);
        result
    }

    fn stop(&self) {}

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

struct Scenario {
    state: StateCell,
    history: Arc<Mutex<duplex::ConversationHistory>>,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<Result<()>>,
    detector_calls: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<usize>>>,
    snapshots: Arc<Mutex<Vec<Vec<Message>>>>,
    synthesized: Arc<Mutex<Vec<String>>>,
    completed: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
}

impl Scenario {
    #[allow(clippy::too_many_arguments)]
    fn start(
        config: Config,
        script: Vec<Vec<f32>>,
        speaking_script: Vec<Vec<f32>>,
        detector: AmplitudeDetector,
        transcriber: ScriptTranscriber,
        responder: ScriptResponder,
        synthesizer: ScriptSynthesizer,
    ) -> Self {
        let slot = Arc::new(Mutex::new(None));
        let source = ScriptSource::new(Arc::clone(&slot), script, speaking_script);
        let sink = TimedSink::new();

        let detector_calls = Arc::clone(&detector.calls);
        let received = Arc::clone(&transcriber.received);
        let snapshots = Arc::clone(&responder.snapshots);
        let synthesized = Arc::clone(&synthesizer.texts);
        let completed = Arc::clone(&sink.completed);
        let cancelled = Arc::clone(&sink.cancelled);

        let mut controller = TurnController::new(
            config, source, detector, transcriber, responder, synthesizer, sink,
        )
        .unwrap();

        let state = controller.state();
        let history = controller.history();
        *slot.lock().unwrap() = Some(controller.state());

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { controller.run(token).await });

        Self {
            state,
            history,
            shutdown,
            handle,
            detector_calls,
            received,
            snapshots,
            synthesized,
            completed,
            cancelled,
        }
    }

    async fn finish(self) -> Result<()> {
        self.shutdown.cancel();
        self.handle.await.expect("controller task panicked")
    }
}

#[tokio::test(start_paused = true)]
async fn clean_turn_reaches_idle_with_one_exchange() {
    let scenario = Scenario::start(
        test_config(),
        frames(0.6, 1.2),
        Vec::new(),
        AmplitudeDetector::new(),
        ScriptTranscriber::text("what time is it"),
        ScriptResponder::new("It is noon."),
        ScriptSynthesizer::new(2.0),
    );

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(scenario.state.get(), TurnState::Idle);
    {
        let history = scenario.history.lock().unwrap();
        let messages = history.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::user("what time is it"));
        assert_eq!(messages[1], Message::assistant("It is noon."));
    }
    assert_eq!(scenario.completed.load(Ordering::SeqCst), 1);
    assert_eq!(scenario.cancelled.load(Ordering::SeqCst), 0);

    // The responder saw the system prompt plus exactly this turn's user
    // message.
    {
        let snapshots = scenario.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert_eq!(snapshot[0].role, Role::System);
        assert_eq!(snapshot.last().unwrap(), &Message::user("what time is it"));
    }

    scenario.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn sub_threshold_noise_never_leaves_idle() {
    let scenario = Scenario::start(
        test_config(),
        frames(0.2, 10.0),
        Vec::new(),
        AmplitudeDetector::new(),
        ScriptTranscriber::text("should never run"),
        ScriptResponder::new("never"),
        ScriptSynthesizer::new(1.0),
    );

    tokio::time::sleep(Duration::from_secs(12)).await;

    assert_eq!(scenario.state.get(), TurnState::Idle);
    assert!(scenario.history.lock().unwrap().is_empty());
    assert!(scenario.received.lock().unwrap().is_empty());
    assert!(scenario.detector_calls.load(Ordering::SeqCst) >= 100);

    scenario.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn continuous_speech_is_cut_at_max_duration() {
    let scenario = Scenario::start(
        test_config(),
        frames(0.6, 35.0),
        Vec::new(),
        AmplitudeDetector::new(),
        ScriptTranscriber::text("long monologue"),
        ScriptResponder::new("Noted."),
        ScriptSynthesizer::new(1.0),
    );

    tokio::time::sleep(Duration::from_secs(32)).await;

    // Transcription was invoked on exactly 30 s of samples.
    {
        let received = scenario.received.lock().unwrap();
        assert!(!received.is_empty());
        assert_eq!(received[0], 30 * SAMPLE_RATE as usize);
    }

    scenario.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn barge_in_cancels_playback_and_reopens_listening() {
    // After the first exchange (1.2 s speech + 1 s commit silence), the
    // reply plays for 10 s; 2.0 s into playback the user interrupts for
    // 300 ms.
    let mut script = frames(0.6, 1.2);
    script.extend(frames(0.0, 1.1));
    // Consumed after the barge-in returns the controller to Idle.
    script.extend(frames(0.6, 0.5));

    let mut speaking = frames(0.0, 2.0);
    speaking.extend(frames(0.9, 0.3));

    let scenario = Scenario::start(
        test_config(),
        script,
        speaking,
        AmplitudeDetector::new(),
        ScriptTranscriber::text("tell me a story"),
        ScriptResponder::new("Once upon a time, at considerable length."),
        ScriptSynthesizer::new(10.0),
    );

    tokio::time::sleep(Duration::from_secs(5)).await;

    // Playback was cancelled, not drained.
    assert_eq!(scenario.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(scenario.completed.load(Ordering::SeqCst), 0);

    // The assistant reply stays in memory (not rolled back).
    {
        let history = scenario.history.lock().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[1].role, Role::Assistant);
    }

    // The voiced frames after the interruption opened a fresh Listening.
    assert_eq!(scenario.state.get(), TurnState::Listening);

    scenario.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn short_blip_during_playback_is_ignored() {
    // 150 ms of qualifying audio is below the 200 ms confirmation bar:
    // probation starts but never confirms (hysteresis).
    let mut speaking = frames(0.0, 2.0);
    speaking.extend(frames(0.9, 0.15));

    let scenario = Scenario::start(
        test_config(),
        frames(0.6, 1.2),
        speaking,
        AmplitudeDetector::new(),
        ScriptTranscriber::text("keep going"),
        ScriptResponder::new("Continuing."),
        ScriptSynthesizer::new(10.0),
    );

    tokio::time::sleep(Duration::from_secs(16)).await;

    assert_eq!(scenario.cancelled.load(Ordering::SeqCst), 0);
    assert_eq!(scenario.completed.load(Ordering::SeqCst), 1);
    assert_eq!(scenario.state.get(), TurnState::Idle);

    scenario.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn interleaved_blips_never_confirm() {
    // Qualifying frames broken by single sub-threshold frames: each
    // probation resets before the 200 ms bar.
    let mut speaking = frames(0.0, 1.0);
    for _ in 0..8 {
        speaking.extend(frames(0.9, 0.15));
        speaking.push(silence());
    }

    let scenario = Scenario::start(
        test_config(),
        frames(0.6, 1.2),
        speaking,
        AmplitudeDetector::new(),
        ScriptTranscriber::text("stutter test"),
        ScriptResponder::new("Reply."),
        ScriptSynthesizer::new(8.0),
    );

    tokio::time::sleep(Duration::from_secs(14)).await;

    assert_eq!(scenario.cancelled.load(Ordering::SeqCst), 0);
    assert_eq!(scenario.completed.load(Ordering::SeqCst), 1);

    scenario.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn disabled_interrupt_lets_playback_drain() {
    let mut config = test_config();
    config.turn.allow_interrupt = false;

    // Sustained loud speech for the whole playback; would confirm within
    // 250 ms if the watcher were active.
    let speaking = frames(0.9, 9.0);

    let scenario = Scenario::start(
        config,
        frames(0.6, 1.2),
        speaking,
        AmplitudeDetector::new(),
        ScriptTranscriber::text("no interruptions please"),
        ScriptResponder::new("Understood."),
        ScriptSynthesizer::new(8.0),
    );

    tokio::time::sleep(Duration::from_secs(14)).await;

    assert_eq!(scenario.cancelled.load(Ordering::SeqCst), 0);
    assert_eq!(scenario.completed.load(Ordering::SeqCst), 1);
    assert_eq!(scenario.state.get(), TurnState::Idle);

    scenario.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn transcription_failure_speaks_an_apology() {
    let scenario = Scenario::start(
        test_config(),
        frames(0.6, 1.2),
        Vec::new(),
        AmplitudeDetector::new(),
        ScriptTranscriber {
            outcome: TranscribeOutcome::Fail,
            received: Arc::new(Mutex::new(Vec::new())),
        },
        ScriptResponder::new("unused"),
        ScriptSynthesizer::new(1.0),
    );

    tokio::time::sleep(Duration::from_secs(8)).await;

    // The apology was synthesized and played; nothing entered memory.
    assert!(scenario.history.lock().unwrap().is_empty());
    assert!(scenario.snapshots.lock().unwrap().is_empty());
    {
        let synthesized = scenario.synthesized.lock().unwrap();
        assert_eq!(synthesized.len(), 1);
        assert!(synthesized[0].starts_with("Sorry"));
    }
    assert_eq!(scenario.completed.load(Ordering::SeqCst), 1);
    assert_eq!(scenario.state.get(), TurnState::Idle);

    scenario.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn empty_transcription_skips_the_turn_silently() {
    let scenario = Scenario::start(
        test_config(),
        frames(0.6, 1.2),
        Vec::new(),
        AmplitudeDetector::new(),
        ScriptTranscriber {
            outcome: TranscribeOutcome::Empty,
            received: Arc::new(Mutex::new(Vec::new())),
        },
        ScriptResponder::new("unused"),
        ScriptSynthesizer::new(1.0),
    );

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(scenario.history.lock().unwrap().is_empty());
    assert!(scenario.synthesized.lock().unwrap().is_empty());
    assert_eq!(scenario.completed.load(Ordering::SeqCst), 0);
    assert_eq!(scenario.state.get(), TurnState::Idle);

    scenario.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn detector_outage_is_treated_as_no_speech() {
    let detector = AmplitudeDetector {
        calls: Arc::new(AtomicUsize::new(0)),
        healthy: true,
        failing: true,
    };

    let scenario = Scenario::start(
        test_config(),
        frames(0.9, 5.0),
        Vec::new(),
        detector,
        ScriptTranscriber::text("unreachable"),
        ScriptResponder::new("unused"),
        ScriptSynthesizer::new(1.0),
    );

    tokio::time::sleep(Duration::from_secs(7)).await;

    assert_eq!(scenario.state.get(), TurnState::Idle);
    assert!(scenario.history.lock().unwrap().is_empty());
    assert!(scenario.detector_calls.load(Ordering::SeqCst) >= 50);

    scenario.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_health_check_is_fatal() {
    let detector = AmplitudeDetector {
        calls: Arc::new(AtomicUsize::new(0)),
        healthy: false,
        failing: false,
    };

    let scenario = Scenario::start(
        test_config(),
        Vec::new(),
        Vec::new(),
        detector,
        ScriptTranscriber::text("unused"),
        ScriptResponder::new("unused"),
        ScriptSynthesizer::new(1.0),
    );

    let result = scenario.handle.await.expect("controller task panicked");
    assert!(matches!(result, Err(Error::Fatal(_))));
}
