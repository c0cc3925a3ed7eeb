use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use duplex::asr::AsrClient;
use duplex::audio::{decode_to_rate, AudioCapture, PlaybackSink, Sink, SAMPLE_RATE};
use duplex::llm::ChatClient;
use duplex::tts::{AudioFormat, Synthesize, TtsClient};
use duplex::vad::VadClient;
use duplex::{Config, TurnController};

/// Duplex - full-duplex conversational voice assistant
#[derive(Parser)]
#[command(name = "duplex", version, about)]
struct Cli {
    /// Base URL of the speech detector
    #[arg(long, env = "VAD_SERVER_URL", default_value = duplex::config::DEFAULT_VAD_URL)]
    vad_url: String,

    /// Disable the barge-in path entirely
    #[arg(long, env = "DISABLE_INTERRUPT")]
    disable_interrupt: bool,

    /// Save recordings, synthesized audio, and a conversation log
    #[arg(long)]
    save_audio: bool,

    /// Directory for saved audio and the conversation log
    #[arg(long, default_value = "recordings")]
    output_dir: String,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output with a sine tone
    TestSpeaker,
    /// Synthesize and play a one-shot utterance
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,duplex=info",
        1 => "info,duplex=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&text).await,
        };
    }

    let mut config = Config::from_env()?;
    config.vad_server_url = cli.vad_url;
    if cli.disable_interrupt {
        config.turn.allow_interrupt = false;
        tracing::info!("barge-in disabled");
    }
    if cli.save_audio {
        config.audio_log_dir = Some(cli.output_dir.clone().into());
    }

    tracing::info!(
        vad_url = %config.vad_server_url,
        interrupt = config.turn.allow_interrupt,
        "starting duplex"
    );

    let detector = VadClient::new(config.vad_server_url.clone());
    match detector.info().await {
        Ok(info) => tracing::info!(
            model = %info.model_name,
            sample_rate = info.sample_rate,
            "speech detector model"
        ),
        Err(e) => tracing::debug!(error = %e, "detector info unavailable"),
    }

    let transcriber = AsrClient::new(
        config.openai_api_key.clone(),
        config.asr.model.clone(),
        config.asr.language.clone(),
    )?;
    let responder = ChatClient::new(
        config.openai_api_key.clone(),
        config.llm.model.clone(),
        config.llm.temperature,
        config.llm.max_tokens,
    )?;
    let synthesizer = TtsClient::new(
        config.openai_api_key.clone(),
        config.tts.model.clone(),
        config.tts.voice.clone(),
        config.tts.speed,
    )?
    .with_cache();

    let sink = PlaybackSink::new()?;
    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let mut controller = TurnController::new(
        config, capture, detector, transcriber, responder, synthesizer, sink,
    )?;

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            signal_shutdown.cancel();
        }
    });

    controller.run(shutdown).await?;
    Ok(())
}

/// Test microphone input with a terminal level meter
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let rms = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (rms * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {rms:.4} | Peak: {peak:.4} | [{meter}]", i + 1);

        capture.clear_buffer();
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working.");

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a 440 Hz tone
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sink = PlaybackSink::new()?;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..SAMPLE_RATE * 2)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {SAMPLE_RATE} Hz...", samples.len());

    let cancel = CancellationToken::new();
    sink.play(&cancel, samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working.");

    Ok(())
}

/// Synthesize one utterance and play it
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::from_env()?;
    let synthesizer = TtsClient::new(
        config.openai_api_key.clone(),
        config.tts.model.clone(),
        config.tts.voice.clone(),
        config.tts.speed,
    )?;

    let cancel = CancellationToken::new();

    println!("Synthesizing speech...");
    let audio = synthesizer
        .synthesize(text, AudioFormat::Wav, &cancel)
        .await?;
    println!("Got {} bytes of audio data", audio.len());

    let samples = decode_to_rate(&audio, SAMPLE_RATE)?;
    println!("Decoded {} samples, playing...", samples.len());

    let sink = PlaybackSink::new()?;
    sink.play(&cancel, samples).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working.");

    Ok(())
}
