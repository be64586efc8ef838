use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vision_narrator::replay::{ConsoleSynthesizer, LogOverlay, ReplayTape, StdinRecognizer};
use vision_narrator::voice::{SpeechSynthesizer, TextToSpeech};
use vision_narrator::{
    HttpLanguageModel, LanguageModel, NarratorConfig, Session, SessionParts, SessionState,
    classify_color,
};

/// Longest wait for the last words to finish before exiting
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Narrator - voice-controlled vision assistant
#[derive(Parser)]
#[command(name = "narrator", version, about)]
struct Cli {
    /// Config file (default: ~/.config/vision-narrator/config.toml)
    #[arg(short, long, env = "NARRATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a session from a replay file; spoken commands are read from stdin
    Run {
        /// Replay file with frames and detections
        #[arg(long)]
        replay: PathBuf,
        /// Start capture immediately instead of waiting for a start command
        #[arg(long)]
        start: bool,
        /// Speak through hosted TTS and the speakers instead of the console
        #[arg(long)]
        tts: bool,
    },
    /// Ask the language model one question
    Ask {
        question: String,
        /// Labels in view, comma separated
        #[arg(long, value_delimiter = ',')]
        labels: Vec<String>,
    },
    /// Classify an RGB color
    Color { r: u8, g: u8, b: u8 },
    /// Estimate the distance to an object from its pixel height
    Distance { label: String, pixel_height: f64 },
    /// Synthesize speech with hosted TTS
    Say {
        text: String,
        /// Write the MP3 here instead of playing it
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Play the alert tone
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,vision_narrator=info",
        1 => "info,vision_narrator=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => NarratorConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NarratorConfig::load()?,
    };
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Run { replay, start, tts } => run_session(config, &replay, start, tts).await,
        Command::Ask { question, labels } => ask(config, &labels, &question).await,
        Command::Color { r, g, b } => {
            let descriptor = classify_color(r, g, b);
            println!("{descriptor} ({})", config.phrases.color_words(descriptor));
            Ok(())
        }
        Command::Distance {
            label,
            pixel_height,
        } => {
            match config.detection.distance.estimate(&label.to_lowercase(), pixel_height) {
                Some(meters) => println!("{label}: {meters:.1} m"),
                None => println!("{label}: unknown (pixel height must be positive)"),
            }
            Ok(())
        }
        Command::Say { text, out } => say(&config, &text, out).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

async fn run_session(
    config: NarratorConfig,
    replay: &std::path::Path,
    start: bool,
    tts: bool,
) -> anyhow::Result<()> {
    let tape = Arc::new(
        ReplayTape::load(replay).with_context(|| format!("loading replay {}", replay.display()))?,
    );

    let synthesizer: Arc<dyn SpeechSynthesizer> = if tts {
        speaker_synthesizer(&config)?
    } else {
        Arc::new(ConsoleSynthesizer)
    };

    let language_model: Option<Arc<dyn LanguageModel>> = match &config.llm.url {
        Some(url) => {
            tracing::info!(url = %url, "questions go to the language model");
            Some(Arc::new(HttpLanguageModel::new(config.llm.clone())?))
        }
        None => {
            tracing::info!("no language model configured, questions get the fallback answer");
            None
        }
    };

    let session = Session::create(
        Arc::new(config),
        SessionParts {
            source: Arc::clone(&tape) as _,
            detector: tape,
            overlay: Arc::new(LogOverlay),
            synthesizer,
            recognizer: Arc::new(StdinRecognizer::new()),
            language_model,
        },
    );

    if start {
        session.start().await?;
    } else {
        tracing::info!("narrator ready - say a start command");
    }

    let mut status = session.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if let Some(message) = &current.message {
                    tracing::info!(state = ?current.state, "{message}");
                }
                if current.state == SessionState::Stopped && !session.voice().is_listening() {
                    break;
                }
            }
        }
    }

    session.stop().await;
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while session.voice().is_speaking() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    session.dispose().await;
    Ok(())
}

#[cfg(feature = "audio")]
fn speaker_synthesizer(config: &NarratorConfig) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
    use vision_narrator::voice::{AudioPlayback, SpeakerSynthesizer};

    let tts = tts_client(config)?;
    Ok(Arc::new(SpeakerSynthesizer::new(tts, AudioPlayback::new()?)))
}

#[cfg(not(feature = "audio"))]
fn speaker_synthesizer(_config: &NarratorConfig) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
    anyhow::bail!("--tts needs a build with the `audio` feature")
}

/// Test speaker output with the alert tone
#[cfg(feature = "audio")]
async fn test_speaker() -> anyhow::Result<()> {
    println!("You should hear a short beep");
    vision_narrator::voice::AudioPlayback::new()?.play_tone().await?;
    println!("If you didn't hear anything, check the default output device");
    Ok(())
}

#[cfg(not(feature = "audio"))]
#[allow(clippy::unused_async)]
async fn test_speaker() -> anyhow::Result<()> {
    anyhow::bail!("speaker test needs a build with the `audio` feature")
}

fn tts_client(config: &NarratorConfig) -> anyhow::Result<TextToSpeech> {
    let key = config
        .api_keys
        .openai
        .clone()
        .context("OPENAI_API_KEY is required for hosted TTS")?;
    Ok(TextToSpeech::new(key, &config.voice)?)
}

async fn ask(config: NarratorConfig, labels: &[String], question: &str) -> anyhow::Result<()> {
    let model = HttpLanguageModel::new(config.llm)?;
    let answer = model.ask(labels, question).await?;
    println!("{answer}");
    Ok(())
}

async fn say(config: &NarratorConfig, text: &str, out: Option<PathBuf>) -> anyhow::Result<()> {
    let tts = tts_client(config)?;
    println!("Synthesizing speech...");
    let mp3 = tts.synthesize(text).await?;

    if let Some(path) = out {
        std::fs::write(&path, &mp3)?;
        println!("Wrote {} bytes to {}", mp3.len(), path.display());
        return Ok(());
    }

    #[cfg(feature = "audio")]
    {
        vision_narrator::voice::AudioPlayback::new()?.play_mp3(&mp3).await?;
        Ok(())
    }

    #[cfg(not(feature = "audio"))]
    {
        anyhow::bail!("playback needs the `audio` feature; use --out to save the MP3")
    }
}
