//! Audio playback to speakers

use std::f32::consts::TAU;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::synthesis::{SpeechSynthesizer, Utterance};
use super::tts::TextToSpeech;
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Alert tone: 880 Hz for 250 ms
const TONE_HZ: f32 = 880.0;
const TONE_MS: u32 = 250;
const TONE_GAIN: f32 = 0.3;

/// Plays audio to the default output device
///
/// [`AudioPlayback::stop`] cuts off whatever is playing; later calls play normally.
pub struct AudioPlayback {
    config: StreamConfig,
    generation: Arc<AtomicU64>,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output device exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        };
        let supported_config = supports(1)
            .or_else(|| supports(2))
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            config,
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Play audio from MP3 bytes, returning when done or stopped
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub async fn play_mp3(&self, mp3_data: &[u8]) -> Result<()> {
        let samples = decode_mp3(mp3_data)?;
        self.play(samples).await
    }

    /// Play the alert tone
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play_tone(&self) -> Result<()> {
        self.play(sine_tone(TONE_HZ, TONE_MS, PLAYBACK_SAMPLE_RATE)).await
    }

    /// Play mono f32 samples
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play(&self, samples: Vec<f32>) -> Result<()> {
        let config = self.config.clone();
        let generation = Arc::clone(&self.generation);
        let started = generation.load(Ordering::SeqCst);

        tokio::task::spawn_blocking(move || play_blocking(&config, samples, &generation, started))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }

    /// Cut off the current sound
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Play on the calling thread until done or the generation moves on
fn play_blocking(
    config: &StreamConfig,
    samples: Vec<f32>,
    generation: &AtomicU64,
    started: u64,
) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;
    let channels = usize::from(config.channels);
    let sample_count = samples.len();

    let position = Arc::new(Mutex::new(0usize));
    let callback_position = Arc::clone(&position);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut pos) = callback_position.lock() else {
                    return;
                };
                for frame in data.chunks_mut(channels) {
                    let sample = samples.get(*pos).copied().unwrap_or(0.0);
                    frame.fill(sample);
                    if *pos < samples.len() {
                        *pos += 1;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    loop {
        if generation.load(Ordering::SeqCst) != started {
            tracing::debug!("playback stopped");
            break;
        }
        let done = position.lock().map_or(true, |p| *p >= sample_count);
        if done || start.elapsed() > timeout {
            // Let the device drain its buffer
            std::thread::sleep(Duration::from_millis(100));
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");
    Ok(())
}

/// Mono sine wave with a short fade at both ends
fn sine_tone(hz: f32, millis: u32, sample_rate: u32) -> Vec<f32> {
    let count = (sample_rate * millis / 1000) as usize;
    let fade = (count / 10).max(1);
    #[allow(clippy::cast_precision_loss)]
    (0..count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let edge = i.min(count - 1 - i);
            let envelope = if edge < fade { edge as f32 / fade as f32 } else { 1.0 };
            (TAU * hz * t).sin() * TONE_GAIN * envelope
        })
        .collect()
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

/// Hosted TTS played through the local speakers
pub struct SpeakerSynthesizer {
    tts: TextToSpeech,
    playback: AudioPlayback,
}

impl SpeakerSynthesizer {
    #[must_use]
    pub const fn new(tts: TextToSpeech, playback: AudioPlayback) -> Self {
        Self { tts, playback }
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeakerSynthesizer {
    async fn speak(&self, utterance: &Utterance) -> Result<()> {
        let audio = self.tts.synthesize(&utterance.text).await?;
        self.playback.play_mp3(&audio).await
    }

    fn cancel(&self) {
        self.playback.stop();
    }

    async fn alert_tone(&self) -> Result<()> {
        self.playback.play_tone().await
    }
}
