//! Shared test utilities
//!
//! Fakes for every collaborator a session drives, plus a polling helper.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use vision_narrator::voice::{
    RecognitionEvent, RecognitionResult, SpeechRecognizer, SpeechSynthesizer, Utterance,
};
use vision_narrator::{
    BoundingBox, Detection, Detector, Error, Frame, FrameGeometry, FrameSource, LanguageModel,
    NarratorConfig, Overlay, OverlayCommand, Result, Session, SessionParts,
};

pub const GEOMETRY: FrameGeometry = FrameGeometry {
    width: 640,
    height: 480,
};

/// Defaults with a fast frame loop
#[must_use]
pub fn test_config() -> NarratorConfig {
    let mut config = NarratorConfig::default();
    config.detection.frame_interval = Duration::from_millis(5);
    config
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .is_ok()
}

#[must_use]
pub fn person(x: f64) -> Detection {
    Detection::new("person", 0.9, BoundingBox::new(x, 50.0, 200.0, 400.0))
}

/// Object whose center sits in the hand zone of `person(x)`
#[must_use]
pub fn held(label: &str, x: f64) -> Detection {
    Detection::new(label, 0.7, BoundingBox::new(x + 90.0, 260.0, 30.0, 40.0))
}

#[must_use]
pub fn cup() -> Detection {
    Detection::new("cup", 0.9, BoundingBox::new(500.0, 300.0, 40.0, 60.0))
}

/// Camera stand-in
#[derive(Default)]
pub struct FakeSource {
    pub fail_acquire: AtomicBool,
    /// Frames left before the device disappears; `usize::MAX` never
    pub frames_left: AtomicUsize,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl FakeSource {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames_left: AtomicUsize::new(usize::MAX),
            ..Self::default()
        })
    }
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn acquire(&self) -> Result<FrameGeometry> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(Error::Acquisition("permission denied".to_string()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(GEOMETRY)
    }

    async fn next_frame(&self) -> Result<Frame> {
        let left = self.frames_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(Error::Acquisition("camera unplugged".to_string()));
        }
        if left != usize::MAX {
            self.frames_left.store(left - 1, Ordering::SeqCst);
        }
        Ok(Frame::blank(GEOMETRY))
    }

    async fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Returns the current scene; can fail or stall on demand
#[derive(Default)]
pub struct FakeDetector {
    pub scene: Mutex<Vec<Detection>>,
    /// Upcoming calls that fail
    pub failures: AtomicUsize,
    pub delay: Mutex<Duration>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeDetector {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn show(&self, detections: Vec<Detection>) {
        *self.scene.lock().unwrap() = detections;
    }
}

#[async_trait]
impl Detector for FakeDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Detection("inference failed".to_string()));
        }
        Ok(self.scene.lock().unwrap().clone())
    }
}

/// Records every render
#[derive(Default)]
pub struct RecordingOverlay {
    pub frames: Mutex<Vec<Vec<OverlayCommand>>>,
    pub clears: AtomicUsize,
}

impl RecordingOverlay {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn last_frame(&self) -> Vec<OverlayCommand> {
        self.frames.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

impl Overlay for RecordingOverlay {
    fn render(&self, commands: &[OverlayCommand]) -> Result<()> {
        self.frames.lock().unwrap().push(commands.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records what was said; each utterance takes `duration`
#[derive(Default)]
pub struct RecordingSynth {
    pub spoken: Mutex<Vec<String>>,
    pub tones: AtomicUsize,
    pub cancels: AtomicUsize,
    pub duration: Mutex<Duration>,
}

impl RecordingSynth {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    #[must_use]
    pub fn said(&self, text: &str) -> bool {
        self.spoken.lock().unwrap().iter().any(|s| s == text)
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynth {
    async fn speak(&self, utterance: &Utterance) -> Result<()> {
        self.spoken.lock().unwrap().push(utterance.text.clone());
        let duration = *self.duration.lock().unwrap();
        tokio::time::sleep(duration).await;
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    async fn alert_tone(&self) -> Result<()> {
        self.tones.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out pre-opened recognition segments; fails once they run out
#[derive(Default)]
pub struct ScriptedRecognizer {
    segments: Mutex<VecDeque<mpsc::Receiver<RecognitionEvent>>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl ScriptedRecognizer {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a segment; events sent on the returned sender reach the channel
    pub fn segment(&self) -> mpsc::Sender<RecognitionEvent> {
        let (tx, rx) = mpsc::channel(16);
        self.segments.lock().unwrap().push_back(rx);
        tx
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn start(&self, _language: &str) -> Result<mpsc::Receiver<RecognitionEvent>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.segments
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Recognition("microphone blocked".to_string()))
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Final transcript event with one alternative
#[must_use]
pub fn heard(text: &str) -> RecognitionEvent {
    RecognitionEvent::Result(RecognitionResult::final_text(text, 0.9))
}

/// Records questions; answers with `answer` or fails when it is `None`
pub struct FakeModel {
    pub answer: Option<String>,
    pub asked: Mutex<Vec<(Vec<String>, String)>>,
    /// How long each call takes
    pub latency: Mutex<Duration>,
}

impl FakeModel {
    #[must_use]
    pub fn answering(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Some(answer.to_string()),
            asked: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        })
    }

    #[must_use]
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            answer: None,
            asked: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        })
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn ask(&self, labels: &[String], question: &str) -> Result<String> {
        self.asked
            .lock()
            .unwrap()
            .push((labels.to_vec(), question.to_string()));
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.answer
            .clone()
            .ok_or_else(|| Error::Remote("503 model loading".to_string()))
    }
}

/// A session wired to fakes, with handles to inspect them
pub struct Harness {
    pub session: Session,
    pub source: Arc<FakeSource>,
    pub detector: Arc<FakeDetector>,
    pub overlay: Arc<RecordingOverlay>,
    pub synth: Arc<RecordingSynth>,
    pub recognizer: Arc<ScriptedRecognizer>,
    /// Sender for the first recognition segment
    pub mic: mpsc::Sender<RecognitionEvent>,
}

impl Harness {
    /// Must be called from within a Tokio runtime
    #[must_use]
    pub fn new(model: Option<Arc<FakeModel>>) -> Self {
        Self::with_config(test_config(), model)
    }

    #[must_use]
    pub fn with_config(config: NarratorConfig, model: Option<Arc<FakeModel>>) -> Self {
        let source = FakeSource::new();
        let detector = FakeDetector::new();
        let overlay = RecordingOverlay::new();
        let synth = RecordingSynth::new();
        let recognizer = ScriptedRecognizer::new();
        let mic = recognizer.segment();

        let session = Session::create(
            Arc::new(config),
            SessionParts {
                source: Arc::clone(&source) as _,
                detector: Arc::clone(&detector) as _,
                overlay: Arc::clone(&overlay) as _,
                synthesizer: Arc::clone(&synth) as _,
                recognizer: Arc::clone(&recognizer) as _,
                language_model: model.map(|m| m as Arc<dyn LanguageModel>),
            },
        );

        Self {
            session,
            source,
            detector,
            overlay,
            synth,
            recognizer,
            mic,
        }
    }

    /// Wait for speech to finish
    pub async fn quiet(&self) -> bool {
        let voice = self.session.voice();
        wait_until(|| !voice.is_speaking()).await
    }
}
