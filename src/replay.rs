//! File and console collaborators for running a session without devices
//!
//! A replay file is JSON:
//!
//! ```json
//! {
//!   "width": 640,
//!   "height": 480,
//!   "loop": false,
//!   "frames": [
//!     { "repeat": 90, "fill": [10, 10, 200],
//!       "detections": [{ "class": "cup", "score": 0.9, "bbox": { "x": 10, "y": 40, "width": 50, "height": 60 } }] }
//!   ]
//! }
//! ```
//!
//! Each frame is served `repeat` times (default and minimum 1). When the tape runs out the
//! source reports an acquisition error, which stops the session.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::detection::{Detection, Detector, Frame, FrameGeometry, FrameSource};
use crate::overlay::{Overlay, OverlayCommand};
use crate::voice::{RecognitionEvent, RecognitionResult, SpeechRecognizer, SpeechSynthesizer, Utterance};
use crate::{Error, Result};

/// Simulated speaking time per word at rate 1.0
const WORD_DURATION: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Deserialize)]
struct ReplayFile {
    width: u32,
    height: u32,
    #[serde(default, rename = "loop")]
    looped: bool,
    frames: Vec<ReplayFrame>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReplayFrame {
    #[serde(default)]
    detections: Vec<Detection>,
    /// Solid RGB fill used for color sampling
    #[serde(default)]
    fill: Option<[u8; 3]>,
    #[serde(default = "default_repeat")]
    repeat: u32,
}

const fn default_repeat() -> u32 {
    1
}

#[derive(Debug, Default)]
struct Cursor {
    frame: usize,
    served: u32,
    current: Option<usize>,
    acquired: bool,
}

/// Recorded frames acting as both frame source and detector
pub struct ReplayTape {
    geometry: FrameGeometry,
    looped: bool,
    frames: Vec<ReplayFrame>,
    cursor: Mutex<Cursor>,
}

impl ReplayTape {
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// # Errors
    ///
    /// Returns error if the JSON does not describe a replay
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ReplayFile = serde_json::from_str(json)?;
        tracing::debug!(frames = file.frames.len(), looped = file.looped, "replay loaded");
        Ok(Self {
            geometry: FrameGeometry {
                width: file.width,
                height: file.height,
            },
            looped: file.looped,
            frames: file.frames,
            cursor: Mutex::new(Cursor::default()),
        })
    }

    fn cursor(&self) -> Result<std::sync::MutexGuard<'_, Cursor>> {
        self.cursor
            .lock()
            .map_err(|_| Error::Acquisition("replay cursor poisoned".to_string()))
    }
}

#[async_trait]
impl FrameSource for ReplayTape {
    async fn acquire(&self) -> Result<FrameGeometry> {
        if self.frames.is_empty() {
            return Err(Error::Acquisition("replay has no frames".to_string()));
        }
        if self.geometry.width == 0 || self.geometry.height == 0 {
            return Err(Error::Acquisition("replay frame size is zero".to_string()));
        }
        let mut cursor = self.cursor()?;
        *cursor = Cursor {
            acquired: true,
            ..Cursor::default()
        };
        Ok(self.geometry)
    }

    async fn next_frame(&self) -> Result<Frame> {
        let mut cursor = self.cursor()?;
        if !cursor.acquired {
            return Err(Error::Acquisition("replay not acquired".to_string()));
        }

        loop {
            if cursor.frame >= self.frames.len() {
                if !self.looped {
                    return Err(Error::Acquisition("replay finished".to_string()));
                }
                cursor.frame = 0;
            }
            if cursor.served < self.frames[cursor.frame].repeat.max(1) {
                break;
            }
            cursor.frame += 1;
            cursor.served = 0;
        }

        cursor.served += 1;
        cursor.current = Some(cursor.frame);
        let frame = &self.frames[cursor.frame];
        Ok(match frame.fill {
            Some(rgb) => Frame::solid(self.geometry, rgb),
            None => Frame::blank(self.geometry),
        })
    }

    async fn release(&self) {
        if let Ok(mut cursor) = self.cursor.lock() {
            cursor.acquired = false;
            cursor.current = None;
        }
    }
}

#[async_trait]
impl Detector for ReplayTape {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
        let index = self.cursor()?.current;
        index
            .and_then(|i| self.frames.get(i))
            .map(|f| f.detections.clone())
            .ok_or_else(|| Error::Detection("no replay frame in flight".to_string()))
    }
}

/// Reads one command per stdin line as a final transcript
#[derive(Default)]
pub struct StdinRecognizer {
    closed: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StdinRecognizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpeechRecognizer for StdinRecognizer {
    async fn start(&self, _language: &str) -> Result<mpsc::Receiver<RecognitionEvent>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Recognition("stdin closed".to_string()));
        }

        let (tx, rx) = mpsc::channel(16);
        let closed = Arc::clone(&self.closed);
        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let event = RecognitionEvent::Result(RecognitionResult::final_text(line, 1.0));
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(RecognitionEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
            closed.store(true, Ordering::SeqCst);
            let _ = tx.send(RecognitionEvent::Ended).await;
        });

        if let Ok(mut reader) = self.reader.lock() {
            if let Some(old) = reader.replace(handle) {
                old.abort();
            }
        }
        Ok(rx)
    }

    fn stop(&self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
    }
}

/// Prints narration to stdout, taking roughly as long as speaking it would
#[derive(Debug, Default)]
pub struct ConsoleSynthesizer;

#[async_trait]
impl SpeechSynthesizer for ConsoleSynthesizer {
    async fn speak(&self, utterance: &Utterance) -> Result<()> {
        println!("> {}", utterance.text);
        let words = u32::try_from(utterance.text.split_whitespace().count()).unwrap_or(u32::MAX);
        let rate = if utterance.rate > 0.0 { utterance.rate } else { 1.0 };
        tokio::time::sleep((WORD_DURATION * words).div_f32(rate)).await;
        Ok(())
    }

    fn cancel(&self) {
        tracing::trace!("console speech cancelled");
    }

    async fn alert_tone(&self) -> Result<()> {
        println!("[alert]");
        Ok(())
    }
}

/// Logs overlay commands instead of drawing them
#[derive(Debug, Default)]
pub struct LogOverlay;

impl Overlay for LogOverlay {
    fn render(&self, commands: &[OverlayCommand]) -> Result<()> {
        for command in commands {
            match command {
                OverlayCommand::Clear => tracing::trace!("overlay cleared"),
                OverlayCommand::Box {
                    bounding_box,
                    style,
                    caption,
                    ..
                } => tracing::debug!(
                    caption = %caption,
                    style = ?style,
                    x = bounding_box.x,
                    y = bounding_box.y,
                    width = bounding_box.width,
                    height = bounding_box.height,
                    "overlay box"
                ),
            }
        }
        Ok(())
    }

    fn resize(&self, geometry: FrameGeometry) {
        tracing::debug!(width = geometry.width, height = geometry.height, "overlay sized");
    }
}
