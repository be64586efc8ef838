//! Coordinated speech output and continuous speech input
//!
//! Output: at most one utterance plays at a time. A non-urgent request while
//! speaking is dropped, not queued; an urgent one cancels the current utterance
//! and takes over. "Speaking" is polled at call time, which is best-effort.
//!
//! Input: recognition engines stop after a pause. While the channel intends to
//! listen, every end of segment restarts recognition.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::recognition::{RecognitionEvent, SpeechRecognizer};
use super::synthesis::{SpeechSynthesizer, Utterance};
use crate::config::VoiceConfig;

/// Pause before reopening a recognition segment
const RESTART_DELAY: Duration = Duration::from_millis(100);

/// Narration detail level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NarrationMode {
    /// Distances and colors included
    Verbose,
    /// Names only
    #[default]
    Quiet,
}

impl NarrationMode {
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Verbose => Self::Quiet,
            Self::Quiet => Self::Verbose,
        }
    }
}

/// Snapshot of the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceState {
    pub speaking: bool,
    pub listening: bool,
    pub mode: NarrationMode,
}

/// What happened to a speak request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Channel was idle; playback started
    Started,
    /// Urgent request cut off the utterance in progress
    Preempted,
    /// Channel was busy (or the text was empty); nothing queued
    Dropped,
}

/// Recognition status for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceStatus {
    /// Final transcript delivered to the command handler
    Heard(String),
    /// Interim transcript, display only
    Interim(String),
    /// Recognition could not start; listening stopped
    RecognitionFailed(String),
    /// Engine reported a non-fatal error
    RecognitionError(String),
}

/// Receives each final transcript, lower-cased
pub type CommandHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Receives recognition status updates
pub type StatusHandler = Arc<dyn Fn(VoiceStatus) + Send + Sync>;

/// One speaker, one listener
pub struct VoiceChannel {
    synth: Arc<dyn SpeechSynthesizer>,
    recognizer: Arc<dyn SpeechRecognizer>,
    voice: VoiceConfig,
    default_mode: NarrationMode,
    mode: Mutex<NarrationMode>,
    speaking: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    current: Mutex<Option<JoinHandle<()>>>,
    listening: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    on_command: Arc<RwLock<Option<CommandHandler>>>,
    on_status: Arc<RwLock<Option<StatusHandler>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VoiceChannel {
    #[must_use]
    pub fn new(
        synth: Arc<dyn SpeechSynthesizer>,
        recognizer: Arc<dyn SpeechRecognizer>,
        voice: VoiceConfig,
        default_mode: NarrationMode,
    ) -> Self {
        Self {
            synth,
            recognizer,
            voice,
            default_mode,
            mode: Mutex::new(default_mode),
            speaking: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            current: Mutex::new(None),
            listening: Arc::new(AtomicBool::new(false)),
            listener: Mutex::new(None),
            on_command: Arc::new(RwLock::new(None)),
            on_status: Arc::new(RwLock::new(None)),
        }
    }

    /// Speak `text`; see the module docs for arbitration rules
    ///
    /// Must be called from within a Tokio runtime.
    pub fn speak(&self, text: &str, urgent: bool) -> SpeakOutcome {
        self.enqueue(text, urgent, false)
    }

    /// Urgent speech preceded by the alert tone
    pub fn alert(&self, text: &str) -> SpeakOutcome {
        self.enqueue(text, true, true)
    }

    fn enqueue(&self, text: &str, urgent: bool, tone: bool) -> SpeakOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SpeakOutcome::Dropped;
        }

        let mut current = lock(&self.current);
        let mut outcome = SpeakOutcome::Started;
        if self.speaking.load(Ordering::SeqCst) {
            if !urgent {
                tracing::trace!(text, "already speaking, dropping utterance");
                return SpeakOutcome::Dropped;
            }
            if let Some(handle) = current.take() {
                handle.abort();
            }
            self.synth.cancel();
            outcome = SpeakOutcome::Preempted;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.speaking.store(true, Ordering::SeqCst);

        let synth = Arc::clone(&self.synth);
        let speaking = Arc::clone(&self.speaking);
        let latest = Arc::clone(&self.generation);
        let utterance = Utterance::new(text, &self.voice);
        tracing::debug!(text, urgent, "speaking");

        let handle = tokio::spawn(async move {
            if tone {
                if let Err(e) = synth.alert_tone().await {
                    tracing::debug!(error = %e, "alert tone failed");
                }
            }
            if let Err(e) = synth.speak(&utterance).await {
                tracing::warn!(error = %e, "speech synthesis failed");
            }
            // A newer utterance owns the flag now
            if latest.load(Ordering::SeqCst) == generation {
                speaking.store(false, Ordering::SeqCst);
            }
        });
        *current = Some(handle);
        outcome
    }

    /// Cut off the current utterance, if any
    pub fn cancel(&self) {
        if let Some(handle) = lock(&self.current).take() {
            handle.abort();
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.speaking.store(false, Ordering::SeqCst);
        self.synth.cancel();
    }

    /// Register the callback for recognized commands
    pub fn on_command<F>(&self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.on_command.write() {
            *slot = Some(Arc::new(handler));
        }
    }

    /// Register the callback for recognition status
    pub fn on_status<F>(&self, handler: F)
    where
        F: Fn(VoiceStatus) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.on_status.write() {
            *slot = Some(Arc::new(handler));
        }
    }

    /// Begin continuous recognition
    ///
    /// Must be called from within a Tokio runtime. No-op if already listening.
    pub fn start_listening(&self) {
        let mut listener = lock(&self.listener);
        if self.listening.swap(true, Ordering::SeqCst)
            && listener.as_ref().is_some_and(|h| !h.is_finished())
        {
            return;
        }

        let recognizer = Arc::clone(&self.recognizer);
        let listening = Arc::clone(&self.listening);
        let on_command = Arc::clone(&self.on_command);
        let on_status = Arc::clone(&self.on_status);
        let language = self.voice.language.clone();

        tracing::info!(language = %language, "listening for commands");
        *listener = Some(tokio::spawn(async move {
            listen_loop(recognizer, language, listening, on_command, on_status).await;
        }));
    }

    /// End continuous recognition
    pub fn stop_listening(&self) {
        let was_listening = self.listening.swap(false, Ordering::SeqCst);
        self.recognizer.stop();
        if let Some(handle) = lock(&self.listener).take() {
            handle.abort();
        }
        if was_listening {
            tracing::info!("stopped listening");
        }
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn mode(&self) -> NarrationMode {
        *lock(&self.mode)
    }

    pub fn set_mode(&self, mode: NarrationMode) {
        *lock(&self.mode) = mode;
        tracing::info!(?mode, "narration mode changed");
    }

    /// Flip between verbose and quiet, returning the new mode
    pub fn toggle_mode(&self) -> NarrationMode {
        let mut mode = lock(&self.mode);
        *mode = mode.toggled();
        tracing::info!(mode = ?*mode, "narration mode changed");
        *mode
    }

    #[must_use]
    pub fn state(&self) -> VoiceState {
        VoiceState {
            speaking: self.is_speaking(),
            listening: self.is_listening(),
            mode: self.mode(),
        }
    }

    /// Stop speaking and restore the configured mode (system stop)
    pub fn reset(&self) {
        self.cancel();
        *lock(&self.mode) = self.default_mode;
    }

    /// Stop everything (session dispose)
    pub fn shutdown(&self) {
        self.stop_listening();
        self.cancel();
    }
}

impl Drop for VoiceChannel {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.listener).take() {
            handle.abort();
        }
        if let Some(handle) = lock(&self.current).take() {
            handle.abort();
        }
    }
}

fn report(on_status: &RwLock<Option<StatusHandler>>, status: VoiceStatus) {
    let handler = on_status.read().ok().and_then(|slot| slot.clone());
    if let Some(handler) = handler {
        handler(status);
    }
}

async fn listen_loop(
    recognizer: Arc<dyn SpeechRecognizer>,
    language: String,
    listening: Arc<AtomicBool>,
    on_command: Arc<RwLock<Option<CommandHandler>>>,
    on_status: Arc<RwLock<Option<StatusHandler>>>,
) {
    while listening.load(Ordering::SeqCst) {
        let mut events = match recognizer.start(&language).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(error = %e, "speech recognition failed to start");
                listening.store(false, Ordering::SeqCst);
                report(&on_status, VoiceStatus::RecognitionFailed(e.to_string()));
                return;
            }
        };

        while let Some(event) = events.recv().await {
            match event {
                RecognitionEvent::Result(result) => {
                    let Some(best) = result.best() else {
                        continue;
                    };
                    let text = best.transcript.trim().to_lowercase();
                    if text.is_empty() {
                        continue;
                    }
                    if !result.is_final {
                        report(&on_status, VoiceStatus::Interim(text));
                        continue;
                    }

                    tracing::info!(transcript = %text, confidence = best.confidence, "command heard");
                    report(&on_status, VoiceStatus::Heard(text.clone()));
                    let handler = on_command.read().ok().and_then(|slot| slot.clone());
                    if let Some(handler) = handler {
                        handler(text);
                    }
                }
                RecognitionEvent::Error(message) => {
                    tracing::debug!(error = %message, "recognition error");
                    report(&on_status, VoiceStatus::RecognitionError(message));
                }
                RecognitionEvent::Ended => break,
            }
        }

        if listening.load(Ordering::SeqCst) {
            tracing::debug!("recognition segment ended, restarting");
            tokio::time::sleep(RESTART_DELAY).await;
        }
    }
}
