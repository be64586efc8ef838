//! Session lifecycle and the frame loop
//!
//! A [`Session`] owns every collaborator and moves through
//! `Stopped → Starting → Running → Stopped`. Start acquires the frame source
//! and schedules the frame loop; stop undoes all of it in one transaction.
//! The loop runs one tick at a time: frame, detect, plan, draw, speak.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::commands::{CommandRouter, Intent};
use crate::config::NarratorConfig;
use crate::coordinator::{DetectionCoordinator, FramePlan};
use crate::detection::{Detector, FrameSource};
use crate::llm::LanguageModel;
use crate::overlay::Overlay;
use crate::voice::{NarrationMode, SpeechRecognizer, SpeechSynthesizer, VoiceChannel, VoiceStatus};
use crate::{Error, Result};

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Stopped,
    Starting,
    Running,
}

/// Published state plus the latest status line
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub state: SessionState,
    pub message: Option<String>,
}

/// External collaborators a session drives
pub struct SessionParts {
    pub source: Arc<dyn FrameSource>,
    pub detector: Arc<dyn Detector>,
    pub overlay: Arc<dyn Overlay>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    /// `None` answers every question with the fallback phrase
    pub language_model: Option<Arc<dyn LanguageModel>>,
}

/// Frame loop handle and its shutdown signal
#[derive(Default)]
struct Lifecycle {
    frame_loop: Option<JoinHandle<()>>,
    shutdown: Option<mpsc::Sender<()>>,
}

struct Inner {
    config: Arc<NarratorConfig>,
    source: Arc<dyn FrameSource>,
    detector: Arc<dyn Detector>,
    overlay: Arc<dyn Overlay>,
    voice: VoiceChannel,
    router: CommandRouter,
    coordinator: Mutex<DetectionCoordinator>,
    /// Serializes start and stop transactions
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    status: watch::Sender<SessionStatus>,
}

/// One narrated camera session
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

/// Longest wait for the frame source to report its first frame geometry
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Transcripts waiting for the command task
const COMMAND_QUEUE: usize = 16;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Build a stopped session and begin listening for commands
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn create(config: Arc<NarratorConfig>, parts: SessionParts) -> Self {
        let default_mode = if config.announce.verbose {
            NarrationMode::Verbose
        } else {
            NarrationMode::Quiet
        };
        let voice = VoiceChannel::new(
            parts.synthesizer,
            parts.recognizer,
            config.voice.clone(),
            default_mode,
        );
        let router = CommandRouter::new(
            config.commands.clone(),
            config.phrases.clone(),
            parts.language_model,
        );
        let (status, _) = watch::channel(SessionStatus::default());

        let inner = Arc::new(Inner {
            coordinator: Mutex::new(DetectionCoordinator::new(Arc::clone(&config))),
            config,
            source: parts.source,
            detector: parts.detector,
            overlay: parts.overlay,
            voice,
            router,
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            status,
        });

        // Commands run one at a time, in the order they were heard
        let (command_tx, command_rx) = mpsc::channel::<String>(COMMAND_QUEUE);
        inner.voice.on_command(move |text| {
            if let Err(e) = command_tx.try_send(text) {
                tracing::warn!(error = %e, "command queue full, dropping transcript");
            }
        });
        // Weak so the command task does not keep the session alive
        tokio::spawn(command_loop(Arc::downgrade(&inner), command_rx));

        let weak = Arc::downgrade(&inner);
        inner.voice.on_status(move |status| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.publish_message(status_line(&status));
            }
        });

        inner.voice.start_listening();
        tracing::debug!("session created");
        Self { inner }
    }

    /// Acquire the frame source and start the frame loop
    ///
    /// No-op unless stopped. On failure the session is back to stopped, the
    /// failure is published as status and spoken.
    ///
    /// # Errors
    ///
    /// Returns the acquisition error
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if self.state() != SessionState::Stopped {
            tracing::debug!(state = ?self.state(), "start ignored");
            return Ok(());
        }

        self.inner.publish(SessionState::Starting, None);
        tracing::info!("starting session");

        let acquired = tokio::time::timeout(ACQUIRE_TIMEOUT, self.inner.source.acquire())
            .await
            .unwrap_or_else(|_| Err(Error::Acquisition("timed out waiting for first frame".to_string())));
        let geometry = match acquired {
            Ok(geometry) => geometry,
            Err(e) => {
                tracing::error!(error = %e, "frame source acquisition failed");
                self.inner.source.release().await;
                self.inner.publish(SessionState::Stopped, Some(e.to_string()));
                self.inner.voice.speak(&self.inner.config.phrases.acquisition_failed, true);
                return Err(e);
            }
        };
        self.inner.overlay.resize(geometry);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let inner = Arc::clone(&self.inner);
        lifecycle.frame_loop = Some(tokio::spawn(frame_loop(inner, shutdown_rx)));
        lifecycle.shutdown = Some(shutdown_tx);

        self.inner.publish(SessionState::Running, None);
        tracing::info!(width = geometry.width, height = geometry.height, "session running");
        self.inner.voice.speak(&self.inner.config.phrases.started, false);
        Ok(())
    }

    /// Halt the loop, release the source, clear throttle and overlay
    ///
    /// Idempotent.
    pub async fn stop(&self) {
        if self.inner.teardown(None).await {
            self.inner.voice.speak(&self.inner.config.phrases.stopped, false);
        }
    }

    /// Stop and shut down speech input and output
    pub async fn dispose(self) {
        self.inner.teardown(None).await;
        self.inner.voice.shutdown();
        tracing::debug!("session disposed");
    }

    /// Route a final transcript as if it had been heard
    pub async fn handle_command(&self, transcript: &str) -> Option<Intent> {
        self.inner.router.dispatch(self, transcript).await
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.status.borrow().state
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch state and status line changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    #[must_use]
    pub fn voice(&self) -> &VoiceChannel {
        &self.inner.voice
    }

    #[must_use]
    pub fn router(&self) -> &CommandRouter {
        &self.inner.router
    }

    /// Spoken names of what the last frame showed
    #[must_use]
    pub fn current_labels(&self) -> Vec<String> {
        lock(&self.inner.coordinator).current_labels().to_vec()
    }

    #[must_use]
    pub fn config(&self) -> &NarratorConfig {
        &self.inner.config
    }
}

impl Inner {
    fn publish(&self, state: SessionState, message: Option<String>) {
        self.status.send_replace(SessionStatus { state, message });
    }

    fn publish_message(&self, message: String) {
        self.status.send_modify(|s| s.message = Some(message));
    }

    /// The stop transaction; returns whether anything was running
    async fn teardown(&self, reason: Option<String>) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        let running = lifecycle.frame_loop.is_some();

        if let Some(shutdown) = lifecycle.shutdown.take() {
            let _ = shutdown.try_send(());
        }
        if let Some(handle) = lifecycle.frame_loop.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "frame loop ended abnormally");
            }
        }
        if !running {
            tracing::debug!("stop ignored, already stopped");
            return false;
        }

        self.source.release().await;
        lock(&self.coordinator).reset();
        if let Err(e) = self.overlay.clear() {
            tracing::warn!(error = %e, "failed to clear overlay");
        }
        self.voice.reset();
        self.publish(SessionState::Stopped, reason);
        tracing::info!("session stopped");
        true
    }

    /// One frame: acquire, detect, plan, draw, speak
    async fn tick(&self) -> Result<FramePlan> {
        let frame = self.source.next_frame().await?;
        let detections = self.detector.detect(&frame).await?;
        tracing::trace!(count = detections.len(), "detections");

        let plan = lock(&self.coordinator).process(&frame, &detections, self.voice.mode());

        let drawn = self.overlay.render(&plan.overlay);
        for announcement in &plan.announcements {
            if announcement.urgent {
                self.voice.alert(&announcement.text);
            } else {
                self.voice.speak(&announcement.text, false);
            }
        }
        drawn?;
        Ok(plan)
    }
}

async fn frame_loop(inner: Arc<Inner>, mut shutdown: mpsc::Receiver<()>) {
    let mut interval = tokio::time::interval(inner.config.detection.frame_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = interval.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            result = inner.tick() => result,
        };

        match result {
            Ok(_) => {}
            Err(Error::Acquisition(message)) => {
                tracing::error!(error = %message, "frame source lost");
                let inner = Arc::clone(&inner);
                // Teardown waits on this task, so it has to run elsewhere
                tokio::spawn(async move {
                    if inner.teardown(Some(message)).await {
                        inner.voice.speak(&inner.config.phrases.acquisition_failed, true);
                    }
                });
                break;
            }
            Err(e) if e.is_tick_local() => {
                tracing::warn!(error = %e, "frame tick failed");
            }
            Err(e) => {
                tracing::error!(error = %e, "frame tick failed");
            }
        }
    }
    tracing::debug!("frame loop exited");
}

/// Apply heard commands in order
///
/// Control intents finish before the next transcript is read. Questions wait
/// on a remote call, so they are answered on their own task and never hold
/// up a later stop.
async fn command_loop(weak: Weak<Inner>, mut commands: mpsc::Receiver<String>) {
    while let Some(text) = commands.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let session = Session { inner };
        let intent = session.inner.router.route(&text);
        match intent {
            Some(intent @ Intent::Ask(_)) => {
                tokio::spawn(async move {
                    session.inner.router.execute(&session, intent).await;
                });
            }
            Some(intent) => session.inner.router.execute(&session, intent).await,
            None => tracing::debug!(transcript = %text, "no command matched"),
        }
    }
    tracing::debug!("command loop exited");
}

fn status_line(status: &VoiceStatus) -> String {
    match status {
        VoiceStatus::Heard(text) => format!("heard: {text}"),
        VoiceStatus::Interim(text) => format!("hearing: {text}"),
        VoiceStatus::RecognitionFailed(e) => format!("speech recognition unavailable: {e}"),
        VoiceStatus::RecognitionError(e) => format!("speech recognition error: {e}"),
    }
}
