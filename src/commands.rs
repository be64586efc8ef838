//! Spoken command routing
//!
//! A transcript maps to at most one [`Intent`] by keyword containment, checked
//! in a fixed precedence: stop, start, verbose, quiet, toggle, question.
//! Control words always win over a question that happens to contain them.

use std::sync::Arc;

use crate::config::{CommandLexicon, Phrasebook};
use crate::llm::LanguageModel;
use crate::session::Session;
use crate::voice::NarrationMode;

/// What a transcript asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Start,
    Stop,
    Verbose,
    Quiet,
    ToggleMode,
    /// Free-form question for the language model
    Ask(String),
}

/// Maps transcripts to session actions
pub struct CommandRouter {
    lexicon: CommandLexicon,
    phrases: Phrasebook,
    model: Option<Arc<dyn LanguageModel>>,
}

impl CommandRouter {
    #[must_use]
    pub fn new(
        lexicon: CommandLexicon,
        phrases: Phrasebook,
        model: Option<Arc<dyn LanguageModel>>,
    ) -> Self {
        Self {
            lexicon,
            phrases,
            model,
        }
    }

    /// Classify a transcript; `None` when nothing matches
    #[must_use]
    pub fn route(&self, transcript: &str) -> Option<Intent> {
        let text = transcript.trim().to_lowercase();
        if text.is_empty() {
            return None;
        }
        let hit = |words: &[String]| words.iter().any(|w| !w.is_empty() && text.contains(w.as_str()));

        let intent = if hit(&self.lexicon.stop) {
            Intent::Stop
        } else if hit(&self.lexicon.start) {
            Intent::Start
        } else if hit(&self.lexicon.verbose) {
            Intent::Verbose
        } else if hit(&self.lexicon.quiet) {
            Intent::Quiet
        } else if hit(&self.lexicon.toggle) {
            Intent::ToggleMode
        } else if self.lexicon.question.is_empty() || hit(&self.lexicon.question) {
            Intent::Ask(text)
        } else {
            return None;
        };
        Some(intent)
    }

    /// Route `transcript` and carry out the intent against `session`
    ///
    /// Never fails: errors are logged and, for questions, answered with the
    /// fallback phrase.
    pub async fn dispatch(&self, session: &Session, transcript: &str) -> Option<Intent> {
        let Some(intent) = self.route(transcript) else {
            tracing::debug!(transcript, "no command matched");
            return None;
        };
        self.execute(session, intent.clone()).await;
        Some(intent)
    }

    /// Carry out an already routed intent against `session`
    pub async fn execute(&self, session: &Session, intent: Intent) {
        tracing::info!(?intent, "command");

        let voice = session.voice();
        match intent {
            Intent::Start => {
                if let Err(e) = session.start().await {
                    tracing::warn!(error = %e, "start command failed");
                }
            }
            Intent::Stop => session.stop().await,
            Intent::Verbose => {
                voice.set_mode(NarrationMode::Verbose);
                voice.speak(&self.phrases.verbose_on, true);
            }
            Intent::Quiet => {
                voice.set_mode(NarrationMode::Quiet);
                voice.speak(&self.phrases.quiet_on, true);
            }
            Intent::ToggleMode => {
                let phrase = match voice.toggle_mode() {
                    NarrationMode::Verbose => &self.phrases.verbose_on,
                    NarrationMode::Quiet => &self.phrases.quiet_on,
                };
                voice.speak(phrase, true);
            }
            Intent::Ask(question) => {
                let answer = self.answer(&session.current_labels(), &question).await;
                voice.speak(&answer, true);
            }
        }
    }

    /// Ask the language model, falling back to the apology phrase
    pub async fn answer(&self, labels: &[String], question: &str) -> String {
        let Some(model) = &self.model else {
            tracing::debug!("no language model configured");
            return self.phrases.fallback.clone();
        };
        match model.ask(labels, question).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, "language model call failed");
                self.phrases.fallback.clone()
            }
        }
    }
}
