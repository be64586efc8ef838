//! Speech synthesis capability

use async_trait::async_trait;

use crate::Result;
use crate::config::VoiceConfig;

/// One thing to say, with the voice settings to say it in
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub language: String,
    pub rate: f32,
    pub pitch: f32,
}

impl Utterance {
    #[must_use]
    pub fn new(text: impl Into<String>, voice: &VoiceConfig) -> Self {
        Self {
            text: text.into(),
            language: voice.language.clone(),
            rate: voice.rate,
            pitch: voice.pitch,
        }
    }
}

/// Text-to-speech engine
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `utterance`, returning once it has finished playing
    async fn speak(&self, utterance: &Utterance) -> Result<()>;

    /// Stop whatever is playing right now
    fn cancel(&self);

    /// Play a short alert sound
    async fn alert_tone(&self) -> Result<()> {
        Ok(())
    }
}
