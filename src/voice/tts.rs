//! Hosted text-to-speech

use secrecy::{ExposeSecret, SecretString};

use crate::config::VoiceConfig;
use crate::{Error, Result};

const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Synthesizes speech from text through the `OpenAI` speech endpoint
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
    voice: String,
    speed: f32,
    model: String,
}

impl TextToSpeech {
    /// Create a TTS client from the voice settings
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty
    pub fn new(api_key: SecretString, voice: &VoiceConfig) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: OPENAI_SPEECH_URL.to_string(),
            voice: voice.tts_voice.clone(),
            speed: voice.tts_speed,
            model: voice.tts_model.clone(),
        })
    }

    /// Point at a compatible speech endpoint instead of `OpenAI`'s
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Synthesize text to speech
    ///
    /// Returns MP3 bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the service rejects it
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), "speech synthesized");
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        let result = TextToSpeech::new(SecretString::from(String::new()), &VoiceConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_voice_settings_applied() {
        let voice = VoiceConfig {
            tts_voice: "nova".to_string(),
            tts_speed: 1.25,
            ..VoiceConfig::default()
        };
        let tts = TextToSpeech::new(SecretString::from("sk-test".to_string()), &voice)
            .unwrap()
            .with_endpoint("http://localhost:9/speech");
        assert_eq!(tts.voice, "nova");
        assert!((tts.speed - 1.25).abs() < f32::EPSILON);
        assert_eq!(tts.model, "tts-1");
        assert_eq!(tts.endpoint, "http://localhost:9/speech");
    }
}
