//! Speech recognition capability
//!
//! Engines stop on their own after a pause; each [`SpeechRecognizer::start`]
//! call opens one recognition segment whose events end with
//! [`RecognitionEvent::Ended`] or a closed channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;

/// One candidate transcript
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub transcript: String,
    pub confidence: f32,
}

/// A recognition result with its alternatives
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    /// Interim results may still change; only final ones are commands
    pub is_final: bool,
    pub alternatives: Vec<Alternative>,
}

impl RecognitionResult {
    /// Final result with a single alternative
    #[must_use]
    pub fn final_text(transcript: impl Into<String>, confidence: f32) -> Self {
        Self {
            is_final: true,
            alternatives: vec![Alternative {
                transcript: transcript.into(),
                confidence,
            }],
        }
    }

    /// Highest-confidence alternative
    #[must_use]
    pub fn best(&self) -> Option<&Alternative> {
        self.alternatives
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// Event from a running recognition segment
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Result(RecognitionResult),
    /// Non-fatal engine error (no speech, network hiccup)
    Error(String),
    /// The engine stopped listening
    Ended,
}

/// Speech-to-text engine
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Start one recognition segment in `language`
    async fn start(&self, language: &str) -> Result<mpsc::Receiver<RecognitionEvent>>;

    /// Stop the current segment, if any
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_alternative_by_confidence() {
        let result = RecognitionResult {
            is_final: true,
            alternatives: vec![
                Alternative {
                    transcript: "iniciar".to_string(),
                    confidence: 0.4,
                },
                Alternative {
                    transcript: "Iniciar sistema".to_string(),
                    confidence: 0.9,
                },
            ],
        };
        assert_eq!(result.best().unwrap().transcript, "Iniciar sistema");

        let empty = RecognitionResult {
            is_final: true,
            alternatives: vec![],
        };
        assert!(empty.best().is_none());
    }
}
