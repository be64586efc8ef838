//! Voice processing module
//!
//! [`VoiceChannel`] arbitrates one speaker and one always-on recognizer.
//! Engines plug in through [`SpeechSynthesizer`] and [`SpeechRecognizer`];
//! [`TextToSpeech`] is the HTTP synthesis backend, played through the
//! speakers when the `audio` feature is enabled.

mod channel;
#[cfg(feature = "audio")]
mod playback;
mod recognition;
mod synthesis;
mod tts;

pub use channel::{CommandHandler, NarrationMode, SpeakOutcome, StatusHandler, VoiceChannel, VoiceState, VoiceStatus};
#[cfg(feature = "audio")]
pub use playback::{AudioPlayback, SpeakerSynthesizer};
pub use recognition::{Alternative, RecognitionEvent, RecognitionResult, SpeechRecognizer};
pub use synthesis::{SpeechSynthesizer, Utterance};
pub use tts::TextToSpeech;
