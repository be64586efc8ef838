//! TOML configuration file loading
//!
//! Supports `~/.config/vision-narrator/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct NarratorConfigFile {
    #[serde(default)]
    pub detection: DetectionFileConfig,

    #[serde(default)]
    pub announce: AnnounceFileConfig,

    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Detector label → spoken name
    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default)]
    pub phrases: PhrasesFileConfig,

    #[serde(default)]
    pub commands: CommandsFileConfig,

    #[serde(default)]
    pub llm: LlmFileConfig,

    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Detection and geometry tuning
#[derive(Debug, Default, Deserialize)]
pub struct DetectionFileConfig {
    pub score_threshold: Option<f64>,
    pub frame_interval_ms: Option<u64>,
    pub focal_length_px: Option<f64>,
    pub fallback_height_m: Option<f64>,
    /// Label → assumed real-world height in meters (merged over defaults)
    #[serde(default)]
    pub heights: HashMap<String, f64>,
    pub threat_labels: Option<Vec<String>>,
    pub elongation_threshold: Option<f64>,
    pub color_sample_radius: Option<u32>,
}

/// Cooldowns and narration defaults
#[derive(Debug, Default, Deserialize)]
pub struct AnnounceFileConfig {
    pub sighting_cooldown_ms: Option<u64>,
    pub alert_cooldown_ms: Option<u64>,
    pub held_cooldown_ms: Option<u64>,
    pub stability_window_ms: Option<u64>,
    pub retrigger_guard_ms: Option<u64>,
    pub verbose: Option<bool>,
}

/// Speech settings
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    pub language: Option<String>,
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,
}

/// Spoken message templates
#[derive(Debug, Default, Deserialize)]
pub struct PhrasesFileConfig {
    pub started: Option<String>,
    pub stopped: Option<String>,
    pub acquisition_failed: Option<String>,
    pub sighting: Option<String>,
    pub one_person: Option<String>,
    pub many_persons: Option<String>,
    pub held: Option<String>,
    pub threat: Option<String>,
    pub distance: Option<String>,
    pub color: Option<String>,
    pub verbose_on: Option<String>,
    pub quiet_on: Option<String>,
    pub fallback: Option<String>,
    /// Color family / shade key → spoken word
    #[serde(default)]
    pub colors: HashMap<String, String>,
}

/// Command keyword lists
#[derive(Debug, Default, Deserialize)]
pub struct CommandsFileConfig {
    pub start: Option<Vec<String>>,
    pub stop: Option<Vec<String>>,
    pub verbose: Option<Vec<String>>,
    pub quiet: Option<Vec<String>>,
    pub toggle: Option<Vec<String>>,
    pub question: Option<Vec<String>>,
}

/// Remote language model endpoint
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    /// "bearer" or "query"
    pub auth: Option<String>,
    pub query_param: Option<String>,
    pub prompt_field: Option<String>,
    pub prompt_template: Option<String>,
    pub instruction_marker: Option<String>,
    pub max_new_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub timeout_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file from `NARRATOR_CONFIG` or the standard path
///
/// Returns `NarratorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> NarratorConfigFile {
    let path = std::env::var("NARRATOR_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(config_file_path);

    let Some(path) = path else {
        return NarratorConfigFile::default();
    };

    if !path.exists() {
        return NarratorConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            NarratorConfigFile::default()
        }
    }
}

/// Read and parse one config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> crate::Result<NarratorConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/vision-narrator/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("vision-narrator").join("config.toml"))
}
