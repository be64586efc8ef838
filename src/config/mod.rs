//! Configuration management for the vision narrator
//!
//! Values are layered env > TOML file > defaults. Everything here is read-only
//! once a session is built.

pub mod file;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use secrecy::SecretString;

use crate::geometry::{DistanceModel, FALLBACK_HEIGHT_M};
use crate::{Error, Result};

/// Vision narrator configuration
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    /// Detection thresholds and geometry calibration
    pub detection: DetectionConfig,

    /// Cooldowns and narration mode
    pub announce: AnnounceConfig,

    /// Speech output settings
    pub voice: VoiceConfig,

    /// Detector label → spoken name
    pub labels: HashMap<String, String>,

    /// Spoken message templates
    pub phrases: Phrasebook,

    /// Command keyword lists
    pub commands: CommandLexicon,

    /// Remote language model endpoint
    pub llm: LlmConfig,

    /// API keys for external services
    pub api_keys: ApiKeys,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            announce: AnnounceConfig::default(),
            voice: VoiceConfig::default(),
            labels: default_labels(),
            phrases: Phrasebook::default(),
            commands: CommandLexicon::default(),
            llm: LlmConfig::default(),
            api_keys: ApiKeys::default(),
        }
    }
}

/// Detection thresholds and geometry calibration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Detections at or below this score are ignored
    pub score_threshold: f64,

    /// Pause between frame ticks
    pub frame_interval: Duration,

    /// Label heights and focal length for distance estimates
    pub distance: DistanceModel,

    /// Labels that are always treated as threats when held
    pub threat_labels: HashSet<String>,

    /// Long/short side ratio above which a held object looks weapon-like
    pub elongation_threshold: f64,

    /// Radius of the pixel neighborhood averaged for color sampling
    pub color_sample_radius: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.66,
            frame_interval: Duration::from_millis(33),
            distance: DistanceModel {
                heights: default_heights(),
                focal_length: 600.0,
                fallback_height: FALLBACK_HEIGHT_M,
            },
            threat_labels: ["knife", "scissors", "baseball bat"]
                .into_iter()
                .map(String::from)
                .collect(),
            elongation_threshold: 2.0,
            color_sample_radius: 3,
        }
    }
}

/// Cooldowns and narration mode
#[derive(Debug, Clone)]
pub struct AnnounceConfig {
    /// Cooldown for plain object sightings
    pub sighting_cooldown: Duration,

    /// Cooldown for held threat alerts
    pub alert_cooldown: Duration,

    /// Cooldown for benign held objects
    pub held_cooldown: Duration,

    /// How long the person count must hold before it is announced
    pub stability_window: Duration,

    /// After a held condition ends, how long it must hold again before re-alerting
    pub retrigger_guard: Duration,

    /// Start sessions in verbose mode
    pub verbose: bool,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            sighting_cooldown: Duration::from_millis(7000),
            alert_cooldown: Duration::from_millis(9000),
            held_cooldown: Duration::from_millis(9000),
            stability_window: Duration::from_millis(2000),
            retrigger_guard: Duration::from_millis(1000),
            verbose: false,
        }
    }
}

/// Speech output settings
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// BCP-47 language tag passed to the synthesizer
    pub language: String,

    /// Speaking rate multiplier
    pub rate: f32,

    /// Pitch multiplier
    pub pitch: f32,

    /// TTS model for the HTTP synthesizer (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language: "es-ES".to_string(),
            rate: 1.0,
            pitch: 1.0,
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
        }
    }
}

/// Spoken message templates
///
/// Placeholders are written `{name}` and filled by [`Phrasebook::render`].
#[derive(Debug, Clone)]
pub struct Phrasebook {
    pub started: String,
    pub stopped: String,
    pub acquisition_failed: String,
    /// `{object}`
    pub sighting: String,
    pub one_person: String,
    /// `{count}`
    pub many_persons: String,
    /// `{object}`
    pub held: String,
    /// `{object}`
    pub threat: String,
    /// `{distance}`
    pub distance: String,
    /// `{color}`
    pub color: String,
    pub verbose_on: String,
    pub quiet_on: String,
    /// Spoken when the remote model fails
    pub fallback: String,
    /// Color family and shade keys → spoken words; an empty word is skipped
    pub colors: HashMap<String, String>,
}

impl Default for Phrasebook {
    fn default() -> Self {
        let colors = [
            ("black", "negro"),
            ("white", "blanco"),
            ("blue", "azul"),
            ("red", "rojo"),
            ("green", "verde"),
            ("yellow", "amarillo"),
            ("gray", "gris"),
            ("light", "claro"),
            ("medium", ""),
            ("dark", "oscuro"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            started: "Sistema iniciado".to_string(),
            stopped: "Cámara apagada".to_string(),
            acquisition_failed: "No se pudo acceder a la cámara".to_string(),
            sighting: "Veo: {object}".to_string(),
            one_person: "Veo una persona".to_string(),
            many_persons: "Veo {count} personas".to_string(),
            held: "Persona con {object} en la mano".to_string(),
            threat: "Alerta: persona con {object}".to_string(),
            distance: "a {distance} metros".to_string(),
            color: "de color {color}".to_string(),
            verbose_on: "Modo detallado activado".to_string(),
            quiet_on: "Modo breve activado".to_string(),
            fallback: "Lo siento, no pude obtener una respuesta".to_string(),
            colors,
        }
    }
}

impl Phrasebook {
    /// Fill `{name}` placeholders in `template`
    #[must_use]
    pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
        vars.iter().fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), value)
        })
    }

    /// Spoken form of a color descriptor, e.g. "azul oscuro"
    #[must_use]
    pub fn color_words(&self, descriptor: crate::geometry::ColorDescriptor) -> String {
        let word = |key: &str| self.colors.get(key).cloned().unwrap_or_else(|| key.to_string());
        let family = word(descriptor.family.key());
        match descriptor.shade.map(|s| word(s.key())) {
            Some(shade) if !shade.is_empty() => format!("{family} {shade}"),
            _ => family,
        }
    }
}

/// Keyword lists for spoken commands (lower-case substrings)
#[derive(Debug, Clone)]
pub struct CommandLexicon {
    pub start: Vec<String>,
    pub stop: Vec<String>,
    pub verbose: Vec<String>,
    pub quiet: Vec<String>,
    pub toggle: Vec<String>,
    /// Empty list forwards every unmatched transcript
    pub question: Vec<String>,
}

impl Default for CommandLexicon {
    fn default() -> Self {
        let words = |list: &[&str]| -> Vec<String> { list.iter().map(ToString::to_string).collect() };
        Self {
            start: words(&["iniciar", "activar", "start"]),
            stop: words(&["detener", "parar", "desactivar", "apagar", "stop"]),
            verbose: words(&["modo detallado", "más detalles"]),
            quiet: words(&["modo breve", "menos detalles"]),
            toggle: words(&["cambiar modo"]),
            question: words(&[
                "pregunta", "dime", "qué", "cuántos", "cuántas", "dónde", "describe",
            ]),
        }
    }
}

/// How the credential is attached to remote model requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthStyle {
    /// `Authorization: Bearer <token>`
    #[default]
    Bearer,
    /// `?<query_param>=<token>`
    Query,
}

impl std::str::FromStr for AuthStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bearer" => Ok(Self::Bearer),
            "query" => Ok(Self::Query),
            other => Err(Error::Config(format!("unknown llm auth style: {other}"))),
        }
    }
}

/// Remote language model endpoint
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Inference endpoint; `None` disables questions
    pub url: Option<String>,

    /// Credential, never logged
    pub token: Option<SecretString>,

    pub auth: AuthStyle,

    /// Query parameter name for [`AuthStyle::Query`]
    pub query_param: String,

    /// Request body field that carries the prompt (`inputs` for Hugging Face endpoints)
    pub prompt_field: String,

    /// Prompt with `{labels}` and `{question}` placeholders
    pub prompt_template: String,

    /// Everything up to and including this marker is stripped from the reply
    pub instruction_marker: String,

    pub max_new_tokens: u32,

    pub temperature: f64,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            auth: AuthStyle::Bearer,
            query_param: "key".to_string(),
            prompt_field: "prompt".to_string(),
            prompt_template: "<s>[INST] Eres un asistente de visión para una persona con \
                discapacidad visual. La cámara detecta: {labels}. Responde en una o dos \
                frases. Pregunta: {question} [/INST]"
                .to_string(),
            instruction_marker: "[/INST]".to_string(),
            max_new_tokens: 120,
            temperature: 0.7,
            timeout: Duration::from_secs(15),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (HTTP TTS)
    pub openai: Option<SecretString>,
}

impl NarratorConfig {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is out of range
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |name| std::env::var(name).ok())
    }

    /// Load configuration from an explicit file instead of the default location
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or a value is out of range
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let fc = file::read_config_file(path)?;
        Self::from_sources(fc, |name| std::env::var(name).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is out of range
    pub fn from_sources(
        fc: file::NarratorConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        // Detection (env > toml > default)
        let d = defaults.detection;
        let mut heights = d.distance.heights;
        heights.extend(
            fc.detection
                .heights
                .into_iter()
                .map(|(label, meters)| (label.to_lowercase(), meters)),
        );
        let detection = DetectionConfig {
            score_threshold: env("NARRATOR_SCORE_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .or(fc.detection.score_threshold)
                .unwrap_or(d.score_threshold),
            frame_interval: fc
                .detection
                .frame_interval_ms
                .map_or(d.frame_interval, Duration::from_millis),
            distance: DistanceModel {
                heights,
                focal_length: fc.detection.focal_length_px.unwrap_or(d.distance.focal_length),
                fallback_height: fc
                    .detection
                    .fallback_height_m
                    .unwrap_or(d.distance.fallback_height),
            },
            threat_labels: fc
                .detection
                .threat_labels
                .map_or(d.threat_labels, |labels| {
                    labels.into_iter().map(|l| l.to_lowercase()).collect()
                }),
            elongation_threshold: fc
                .detection
                .elongation_threshold
                .unwrap_or(d.elongation_threshold),
            color_sample_radius: fc
                .detection
                .color_sample_radius
                .unwrap_or(d.color_sample_radius),
        };

        let a = defaults.announce;
        let ms = |value: Option<u64>, fallback: Duration| value.map_or(fallback, Duration::from_millis);
        let announce = AnnounceConfig {
            sighting_cooldown: ms(fc.announce.sighting_cooldown_ms, a.sighting_cooldown),
            alert_cooldown: ms(fc.announce.alert_cooldown_ms, a.alert_cooldown),
            held_cooldown: ms(fc.announce.held_cooldown_ms, a.held_cooldown),
            stability_window: ms(fc.announce.stability_window_ms, a.stability_window),
            retrigger_guard: ms(fc.announce.retrigger_guard_ms, a.retrigger_guard),
            verbose: env("NARRATOR_VERBOSE")
                .map(|s| matches!(s.as_str(), "1" | "true" | "yes"))
                .or(fc.announce.verbose)
                .unwrap_or(a.verbose),
        };

        let v = defaults.voice;
        let voice = VoiceConfig {
            language: env("NARRATOR_LANGUAGE")
                .or(fc.voice.language)
                .unwrap_or(v.language),
            rate: fc.voice.rate.unwrap_or(v.rate),
            pitch: fc.voice.pitch.unwrap_or(v.pitch),
            tts_model: fc.voice.tts_model.unwrap_or(v.tts_model),
            tts_voice: fc.voice.tts_voice.unwrap_or(v.tts_voice),
            tts_speed: fc.voice.tts_speed.unwrap_or(v.tts_speed),
        };

        let mut labels = defaults.labels;
        labels.extend(
            fc.labels
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v)),
        );

        let p = defaults.phrases;
        let fp = fc.phrases;
        let mut colors = p.colors;
        colors.extend(fp.colors);
        let phrases = Phrasebook {
            started: fp.started.unwrap_or(p.started),
            stopped: fp.stopped.unwrap_or(p.stopped),
            acquisition_failed: fp.acquisition_failed.unwrap_or(p.acquisition_failed),
            sighting: fp.sighting.unwrap_or(p.sighting),
            one_person: fp.one_person.unwrap_or(p.one_person),
            many_persons: fp.many_persons.unwrap_or(p.many_persons),
            held: fp.held.unwrap_or(p.held),
            threat: fp.threat.unwrap_or(p.threat),
            distance: fp.distance.unwrap_or(p.distance),
            color: fp.color.unwrap_or(p.color),
            verbose_on: fp.verbose_on.unwrap_or(p.verbose_on),
            quiet_on: fp.quiet_on.unwrap_or(p.quiet_on),
            fallback: fp.fallback.unwrap_or(p.fallback),
            colors,
        };

        let c = defaults.commands;
        let lower = |list: Vec<String>| -> Vec<String> {
            list.into_iter().map(|w| w.to_lowercase()).collect()
        };
        let commands = CommandLexicon {
            start: fc.commands.start.map_or(c.start, lower),
            stop: fc.commands.stop.map_or(c.stop, lower),
            verbose: fc.commands.verbose.map_or(c.verbose, lower),
            quiet: fc.commands.quiet.map_or(c.quiet, lower),
            toggle: fc.commands.toggle.map_or(c.toggle, lower),
            question: fc.commands.question.map_or(c.question, lower),
        };

        let l = defaults.llm;
        let llm = LlmConfig {
            url: env("NARRATOR_LLM_URL").or(fc.llm.url),
            token: env("NARRATOR_LLM_TOKEN")
                .or_else(|| env("HF_TOKEN"))
                .or(fc.llm.token)
                .map(SecretString::from),
            auth: fc.llm.auth.as_deref().map(str::parse::<AuthStyle>).transpose()?.unwrap_or(l.auth),
            query_param: fc.llm.query_param.unwrap_or(l.query_param),
            prompt_field: fc.llm.prompt_field.unwrap_or(l.prompt_field),
            prompt_template: fc.llm.prompt_template.unwrap_or(l.prompt_template),
            instruction_marker: fc.llm.instruction_marker.unwrap_or(l.instruction_marker),
            max_new_tokens: fc.llm.max_new_tokens.unwrap_or(l.max_new_tokens),
            temperature: fc.llm.temperature.unwrap_or(l.temperature),
            timeout: fc.llm.timeout_secs.map_or(l.timeout, Duration::from_secs),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
        };

        let config = Self {
            detection,
            announce,
            voice,
            labels,
            phrases,
            commands,
            llm,
            api_keys,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check ranges that would otherwise silently break detection
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.score_threshold) {
            return Err(Error::Config(format!(
                "score_threshold must be in 0..=1, got {}",
                d.score_threshold
            )));
        }
        if d.distance.focal_length <= 0.0 {
            return Err(Error::Config("focal_length_px must be positive".to_string()));
        }
        if d.elongation_threshold < 1.0 {
            return Err(Error::Config(
                "elongation_threshold must be at least 1.0".to_string(),
            ));
        }
        if d.frame_interval.is_zero() {
            return Err(Error::Config("frame_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Spoken name for a detector label (falls back to the lower-cased label)
    #[must_use]
    pub fn spoken_label(&self, label: &str) -> String {
        let key = label.to_lowercase();
        self.labels.get(&key).cloned().unwrap_or(key)
    }
}

fn default_heights() -> HashMap<String, f64> {
    [
        ("person", 1.7),
        ("bicycle", 1.0),
        ("car", 1.5),
        ("motorcycle", 1.1),
        ("dog", 0.5),
        ("cat", 0.3),
        ("chair", 0.9),
        ("cup", 0.1),
        ("bottle", 0.25),
        ("laptop", 0.25),
        ("cell phone", 0.15),
        ("book", 0.22),
        ("tv", 0.6),
        ("backpack", 0.5),
        ("umbrella", 1.0),
        ("knife", 0.25),
        ("scissors", 0.18),
        ("baseball bat", 0.9),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn default_labels() -> HashMap<String, String> {
    [
        ("person", "persona"),
        ("bicycle", "bicicleta"),
        ("car", "carro"),
        ("motorcycle", "moto"),
        ("dog", "perro"),
        ("cat", "gato"),
        ("chair", "silla"),
        ("cup", "taza"),
        ("laptop", "laptop"),
        ("cell phone", "celular"),
        ("bottle", "botella"),
        ("remote", "control"),
        ("book", "libro"),
        ("backpack", "mochila"),
        ("handbag", "bolso"),
        ("umbrella", "paraguas"),
        ("clock", "reloj"),
        ("tv", "televisión"),
        ("keyboard", "teclado"),
        ("mouse", "ratón"),
        ("spoon", "cuchara"),
        ("knife", "cuchillo"),
        ("scissors", "tijeras"),
        ("baseball bat", "bate"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
