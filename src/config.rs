//! Configuration management for twitch-commentarist.
//!
//! Loads config from YAML files in standard locations. Every section is
//! optional and falls back to defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_INITIAL_PROMPT: &str = "Tu propósito es responder a los comentarios de un directo de Twitch en español de España. \
Lo harás de manera humorística y con un tono sarcástico. Importante: no escribir NUNCA emotes ni caras. \
Por supuesto, deberás saludar a aquellos usuarios que se vayan incorporando y comentando por primera vez. \
Tus respuestas no deben ser extensas.";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Local endpoints don't need an API key. Derived from `api_key` when unset.
    pub is_local: Option<bool>,
    pub request_timeout_secs: u64,
}

impl LmConfig {
    pub fn is_local(&self) -> bool {
        self.is_local.unwrap_or(self.api_key.is_empty())
    }
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".into(),
            api_key: String::new(),
            model: "gemma3:4b".into(),
            is_local: None,
            request_timeout_secs: 120,
        }
    }
}

/// What happens to the exchange counter when a summarization call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryFailurePolicy {
    /// Keep the counter, so the next exchange tries again.
    #[default]
    RetryNextExchange,
    /// Start a fresh cycle as if the summary had succeeded.
    ResetCounter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub initial_prompt: String,
    pub personalities_path: PathBuf,
    pub personality_name: String,
    /// Exchanges between summaries. Zero or negative disables summarization.
    pub summarization_frequency: i64,
    pub auto_save: bool,
    pub summary_failure: SummaryFailurePolicy,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            initial_prompt: DEFAULT_INITIAL_PROMPT.into(),
            personalities_path: PathBuf::from("personalities"),
            personality_name: "commentarist".into(),
            summarization_frequency: 20,
            auto_save: true,
            summary_failure: SummaryFailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub voice: String,
    /// Phonemizer language (`es`, `en-us`, `en-gb`, any espeak-ng voice).
    /// Empty means "derive from the Kokoro voice prefix".
    pub language: String,
    pub speed: f32,
    pub model_path: String,
    pub voices_path: String,
    pub tokenizer_path: String,
    pub startup_phrase: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: "em_alex".into(),
            language: String::new(),
            speed: 1.0,
            model_path: String::new(),
            voices_path: String::new(),
            tokenizer_path: String::new(),
            startup_phrase: "Inicialización del sistema completada.".into(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    pub login: String,
    pub access_token: String,
    pub prefix: String,
    pub channel: String,
    /// Only needed by app-token flows; chat login uses `access_token`.
    pub client_secret: String,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            login: String::new(),
            access_token: String::new(),
            prefix: "!".into(),
            channel: String::new(),
            client_secret: String::new(),
        }
    }
}

// Hand-written so tokens never reach the logs.
impl std::fmt::Debug for TwitchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitchConfig")
            .field("login", &self.login)
            .field("prefix", &self.prefix)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    pub image_dir: PathBuf,
    pub window_title: String,
    pub width: f32,
    pub height: f32,
    /// RGB background used behind transparent pixels and for the idle screen.
    pub background: [u8; 3],
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("img/avatar"),
            window_title: "AI Assistant".into(),
            width: 1024.0,
            height: 1024.0,
            background: [0, 255, 0],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lm: LmConfig,
    pub assistant: AssistantConfig,
    pub voice: VoiceConfig,
    pub twitch: TwitchConfig,
    pub avatar: AvatarConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/twitch-commentarist/config.yaml
    /// 3. /etc/twitch-commentarist/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/twitch-commentarist/config.yaml")),
                Some(PathBuf::from("/etc/twitch-commentarist/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse {}: {e}, using defaults",
                        config_path.display()
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}
