//! Error types for each stage of the bot.
//!
//! Only `ConfigError` is allowed to abort startup. Everything else is logged
//! by the caller and the bot moves on to the next message or frame.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("base_url is required")]
    MissingBaseUrl,
    #[error("model is required")]
    MissingModel,
    #[error("api_key is required for remote models")]
    MissingApiKey,
    #[error("twitch {0} is required")]
    MissingTwitchField(&'static str),
    #[error("invalid twitch channel: {0}")]
    InvalidChannel(String),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RemoteCallError {
    #[error("chat completion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("chat completion returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed chat completion response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("TTS model not loaded")]
    NotLoaded,
    #[error("failed to load TTS assets: {0}")]
    Load(String),
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
    #[error("audio playback failed: {0}")]
    Playback(String),
}

#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("failed to list {path}: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no avatar images in {0}")]
    NoImages(PathBuf),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Error)]
#[error("failed to send chat message: {0}")]
pub struct ChatError(pub String);
