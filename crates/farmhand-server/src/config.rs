//! Server configuration.

use anyhow::{Result, bail};
use farmhand_core::{
    DEFAULT_CAPACITY, DEFAULT_GEMINI_API_BASE, DEFAULT_GEMINI_MODEL, DEFAULT_MAX_DIMENSION,
    DEFAULT_QUALITY, GeminiConfig, NormalizeOptions,
};
use farmhand_types::Language;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
    #[serde(default = "default_image_quality")]
    pub image_quality: f32,
    #[serde(default)]
    pub default_language: Language,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Falls back to `GEMINI_API_KEY`, then `API_KEY`.
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default = "default_gemini_api_base")]
    pub gemini_api_base: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./frontend/dist")
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("farmhand")
        .join("history.db")
}

fn default_history_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_max_image_dimension() -> u32 {
    DEFAULT_MAX_DIMENSION
}

fn default_image_quality() -> f32 {
    DEFAULT_QUALITY
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_gemini_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_gemini_api_base() -> String {
    DEFAULT_GEMINI_API_BASE.to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            db_path: default_db_path(),
            history_capacity: default_history_capacity(),
            max_image_dimension: default_max_image_dimension(),
            image_quality: default_image_quality(),
            default_language: Language::default(),
            max_upload_bytes: default_max_upload_bytes(),
            gemini_api_key: None,
            gemini_model: default_gemini_model(),
            gemini_api_base: default_gemini_api_base(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from default location (config/default.toml) or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/default.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }

        Ok(Config::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            bail!("history_capacity must be > 0");
        }
        if self.max_image_dimension == 0 {
            bail!("max_image_dimension must be > 0");
        }
        if !(self.image_quality > 0.0 && self.image_quality <= 1.0) {
            bail!("image_quality must be in (0.0, 1.0]");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be > 0");
        }
        Ok(())
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            max_width: self.max_image_dimension,
            max_height: self.max_image_dimension,
            quality: self.image_quality,
        }
    }

    /// Gemini settings, reading the API key from the environment if the
    /// config file has none.
    pub fn gemini_config(&self) -> GeminiConfig {
        let api_key = self
            .gemini_api_key
            .clone()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .or_else(|| std::env::var("API_KEY").ok())
            .filter(|k| !k.trim().is_empty());

        GeminiConfig {
            api_key,
            model: self.gemini_model.clone(),
            api_base: self.gemini_api_base.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}
