//! Configuration management for the audio-scribe daemon.
//!
//! Handles loading, saving, and providing defaults for the daemon configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Smallest accepted upload ceiling, in MiB.
pub const MIN_UPLOAD_MB: u32 = 1;
/// Largest accepted upload ceiling, in MiB.
pub use scribe_common::client::MAX_UPLOAD_MB;

/// Main configuration struct for the daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub model: ModelConfig,
    pub vad: VadSettings,
    pub normalize: NormalizeConfig,
    pub remote: RemoteConfig,
    pub retry: RetryConfig,
    pub limits: LimitsConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Which transcription backend the daemon runs with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Remote => "remote",
        }
    }
}

/// Configuration for the local speech recognition model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Speech recognition model to use.
    pub model: SpeechModel,
    /// Weight precision of the model file.
    pub precision: Precision,
    /// Language hint, e.g. "tr" or "en". "auto" enables detection.
    pub language: String,
    /// Beam width for decoding. Values of 0 or 1 select greedy decoding.
    pub beam_size: u32,
    /// Load the default model when the daemon starts.
    pub preload: bool,
}

/// Supported speech recognition models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SpeechModel {
    // Whisper models (OpenAI) - via whisper.cpp
    WhisperTiny,
    WhisperTinyEn,
    #[default]
    WhisperBase,
    WhisperBaseEn,
    WhisperSmall,
    WhisperSmallEn,
    WhisperMedium,
    WhisperMediumEn,
    WhisperLargeV3Turbo,
}

impl SpeechModel {
    /// Name used in whisper.cpp model file names.
    pub fn ggml_name(&self) -> &'static str {
        match self {
            SpeechModel::WhisperTiny => "tiny",
            SpeechModel::WhisperTinyEn => "tiny.en",
            SpeechModel::WhisperBase => "base",
            SpeechModel::WhisperBaseEn => "base.en",
            SpeechModel::WhisperSmall => "small",
            SpeechModel::WhisperSmallEn => "small.en",
            SpeechModel::WhisperMedium => "medium",
            SpeechModel::WhisperMediumEn => "medium.en",
            SpeechModel::WhisperLargeV3Turbo => "large-v3-turbo",
        }
    }

    /// Parse a user-supplied model name. Accepts both the config spelling
    /// (`whisper-small`) and the short spelling (`small`).
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let short = name.strip_prefix("whisper-").unwrap_or(&name);
        let model = match short {
            "tiny" => SpeechModel::WhisperTiny,
            "tiny-en" | "tiny.en" => SpeechModel::WhisperTinyEn,
            "base" => SpeechModel::WhisperBase,
            "base-en" | "base.en" => SpeechModel::WhisperBaseEn,
            "small" => SpeechModel::WhisperSmall,
            "small-en" | "small.en" => SpeechModel::WhisperSmallEn,
            "medium" => SpeechModel::WhisperMedium,
            "medium-en" | "medium.en" => SpeechModel::WhisperMediumEn,
            "large-v3-turbo" => SpeechModel::WhisperLargeV3Turbo,
            _ => return None,
        };
        Some(model)
    }
}

/// Model weight precision. `Int8` selects the q8_0 quantized file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Full,
    #[default]
    Int8,
}

/// Silence filtering for the local backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    pub enabled: bool,
    /// Silence gaps at least this long split speech regions.
    pub min_silence_ms: u32,
    /// Speech probability threshold.
    pub threshold: f32,
}

/// External transcoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub enabled: bool,
    /// Program name or path of the ffmpeg binary.
    pub ffmpeg: String,
}

/// Hosted transcription API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// File holding the API key (e.g. a mounted secret). Takes precedence
    /// over the environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_file: Option<PathBuf>,
}

/// Retry policy for the remote backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_secs: u64,
    pub rate_limit_ceiling_secs: u64,
    pub transient_ceiling_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upload ceiling in MiB.
    pub max_upload_mb: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default auto-run mode for new sessions.
    pub auto_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for staged uploads. Defaults to the system temp dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: LogLevel,
}

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to a tracing filter directive string for the daemon crate.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "scribe_daemon=error",
            LogLevel::Warn => "scribe_daemon=warn",
            LogLevel::Info => "scribe_daemon=info",
            LogLevel::Debug => "scribe_daemon=debug",
            LogLevel::Trace => "scribe_daemon=trace",
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: SpeechModel::default(),
            precision: Precision::default(),
            language: "auto".to_string(),
            beam_size: 5,
            preload: false,
        }
    }
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_silence_ms: 500,
            threshold: 0.5,
        }
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
            timeout_secs: 120,
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key_file: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_secs: 2,
            rate_limit_ceiling_secs: 60,
            transient_ceiling_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.max(1),
            base: Duration::from_secs(self.base_secs),
            rate_limit_ceiling: Duration::from_secs(self.rate_limit_ceiling_secs),
            transient_ceiling: Duration::from_secs(self.transient_ceiling_secs),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_upload_mb: 25 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { auto_run: true }
    }
}

impl Config {
    /// Returns the default config directory path.
    /// `~/.config/audio-scribe/` (or `$XDG_CONFIG_HOME/audio-scribe/`)
    pub fn config_dir() -> Result<PathBuf> {
        scribe_common::dirs::config_dir()
    }

    /// Returns the default config file path.
    /// `~/.config/audio-scribe/config.toml`
    pub fn config_path() -> Result<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Returns the default data directory path.
    /// `~/.local/share/audio-scribe/` (or `$XDG_DATA_HOME/audio-scribe/`)
    pub fn data_dir() -> Result<PathBuf> {
        scribe_common::dirs::data_dir()
    }

    /// Returns the default models directory path.
    /// `~/.local/share/audio-scribe/models/`
    pub fn models_dir() -> Result<PathBuf> {
        Self::data_dir().map(|p| p.join("models"))
    }

    /// Load configuration from the default path.
    /// Returns defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).context("Failed to parse config file as TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges serde can't express.
    pub fn validate(&self) -> Result<()> {
        let mb = self.limits.max_upload_mb;
        if !(MIN_UPLOAD_MB..=MAX_UPLOAD_MB).contains(&mb) {
            anyhow::bail!(
                "limits.max_upload_mb must be between {} and {}, got {}",
                MIN_UPLOAD_MB,
                MAX_UPLOAD_MB,
                mb
            );
        }
        if self.retry.max_retries == 0 {
            anyhow::bail!("retry.max_retries must be at least 1");
        }
        Ok(())
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Language hint with "auto" and empty mapped to `None`.
    pub fn language_hint(&self) -> Option<String> {
        normalize_language(&self.model.language)
    }
}

/// Map "auto" and blank strings to `None`.
pub fn normalize_language(language: &str) -> Option<String> {
    let trimmed = language.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
