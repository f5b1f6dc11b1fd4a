//! TOML configuration file loading
//!
//! Supports `~/.config/confide/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfideConfigFile {
    /// Administrator Telegram user ids
    #[serde(default)]
    pub admin_ids: Option<Vec<i64>>,

    /// Session limit defaults
    #[serde(default)]
    pub limits: LimitsFileConfig,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Storage locations
    #[serde(default)]
    pub storage: StorageFileConfig,

    /// Mirror transcripts, replies and audio to administrators
    #[serde(default)]
    pub debug_send_voice: Option<bool>,
}

/// Defaults for the dynamic settings, used until an administrator overrides them
#[derive(Debug, Default, Deserialize)]
pub struct LimitsFileConfig {
    pub max_messages_per_session: Option<u32>,
    pub session_duration_minutes: Option<u32>,
    pub max_tokens: Option<u32>,
    pub block_retention_days: Option<u32>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-4")
    pub model: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// Language hint passed to the STT provider (e.g. "ru")
    pub stt_language: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "onyx")
    pub tts_voice: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub telegram: Option<String>,
}

/// Storage directories
#[derive(Debug, Default, Deserialize)]
pub struct StorageFileConfig {
    pub data_dir: Option<String>,
    pub temp_dir: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfideConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfideConfigFile {
    let Some(path) = config_file_path() else {
        return ConfideConfigFile::default();
    };

    if !path.exists() {
        return ConfideConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            ConfideConfigFile::default()
        }),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfideConfigFile::default()
        }
    }
}

/// Parse config file content
///
/// # Errors
///
/// Returns error if the content is not valid TOML for this schema
pub fn parse_config(content: &str) -> crate::Result<ConfideConfigFile> {
    let config = toml::from_str(content)?;
    Ok(config)
}

/// Return the config file path: `~/.config/confide/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIDE_CONFIG") {
        return Some(PathBuf::from(path));
    }

    directories::BaseDirs::new().map(|d| d.config_dir().join("confide").join("config.toml"))
}
