//! Configuration management for the Confide gateway

pub mod file;

use std::path::PathBuf;

use crate::settings::{DEFAULT_SYSTEM_PROMPT, SettingsDefaults};
use crate::{Error, Result};

/// Default number of voice messages per session
pub const DEFAULT_MAX_MESSAGES: u32 = 10;

/// Default session length in minutes
pub const DEFAULT_SESSION_MINUTES: u32 = 30;

/// Default completion token budget
pub const DEFAULT_MAX_TOKENS: u32 = 300;

/// Default age after which `/cleanupblocks` drops block records
pub const DEFAULT_BLOCK_RETENTION_DAYS: u32 = 30;

/// Default chat completion model
pub const DEFAULT_LLM_MODEL: &str = "gpt-4";

/// Confide gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the block list and the dynamic settings files
    pub data_dir: PathBuf,

    /// Directory under which per-run scratch directories are created
    pub temp_dir: PathBuf,

    /// API keys
    pub api_keys: ApiKeys,

    /// Administrator user ids
    pub admin_ids: Vec<i64>,

    /// Defaults for the dynamic settings store
    pub settings: SettingsDefaults,

    /// Voice processing configuration
    pub voice: VoiceConfig,

    /// LLM model identifier for chat completions
    pub llm_model: String,

    /// Mirror transcripts, replies and audio to administrators
    pub mirror_to_admins: bool,

    /// Default age in days for `/cleanupblocks`
    pub block_retention_days: u32,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// Optional language hint for transcription
    pub stt_language: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_model: "whisper-1".to_string(),
            stt_language: None,
            tts_model: "tts-1".to_string(),
            tts_voice: "onyx".to_string(),
        }
    }
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub telegram: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("ApiKeys")
            .field("openai", &redact(&self.openai))
            .field("telegram", &redact(&self.telegram))
            .finish()
    }
}

impl Config {
    /// Load configuration from the environment and the optional TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the data or temp directory cannot be created
    pub fn load() -> Result<Self> {
        // Load optional TOML config file (env > toml > default)
        let fc = file::load_config_file();

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok().or(fc.api_keys.openai),
            telegram: std::env::var("TELEGRAM_BOT_TOKEN")
                .or_else(|_| std::env::var("TELEGRAM_TOKEN"))
                .ok()
                .or(fc.api_keys.telegram),
        };

        let env_admins = std::env::var("ADMIN_IDS").ok();
        let legacy_admins = [
            std::env::var("ADMIN_ID_1").ok(),
            std::env::var("ADMIN_ID_2").ok(),
        ];
        let mut admin_ids = parse_admin_ids(env_admins.as_deref(), &legacy_admins);
        if admin_ids.is_empty() {
            admin_ids = fc
                .admin_ids
                .unwrap_or_default()
                .into_iter()
                .filter(|id| *id != 0)
                .collect();
        }
        if admin_ids.is_empty() {
            tracing::warn!("no administrator ids configured, admin commands are disabled");
        }

        let settings = SettingsDefaults {
            max_messages_per_session: env_u32("MAX_MESSAGES_PER_SESSION")
                .or(fc.limits.max_messages_per_session)
                .filter(|v| *v >= 1)
                .unwrap_or(DEFAULT_MAX_MESSAGES),
            session_duration_minutes: env_u32("SESSION_DURATION_MINUTES")
                .or(fc.limits.session_duration_minutes)
                .filter(|v| *v >= 1)
                .unwrap_or(DEFAULT_SESSION_MINUTES),
            max_completion_tokens: env_u32("MAX_TOKENS")
                .or(fc.limits.max_tokens)
                .filter(|v| *v >= 1)
                .unwrap_or(DEFAULT_MAX_TOKENS),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        };

        let defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            stt_model: std::env::var("CONFIDE_STT_MODEL")
                .ok()
                .or(fc.voice.stt_model)
                .unwrap_or(defaults.stt_model),
            stt_language: std::env::var("CONFIDE_STT_LANGUAGE")
                .ok()
                .or(fc.voice.stt_language)
                .filter(|l| !l.trim().is_empty()),
            tts_model: std::env::var("CONFIDE_TTS_MODEL")
                .ok()
                .or(fc.voice.tts_model)
                .unwrap_or(defaults.tts_model),
            tts_voice: std::env::var("CONFIDE_TTS_VOICE")
                .ok()
                .or(fc.voice.tts_voice)
                .unwrap_or(defaults.tts_voice),
        };

        let llm_model = std::env::var("CONFIDE_LLM_MODEL")
            .ok()
            .or(fc.llm.model)
            .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string());

        let mirror_to_admins = std::env::var("DEBUG_SEND_VOICE")
            .ok()
            .map(|v| parse_flag(&v))
            .or(fc.debug_send_voice)
            .unwrap_or(false);

        let block_retention_days = env_u32("CONFIDE_BLOCK_RETENTION_DAYS")
            .or(fc.limits.block_retention_days)
            .unwrap_or(DEFAULT_BLOCK_RETENTION_DAYS);

        // Data directory (~/.local/share/confide on Linux)
        let data_dir = std::env::var("CONFIDE_DATA_DIR")
            .ok()
            .or(fc.storage.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);
        std::fs::create_dir_all(&data_dir)?;

        // Scratch root (system temp dir unless overridden)
        let temp_dir = std::env::var("CONFIDE_TEMP_DIR")
            .ok()
            .or(fc.storage.temp_dir)
            .map_or_else(|| std::env::temp_dir().join("confide"), PathBuf::from);
        std::fs::create_dir_all(&temp_dir)?;

        Ok(Self {
            data_dir,
            temp_dir,
            api_keys,
            admin_ids,
            settings,
            voice,
            llm_model,
            mirror_to_admins,
            block_retention_days,
        })
    }

    /// Built-in defaults rooted at `data_dir`, without credentials
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            temp_dir: data_dir.join("tmp"),
            data_dir,
            api_keys: ApiKeys::default(),
            admin_ids: Vec::new(),
            settings: SettingsDefaults::default(),
            voice: VoiceConfig::default(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            mirror_to_admins: false,
            block_retention_days: DEFAULT_BLOCK_RETENTION_DAYS,
        }
    }

    /// Telegram bot token, required by `serve`
    ///
    /// # Errors
    ///
    /// Returns error if no token is configured
    pub fn telegram_token(&self) -> Result<&str> {
        self.api_keys
            .telegram
            .as_deref()
            .ok_or_else(|| Error::Config("TELEGRAM_BOT_TOKEN is not set".to_string()))
    }

    /// `OpenAI` API key, required by `serve`
    ///
    /// # Errors
    ///
    /// Returns error if no key is configured
    pub fn openai_key(&self) -> Result<&str> {
        self.api_keys
            .openai
            .as_deref()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("data"), |d| d.data_dir().join("confide"))
}

fn env_u32(key: &str) -> Option<u32> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric environment value");
            None
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Collect administrator ids from a comma-separated list plus legacy single-id variables
///
/// Zero and unparsable ids are ignored, duplicates are dropped.
#[must_use]
pub fn parse_admin_ids(list: Option<&str>, legacy: &[Option<String>]) -> Vec<i64> {
    let mut ids = Vec::new();
    let candidates = list
        .into_iter()
        .flat_map(|l| l.split(','))
        .chain(legacy.iter().flatten().map(String::as_str));

    for candidate in candidates {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        match candidate.parse::<i64>() {
            Ok(0) => {}
            Ok(id) if !ids.contains(&id) => ids.push(id),
            Ok(_) => {}
            Err(_) => tracing::warn!(value = candidate, "ignoring invalid admin id"),
        }
    }

    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_admin_ids_list_and_legacy() {
        let ids = parse_admin_ids(
            Some("12, 34,0,abc"),
            &[Some("56".to_string()), Some("12".to_string())],
        );
        assert_eq!(ids, vec![12, 34, 56]);
    }

    #[test]
    fn test_parse_admin_ids_empty() {
        assert!(parse_admin_ids(None, &[None, Some("0".to_string())]).is_empty());
    }

    #[test]
    fn test_with_data_dir_requires_credentials() {
        let config = Config::with_data_dir("/tmp/confide-test");
        assert!(config.telegram_token().is_err());
        assert!(config.openai_key().is_err());
        assert_eq!(config.settings.max_messages_per_session, DEFAULT_MAX_MESSAGES);
        assert_eq!(config.temp_dir, PathBuf::from("/tmp/confide-test/tmp"));
    }

    #[test]
    fn test_api_keys_debug_is_redacted() {
        let keys = ApiKeys {
            openai: Some("sk-secret".to_string()),
            telegram: None,
        };
        let shown = format!("{keys:?}");
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("True"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
