//! Dynamic settings changed at runtime by administrators
//!
//! Four values live in three small files under the data directory:
//!
//! - `limits.txt`: `MAX_MESSAGES_PER_SESSION=<n>` and `SESSION_DURATION_MINUTES=<n>`
//! - `max_tokens.txt`: a single integer
//! - `prompt.txt`: the system prompt, free-form
//!
//! Readers take a lock-free [`Settings`] snapshot. Writers are serialized,
//! persist atomically, then publish a new snapshot, so a reader never sees
//! a message limit from one update paired with a duration from another.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::validation::{PROMPT_CHARS, is_valid_prompt};
use crate::{Error, Result};

const LIMITS_FILE: &str = "limits.txt";
const TOKENS_FILE: &str = "max_tokens.txt";
const PROMPT_FILE: &str = "prompt.txt";

const MESSAGES_KEY: &str = "MAX_MESSAGES_PER_SESSION";
const MINUTES_KEY: &str = "SESSION_DURATION_MINUTES";

/// Prompt used until an administrator sets another one
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a supportive and kind listener. \
The user wants to talk things through. Reply in a warm, calm tone with empathy. \
Do not give advice unless asked. Keep replies short, two to four sentences.";

/// Values used when a settings file is absent or unreadable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsDefaults {
    pub max_messages_per_session: u32,
    pub session_duration_minutes: u32,
    pub max_completion_tokens: u32,
    pub system_prompt: String,
}

impl Default for SettingsDefaults {
    fn default() -> Self {
        Self {
            max_messages_per_session: crate::config::DEFAULT_MAX_MESSAGES,
            session_duration_minutes: crate::config::DEFAULT_SESSION_MINUTES,
            max_completion_tokens: crate::config::DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// One consistent view of the dynamic settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub max_messages_per_session: u32,
    pub session_duration_minutes: u32,
    pub max_completion_tokens: u32,
    pub system_prompt: String,
}

/// File-backed store for [`Settings`]
pub struct SettingsStore {
    dir: PathBuf,
    defaults: SettingsDefaults,
    current: ArcSwap<Settings>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Open the store, regenerating any missing or corrupt file from `defaults`
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn open(dir: impl Into<PathBuf>, defaults: SettingsDefaults) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let (messages, minutes, limits_ok) = read_limits(&dir.join(LIMITS_FILE), &defaults);
        if !limits_ok {
            regenerate(&dir.join(LIMITS_FILE), &limits_body(messages, minutes));
        }

        let tokens = read_number(&dir.join(TOKENS_FILE));
        if tokens.is_none() {
            regenerate(
                &dir.join(TOKENS_FILE),
                &defaults.max_completion_tokens.to_string(),
            );
        }

        let prompt = read_prompt(&dir.join(PROMPT_FILE));
        if prompt.is_none() {
            regenerate(&dir.join(PROMPT_FILE), &defaults.system_prompt);
        }

        let settings = Settings {
            max_messages_per_session: messages,
            session_duration_minutes: minutes,
            max_completion_tokens: tokens.unwrap_or(defaults.max_completion_tokens),
            system_prompt: prompt.unwrap_or_else(|| defaults.system_prompt.clone()),
        };

        tracing::debug!(
            dir = %dir.display(),
            max_messages = settings.max_messages_per_session,
            session_minutes = settings.session_duration_minutes,
            max_tokens = settings.max_completion_tokens,
            "settings loaded"
        );

        Ok(Self {
            dir,
            defaults,
            current: ArcSwap::from_pointee(settings),
            write_lock: Mutex::new(()),
        })
    }

    /// Current settings. Lock-free.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    /// Current `(max_messages_per_session, session_duration_minutes)` pair
    #[must_use]
    pub fn limits(&self) -> (u32, u32) {
        let s = self.current.load();
        (s.max_messages_per_session, s.session_duration_minutes)
    }

    /// Persist new session limits
    ///
    /// # Errors
    ///
    /// Returns error if either value is zero or the file cannot be written
    pub fn set_limits(&self, max_messages: u32, session_minutes: u32) -> Result<()> {
        if max_messages == 0 || session_minutes == 0 {
            return Err(Error::InvalidSetting(
                "limits must be at least 1".to_string(),
            ));
        }

        self.update(LIMITS_FILE, &limits_body(max_messages, session_minutes), |s| {
            s.max_messages_per_session = max_messages;
            s.session_duration_minutes = session_minutes;
        })?;
        tracing::info!(max_messages, session_minutes, "session limits updated");
        Ok(())
    }

    /// Persist a new completion token budget
    ///
    /// # Errors
    ///
    /// Returns error if the value is zero or the file cannot be written
    pub fn set_max_tokens(&self, max_tokens: u32) -> Result<()> {
        if max_tokens == 0 {
            return Err(Error::InvalidSetting(
                "token budget must be at least 1".to_string(),
            ));
        }

        self.update(TOKENS_FILE, &max_tokens.to_string(), |s| {
            s.max_completion_tokens = max_tokens;
        })?;
        tracing::info!(max_tokens, "completion token budget updated");
        Ok(())
    }

    /// Persist a new system prompt
    ///
    /// # Errors
    ///
    /// Returns error if the prompt length is out of bounds or the file cannot be written
    pub fn set_prompt(&self, prompt: &str) -> Result<()> {
        if !is_valid_prompt(prompt) {
            return Err(Error::InvalidSetting(format!(
                "prompt must be {}..={} characters",
                PROMPT_CHARS.start(),
                PROMPT_CHARS.end()
            )));
        }

        let prompt = prompt.trim().to_string();
        self.update(PROMPT_FILE, &prompt, |s| s.system_prompt.clone_from(&prompt))?;
        tracing::info!(chars = prompt.chars().count(), "system prompt updated");
        Ok(())
    }

    /// Restore the default system prompt
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn reset_prompt(&self) -> Result<()> {
        let prompt = self.defaults.system_prompt.clone();
        self.update(PROMPT_FILE, &prompt, |s| s.system_prompt.clone_from(&prompt))?;
        tracing::info!("system prompt reset to default");
        Ok(())
    }

    /// Default prompt this store falls back to
    #[must_use]
    pub fn default_prompt(&self) -> &str {
        &self.defaults.system_prompt
    }

    fn update(&self, file: &str, body: &str, apply: impl FnOnce(&mut Settings)) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        write_atomic(&self.dir.join(file), body)?;

        let mut next = Settings::clone(&self.current.load());
        apply(&mut next);
        self.current.store(Arc::new(next));
        Ok(())
    }
}

fn limits_body(messages: u32, minutes: u32) -> String {
    format!("{MESSAGES_KEY}={messages}\n{MINUTES_KEY}={minutes}\n")
}

/// Parse `limits.txt`; each missing or invalid key falls back independently
fn read_limits(path: &Path, defaults: &SettingsDefaults) -> (u32, u32, bool) {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let mut messages = None;
    let mut minutes = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().parse::<u32>().ok().filter(|v| *v >= 1);
        match key.trim() {
            MESSAGES_KEY => messages = value,
            MINUTES_KEY => minutes = value,
            _ => {}
        }
    }

    let ok = messages.is_some() && minutes.is_some();
    if !ok && path.exists() {
        tracing::warn!(path = %path.display(), "limits file is corrupt, using defaults");
    }

    (
        messages.unwrap_or(defaults.max_messages_per_session),
        minutes.unwrap_or(defaults.session_duration_minutes),
        ok,
    )
}

fn read_number(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    let value = content.trim().parse::<u32>().ok().filter(|v| *v >= 1);
    if value.is_none() {
        tracing::warn!(path = %path.display(), "settings file is corrupt, using default");
    }
    value
}

fn read_prompt(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn regenerate(path: &Path, body: &str) {
    if let Err(e) = write_atomic(path, body) {
        tracing::warn!(path = %path.display(), error = %e, "failed to regenerate settings file");
    }
}

/// Write `body` to a sibling temp file and rename it over `path`
fn write_atomic(path: &Path, body: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(body.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> SettingsDefaults {
        SettingsDefaults {
            max_messages_per_session: 10,
            session_duration_minutes: 30,
            max_completion_tokens: 300,
            system_prompt: "Default listener prompt".to_string(),
        }
    }

    #[test]
    fn test_fresh_store_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path(), defaults()).unwrap();

        assert_eq!(store.limits(), (10, 30));
        assert_eq!(store.snapshot().max_completion_tokens, 300);
        assert!(dir.path().join(LIMITS_FILE).exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join(PROMPT_FILE)).unwrap(),
            "Default listener prompt"
        );
    }

    #[test]
    fn test_corrupt_values_fall_back_per_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(LIMITS_FILE),
            "MAX_MESSAGES_PER_SESSION=7\nSESSION_DURATION_MINUTES=soon\n",
        )
        .unwrap();
        std::fs::write(dir.path().join(TOKENS_FILE), "lots").unwrap();

        let store = SettingsStore::open(dir.path(), defaults()).unwrap();
        assert_eq!(store.limits(), (7, 30));
        assert_eq!(store.snapshot().max_completion_tokens, 300);

        // Regenerated on open
        let body = std::fs::read_to_string(dir.path().join(LIMITS_FILE)).unwrap();
        assert!(body.contains("SESSION_DURATION_MINUTES=30"));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path(), defaults()).unwrap();

        assert!(matches!(
            store.set_limits(0, 5),
            Err(Error::InvalidSetting(_))
        ));
        assert!(store.set_max_tokens(0).is_err());
        assert_eq!(store.limits(), (10, 30));
    }

    #[test]
    fn test_prompt_bounds_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path(), defaults()).unwrap();

        assert!(store.set_prompt("short").is_err());
        store.set_prompt("  Be gentle and brief.  ").unwrap();
        assert_eq!(store.snapshot().system_prompt, "Be gentle and brief.");

        store.reset_prompt().unwrap();
        assert_eq!(store.snapshot().system_prompt, "Default listener prompt");
    }

    #[test]
    fn test_snapshot_is_stable_across_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path(), defaults()).unwrap();

        let before = store.snapshot();
        store.set_limits(3, 1).unwrap();
        assert_eq!(before.max_messages_per_session, 10);
        assert_eq!(store.limits(), (3, 1));
    }
}
