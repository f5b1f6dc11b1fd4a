//! Dynamic settings persistence tests

use confide_gateway::settings::{DEFAULT_SYSTEM_PROMPT, SettingsDefaults, SettingsStore};
use tokio_test::{assert_err, assert_ok};

fn env_defaults() -> SettingsDefaults {
    SettingsDefaults {
        max_messages_per_session: 10,
        session_duration_minutes: 30,
        max_completion_tokens: 300,
        system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
    }
}

#[test]
fn test_limits_round_trip_beats_defaults() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = SettingsStore::open(dir.path(), env_defaults()).unwrap();
        store.set_limits(5, 20).unwrap();
    }

    let reopened = SettingsStore::open(dir.path(), env_defaults()).unwrap();
    assert_eq!(reopened.limits(), (5, 20));
}

#[test]
fn test_tokens_and_prompt_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = SettingsStore::open(dir.path(), env_defaults()).unwrap();
        store.set_max_tokens(512).unwrap();
        store.set_prompt("  Listen more than you speak.  ").unwrap();
    }

    let reopened = SettingsStore::open(dir.path(), env_defaults()).unwrap();
    let settings = reopened.snapshot();
    assert_eq!(settings.max_completion_tokens, 512);
    assert_eq!(settings.system_prompt, "Listen more than you speak.");

    reopened.reset_prompt().unwrap();
    let again = SettingsStore::open(dir.path(), env_defaults()).unwrap();
    assert_eq!(again.snapshot().system_prompt, DEFAULT_SYSTEM_PROMPT);
}

#[test]
fn test_corrupt_files_regenerate_from_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("limits.txt"), "garbage").unwrap();
    std::fs::write(dir.path().join("max_tokens.txt"), "lots").unwrap();

    let store = SettingsStore::open(dir.path(), env_defaults()).unwrap();
    assert_eq!(store.limits(), (10, 30));
    assert_eq!(store.snapshot().max_completion_tokens, 300);

    let limits = std::fs::read_to_string(dir.path().join("limits.txt")).unwrap();
    assert!(limits.contains("MAX_MESSAGES_PER_SESSION=10"));
    assert!(limits.contains("SESSION_DURATION_MINUTES=30"));
}

#[test]
fn test_invalid_limits_leave_previous_values() {
    let dir = tempfile::tempdir().unwrap();
    let store = SettingsStore::open(dir.path(), env_defaults()).unwrap();
    assert_ok!(store.set_limits(4, 15));

    assert_err!(store.set_limits(0, 15));
    assert_err!(store.set_limits(4, 0));
    assert_err!(store.set_max_tokens(0));
    assert_err!(store.set_prompt("short"));
    assert_eq!(store.limits(), (4, 15));
}
