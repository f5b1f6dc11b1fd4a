//! Per-user conversation state

use tokio::time::Instant;

use super::timer::SessionTimer;
use crate::limits::UserInfo;

/// Display name used when the user skips or gives an empty name
pub const DEFAULT_DISPLAY_NAME: &str = "Friend";

/// Longest display name kept, in characters
pub const MAX_NAME_CHARS: usize = 50;

/// Where a conversation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for a name or "skip"; `asked` once the user chose to enter one
    AwaitName { asked: bool },
    /// Accepting voice messages
    Recording,
    /// Ended; the session is discarded
    Terminated,
}

/// One user's conversation
#[derive(Debug, Clone)]
pub struct SessionState {
    pub user_id: i64,
    pub chat_id: i64,
    pub user: UserInfo,
    pub display_name: String,
    pub timer: SessionTimer,
    pub message_count: u32,
    pub phase: SessionPhase,
    pub last_activity: Instant,
}

impl SessionState {
    /// Fresh session awaiting a name
    #[must_use]
    pub fn new(user_id: i64, chat_id: i64, user: UserInfo, session_minutes: u32) -> Self {
        Self {
            user_id,
            chat_id,
            user,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            timer: SessionTimer::start(session_minutes),
            message_count: 0,
            phase: SessionPhase::AwaitName { asked: false },
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Normalise a typed name: trimmed, at most [`MAX_NAME_CHARS`], never empty
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    let name: String = raw.trim().chars().take(MAX_NAME_CHARS).collect();
    let name = name.trim_end();
    if name.is_empty() {
        DEFAULT_DISPLAY_NAME.to_string()
    } else {
        name.to_string()
    }
}
