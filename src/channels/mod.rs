//! Message transport
//!
//! The conversation engine talks to users through the [`Transport`] trait;
//! [`TelegramChannel`] is the production implementation.

pub mod telegram;

use std::path::Path;

use async_trait::async_trait;

pub use telegram::TelegramChannel;

use crate::Result;
use crate::limits::UserInfo;

/// Chat presence indicator shown while the bot works
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Typing,
    RecordingVoice,
}

impl Presence {
    /// Telegram `sendChatAction` action name
    #[must_use]
    pub const fn as_action(self) -> &'static str {
        match self {
            Self::Typing => "typing",
            Self::RecordingVoice => "record_voice",
        }
    }
}

/// Reply keyboard change attached to an outgoing text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    /// Show a constrained keyboard, one button label per entry, one row per inner vec
    Buttons(Vec<Vec<String>>),
    /// Remove any keyboard currently shown
    Remove,
}

impl Keyboard {
    /// Single-column keyboard from labels
    #[must_use]
    pub fn column(labels: &[&str]) -> Self {
        Self::Buttons(labels.iter().map(|l| vec![(*l).to_string()]).collect())
    }
}

/// What the user sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `/start`
    Start,
    /// `/cancel`
    Cancel,
    /// Any other slash command, name without the slash
    Command { name: String, args: String },
    /// Plain text, including keyboard button presses
    Text(String),
    /// A voice note
    Voice { file_id: String, duration_secs: u32 },
}

/// An event from one user in one chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub user_id: i64,
    pub user: UserInfo,
    pub event: InboundEvent,
}

/// Outbound side of a chat platform
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a text, optionally changing the reply keyboard
    async fn send_text(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>)
    -> Result<()>;

    /// Deliver an audio file as a voice note
    async fn send_voice(&self, chat_id: i64, audio: &Path, caption: Option<&str>) -> Result<()>;

    /// Show a presence indicator
    async fn send_presence(&self, chat_id: i64, presence: Presence) -> Result<()>;

    /// Fetch an inbound file into `dest`, returning the number of bytes written
    async fn download(&self, file_id: &str, dest: &Path) -> Result<u64>;
}
