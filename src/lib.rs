//! Confide Gateway - a voice listening companion for Telegram
//!
//! Users talk to the bot in voice notes; each note is transcribed, answered
//! by a language model and voiced back. Sessions are bounded by a message
//! count and a duration, and users who reach a bound are blocked until the
//! nightly reset.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Telegram (long polling, Bot API)            │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   Dispatcher  │  Conversation engine  │  Admin      │
//! │   Limits / block list  │  Settings  │  Scheduler    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │          OpenAI: Whisper  │  Chat  │  Speech         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod admin;
pub mod channels;
pub mod config;
pub mod daemon;
pub mod error;
pub mod limits;
pub mod notify;
pub mod scheduler;
pub mod scratch;
pub mod services;
pub mod session;
pub mod settings;
pub mod validation;

pub use config::Config;
pub use daemon::{Daemon, Stores};
pub use error::{Error, Result};
pub use limits::{BlockStore, BlockedUserRecord, UserInfo, UserLimitManager};
pub use session::{ConversationEngine, SessionPhase};
pub use settings::{Settings, SettingsDefaults, SettingsStore};
