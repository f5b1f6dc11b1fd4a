//! Telegram channel adapter
//!
//! Long-polls `getUpdates` for inbound events and uses the Bot API for sending.

mod api;
pub mod chunking;
pub mod dedup;
pub mod polling;
pub mod retry;
pub mod types;

use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;

use super::{Keyboard, Presence, Transport};
use crate::Result;

pub use dedup::UpdateDedup;
pub use types::{BotCommand, BotUser};

/// Telegram channel adapter
#[derive(Clone)]
pub struct TelegramChannel {
    token: String,
    client: Client,
}

impl TelegramChannel {
    /// Create a new Telegram channel adapter
    #[must_use]
    pub fn new(token: String) -> Self {
        Self {
            token,
            client: Client::new(),
        }
    }

    /// Verify the token and publish the command menu
    ///
    /// # Errors
    ///
    /// Returns error if the token is rejected
    pub async fn connect(&self, commands: &[BotCommand]) -> Result<BotUser> {
        let me = self.get_me().await?;
        tracing::info!(
            bot_id = me.id,
            username = me.username.as_deref().unwrap_or(""),
            "Telegram channel connected"
        );

        if let Err(e) = self.sync_commands(commands).await {
            tracing::warn!(error = %e, "failed to sync Telegram bot commands");
        }
        Ok(me)
    }
}

#[async_trait]
impl Transport for TelegramChannel {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<()> {
        let chunks = chunking::chunk_text(text, chunking::MESSAGE_LIMIT);
        let last = chunks.len().saturating_sub(1);
        let mut keyboard = keyboard;
        for (i, chunk) in chunks.iter().enumerate() {
            // Keyboard changes ride on the final piece
            let markup = if i == last { keyboard.take() } else { None };
            self.send_message(chat_id, chunk, markup).await?;
        }
        Ok(())
    }

    async fn send_voice(&self, chat_id: i64, audio: &Path, caption: Option<&str>) -> Result<()> {
        self.send_voice_file(chat_id, audio, caption).await
    }

    async fn send_presence(&self, chat_id: i64, presence: Presence) -> Result<()> {
        self.send_chat_action(chat_id, presence.as_action()).await?;
        tracing::debug!(chat_id, action = presence.as_action(), "Telegram presence sent");
        Ok(())
    }

    async fn download(&self, file_id: &str, dest: &Path) -> Result<u64> {
        let data = self.download_file(file_id).await?;
        tokio::fs::write(dest, &data).await?;
        Ok(data.len() as u64)
    }
}
