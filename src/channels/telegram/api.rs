//! Raw Telegram Bot API calls

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::retry::{RetryPolicy, is_recoverable, parse_retry_after};
use super::types::{
    API_BASE, BotCommand, BotUser, FILE_BASE, GetFileRequest, ReplyMarkup, SendChatActionRequest,
    SendMessageRequest, SetMyCommandsRequest, TelegramFile, TelegramResponse,
};
use crate::channels::Keyboard;
use crate::{Error, Result};

impl super::TelegramChannel {
    pub(super) fn method_url(&self, method: &str) -> String {
        format!("{API_BASE}{}/{method}", self.token)
    }

    /// Send a plain-text message, optionally changing the reply keyboard
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<()> {
        let request = SendMessageRequest {
            chat_id,
            text: text.to_string(),
            reply_markup: keyboard.map(ReplyMarkup::from),
        };

        let policy = RetryPolicy::default();
        let mut attempt = 0;
        loop {
            let response = self
                .client
                .post(self.method_url("sendMessage"))
                .json(&request)
                .send()
                .await
                .map_err(|e| Error::Channel(format!("Telegram API error: {e}")))?;

            let status = response.status();
            if status.is_success() {
                break;
            }
            let body = response.text().await.unwrap_or_default();

            if is_recoverable(status) && attempt < policy.max_retries {
                let delay = policy.delay(attempt, parse_retry_after(&body));
                tracing::warn!(
                    chat_id,
                    %status,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Telegram sendMessage failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let body_lower = body.to_lowercase();
            if body_lower.contains("chat not found")
                || body_lower.contains("bot was blocked by the user")
            {
                return Err(Error::Channel(format!(
                    "Telegram chat {chat_id} not reachable: {body}"
                )));
            }

            return Err(Error::Channel(format!(
                "Telegram API error: {status} - {body}"
            )));
        }

        tracing::debug!(chat_id, "Telegram message sent");
        Ok(())
    }

    /// Upload an audio file as a voice note
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or the API request fails
    pub async fn send_voice_file(
        &self,
        chat_id: i64,
        audio: &Path,
        caption: Option<&str>,
    ) -> Result<()> {
        let data = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map_or_else(|| "voice.ogg".to_string(), |n| n.to_string_lossy().into_owned());

        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str("audio/ogg")
            .map_err(|e| Error::Channel(format!("Telegram sendVoice error: {e}")))?;

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("voice", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .client
            .post(self.method_url("sendVoice"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram sendVoice error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "Telegram sendVoice error: {status} - {body}"
            )));
        }

        tracing::debug!(chat_id, "Telegram voice message sent");
        Ok(())
    }

    /// Download a file by `file_id`
    ///
    /// # Errors
    ///
    /// Returns error if file metadata or the download itself fails
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let request = GetFileRequest {
            file_id: file_id.to_string(),
        };
        let file: TelegramFile = self.call("getFile", &request).await?;
        let file_path = file.file_path.ok_or_else(|| {
            Error::Channel("Telegram getFile returned no file_path".to_string())
        })?;

        let response = self
            .client
            .get(format!("{FILE_BASE}{}/{file_path}", self.token))
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram file download error: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Channel(format!(
                "Telegram file download error: {}",
                response.status()
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| Error::Channel(format!("Telegram file download read error: {e}")))?;
        Ok(data.to_vec())
    }

    /// Publish the command menu via `setMyCommands`
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails
    pub async fn sync_commands(&self, commands: &[BotCommand]) -> Result<()> {
        let request = SetMyCommandsRequest {
            commands: commands.to_vec(),
        };
        let _: bool = self.call("setMyCommands", &request).await?;
        tracing::info!(count = commands.len(), "Telegram bot commands synced");
        Ok(())
    }

    /// Show a chat action such as `typing`
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails
    pub async fn send_chat_action(&self, chat_id: i64, action: &'static str) -> Result<()> {
        let _: bool = self
            .call("sendChatAction", &SendChatActionRequest { chat_id, action })
            .await?;
        Ok(())
    }

    /// Verify the token and return the bot account
    ///
    /// # Errors
    ///
    /// Returns error if the token is rejected or the request fails
    pub async fn get_me(&self) -> Result<BotUser> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// Remove any webhook so `getUpdates` can be used
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails
    pub async fn delete_webhook(&self) -> Result<()> {
        let _: bool = self.call("deleteWebhook", &serde_json::json!({})).await?;
        Ok(())
    }

    /// POST `body` to `method` and unwrap the `result` field
    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram {method} error: {e}")))?;

        let text = response
            .text()
            .await
            .map_err(|e| Error::Channel(format!("Telegram {method} read error: {e}")))?;

        let parsed: TelegramResponse<T> = serde_json::from_str(&text)
            .map_err(|e| Error::Channel(format!("Telegram {method} parse error: {e}")))?;
        parsed.into_result(method)
    }
}
