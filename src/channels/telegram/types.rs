//! Telegram Bot API request/response types

use serde::{Deserialize, Serialize};

use crate::channels::Keyboard;

/// Telegram Bot API base URL
pub(crate) const API_BASE: &str = "https://api.telegram.org/bot";

/// Telegram file download base URL
pub(crate) const FILE_BASE: &str = "https://api.telegram.org/file/bot";

/// Reply keyboard shown under the input field
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReplyKeyboardMarkup {
    pub keyboard: Vec<Vec<KeyboardButton>>,
    pub resize_keyboard: bool,
    pub one_time_keyboard: bool,
}

/// A button in a reply keyboard row
#[derive(Debug, Clone, Serialize)]
pub(crate) struct KeyboardButton {
    pub text: String,
}

/// Request to hide the current reply keyboard
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReplyKeyboardRemove {
    pub remove_keyboard: bool,
}

/// Either kind of reply markup
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub(crate) enum ReplyMarkup {
    Keyboard(ReplyKeyboardMarkup),
    Remove(ReplyKeyboardRemove),
}

impl From<Keyboard> for ReplyMarkup {
    fn from(keyboard: Keyboard) -> Self {
        match keyboard {
            Keyboard::Buttons(rows) => Self::Keyboard(ReplyKeyboardMarkup {
                keyboard: rows
                    .into_iter()
                    .map(|row| row.into_iter().map(|text| KeyboardButton { text }).collect())
                    .collect(),
                resize_keyboard: true,
                one_time_keyboard: true,
            }),
            Keyboard::Remove => Self::Remove(ReplyKeyboardRemove {
                remove_keyboard: true,
            }),
        }
    }
}

/// Telegram sendMessage request
#[derive(Serialize)]
pub(crate) struct SendMessageRequest {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<ReplyMarkup>,
}

/// Telegram sendChatAction request
#[derive(Serialize)]
pub(crate) struct SendChatActionRequest {
    pub chat_id: i64,
    pub action: &'static str,
}

/// Telegram getFile request
#[derive(Serialize)]
pub(crate) struct GetFileRequest {
    pub file_id: String,
}

/// File metadata from Telegram getFile response
#[derive(Debug, Deserialize)]
pub(crate) struct TelegramFile {
    pub file_path: Option<String>,
}

/// Telegram setMyCommands request
#[derive(Serialize)]
pub(crate) struct SetMyCommandsRequest {
    pub commands: Vec<BotCommand>,
}

/// A bot command for Telegram's command menu
#[derive(Debug, Clone, Serialize)]
pub struct BotCommand {
    pub command: String,
    pub description: String,
}

impl BotCommand {
    #[must_use]
    pub fn new(command: &str, description: &str) -> Self {
        Self {
            command: command.to_string(),
            description: description.to_string(),
        }
    }
}

/// The bot's own account, from getMe
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// Telegram API response wrapper
#[derive(Deserialize)]
pub struct TelegramResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

impl<T> TelegramResponse<T> {
    /// Unwrap the result, turning `ok: false` into a channel error
    ///
    /// # Errors
    ///
    /// Returns error if the API reported failure or omitted the result
    pub fn into_result(self, method: &str) -> crate::Result<T> {
        match self.result {
            Some(result) if self.ok => Ok(result),
            _ => Err(crate::Error::Channel(format!(
                "Telegram {method} error: {}",
                self.description.unwrap_or_default()
            ))),
        }
    }
}
