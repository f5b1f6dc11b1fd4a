//! Telegram polling mode: getUpdates loop and event conversion

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::dedup::UpdateDedup;
use crate::channels::{InboundEvent, InboundMessage};
use crate::limits::UserInfo;

/// Long-poll timeout passed to getUpdates, in seconds
const LONG_POLL_SECS: u64 = 30;

/// Pause after a failed getUpdates call
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Response from Telegram getUpdates API
#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    #[serde(default)]
    result: Vec<PollingUpdate>,
}

/// A single update from getUpdates
#[derive(Debug, Deserialize)]
pub(crate) struct PollingUpdate {
    update_id: i64,
    message: Option<PollingMessage>,
}

/// Message from a polling update
#[derive(Debug, Deserialize)]
struct PollingMessage {
    chat: PollingChat,
    from: Option<PollingUser>,
    text: Option<String>,
    voice: Option<PollingVoice>,
}

/// Voice note from polling
#[derive(Debug, Deserialize)]
struct PollingVoice {
    file_id: String,
    #[serde(default)]
    duration: u32,
}

/// Chat info from polling
#[derive(Debug, Deserialize)]
struct PollingChat {
    id: i64,
    #[serde(rename = "type")]
    chat_type: String,
}

/// User info from polling
#[derive(Debug, Deserialize)]
struct PollingUser {
    id: i64,
    is_bot: bool,
    first_name: String,
    username: Option<String>,
}

impl super::TelegramChannel {
    /// Spawn a background task that long-polls getUpdates
    ///
    /// Converted events are forwarded into `tx`. The task exits when `cancel`
    /// fires or the receiver is dropped.
    #[must_use]
    pub fn start_polling(
        &self,
        tx: mpsc::Sender<InboundMessage>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let channel = self.clone();

        tokio::spawn(async move {
            if let Err(e) = channel.delete_webhook().await {
                tracing::warn!(error = %e, "failed to delete Telegram webhook before polling");
            }
            polling_loop(&channel, &tx, &cancel).await;
            tracing::info!("Telegram polling stopped");
        })
    }
}

/// Run the polling loop (background task)
async fn polling_loop(
    channel: &super::TelegramChannel,
    tx: &mpsc::Sender<InboundMessage>,
    cancel: &CancellationToken,
) {
    let mut offset: Option<i64> = None;
    let mut dedup = UpdateDedup::default();

    loop {
        let mut params = serde_json::json!({
            "timeout": LONG_POLL_SECS,
            "allowed_updates": ["message"],
        });
        if let Some(off) = offset {
            params["offset"] = serde_json::json!(off);
        }

        let request = channel
            .client
            .post(channel.method_url("getUpdates"))
            .json(&params)
            .send();

        let response = tokio::select! {
            () = cancel.cancelled() => return,
            response = request => response,
        };

        let updates = match response {
            Ok(resp) => match resp.json::<GetUpdatesResponse>().await {
                Ok(parsed) => parsed.result,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse Telegram getUpdates response");
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Telegram getUpdates error");
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
                continue;
            }
        };

        for update in &updates {
            // Advance offset past this update
            offset = Some(update.update_id + 1);

            if dedup.is_duplicate(update.update_id) {
                continue;
            }

            if let Some(msg) = update_to_inbound(update)
                && tx.send(msg).await.is_err()
            {
                tracing::debug!("inbound receiver dropped, stopping polling");
                return;
            }
        }
    }
}

/// Split `/command@bot args` into `("command", "args")`
fn parse_command(text: &str) -> Option<(String, String)> {
    let rest = text.strip_prefix('/')?;
    let (head, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let name = head.split('@').next().unwrap_or(head).to_lowercase();
    if name.is_empty() {
        return None;
    }
    Some((name, args.trim().to_string()))
}

/// Convert a polling update into an [`InboundMessage`]
///
/// Only private chats with a human sender are accepted.
pub(crate) fn update_to_inbound(update: &PollingUpdate) -> Option<InboundMessage> {
    let msg = update.message.as_ref()?;
    let from = msg.from.as_ref()?;

    if from.is_bot {
        return None;
    }
    if msg.chat.chat_type != "private" {
        tracing::debug!(chat_id = msg.chat.id, "ignoring non-private chat");
        return None;
    }

    let event = if let Some(voice) = &msg.voice {
        InboundEvent::Voice {
            file_id: voice.file_id.clone(),
            duration_secs: voice.duration,
        }
    } else {
        let text = msg.text.as_ref()?;
        match parse_command(text) {
            Some((name, _)) if name == "start" => InboundEvent::Start,
            Some((name, _)) if name == "cancel" => InboundEvent::Cancel,
            Some((name, args)) => InboundEvent::Command { name, args },
            None => InboundEvent::Text(text.clone()),
        }
    };

    Some(InboundMessage {
        chat_id: msg.chat.id,
        user_id: from.id,
        user: UserInfo {
            username: from.username.clone(),
            first_name: Some(from.first_name.clone()),
        },
        event,
    })
}
