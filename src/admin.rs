//! Administrator chat commands
//!
//! Parsing is separate from execution so argument checks can be tested
//! without any stores. Replies are plain text for the transport.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::limits::{MAX_RETENTION_DAYS, UserLimitManager};
use crate::notify::AdminNotifier;
use crate::scratch::{STALE_AFTER, Scratch};
use crate::settings::SettingsStore;
use crate::validation::{PROMPT_CHARS, is_valid_prompt, parse_positive};

/// Reply to a non-administrator using an administrator command
pub const NOT_PERMITTED: &str = "You are not permitted to use this command.";

/// Most block records listed by `/blocked`
const LIST_LIMIT: usize = 50;

/// Names recognised as administrator commands
pub const COMMAND_NAMES: &[&str] = &[
    "prompt",
    "setprompt",
    "resetprompt",
    "limits",
    "setlimits",
    "tokens",
    "settokens",
    "stats",
    "blocked",
    "unblock",
    "clearblocks",
    "cleanupblocks",
    "cleanup",
];

/// A parsed administrator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    ShowPrompt,
    SetPrompt(String),
    ResetPrompt,
    ShowLimits,
    SetLimits { max_messages: u32, minutes: u32 },
    ShowTokens,
    SetTokens(u32),
    Stats,
    ListBlocked,
    Unblock(i64),
    ClearBlocks,
    CleanupBlocks(Option<u32>),
    CleanupScratch,
}

/// Why a command could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not an administrator command at all
    Unknown,
    /// Recognised command with bad arguments; holds the reply to send
    Usage(String),
}

impl AdminCommand {
    /// Parse a command name (without the slash) and its argument text
    ///
    /// # Errors
    ///
    /// [`ParseError::Unknown`] for other commands, [`ParseError::Usage`] for
    /// malformed arguments
    pub fn parse(name: &str, args: &str) -> Result<Self, ParseError> {
        let args = args.trim();
        let mut words = args.split_whitespace();

        let cmd = match name {
            "prompt" => Self::ShowPrompt,
            "setprompt" => {
                if args.is_empty() {
                    return Err(usage("Usage: /setprompt <new prompt text>"));
                }
                if !is_valid_prompt(args) {
                    return Err(ParseError::Usage(format!(
                        "The prompt must be between {} and {} characters.",
                        PROMPT_CHARS.start(),
                        PROMPT_CHARS.end()
                    )));
                }
                Self::SetPrompt(args.to_string())
            }
            "resetprompt" => Self::ResetPrompt,
            "limits" => Self::ShowLimits,
            "setlimits" => {
                let parsed = (
                    words.next().and_then(parse_positive),
                    words.next().and_then(parse_positive),
                    words.next(),
                );
                match parsed {
                    (Some(max_messages), Some(minutes), None) => Self::SetLimits {
                        max_messages,
                        minutes,
                    },
                    _ => {
                        return Err(usage(
                            "Usage: /setlimits <messages> <minutes>, both positive whole numbers",
                        ));
                    }
                }
            }
            "tokens" => Self::ShowTokens,
            "settokens" => match (words.next().and_then(parse_positive), words.next()) {
                (Some(n), None) => Self::SetTokens(n),
                _ => return Err(usage("Usage: /settokens <n>, a positive whole number")),
            },
            "stats" => Self::Stats,
            "blocked" => Self::ListBlocked,
            "unblock" => match (words.next().map(str::parse::<i64>), words.next()) {
                (Some(Ok(id)), None) => Self::Unblock(id),
                _ => return Err(usage("Usage: /unblock <user_id>")),
            },
            "clearblocks" => Self::ClearBlocks,
            "cleanupblocks" => match (words.next(), words.next()) {
                (None, _) => Self::CleanupBlocks(None),
                (Some(days), None) => match days.parse::<u32>() {
                    Ok(days) if days <= MAX_RETENTION_DAYS => Self::CleanupBlocks(Some(days)),
                    _ => return Err(cleanup_usage()),
                },
                _ => return Err(cleanup_usage()),
            },
            "cleanup" => Self::CleanupScratch,
            _ => return Err(ParseError::Unknown),
        };
        Ok(cmd)
    }
}

fn usage(text: &str) -> ParseError {
    ParseError::Usage(text.to_string())
}

fn cleanup_usage() -> ParseError {
    ParseError::Usage(format!(
        "Usage: /cleanupblocks [days], at most {MAX_RETENTION_DAYS}"
    ))
}

/// Executes administrator commands against the shared stores
#[derive(Clone)]
pub struct AdminConsole {
    settings: Arc<SettingsStore>,
    limits: Arc<UserLimitManager>,
    scratch: Scratch,
    notifier: AdminNotifier,
    retention_days: u32,
    mirror_to_admins: bool,
}

impl AdminConsole {
    #[must_use]
    pub const fn new(
        settings: Arc<SettingsStore>,
        limits: Arc<UserLimitManager>,
        scratch: Scratch,
        notifier: AdminNotifier,
        retention_days: u32,
        mirror_to_admins: bool,
    ) -> Self {
        Self {
            settings,
            limits,
            scratch,
            notifier,
            retention_days,
            mirror_to_admins,
        }
    }

    /// Handle a slash command from `user_id`
    ///
    /// Returns `None` when `name` is not an administrator command.
    /// `active_sessions` is reported by `/stats`.
    #[must_use]
    pub fn handle(
        &self,
        user_id: i64,
        name: &str,
        args: &str,
        active_sessions: usize,
    ) -> Option<String> {
        let parsed = AdminCommand::parse(name, args);
        if parsed == Err(ParseError::Unknown) {
            return None;
        }

        if !self.notifier.is_admin(user_id) {
            tracing::info!(user_id, command = name, "administrator command refused");
            return Some(NOT_PERMITTED.to_string());
        }

        Some(match parsed {
            Ok(cmd) => {
                tracing::info!(user_id, command = name, "administrator command");
                self.execute(&cmd, active_sessions)
            }
            Err(ParseError::Usage(reply)) => reply,
            Err(ParseError::Unknown) => return None,
        })
    }

    /// Run a parsed command and produce the reply
    #[must_use]
    pub fn execute(&self, cmd: &AdminCommand, active_sessions: usize) -> String {
        match cmd {
            AdminCommand::ShowPrompt => {
                format!("Current system prompt:\n\n{}", self.settings.snapshot().system_prompt)
            }
            AdminCommand::SetPrompt(text) => match self.settings.set_prompt(text) {
                Ok(()) => "Prompt updated.".to_string(),
                Err(e) => failed("save the prompt", &e),
            },
            AdminCommand::ResetPrompt => match self.settings.reset_prompt() {
                Ok(()) => "Prompt reset to the default.".to_string(),
                Err(e) => failed("reset the prompt", &e),
            },
            AdminCommand::ShowLimits => {
                let (messages, minutes) = self.settings.limits();
                format!(
                    "Session limits:\nmessages per session: {messages}\nsession duration: {minutes} min"
                )
            }
            AdminCommand::SetLimits {
                max_messages,
                minutes,
            } => match self.settings.set_limits(*max_messages, *minutes) {
                Ok(()) => format!(
                    "Limits updated: {max_messages} messages, {minutes} min per session."
                ),
                Err(e) => failed("save the limits", &e),
            },
            AdminCommand::ShowTokens => format!(
                "Completion token budget: {}",
                self.settings.snapshot().max_completion_tokens
            ),
            AdminCommand::SetTokens(n) => match self.settings.set_max_tokens(*n) {
                Ok(()) => format!("Token budget set to {n}."),
                Err(e) => failed("save the token budget", &e),
            },
            AdminCommand::Stats => self.stats(active_sessions),
            AdminCommand::ListBlocked => self.list_blocked(),
            AdminCommand::Unblock(id) => match self.limits.unblock(*id) {
                Ok(true) => format!("User {id} unblocked."),
                Ok(false) => format!("User {id} is not blocked."),
                Err(e) => failed("unblock the user", &e),
            },
            AdminCommand::ClearBlocks => match self.limits.clear_all() {
                Ok(n) => format!("Cleared {n} block(s)."),
                Err(e) => failed("clear the block list", &e),
            },
            AdminCommand::CleanupBlocks(days) => {
                let days = days.unwrap_or(self.retention_days);
                match self.limits.cleanup_old(days) {
                    Ok(n) => format!("Removed {n} block(s) older than {days} day(s)."),
                    Err(e) => failed("clean up blocks", &e),
                }
            }
            AdminCommand::CleanupScratch => match self.scratch.purge_stale(STALE_AFTER) {
                Ok(n) => format!("Temporary files cleaned up ({n} removed)."),
                Err(e) => failed("clean up temporary files", &e),
            },
        }
    }

    fn stats(&self, active_sessions: usize) -> String {
        let settings = self.settings.snapshot();
        let mut out = String::from("Bot statistics\n\n");
        let _ = writeln!(out, "active sessions: {active_sessions}");
        let _ = writeln!(out, "blocked users: {}", self.limits.blocked_count());
        let _ = writeln!(out, "administrators: {}", self.notifier.admin_count());
        let _ = writeln!(out, "mirroring to admins: {}", self.mirror_to_admins);
        let _ = writeln!(
            out,
            "limits: {} messages, {} min",
            settings.max_messages_per_session, settings.session_duration_minutes
        );
        let _ = writeln!(out, "token budget: {}", settings.max_completion_tokens);
        let _ = writeln!(
            out,
            "prompt length: {} chars",
            settings.system_prompt.chars().count()
        );
        match self.scratch.usage() {
            Ok(usage) => {
                #[allow(clippy::cast_precision_loss)]
                let mb = usage.bytes as f64 / (1024.0 * 1024.0);
                let _ = write!(out, "temporary files: {} ({mb:.2} MB)", usage.entries);
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to measure scratch usage");
                out.push_str("temporary files: unavailable");
            }
        }
        out
    }

    fn list_blocked(&self) -> String {
        let records = self.limits.list_blocked();
        if records.is_empty() {
            return "No users are blocked.".to_string();
        }

        let mut out = format!("Blocked users ({}):\n", records.len());
        for r in records.iter().take(LIST_LIMIT) {
            let _ = write!(out, "\n{}", r.user_id);
            if let Some(username) = &r.username {
                let _ = write!(out, " @{username}");
            }
            if let Some(first_name) = &r.first_name {
                let _ = write!(out, " ({first_name})");
            }
            let _ = write!(
                out,
                ", {}: {}",
                r.blocked_at.format("%Y-%m-%d %H:%M UTC"),
                r.reason
            );
        }
        if records.len() > LIST_LIMIT {
            let _ = write!(out, "\n\n...and {} more", records.len() - LIST_LIMIT);
        }
        out
    }
}

fn failed(action: &str, error: &crate::Error) -> String {
    tracing::error!(action, error = %error, "administrator command failed");
    format!("Failed to {action}. Check the logs.")
}
