//! Conversation state machine
//!
//! Owns every user's [`SessionState`] and drives the voice pipeline:
//! download, transcribe, validate, complete, synthesize, deliver.
//!
//! A session is checked out of the map while one of its events is being
//! handled and checked back in afterwards, so the lock is never held across
//! an await. Events for one user must arrive in order; see
//! [`super::Dispatcher`]. An event that finds its session checked out is
//! rejected instead of interleaving.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::state::{DEFAULT_DISPLAY_NAME, SessionPhase, SessionState, normalize_name};
use crate::admin::AdminConsole;
use crate::channels::{InboundEvent, InboundMessage, Keyboard, Presence, Transport};
use crate::limits::{UserInfo, UserLimitManager};
use crate::notify::AdminNotifier;
use crate::scratch::Scratch;
use crate::services::{
    Completer, CompletionRequest, FailureKind, Service, ServiceError, Synthesizer, Transcriber,
};
use crate::settings::SettingsStore;
use crate::validation::is_valid_transcript;

/// Longest voice message accepted, in seconds
pub const MAX_VOICE_SECS: u32 = 7 * 60;

/// Name of the downloaded user audio inside a run directory
const INBOUND_AUDIO: &str = "voice.ogg";

pub const ENTER_NAME_BUTTON: &str = "Enter name";
pub const SKIP_BUTTON: &str = "Skip";
pub const RESTART_BUTTON: &str = "Start again";

pub const WELCOME_TEXT: &str = "Hi! This is a place where you can speak your mind without \
being judged. I'm here to listen and support you.\n\nWhat should I call you? A name is optional.";
pub const ASK_NAME_TEXT: &str = "Please type your name:";
pub const NAME_REPROMPT_TEXT: &str = "Please type a name or tap \"Skip\" first.";
pub const RECORD_PROMPT_TEXT: &str = "Tell me what's on your mind. Tap the microphone icon and \
speak (release to send).\n\nEach message can be up to 7 minutes long.";
pub const VOICE_ONLY_TEXT: &str = "I only understand voice messages. Tap the microphone icon \
and speak.";
pub const START_HINT_TEXT: &str = "Send /start to begin a conversation.";
pub const BUSY_TEXT: &str = "I'm still working on your previous message. Please wait a moment.";
pub const BLOCKED_TEXT: &str = "You have reached the limit for today. Please come back after \
the daily reset at midnight.";
pub const CANCELLED_TEXT: &str = "Session cancelled. Goodbye!";
pub const CLOSING_TEXT: &str = "The session is over. Thank you for trusting me with your \
thoughts.\n\nRemember: you are not alone, and your feelings matter.";
pub const REENTRY_TEXT: &str = "If you'd like to talk again, I'm here.";
pub const FILE_MISSING_TEXT: &str = "The voice file is missing or empty. Please record it again.";
pub const NOT_RECOGNIZED_TEXT: &str = "I could not recognize any speech. Please speak a little \
louder and more clearly.";
pub const NOT_PARSED_TEXT: &str = "I could not make out what you said. Please try again, \
speaking more clearly.";
pub const UNKNOWN_COMMAND_TEXT: &str = "Unknown command. Send /start to begin a conversation.";
const INTERNAL_ERROR_TEXT: &str = "Something went wrong on my side. Please try again.";

/// Everything the engine needs from the rest of the process
pub struct EngineParts {
    pub transport: Arc<dyn Transport>,
    pub transcriber: Arc<dyn Transcriber>,
    pub completer: Arc<dyn Completer>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub limits: Arc<UserLimitManager>,
    pub settings: Arc<SettingsStore>,
    pub notifier: AdminNotifier,
    pub admin: AdminConsole,
    pub scratch: Scratch,
    /// TTS voice profile
    pub voice: String,
    /// Forward transcripts, replies and audio to administrators
    pub mirror_to_admins: bool,
}

enum Slot {
    Ready(SessionState),
    InFlight { since: Instant },
}

enum Checkout {
    Ready(SessionState),
    Busy,
    Missing,
}

/// How a pipeline run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    /// Reply delivered; counts toward the session limit
    Delivered,
    /// Synthesis failed and the reply went out as text; not counted
    TextOnly,
    /// Nothing delivered; the user was told why
    Failed,
}

#[derive(Debug)]
enum PipelineFailure {
    FileMissing,
    NotRecognized,
    NotParsed,
    Service(ServiceError),
}

#[derive(Debug, Clone, Copy)]
enum EndReason {
    TimeLimit,
    MessageLimit,
}

impl EndReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::TimeLimit => "time limit",
            Self::MessageLimit => "message limit",
        }
    }
}

/// Per-user conversation state machine
pub struct ConversationEngine {
    transport: Arc<dyn Transport>,
    transcriber: Arc<dyn Transcriber>,
    completer: Arc<dyn Completer>,
    synthesizer: Arc<dyn Synthesizer>,
    limits: Arc<UserLimitManager>,
    settings: Arc<SettingsStore>,
    notifier: AdminNotifier,
    admin: AdminConsole,
    scratch: Scratch,
    voice: String,
    mirror_to_admins: bool,
    sessions: Mutex<HashMap<i64, Slot>>,
}

impl ConversationEngine {
    #[must_use]
    pub fn new(parts: EngineParts) -> Self {
        Self {
            transport: parts.transport,
            transcriber: parts.transcriber,
            completer: parts.completer,
            synthesizer: parts.synthesizer,
            limits: parts.limits,
            settings: parts.settings,
            notifier: parts.notifier,
            admin: parts.admin,
            scratch: parts.scratch,
            voice: parts.voice,
            mirror_to_admins: parts.mirror_to_admins,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one inbound event
    ///
    /// Returns the user's phase afterwards, or `None` when the user has no
    /// session (never started, refused, or the event was rejected as busy).
    pub async fn handle(&self, msg: InboundMessage) -> Option<SessionPhase> {
        let InboundMessage {
            chat_id,
            user_id,
            user,
            event,
        } = msg;

        match event {
            InboundEvent::Start => self.start(user_id, chat_id, user).await,
            InboundEvent::Text(text) if text.trim() == RESTART_BUTTON => {
                self.start(user_id, chat_id, user).await
            }
            InboundEvent::Cancel => Some(self.cancel(user_id, chat_id).await),
            InboundEvent::Command { name, args } => {
                self.command(user_id, chat_id, &name, &args).await;
                self.phase_of(user_id)
            }
            event => self.advance(user_id, chat_id, event).await,
        }
    }

    /// Current phase of a user's session
    #[must_use]
    pub fn phase_of(&self, user_id: i64) -> Option<SessionPhase> {
        match self.sessions().get(&user_id)? {
            Slot::Ready(state) => Some(state.phase),
            Slot::InFlight { .. } => Some(SessionPhase::Recording),
        }
    }

    /// Copy of a user's session, if it is not being processed
    #[must_use]
    pub fn session(&self, user_id: i64) -> Option<SessionState> {
        match self.sessions().get(&user_id)? {
            Slot::Ready(state) => Some(state.clone()),
            Slot::InFlight { .. } => None,
        }
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions().len()
    }

    /// How long a session may sit untouched before it is collected
    #[must_use]
    pub fn idle_limit(&self) -> Duration {
        let (_, minutes) = self.settings.limits();
        Duration::from_secs(u64::from(minutes) * 60 * 2)
    }

    /// Drop sessions untouched for longer than `max_idle`
    ///
    /// Returns the number of sessions removed.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|user_id, slot| {
            let last = match slot {
                Slot::Ready(state) => state.last_activity,
                Slot::InFlight { since } => *since,
            };
            let keep = last.elapsed() <= max_idle;
            if !keep {
                tracing::info!(user_id, "idle session collected");
            }
            keep
        });
        before - sessions.len()
    }

    async fn start(&self, user_id: i64, chat_id: i64, user: UserInfo) -> Option<SessionPhase> {
        if self.limits.is_blocked(user_id) {
            self.sessions().remove(&user_id);
            tracing::info!(user_id, "blocked user tried to start a session");
            self.say(chat_id, BLOCKED_TEXT, Some(Keyboard::Remove)).await;
            return None;
        }

        let (_, minutes) = self.settings.limits();
        let state = SessionState::new(user_id, chat_id, user, minutes);
        let phase = state.phase;
        self.sessions().insert(user_id, Slot::Ready(state));
        tracing::info!(user_id, session_minutes = minutes, "session started");

        self.say(
            chat_id,
            WELCOME_TEXT,
            Some(Keyboard::column(&[ENTER_NAME_BUTTON, SKIP_BUTTON])),
        )
        .await;
        Some(phase)
    }

    async fn cancel(&self, user_id: i64, chat_id: i64) -> SessionPhase {
        if self.sessions().remove(&user_id).is_some() {
            tracing::info!(user_id, "session cancelled");
        }
        self.say(chat_id, CANCELLED_TEXT, Some(Keyboard::Remove)).await;
        SessionPhase::Terminated
    }

    async fn command(&self, user_id: i64, chat_id: i64, name: &str, args: &str) {
        let active = self.active_sessions();
        let reply = self
            .admin
            .handle(user_id, name, args, active)
            .unwrap_or_else(|| UNKNOWN_COMMAND_TEXT.to_string());
        self.say(chat_id, &reply, None).await;
    }

    async fn advance(
        &self,
        user_id: i64,
        chat_id: i64,
        event: InboundEvent,
    ) -> Option<SessionPhase> {
        let mut state = match self.checkout(user_id) {
            Checkout::Ready(state) => state,
            Checkout::Busy => {
                tracing::debug!(user_id, "event rejected while previous one is in flight");
                self.say(chat_id, BUSY_TEXT, None).await;
                return None;
            }
            Checkout::Missing => {
                self.say(chat_id, START_HINT_TEXT, None).await;
                return None;
            }
        };
        state.touch();

        let phase = match (state.phase, event) {
            (SessionPhase::AwaitName { .. }, InboundEvent::Text(text)) => {
                self.on_name(&mut state, &text).await
            }
            (SessionPhase::AwaitName { asked }, _) => {
                let keyboard = if asked {
                    Keyboard::Remove
                } else {
                    Keyboard::column(&[ENTER_NAME_BUTTON, SKIP_BUTTON])
                };
                let text = if asked { ASK_NAME_TEXT } else { NAME_REPROMPT_TEXT };
                self.say(chat_id, text, Some(keyboard)).await;
                SessionPhase::AwaitName { asked }
            }
            (
                SessionPhase::Recording,
                InboundEvent::Voice {
                    file_id,
                    duration_secs,
                },
            ) => self.on_voice(&mut state, &file_id, duration_secs).await,
            (SessionPhase::Recording, _) => {
                self.say(chat_id, VOICE_ONLY_TEXT, None).await;
                SessionPhase::Recording
            }
            (SessionPhase::Terminated, _) => {
                self.say(chat_id, START_HINT_TEXT, None).await;
                SessionPhase::Terminated
            }
        };

        state.phase = phase;
        state.touch();
        self.checkin(state);
        Some(phase)
    }

    async fn on_name(&self, state: &mut SessionState, text: &str) -> SessionPhase {
        let chat_id = state.chat_id;
        let greeting = match text.trim() {
            ENTER_NAME_BUTTON => {
                self.say(chat_id, ASK_NAME_TEXT, Some(Keyboard::Remove)).await;
                return SessionPhase::AwaitName { asked: true };
            }
            SKIP_BUTTON => {
                state.display_name = DEFAULT_DISPLAY_NAME.to_string();
                format!("All right, I'll call you {DEFAULT_DISPLAY_NAME}.")
            }
            raw => {
                state.display_name = normalize_name(raw);
                format!("Nice to meet you, {}!", state.display_name)
            }
        };

        tracing::debug!(user_id = state.user_id, display_name = %state.display_name, "name set");
        self.say(chat_id, &greeting, Some(Keyboard::Remove)).await;
        self.say(chat_id, RECORD_PROMPT_TEXT, None).await;
        SessionPhase::Recording
    }

    async fn on_voice(
        &self,
        state: &mut SessionState,
        file_id: &str,
        duration_secs: u32,
    ) -> SessionPhase {
        if state.timer.is_expired() {
            return self.end_session(state, EndReason::TimeLimit).await;
        }

        match self.run_pipeline(state, file_id, duration_secs).await {
            RunOutcome::Delivered => {
                state.message_count += 1;
                self.continue_or_end(state).await
            }
            RunOutcome::TextOnly => self.continue_or_end(state).await,
            RunOutcome::Failed => SessionPhase::Recording,
        }
    }

    async fn run_pipeline(
        &self,
        state: &SessionState,
        file_id: &str,
        duration_secs: u32,
    ) -> RunOutcome {
        if duration_secs > MAX_VOICE_SECS {
            tracing::debug!(user_id = state.user_id, duration_secs, "voice message too long");
            let text = format!(
                "Your message is too long ({}). The maximum is 7 minutes. Please record a shorter one.",
                format_duration(duration_secs)
            );
            self.say(state.chat_id, &text, None).await;
            return RunOutcome::Failed;
        }

        // Removed on drop, whichever way the run ends
        let run_dir = match self.scratch.run_dir() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!(user_id = state.user_id, error = %e, "failed to create run directory");
                self.say(state.chat_id, INTERNAL_ERROR_TEXT, None).await;
                return RunOutcome::Failed;
            }
        };

        match self.converse(state, file_id, run_dir.path()).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                self.report_failure(state, failure).await;
                RunOutcome::Failed
            }
        }
    }

    async fn converse(
        &self,
        state: &SessionState,
        file_id: &str,
        dir: &Path,
    ) -> Result<RunOutcome, PipelineFailure> {
        let chat_id = state.chat_id;

        self.presence(chat_id, Presence::RecordingVoice).await;
        let audio = dir.join(INBOUND_AUDIO);
        match self.transport.download(file_id, &audio).await {
            Ok(0) => return Err(PipelineFailure::FileMissing),
            Ok(bytes) => tracing::debug!(user_id = state.user_id, bytes, "voice downloaded"),
            Err(e) => {
                tracing::warn!(user_id = state.user_id, error = %e, "voice download failed");
                return Err(PipelineFailure::FileMissing);
            }
        }
        self.mirror_voice(state, &audio, "Voice (user)").await;

        self.presence(chat_id, Presence::Typing).await;
        let transcript = self
            .transcriber
            .transcribe(&audio)
            .await
            .map_err(PipelineFailure::Service)?;
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(PipelineFailure::NotRecognized);
        }
        if !is_valid_transcript(transcript) {
            return Err(PipelineFailure::NotParsed);
        }
        self.mirror_text(state, "STT", transcript).await;

        self.presence(chat_id, Presence::Typing).await;
        let settings = self.settings.snapshot();
        let reply = self
            .completer
            .complete(CompletionRequest {
                prompt: transcript,
                system_prompt: &settings.system_prompt,
                display_name: &state.display_name,
                max_tokens: settings.max_completion_tokens,
            })
            .await
            .map_err(PipelineFailure::Service)?;
        if reply.trim().is_empty() {
            return Err(PipelineFailure::Service(ServiceError::new(
                Service::Completion,
                FailureKind::Transient,
                "completion returned no text",
            )));
        }
        self.mirror_text(state, "GPT", &reply).await;

        self.presence(chat_id, Presence::RecordingVoice).await;
        let speech = match self.synthesizer.synthesize(&reply, &self.voice, dir).await {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(
                    user_id = state.user_id,
                    kind = %e.kind,
                    detail = %e.detail,
                    "synthesis failed, delivering reply as text"
                );
                self.say(chat_id, &reply, None).await;
                let notice = format!("I couldn't voice the reply: {}", e.user_message());
                self.say(chat_id, &notice, None).await;
                return Ok(RunOutcome::TextOnly);
            }
        };

        if let Err(e) = self.transport.send_voice(chat_id, &speech, None).await {
            tracing::warn!(user_id = state.user_id, error = %e, "voice delivery failed, sending text");
            self.say(chat_id, &reply, None).await;
        }
        self.mirror_voice(state, &speech, "Voice (bot)").await;

        Ok(RunOutcome::Delivered)
    }

    async fn report_failure(&self, state: &SessionState, failure: PipelineFailure) {
        let text = match &failure {
            PipelineFailure::FileMissing => FILE_MISSING_TEXT,
            PipelineFailure::NotRecognized => NOT_RECOGNIZED_TEXT,
            PipelineFailure::NotParsed => NOT_PARSED_TEXT,
            PipelineFailure::Service(e) => {
                tracing::warn!(
                    user_id = state.user_id,
                    service = %e.service,
                    kind = %e.kind,
                    detail = %e.detail,
                    "external service failed"
                );
                e.user_message()
            }
        };
        tracing::debug!(user_id = state.user_id, failure = ?failure, "pipeline run failed");
        self.say(state.chat_id, text, None).await;
    }

    async fn continue_or_end(&self, state: &SessionState) -> SessionPhase {
        if state.timer.is_expired() {
            return self.end_session(state, EndReason::TimeLimit).await;
        }

        let (max_messages, _) = self.settings.limits();
        if state.message_count >= max_messages {
            let text = format!(
                "You've reached the limit of {max_messages} messages for one session."
            );
            self.say(state.chat_id, &text, None).await;
            return self.end_session(state, EndReason::MessageLimit).await;
        }

        let minutes = state.timer.max_duration().as_secs() / 60;
        let text = format!(
            "Is there anything else you'd like to share?\n\nTap the microphone icon and speak \
             (release to send).\n\nEach message can be up to 7 minutes, and the whole \
             conversation up to {minutes} minutes."
        );
        self.say(state.chat_id, &text, None).await;
        SessionPhase::Recording
    }

    async fn end_session(&self, state: &SessionState, reason: EndReason) -> SessionPhase {
        let elapsed_minutes = state.timer.elapsed_minutes();
        tracing::info!(
            user_id = state.user_id,
            display_name = %state.display_name,
            elapsed_minutes,
            message_count = state.message_count,
            reason = reason.as_str(),
            "session ended"
        );

        match self.limits.check_and_enforce(
            state.user_id,
            state.message_count,
            elapsed_minutes,
            &state.user,
        ) {
            Ok(true) => tracing::info!(user_id = state.user_id, "user blocked until daily reset"),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(user_id = state.user_id, error = %e, "failed to record block");
            }
        }

        self.say(state.chat_id, CLOSING_TEXT, Some(Keyboard::Remove))
            .await;
        self.say(
            state.chat_id,
            REENTRY_TEXT,
            Some(Keyboard::column(&[RESTART_BUTTON])),
        )
        .await;
        SessionPhase::Terminated
    }

    async fn say(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) {
        if let Err(e) = self.transport.send_text(chat_id, text, keyboard).await {
            tracing::warn!(chat_id, error = %e, "failed to send message");
        }
    }

    async fn presence(&self, chat_id: i64, presence: Presence) {
        if let Err(e) = self.transport.send_presence(chat_id, presence).await {
            tracing::debug!(chat_id, error = %e, "failed to send presence");
        }
    }

    async fn mirror_text(&self, state: &SessionState, kind: &str, content: &str) {
        if !self.mirror_to_admins {
            return;
        }
        let text = format!("{}\n\n{content}", mirror_header(&state.display_name, kind));
        self.notifier.notify(&text).await;
    }

    async fn mirror_voice(&self, state: &SessionState, audio: &Path, kind: &str) {
        if !self.mirror_to_admins {
            return;
        }
        let caption = mirror_header(&state.display_name, kind);
        self.notifier.forward_voice(audio, &caption).await;
    }

    fn checkout(&self, user_id: i64) -> Checkout {
        let mut sessions = self.sessions();
        let Some(slot) = sessions.get_mut(&user_id) else {
            return Checkout::Missing;
        };
        let in_flight = Slot::InFlight {
            since: Instant::now(),
        };
        match std::mem::replace(slot, in_flight) {
            Slot::Ready(state) => Checkout::Ready(state),
            busy @ Slot::InFlight { .. } => {
                *slot = busy;
                Checkout::Busy
            }
        }
    }

    fn checkin(&self, state: SessionState) {
        let mut sessions = self.sessions();
        // A restart or cancel while in flight replaced the slot; theirs wins
        if !matches!(sessions.get(&state.user_id), Some(Slot::InFlight { .. })) {
            tracing::debug!(user_id = state.user_id, "session replaced while in flight");
            return;
        }
        if state.phase == SessionPhase::Terminated {
            sessions.remove(&state.user_id);
        } else {
            sessions.insert(state.user_id, Slot::Ready(state));
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<i64, Slot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `m:ss` rendering of a duration in seconds
fn format_duration(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn mirror_header(display_name: &str, kind: &str) -> String {
    format!(
        "[User: {display_name}]\n[Time: {}]\n[Type: {kind}]",
        chrono::Local::now().format("%H:%M:%S")
    )
}
