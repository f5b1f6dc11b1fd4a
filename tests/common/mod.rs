//! Shared test utilities
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use confide_gateway::admin::AdminConsole;
use confide_gateway::channels::{InboundEvent, InboundMessage, Keyboard, Presence, Transport};
use confide_gateway::limits::{BLOCK_FILE, BlockStore, UserInfo, UserLimitManager};
use confide_gateway::notify::AdminNotifier;
use confide_gateway::scratch::Scratch;
use confide_gateway::services::{
    Completer, CompletionRequest, ServiceError, Synthesizer, Transcriber,
};
use confide_gateway::session::{ConversationEngine, EngineParts};
use confide_gateway::settings::{SettingsDefaults, SettingsStore};
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Something the engine sent through the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        chat_id: i64,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Voice {
        chat_id: i64,
        caption: Option<String>,
    },
    Presence {
        chat_id: i64,
        presence: Presence,
    },
}

/// Transport that records everything instead of talking to Telegram
pub struct MockTransport {
    sent: Mutex<Vec<Sent>>,
    audio: Vec<u8>,
    fail_voice: bool,
}

impl MockTransport {
    pub fn new(audio: Vec<u8>, fail_voice: bool) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            audio,
            fail_voice,
        }
    }

    pub async fn sent(&self) -> Vec<Sent> {
        self.sent.lock().await.clone()
    }

    /// Texts sent to `chat_id`, in order
    pub async fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|s| match s {
                Sent::Text { chat_id: c, text, .. } if *c == chat_id => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn last_text_to(&self, chat_id: i64) -> Option<String> {
        self.texts_to(chat_id).await.pop()
    }

    pub async fn voices_to(&self, chat_id: i64) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|s| matches!(s, Sent::Voice { chat_id: c, .. } if *c == chat_id))
            .count()
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> confide_gateway::Result<()> {
        self.sent.lock().await.push(Sent::Text {
            chat_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(())
    }

    async fn send_voice(
        &self,
        chat_id: i64,
        audio: &Path,
        caption: Option<&str>,
    ) -> confide_gateway::Result<()> {
        assert!(audio.exists(), "voice file must exist while sending");
        if self.fail_voice {
            return Err(confide_gateway::Error::Channel("sendVoice failed".into()));
        }
        self.sent.lock().await.push(Sent::Voice {
            chat_id,
            caption: caption.map(ToString::to_string),
        });
        Ok(())
    }

    async fn send_presence(
        &self,
        chat_id: i64,
        presence: Presence,
    ) -> confide_gateway::Result<()> {
        self.sent
            .lock()
            .await
            .push(Sent::Presence { chat_id, presence });
        Ok(())
    }

    async fn download(&self, _file_id: &str, dest: &Path) -> confide_gateway::Result<u64> {
        tokio::fs::write(dest, &self.audio).await?;
        Ok(self.audio.len() as u64)
    }
}

/// Transcriber returning a fixed result
pub struct ScriptedTranscriber {
    reply: Result<String, ServiceError>,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<String, ServiceError> {
        assert!(audio.exists(), "downloaded audio must exist while transcribing");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }
}

/// Completer returning a fixed result and remembering the last request
pub struct ScriptedCompleter {
    reply: Result<String, ServiceError>,
    calls: AtomicUsize,
    last_display_name: Mutex<Option<String>>,
}

impl ScriptedCompleter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn last_display_name(&self) -> Option<String> {
        self.last_display_name.lock().await.clone()
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_display_name.lock().await = Some(request.display_name.to_string());
        self.reply.clone()
    }
}

/// Synthesizer writing a small file, or failing with a fixed error
pub struct ScriptedSynthesizer {
    failure: Option<ServiceError>,
    produced: Mutex<Vec<PathBuf>>,
}

impl ScriptedSynthesizer {
    pub async fn produced(&self) -> Vec<PathBuf> {
        self.produced.lock().await.clone()
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(
        &self,
        _text: &str,
        _voice: &str,
        dir: &Path,
    ) -> Result<PathBuf, ServiceError> {
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        let path = dir.join("reply.ogg");
        std::fs::write(&path, b"OggS-reply").map_err(|e| {
            ServiceError::new(
                confide_gateway::services::Service::Synthesis,
                confide_gateway::services::FailureKind::Transient,
                e.to_string(),
            )
        })?;
        self.produced.lock().await.push(path.clone());
        Ok(path)
    }
}

/// How the scripted collaborators behave
pub struct Script {
    pub max_messages: u32,
    pub session_minutes: u32,
    pub audio: Vec<u8>,
    pub transcript: Result<String, ServiceError>,
    pub completion: Result<String, ServiceError>,
    pub synthesis_failure: Option<ServiceError>,
    pub fail_voice_delivery: bool,
    pub admins: Vec<i64>,
    pub mirror_to_admins: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            max_messages: 10,
            session_minutes: 30,
            audio: b"OggS-voice".to_vec(),
            transcript: Ok("I had a rough day at work".to_string()),
            completion: Ok("That sounds exhausting. I'm here with you.".to_string()),
            synthesis_failure: None,
            fail_voice_delivery: false,
            admins: Vec::new(),
            mirror_to_admins: false,
        }
    }
}

/// An engine wired to mocks, with its state in a temp directory
pub struct Harness {
    pub engine: Arc<ConversationEngine>,
    pub transport: Arc<MockTransport>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub completer: Arc<ScriptedCompleter>,
    pub synthesizer: Arc<ScriptedSynthesizer>,
    pub limits: Arc<UserLimitManager>,
    pub settings: Arc<SettingsStore>,
    pub scratch: Scratch,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(script: Script) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");

        let settings = Arc::new(
            SettingsStore::open(
                dir.path().join("data"),
                SettingsDefaults {
                    max_messages_per_session: script.max_messages,
                    session_duration_minutes: script.session_minutes,
                    ..SettingsDefaults::default()
                },
            )
            .expect("settings store"),
        );
        let limits = Arc::new(
            UserLimitManager::open(
                BlockStore::new(dir.path().join("data").join(BLOCK_FILE)),
                Arc::clone(&settings),
            )
            .expect("limit manager"),
        );
        let scratch = Scratch::new(dir.path().join("tmp")).expect("scratch");

        let transport = Arc::new(MockTransport::new(script.audio, script.fail_voice_delivery));
        let transcriber = Arc::new(ScriptedTranscriber {
            reply: script.transcript,
            calls: AtomicUsize::new(0),
        });
        let completer = Arc::new(ScriptedCompleter {
            reply: script.completion,
            calls: AtomicUsize::new(0),
            last_display_name: Mutex::new(None),
        });
        let synthesizer = Arc::new(ScriptedSynthesizer {
            failure: script.synthesis_failure,
            produced: Mutex::new(Vec::new()),
        });

        let notifier = AdminNotifier::new(transport.clone(), script.admins);
        let admin = AdminConsole::new(
            Arc::clone(&settings),
            Arc::clone(&limits),
            scratch.clone(),
            notifier.clone(),
            30,
            script.mirror_to_admins,
        );

        let engine = Arc::new(ConversationEngine::new(EngineParts {
            transport: transport.clone(),
            transcriber: transcriber.clone(),
            completer: completer.clone(),
            synthesizer: synthesizer.clone(),
            limits: Arc::clone(&limits),
            settings: Arc::clone(&settings),
            notifier,
            admin,
            scratch: scratch.clone(),
            voice: "onyx".to_string(),
            mirror_to_admins: script.mirror_to_admins,
        }));

        Self {
            engine,
            transport,
            transcriber,
            completer,
            synthesizer,
            limits,
            settings,
            scratch,
            dir,
        }
    }

    /// Start a session for `user_id` and skip the name step
    pub async fn start_recording(&self, user_id: i64) {
        self.engine.handle(message(user_id, InboundEvent::Start)).await;
        self.engine
            .handle(text(user_id, confide_gateway::session::engine::SKIP_BUTTON))
            .await;
    }
}

pub fn user_info() -> UserInfo {
    UserInfo {
        username: Some("listener_test".to_string()),
        first_name: Some("Test".to_string()),
    }
}

/// A private-chat message from `user_id`
pub fn message(user_id: i64, event: InboundEvent) -> InboundMessage {
    InboundMessage {
        chat_id: user_id,
        user_id,
        user: user_info(),
        event,
    }
}

pub fn text(user_id: i64, body: &str) -> InboundMessage {
    message(user_id, InboundEvent::Text(body.to_string()))
}

pub fn voice(user_id: i64, duration_secs: u32) -> InboundMessage {
    message(
        user_id,
        InboundEvent::Voice {
            file_id: format!("file-{user_id}"),
            duration_secs,
        },
    )
}

pub fn command(user_id: i64, name: &str, args: &str) -> InboundMessage {
    message(
        user_id,
        InboundEvent::Command {
            name: name.to_string(),
            args: args.to_string(),
        },
    )
}
