//! Daemon - the main gateway service
//!
//! Builds the stores, services and Telegram transport from [`Config`], then
//! runs polling, per-user dispatch and the daily block reset until a
//! shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::admin::AdminConsole;
use crate::channels::telegram::BotCommand;
use crate::channels::{TelegramChannel, Transport};
use crate::limits::{BLOCK_FILE, BlockStore, UserLimitManager};
use crate::notify::AdminNotifier;
use crate::scheduler::{BlockReset, DailyScheduler, Midnight};
use crate::scratch::{STALE_AFTER, Scratch};
use crate::services::{OpenAiCompleter, OpenAiSynthesizer, WhisperTranscriber};
use crate::session::{ConversationEngine, Dispatcher, EngineParts};
use crate::settings::SettingsStore;
use crate::{Config, Result};

/// Inbound events buffered between polling and dispatch
const INBOUND_QUEUE: usize = 256;

/// How long shutdown waits for in-flight conversations
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// The persistent state shared by the daemon and maintenance commands
pub struct Stores {
    pub settings: Arc<SettingsStore>,
    pub limits: Arc<UserLimitManager>,
}

impl Stores {
    /// Open the settings files and the block list under `config.data_dir`
    ///
    /// # Errors
    ///
    /// Returns error if the data directory or block list cannot be opened
    pub fn open(config: &Config) -> Result<Self> {
        let settings = Arc::new(SettingsStore::open(
            &config.data_dir,
            config.settings.clone(),
        )?);
        let store = BlockStore::new(config.data_dir.join(BLOCK_FILE));
        let limits = Arc::new(UserLimitManager::open(store, Arc::clone(&settings))?);
        Ok(Self { settings, limits })
    }
}

/// Commands shown in the Telegram menu
#[must_use]
pub fn bot_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new("start", "Start a new conversation"),
        BotCommand::new("cancel", "End the current conversation"),
    ]
}

/// The Confide daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if credentials are missing, a store cannot be opened or
    /// Telegram rejects the token
    pub async fn run(self) -> Result<()> {
        let config = self.config;
        let telegram_token = config.telegram_token()?.to_string();
        let openai_key = config.openai_key()?.to_string();

        let Stores { settings, limits } = Stores::open(&config)?;

        let scratch = Scratch::new(&config.temp_dir)?;
        if let Err(e) = scratch.purge_stale(STALE_AFTER) {
            tracing::warn!(error = %e, "failed to purge scratch directory");
        }

        let telegram = TelegramChannel::new(telegram_token);
        telegram.connect(&bot_commands()).await?;
        let transport: Arc<dyn Transport> = Arc::new(telegram.clone());

        let notifier = AdminNotifier::new(Arc::clone(&transport), config.admin_ids.clone());

        let transcriber = WhisperTranscriber::new(
            openai_key.clone(),
            config.voice.stt_model.clone(),
            config.voice.stt_language.clone(),
        )?;
        let completer = OpenAiCompleter::new(openai_key.clone(), config.llm_model.clone())?;
        let synthesizer = OpenAiSynthesizer::new(openai_key, config.voice.tts_model.clone())?;

        let admin = AdminConsole::new(
            Arc::clone(&settings),
            Arc::clone(&limits),
            scratch.clone(),
            notifier.clone(),
            config.block_retention_days,
            config.mirror_to_admins,
        );

        let engine = Arc::new(ConversationEngine::new(EngineParts {
            transport,
            transcriber: Arc::new(transcriber),
            completer: Arc::new(completer),
            synthesizer: Arc::new(synthesizer),
            limits: Arc::clone(&limits),
            settings: Arc::clone(&settings),
            notifier: notifier.clone(),
            admin,
            scratch,
            voice: config.voice.tts_voice.clone(),
            mirror_to_admins: config.mirror_to_admins,
        }));

        let scheduler = DailyScheduler::new(Midnight, BlockReset::new(limits, notifier));
        scheduler.start();

        let shutdown = install_signal_handler();
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        let polling = telegram.start_polling(tx, shutdown.child_token());

        // Dispatch stops when polling drops its sender, after queued events
        let dispatch = tokio::spawn(Dispatcher::new(engine).run(rx, CancellationToken::new()));

        let (max_messages, minutes) = settings.limits();
        tracing::info!(
            max_messages,
            session_minutes = minutes,
            admins = config.admin_ids.len(),
            mirror = config.mirror_to_admins,
            "confide gateway ready"
        );

        shutdown.cancelled().await;
        tracing::info!("shutting down");

        if let Err(e) = polling.await {
            tracing::warn!(error = %e, "polling task failed");
        }
        scheduler.stop().await;

        match tokio::time::timeout(DRAIN_TIMEOUT, dispatch).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "dispatch task failed"),
            Err(_) => tracing::warn!(
                timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "conversations still in flight at shutdown"
            ),
        }

        tracing::info!("daemon stopped");
        Ok(())
    }
}

/// Cancel the returned token on Ctrl-C or SIGTERM
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("received Ctrl-C"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received Ctrl-C");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received Ctrl-C");
}
