//! Per-user ordered dispatch
//!
//! Each user gets a worker task fed by its own queue, so one user's events
//! are handled strictly in arrival order while different users run
//! concurrently. Idle workers are retired by a periodic sweep; a retired
//! worker's replacement waits for it to finish before handling anything.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::engine::ConversationEngine;
use crate::channels::InboundMessage;

/// Events buffered per user before new ones are dropped
const WORKER_QUEUE: usize = 32;

/// Idle time after which a user's worker is retired
pub const WORKER_IDLE: Duration = Duration::from_secs(5 * 60);

/// How often idle workers and sessions are swept
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Worker {
    tx: mpsc::Sender<InboundMessage>,
    last_used: Instant,
    handle: JoinHandle<()>,
}

/// Routes inbound events to per-user workers
pub struct Dispatcher {
    engine: Arc<ConversationEngine>,
    worker_idle: Duration,
    sweep_every: Duration,
    workers: HashMap<i64, Worker>,
    retired: HashMap<i64, JoinHandle<()>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(engine: Arc<ConversationEngine>) -> Self {
        Self::with_timings(engine, WORKER_IDLE, SWEEP_INTERVAL)
    }

    #[must_use]
    pub fn with_timings(
        engine: Arc<ConversationEngine>,
        worker_idle: Duration,
        sweep_every: Duration,
    ) -> Self {
        Self {
            engine,
            worker_idle,
            sweep_every,
            workers: HashMap::new(),
            retired: HashMap::new(),
        }
    }

    /// Dispatch events from `rx` until it closes or `cancel` fires
    ///
    /// On exit, events already queued for a user are still handled and every
    /// worker is awaited before this returns.
    pub async fn run(mut self, mut rx: mpsc::Receiver<InboundMessage>, cancel: CancellationToken) {
        let mut sweep = tokio::time::interval(self.sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first immediate tick
        sweep.tick().await;

        tracing::info!("dispatcher started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.route(msg);
                }
                _ = sweep.tick() => self.sweep(),
            }
        }

        self.drain().await;
        tracing::info!("dispatcher stopped");
    }

    /// Number of live workers
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn route(&mut self, msg: InboundMessage) {
        let user_id = msg.user_id;

        let msg = match self.workers.get_mut(&user_id) {
            Some(worker) => match worker.tx.try_send(msg) {
                Ok(()) => {
                    worker.last_used = Instant::now();
                    return;
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(user_id, "user queue full, event dropped");
                    return;
                }
                // Worker died; start a new one below
                Err(TrySendError::Closed(msg)) => msg,
            },
            None => msg,
        };

        let (tx, rx) = mpsc::channel(WORKER_QUEUE);
        let previous = self
            .workers
            .remove(&user_id)
            .map(|w| w.handle)
            .or_else(|| self.retired.remove(&user_id));
        let handle = tokio::spawn(worker(Arc::clone(&self.engine), user_id, rx, previous));

        if tx.try_send(msg).is_err() {
            tracing::warn!(user_id, "new worker rejected event");
        }
        self.workers.insert(
            user_id,
            Worker {
                tx,
                last_used: Instant::now(),
                handle,
            },
        );
    }

    fn sweep(&mut self) {
        let idle: Vec<i64> = self
            .workers
            .iter()
            .filter(|(_, w)| w.tx.is_closed() || w.last_used.elapsed() > self.worker_idle)
            .map(|(id, _)| *id)
            .collect();

        // Dropping the sender lets the worker finish its queue and exit
        for user_id in idle {
            if let Some(worker) = self.workers.remove(&user_id) {
                self.retired.insert(user_id, worker.handle);
            }
        }
        self.retired.retain(|_, handle| !handle.is_finished());

        let collected = self.engine.sweep_idle(self.engine.idle_limit());
        tracing::debug!(
            workers = self.workers.len(),
            retiring = self.retired.len(),
            sessions_collected = collected,
            "dispatch sweep"
        );
    }

    async fn drain(&mut self) {
        let handles: Vec<_> = self
            .workers
            .drain()
            .map(|(_, w)| w.handle)
            .chain(self.retired.drain().map(|(_, h)| h))
            .collect();

        tracing::debug!(workers = handles.len(), "draining dispatch workers");
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "dispatch worker panicked");
            }
        }
    }
}

async fn worker(
    engine: Arc<ConversationEngine>,
    user_id: i64,
    mut rx: mpsc::Receiver<InboundMessage>,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous
        && let Err(e) = previous.await
    {
        tracing::warn!(user_id, error = %e, "previous worker panicked");
    }

    while let Some(msg) = rx.recv().await {
        let phase = engine.handle(msg).await;
        tracing::trace!(user_id, ?phase, "event handled");
    }
    tracing::debug!(user_id, "worker exited");
}
