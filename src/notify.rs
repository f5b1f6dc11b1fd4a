//! Best-effort delivery to administrators
//!
//! Failures are logged and counted but never returned, so a notification
//! problem cannot fail the operation that triggered it.

use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;

use crate::channels::Transport;

/// Sends texts and audio to the configured administrator ids
#[derive(Clone)]
pub struct AdminNotifier {
    transport: Arc<dyn Transport>,
    admin_ids: Vec<i64>,
}

impl AdminNotifier {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, admin_ids: Vec<i64>) -> Self {
        Self {
            transport,
            admin_ids,
        }
    }

    /// Whether `user_id` is an administrator
    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    #[must_use]
    pub fn admin_count(&self) -> usize {
        self.admin_ids.len()
    }

    /// Send a text to every administrator, returning how many deliveries succeeded
    pub async fn notify(&self, text: &str) -> usize {
        let sends = self
            .admin_ids
            .iter()
            .map(|&admin| async move { (admin, self.transport.send_text(admin, text, None).await) });

        self.count_delivered(join_all(sends).await)
    }

    /// Forward an audio file to every administrator
    pub async fn forward_voice(&self, audio: &Path, caption: &str) -> usize {
        let sends = self.admin_ids.iter().map(|&admin| async move {
            (
                admin,
                self.transport.send_voice(admin, audio, Some(caption)).await,
            )
        });

        self.count_delivered(join_all(sends).await)
    }

    fn count_delivered(&self, results: Vec<(i64, crate::Result<()>)>) -> usize {
        let mut delivered = 0;
        for (admin, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(admin_id = admin, error = %e, "admin notification failed"),
            }
        }
        tracing::debug!(delivered, total = self.admin_ids.len(), "admin notification sent");
        delivered
    }
}
