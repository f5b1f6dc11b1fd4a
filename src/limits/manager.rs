//! Blocked-user bookkeeping on top of [`BlockStore`]
//!
//! The in-memory view and the file are kept in step: the store is written
//! first and memory only changes once the write succeeded. One mutex guards
//! both, so concurrent mutations never interleave their file rewrites.
//!
//! Mutations write and sync the file while holding that lock on the calling
//! thread. The file holds at most a few hundred rows, so the stall for
//! async callers is a single small write.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, SubsecRound, Utc};

use super::store::{BlockStore, BlockedUserRecord};
use crate::settings::SettingsStore;
use crate::{Error, Result};

/// Display details of a user, as reported by the transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Default)]
struct BlockState {
    records: Vec<BlockedUserRecord>,
    ids: HashSet<i64>,
}

impl BlockState {
    fn replace(&mut self, records: Vec<BlockedUserRecord>) {
        self.ids = records.iter().map(|r| r.user_id).collect();
        self.records = records;
    }
}

/// Enforces session limits and owns the block list
pub struct UserLimitManager {
    store: BlockStore,
    settings: Arc<SettingsStore>,
    state: Mutex<BlockState>,
}

impl UserLimitManager {
    /// Load the block list from `store`
    ///
    /// # Errors
    ///
    /// Returns error if the block file cannot be read or created
    pub fn open(store: BlockStore, settings: Arc<SettingsStore>) -> Result<Self> {
        let loaded = store.load()?;
        tracing::info!(
            path = %store.path().display(),
            blocked = loaded.records.len(),
            "block list loaded"
        );

        let mut state = BlockState::default();
        state.replace(loaded.records);

        Ok(Self {
            store,
            settings,
            state: Mutex::new(state),
        })
    }

    fn state(&self) -> MutexGuard<'_, BlockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the user currently has a block
    #[must_use]
    pub fn is_blocked(&self, user_id: i64) -> bool {
        self.state().ids.contains(&user_id)
    }

    /// Number of blocked users
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.state().ids.len()
    }

    /// The block record for a user, if any
    #[must_use]
    pub fn get(&self, user_id: i64) -> Option<BlockedUserRecord> {
        self.state()
            .records
            .iter()
            .find(|r| r.user_id == user_id)
            .cloned()
    }

    /// All blocks, oldest first
    #[must_use]
    pub fn list_blocked(&self) -> Vec<BlockedUserRecord> {
        self.state().records.clone()
    }

    /// Block a user
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyBlocked`] if the user is already blocked, or a
    /// store error if the record could not be persisted (memory is untouched)
    pub fn block(
        &self,
        user_id: i64,
        info: &UserInfo,
        reason: &str,
        message_count: u32,
        session_minutes: u32,
    ) -> Result<()> {
        let mut state = self.state();
        if state.ids.contains(&user_id) {
            return Err(Error::AlreadyBlocked(user_id));
        }

        let record = BlockedUserRecord {
            user_id,
            username: info.username.clone(),
            first_name: info.first_name.clone(),
            // Second precision, as persisted
            blocked_at: Utc::now().trunc_subsecs(0),
            reason: reason.to_string(),
            message_count,
            session_duration_minutes: session_minutes,
        };

        self.store.append(&record).inspect_err(|e| {
            tracing::error!(user_id, error = %e, "failed to persist block");
        })?;

        state.ids.insert(user_id);
        state.records.push(record);
        drop(state);

        tracing::info!(
            user_id,
            first_name = info.first_name.as_deref().unwrap_or(""),
            reason,
            "user blocked"
        );
        Ok(())
    }

    /// Remove a user's block
    ///
    /// Returns `false` if the user was not blocked.
    ///
    /// # Errors
    ///
    /// Returns error if the block file could not be rewritten (memory is untouched)
    pub fn unblock(&self, user_id: i64) -> Result<bool> {
        let mut state = self.state();
        if !state.ids.contains(&user_id) {
            tracing::debug!(user_id, "unblock requested for user who is not blocked");
            return Ok(false);
        }

        let remaining: Vec<_> = state
            .records
            .iter()
            .filter(|r| r.user_id != user_id)
            .cloned()
            .collect();
        self.store.rewrite(&remaining)?;
        state.replace(remaining);
        drop(state);

        tracing::info!(user_id, "user unblocked");
        Ok(true)
    }

    /// Block the user if a session crossed the current limits
    ///
    /// Returns `true` when the user is blocked after the call, including when
    /// a block already existed.
    ///
    /// # Errors
    ///
    /// Returns error if a new block could not be persisted
    pub fn check_and_enforce(
        &self,
        user_id: i64,
        message_count: u32,
        session_minutes: u32,
        info: &UserInfo,
    ) -> Result<bool> {
        let (max_messages, max_minutes) = self.settings.limits();

        let reason = if message_count >= max_messages {
            format!("message limit exceeded ({max_messages})")
        } else if session_minutes >= max_minutes {
            format!("session time limit exceeded ({max_minutes} min)")
        } else {
            return Ok(false);
        };

        match self.block(user_id, info, &reason, message_count, session_minutes) {
            Ok(()) | Err(Error::AlreadyBlocked(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Remove blocks older than `days_old` days
    ///
    /// # Errors
    ///
    /// Returns error if the block file could not be rewritten
    pub fn cleanup_old(&self, days_old: u32) -> Result<usize> {
        let Some(cutoff) = Utc::now().checked_sub_signed(Duration::days(i64::from(days_old)))
        else {
            tracing::debug!(days_old, "cutoff predates every timestamp, nothing to remove");
            return Ok(0);
        };
        let removed = self.cleanup_older_than(cutoff)?;
        tracing::info!(removed, days_old, "old blocks cleaned up");
        Ok(removed)
    }

    /// Remove blocks with `blocked_at` strictly before `cutoff`
    ///
    /// # Errors
    ///
    /// Returns error if the block file could not be rewritten
    pub fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state();
        let (kept, removed): (Vec<_>, Vec<_>) = state
            .records
            .iter()
            .cloned()
            .partition(|r| r.blocked_at >= cutoff);

        if removed.is_empty() {
            return Ok(0);
        }

        self.store.rewrite(&kept)?;
        state.replace(kept);
        Ok(removed.len())
    }

    /// Remove every block
    ///
    /// # Errors
    ///
    /// Returns error if the block file could not be reset
    pub fn clear_all(&self) -> Result<usize> {
        let mut state = self.state();
        let count = state.ids.len();

        self.store.create_empty()?;
        state.replace(Vec::new());
        drop(state);

        tracing::info!(removed = count, "all blocks cleared");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsDefaults;

    fn manager(dir: &std::path::Path) -> UserLimitManager {
        let settings = SettingsStore::open(
            dir.join("settings"),
            SettingsDefaults {
                max_messages_per_session: 3,
                session_duration_minutes: 5,
                ..SettingsDefaults::default()
            },
        )
        .unwrap();
        UserLimitManager::open(
            BlockStore::new(dir.join("blocked_users.csv")),
            Arc::new(settings),
        )
        .unwrap()
    }

    fn info(name: &str) -> UserInfo {
        UserInfo {
            username: None,
            first_name: Some(name.to_string()),
        }
    }

    #[test]
    fn test_block_and_unblock() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        manager.block(42, &info("Anna"), "manual", 1, 2).unwrap();
        assert!(manager.is_blocked(42));
        assert_eq!(manager.list_blocked()[0].user_id, 42);

        assert!(matches!(
            manager.block(42, &info("Anna"), "again", 1, 2),
            Err(Error::AlreadyBlocked(42))
        ));

        assert!(manager.unblock(42).unwrap());
        assert!(!manager.is_blocked(42));
        assert!(manager.list_blocked().is_empty());
        assert!(!manager.unblock(42).unwrap());
    }

    #[test]
    fn test_check_and_enforce_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        assert!(!manager.check_and_enforce(1, 2, 4, &info("a")).unwrap());
        assert!(!manager.is_blocked(1));

        assert!(manager.check_and_enforce(1, 3, 0, &info("a")).unwrap());
        assert_eq!(manager.get(1).unwrap().reason, "message limit exceeded (3)");

        assert!(manager.check_and_enforce(2, 0, 5, &info("b")).unwrap());
        assert_eq!(
            manager.get(2).unwrap().reason,
            "session time limit exceeded (5 min)"
        );

        // Already blocked: no second record
        assert!(manager.check_and_enforce(1, 9, 9, &info("a")).unwrap());
        assert_eq!(manager.blocked_count(), 2);
    }

    #[test]
    fn test_failed_append_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        // Replace the file with a directory so appends fail
        std::fs::remove_file(dir.path().join("blocked_users.csv")).unwrap();
        std::fs::create_dir(dir.path().join("blocked_users.csv")).unwrap();

        assert!(manager.block(5, &info("x"), "r", 1, 1).is_err());
        assert!(!manager.is_blocked(5));
        assert_eq!(manager.blocked_count(), 0);
    }

    #[test]
    fn test_clear_all() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.block(1, &info("a"), "r", 1, 1).unwrap();
        manager.block(2, &info("b"), "r", 1, 1).unwrap();

        assert_eq!(manager.clear_all().unwrap(), 2);
        assert!(manager.list_blocked().is_empty());
        assert_eq!(manager.blocked_count(), 0);
        assert_eq!(manager.clear_all().unwrap(), 0);
    }
}
