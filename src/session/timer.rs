//! Per-session clock

use std::time::Duration;

use tokio::time::Instant;

/// Tracks how long a session has been running against its allowed duration
///
/// Uses the tokio clock so paused-time tests can drive it.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimer {
    started: Instant,
    max_duration: Duration,
}

impl SessionTimer {
    /// Start a timer now with a budget of `minutes`
    #[must_use]
    pub fn start(minutes: u32) -> Self {
        Self::with_duration(Duration::from_secs(u64::from(minutes) * 60))
    }

    #[must_use]
    pub fn with_duration(max_duration: Duration) -> Self {
        Self {
            started: Instant::now(),
            max_duration,
        }
    }

    /// Whether the session has run strictly longer than allowed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.elapsed() > self.max_duration
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left, zero once expired
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.max_duration.saturating_sub(self.elapsed())
    }

    /// Elapsed time in whole minutes
    #[must_use]
    pub fn elapsed_minutes(&self) -> u32 {
        u32::try_from(self.elapsed().as_secs() / 60).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub const fn max_duration(&self) -> Duration {
        self.max_duration
    }
}
