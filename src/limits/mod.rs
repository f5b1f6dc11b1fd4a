//! Session limit enforcement and the durable block list

pub mod manager;
pub mod store;

pub use manager::{UserInfo, UserLimitManager};
pub use store::{BlockStore, BlockedUserRecord};

/// File name of the block list inside the data directory
pub const BLOCK_FILE: &str = "blocked_users.csv";

/// Longest retention accepted by block cleanup, in days
pub const MAX_RETENTION_DAYS: u32 = 36_500;
