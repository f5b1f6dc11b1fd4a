//! Daily block reset tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockTransport, Sent};
use confide_gateway::limits::{BLOCK_FILE, BlockStore, UserInfo, UserLimitManager};
use confide_gateway::notify::AdminNotifier;
use confide_gateway::scheduler::{BlockReset, DailyScheduler, DailyTask, Every};
use confide_gateway::settings::{SettingsDefaults, SettingsStore};

const ADMIN: i64 = 900;

fn limits(dir: &std::path::Path) -> Arc<UserLimitManager> {
    let settings = Arc::new(SettingsStore::open(dir, SettingsDefaults::default()).unwrap());
    Arc::new(UserLimitManager::open(BlockStore::new(dir.join(BLOCK_FILE)), settings).unwrap())
}

fn admin_texts(sent: &[Sent]) -> Vec<String> {
    sent.iter()
        .filter_map(|s| match s {
            Sent::Text { chat_id, text, .. } if *chat_id == ADMIN => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_reset_reports_cleared_count() {
    let dir = tempfile::tempdir().unwrap();
    let limits = limits(dir.path());
    limits.block(1, &UserInfo::default(), "manual", 0, 0).unwrap();
    limits.block(2, &UserInfo::default(), "manual", 0, 0).unwrap();

    let transport = Arc::new(MockTransport::new(Vec::new(), false));
    let task = BlockReset::new(
        Arc::clone(&limits),
        AdminNotifier::new(transport.clone(), vec![ADMIN]),
    );
    task.run().await.unwrap();

    assert_eq!(limits.blocked_count(), 0);
    let texts = admin_texts(&transport.sent().await);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("Daily reset"));
    assert!(texts[0].contains("Blocked users cleared: 2"));
}

#[tokio::test]
async fn test_reset_with_empty_list_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(MockTransport::new(Vec::new(), false));
    let task = BlockReset::new(
        limits(dir.path()),
        AdminNotifier::new(transport.clone(), vec![ADMIN]),
    );

    task.run().await.unwrap();
    assert!(transport.sent().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_reset_clears_blocks_made_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let limits = limits(dir.path());
    let transport = Arc::new(MockTransport::new(Vec::new(), false));

    let scheduler = DailyScheduler::new(
        Every(Duration::from_secs(60)),
        BlockReset::new(
            Arc::clone(&limits),
            AdminNotifier::new(transport.clone(), vec![ADMIN]),
        ),
    );
    assert!(scheduler.start());

    limits.block(5, &UserInfo::default(), "manual", 0, 0).unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!limits.is_blocked(5));

    limits.block(6, &UserInfo::default(), "manual", 0, 0).unwrap();
    limits.block(7, &UserInfo::default(), "manual", 0, 0).unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(limits.blocked_count(), 0);

    scheduler.stop().await;
    assert!(!scheduler.is_running());

    let texts = admin_texts(&transport.sent().await);
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("Blocked users cleared: 1"));
    assert!(texts[1].contains("Blocked users cleared: 2"));
}
