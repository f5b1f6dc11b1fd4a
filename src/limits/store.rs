//! CSV-backed persistence for blocked users
//!
//! The file keeps one row per block with the header
//! `user_id,username,first_name,blocked_at,reason,message_count,session_duration`.
//! Appends grow the file; every other mutation rewrites it through a temp
//! file in the same directory followed by a rename.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, Utc};
use serde::Deserialize;

use crate::{Error, Result};

/// Column names, in file order
pub const HEADER: [&str; 7] = [
    "user_id",
    "username",
    "first_name",
    "blocked_at",
    "reason",
    "message_count",
    "session_duration",
];

/// One persisted block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedUserRecord {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub blocked_at: DateTime<Utc>,
    pub reason: String,
    pub message_count: u32,
    pub session_duration_minutes: u32,
}

impl BlockedUserRecord {
    fn to_row(&self) -> [String; 7] {
        [
            self.user_id.to_string(),
            self.username.clone().unwrap_or_default(),
            self.first_name.clone().unwrap_or_default(),
            self.blocked_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.reason.clone(),
            self.message_count.to_string(),
            self.session_duration_minutes.to_string(),
        ]
    }
}

/// Row as read from disk, before validation
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRow {
    user_id: String,
    username: String,
    first_name: String,
    blocked_at: String,
    reason: String,
    message_count: String,
    session_duration: String,
}

impl RawRow {
    fn into_record(self, loaded_at: DateTime<Utc>) -> Option<BlockedUserRecord> {
        let user_id = self.user_id.trim().parse::<i64>().ok()?;

        let blocked_at = parse_timestamp(&self.blocked_at).unwrap_or_else(|| {
            tracing::warn!(
                user_id,
                value = %self.blocked_at,
                "unparsable blocked_at, treating as load time"
            );
            loaded_at
        });

        Some(BlockedUserRecord {
            user_id,
            username: non_empty(self.username),
            first_name: non_empty(self.first_name),
            blocked_at,
            reason: self.reason,
            message_count: self.message_count.trim().parse().unwrap_or(0),
            session_duration_minutes: self.session_duration.trim().parse().unwrap_or(0),
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one interpreted as local time
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Result of reading the block file
#[derive(Debug, Default)]
pub struct Loaded {
    /// Surviving records in file order, one per user
    pub records: Vec<BlockedUserRecord>,
    /// Rows dropped because their `user_id` was unparsable
    pub skipped: usize,
    /// Rows dropped because a later block for the same user exists
    pub duplicates: usize,
}

impl Loaded {
    /// Whether the file differs from what a rewrite would produce
    #[must_use]
    pub const fn needs_compaction(&self) -> bool {
        self.skipped > 0 || self.duplicates > 0
    }
}

/// Flat-file block list
#[derive(Debug, Clone)]
pub struct BlockStore {
    path: PathBuf,
}

impl BlockStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record, creating a header-only file when none exists
    ///
    /// Unparsable rows are skipped with a warning. When a user appears more
    /// than once the row with the latest `blocked_at` wins (ties go to the
    /// later row). If anything was dropped the file is compacted.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created, read, or compacted
    pub fn load(&self) -> Result<Loaded> {
        if !self.path.exists() {
            self.create_empty()?;
            tracing::info!(path = %self.path.display(), "created block list");
            return Ok(Loaded::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)?;

        let loaded_at = Utc::now();
        let mut rows: Vec<BlockedUserRecord> = Vec::new();
        let mut skipped = 0;

        for (line, row) in reader.deserialize::<RawRow>().enumerate() {
            match row.map(|r| r.into_record(loaded_at)) {
                Ok(Some(record)) => rows.push(record),
                Ok(None) => {
                    skipped += 1;
                    tracing::warn!(row = line + 2, "skipping block row with invalid user_id");
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(row = line + 2, error = %e, "skipping malformed block row");
                }
            }
        }

        let total = rows.len();
        let records = keep_latest(rows);
        let loaded = Loaded {
            duplicates: total - records.len(),
            records,
            skipped,
        };

        if loaded.needs_compaction() {
            tracing::info!(
                skipped = loaded.skipped,
                duplicates = loaded.duplicates,
                "compacting block list"
            );
            self.rewrite(&loaded.records)?;
        }

        Ok(loaded)
    }

    /// Append one record, writing the header first if the file is new
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or written
    pub fn append(&self, record: &BlockedUserRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(HEADER)?;
        }
        writer.write_record(record.to_row())?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?
            .sync_all()?;
        Ok(())
    }

    /// Replace the file contents with exactly `records`, header included
    ///
    /// # Errors
    ///
    /// Returns error if the temp file cannot be written or renamed
    pub fn rewrite(&self, records: &[BlockedUserRecord]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp);
        writer.write_record(HEADER)?;
        for record in records {
            writer.write_record(record.to_row())?;
        }
        writer.flush()?;

        let tmp = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Store(format!("failed to replace block list: {}", e.error)))?;
        Ok(())
    }

    /// Write a header-only file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn create_empty(&self) -> Result<()> {
        self.rewrite(&[])
    }
}

/// De-duplicate by user, keeping the latest block and the file order of survivors
fn keep_latest(rows: Vec<BlockedUserRecord>) -> Vec<BlockedUserRecord> {
    let mut winner: HashMap<i64, usize> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        winner
            .entry(row.user_id)
            .and_modify(|best| {
                if row.blocked_at >= rows[*best].blocked_at {
                    *best = idx;
                }
            })
            .or_insert(idx);
    }

    rows.into_iter()
        .enumerate()
        .filter(|(idx, row)| winner.get(&row.user_id) == Some(idx))
        .map(|(_, row)| row)
        .collect()
}
