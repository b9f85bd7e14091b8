//! JSON run snapshots.
//!
//! The step-wise CLI commands hand data to each other through dated JSON
//! files, so `discover` today can be followed by `score` and `draft` later:
//!
//! ```text
//! data_dir/
//! ├── discovered-2025-10-03.json
//! └── ranked-2025-10-03.json
//! ```
//!
//! Readers look for today's file first and fall back to the newest snapshot
//! of the same kind.

use crate::error::StoreError;
use crate::models::{ScoredTopic, Topic};
use crate::scoring::RankingReport;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

/// Output of the discovery step: validated, de-duplicated topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySnapshot {
    pub discovered_at: DateTime<Utc>,
    pub attempts: u32,
    pub topics: Vec<Topic>,
}

/// Output of the scoring step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingSnapshot {
    pub ranked_at: DateTime<Utc>,
    pub ranked: Vec<ScoredTopic>,
    pub report: RankingReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Discovered,
    Ranked,
}

impl SnapshotKind {
    fn prefix(self) -> &'static str {
        match self {
            SnapshotKind::Discovered => "discovered",
            SnapshotKind::Ranked => "ranked",
        }
    }
}

pub fn snapshot_path(data_dir: &str, kind: SnapshotKind, date: NaiveDate) -> PathBuf {
    Path::new(data_dir).join(format!("{}-{}.json", kind.prefix(), date.format("%Y-%m-%d")))
}

/// Serialize `value` to the dated snapshot file, creating `data_dir` if needed.
#[instrument(level = "info", skip_all, fields(%data_dir, kind = kind.prefix()))]
pub async fn write_snapshot<T: Serialize>(
    data_dir: &str,
    kind: SnapshotKind,
    date: NaiveDate,
    value: &T,
) -> Result<PathBuf, StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::create_dir_all(data_dir).await?;
    let path = snapshot_path(data_dir, kind, date);
    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote snapshot");
    Ok(path)
}

/// Read the snapshot for `date`, or the newest one of the same kind.
#[instrument(level = "info", skip_all, fields(%data_dir, kind = kind.prefix()))]
pub async fn read_snapshot<T: DeserializeOwned>(
    data_dir: &str,
    kind: SnapshotKind,
    date: NaiveDate,
) -> Result<Option<T>, StoreError> {
    let today = snapshot_path(data_dir, kind, date);
    let path = if fs::try_exists(&today).await.unwrap_or(false) {
        today
    } else {
        match latest_snapshot(data_dir, kind).await? {
            Some(path) => path,
            None => return Ok(None),
        }
    };
    debug!(path = %path.display(), "Reading snapshot");
    let raw = fs::read_to_string(&path).await?;
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Newest snapshot file of `kind`; dated names sort chronologically.
pub async fn latest_snapshot(data_dir: &str, kind: SnapshotKind) -> Result<Option<PathBuf>, StoreError> {
    let mut entries = match fs::read_dir(data_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let prefix = format!("{}-", kind.prefix());
    let mut newest: Option<PathBuf> = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(&prefix) || !name.ends_with(".json") {
            continue;
        }
        let path = entry.path();
        if newest.as_ref().is_none_or(|n| path > *n) {
            newest = Some(path);
        }
    }
    Ok(newest)
}
