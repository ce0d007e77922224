// src/snapshot.rs
//! # Snapshot Store
//! Persists the listings seen for each source, one directory per source key.
//!
//! Every save writes a new file `state_<timestamp>.json`; files are never
//! rewritten. After a save the retention policy keeps only the `keep_last`
//! newest files. "Newest" is decided by the UTC timestamp embedded in the
//! file name. Names without microseconds come from older deployments that
//! stamped local time, so those (and foreign names) are ordered by the
//! file's modification time instead.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::WatchError;
use crate::listing::{ListingCodec, ListingRecord};

/// id → time the listing was last observed.
pub type LastSeen = BTreeMap<String, DateTime<Utc>>;

const FILE_PREFIX: &str = "state_";
const FILE_EXT: &str = "json";
const STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.6f";
const STAMP_PARSE: &str = "%Y-%m-%d_%H-%M-%S%.f";

/// Full state of one source at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub listings: Vec<ListingRecord>,
    pub last_seen: LastSeen,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

/// On-disk shape. `last_seen` is optional so plain `{"listings": [...]}`
/// files from older deployments still load.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    listings: Vec<Value>,
    #[serde(default)]
    last_seen: LastSeen,
}

/// Count-based retention: keep the N most recently written files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    keep_last: usize,
}

impl RetentionPolicy {
    /// `keep_last` below 1 is treated as 1 (the file just written survives).
    pub fn keep_last(n: usize) -> Self {
        Self {
            keep_last: n.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.keep_last
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::keep_last(10)
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    retention: RetentionPolicy,
}

#[derive(Debug)]
struct StoredFile {
    path: PathBuf,
    stamp: DateTime<Utc>,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, retention: RetentionPolicy) -> Self {
        Self {
            root: root.into(),
            retention,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files of one source.
    pub fn source_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Load the newest snapshot for `key`, or an empty one.
    ///
    /// Missing directories, unreadable or corrupt files are logged and yield
    /// an empty snapshot; this never fails the run.
    pub async fn load<C>(&self, key: &str, codec: &C) -> Snapshot
    where
        C: ListingCodec + ?Sized,
    {
        match self.try_load(key, codec).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                tracing::debug!(source = key, "no previous snapshot");
                Snapshot::default()
            }
            Err(e) => {
                tracing::warn!(source = key, error = %e, "snapshot load failed, starting empty");
                counter!("watch_snapshot_errors_total").increment(1);
                Snapshot::default()
            }
        }
    }

    async fn try_load<C>(&self, key: &str, codec: &C) -> Result<Option<Snapshot>, WatchError>
    where
        C: ListingCodec + ?Sized,
    {
        let files = self.list_files(key).await?;
        let Some(latest) = files.last() else {
            return Ok(None);
        };

        let raw = fs::read_to_string(&latest.path)
            .await
            .map_err(|e| WatchError::persistence(&latest.path, e))?;
        let file: SnapshotFile =
            serde_json::from_str(&raw).map_err(|e| WatchError::persistence(&latest.path, e))?;

        let mut listings = Vec::with_capacity(file.listings.len());
        for value in file.listings {
            let rec = codec
                .deserialize(value)
                .map_err(|e| WatchError::persistence(&latest.path, format!("{e:#}")))?;
            listings.push(rec);
        }

        tracing::debug!(
            source = key,
            file = %latest.path.display(),
            listings = listings.len(),
            "snapshot loaded"
        );
        Ok(Some(Snapshot {
            listings,
            last_seen: file.last_seen,
        }))
    }

    /// Write a snapshot stamped with the current time, then apply retention.
    pub async fn save<C>(
        &self,
        key: &str,
        codec: &C,
        listings: &[ListingRecord],
        last_seen: &LastSeen,
    ) -> Option<PathBuf>
    where
        C: ListingCodec + ?Sized,
    {
        self.save_at(key, codec, listings, last_seen, Utc::now()).await
    }

    /// Like [`save`](Self::save) with an explicit timestamp. Returns the path
    /// written, or `None` after logging a failure.
    pub async fn save_at<C>(
        &self,
        key: &str,
        codec: &C,
        listings: &[ListingRecord],
        last_seen: &LastSeen,
        now: DateTime<Utc>,
    ) -> Option<PathBuf>
    where
        C: ListingCodec + ?Sized,
    {
        match self.try_save(key, codec, listings, last_seen, now).await {
            Ok(path) => {
                if let Err(e) = self.prune(key).await {
                    tracing::warn!(source = key, error = %e, "snapshot retention failed");
                    counter!("watch_snapshot_errors_total").increment(1);
                }
                Some(path)
            }
            Err(e) => {
                tracing::warn!(source = key, error = %e, "snapshot save failed");
                counter!("watch_snapshot_errors_total").increment(1);
                None
            }
        }
    }

    async fn try_save<C>(
        &self,
        key: &str,
        codec: &C,
        listings: &[ListingRecord],
        last_seen: &LastSeen,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, WatchError>
    where
        C: ListingCodec + ?Sized,
    {
        let dir = self.source_dir(key);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| WatchError::persistence(&dir, e))?;

        // Keep names strictly increasing even if the clock stalls or steps back.
        let existing = self.list_files(key).await?;
        let stamp = match existing.last() {
            Some(newest) if newest.stamp >= now => newest.stamp + Duration::microseconds(1),
            _ => now,
        };

        let file = SnapshotFile {
            listings: listings.iter().map(|r| codec.serialize(r)).collect(),
            last_seen: last_seen.clone(),
        };
        let body =
            serde_json::to_vec_pretty(&file).map_err(|e| WatchError::persistence(&dir, e))?;

        let name = file_name_for(stamp);
        let path = dir.join(&name);
        let tmp = dir.join(format!(".{name}.tmp"));
        fs::write(&tmp, &body)
            .await
            .map_err(|e| WatchError::persistence(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| WatchError::persistence(&path, e))?;

        tracing::debug!(source = key, file = %path.display(), "snapshot saved");
        Ok(path)
    }

    /// Delete the oldest files beyond the retention limit.
    async fn prune(&self, key: &str) -> Result<usize, WatchError> {
        let files = self.list_files(key).await?;
        let excess = files.len().saturating_sub(self.retention.limit());
        for f in &files[..excess] {
            fs::remove_file(&f.path)
                .await
                .map_err(|e| WatchError::persistence(&f.path, e))?;
            tracing::trace!(source = key, file = %f.path.display(), "snapshot pruned");
        }
        Ok(excess)
    }

    /// Snapshot files of one source, oldest first.
    async fn list_files(&self, key: &str) -> Result<Vec<StoredFile>, WatchError> {
        let dir = self.source_dir(key);
        let mut rd = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WatchError::persistence(&dir, e)),
        };

        let mut out = Vec::new();
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| WatchError::persistence(&dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(FILE_EXT) {
                continue;
            }
            let stamp = match stamp_from_name(&path) {
                Some(ts) => ts,
                None => match entry.metadata().await.and_then(|m| m.modified()) {
                    Ok(mtime) => DateTime::<Utc>::from(mtime),
                    Err(e) => {
                        tracing::warn!(file = %path.display(), error = %e, "no mtime, ignoring file");
                        continue;
                    }
                },
            };
            out.push(StoredFile { path, stamp });
        }
        out.sort_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.path.cmp(&b.path)));
        Ok(out)
    }
}

fn file_name_for(stamp: DateTime<Utc>) -> String {
    format!("{FILE_PREFIX}{}.{FILE_EXT}", stamp.format(STAMP_FORMAT))
}

fn stamp_from_name(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    let raw = stem.strip_prefix(FILE_PREFIX)?;
    // second-resolution names are local time, not UTC
    if !raw.contains('.') {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, STAMP_PARSE)
        .ok()
        .map(|n| n.and_utc())
}
