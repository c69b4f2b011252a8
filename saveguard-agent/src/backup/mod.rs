//! Local timestamped backups of the watched save file.
//!
//! Backups live next to each other in the backup directory as
//! `{base}_{yyyy.MM.dd_HH.mm}.{ext}`. Nothing is indexed: every listing is
//! derived from the directory contents.

pub mod timestamp;

use crate::utils::{Result, SaveGuardError};
use crate::watch::WatchTarget;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A backup file found in (or just written to) the backup directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    /// Raw timestamp suffix taken from the file name
    pub timestamp: String,

    /// Parsed timestamp, `None` when the suffix is malformed
    pub taken_at: Option<NaiveDateTime>,

    /// Human label such as "Backup 2 hours ago"
    pub label: String,

    pub path: PathBuf,
}

/// Creates, lists and restores backups for one watch target.
#[derive(Debug, Clone)]
pub struct BackupStore {
    backup_dir: PathBuf,
    base_name: String,
    extension: String,
}

impl BackupStore {
    pub fn new(
        backup_dir: impl Into<PathBuf>,
        base_name: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            base_name: base_name.into(),
            extension: extension.into(),
        }
    }

    pub fn for_target(target: &WatchTarget) -> Self {
        Self::new(&target.backup_dir, &target.base_name, &target.extension)
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn backup_file_name(&self, timestamp: &str) -> String {
        format!("{}_{}.{}", self.base_name, timestamp, self.extension)
    }

    /// Timestamp suffix of a file name matching `{base}_*.{ext}`.
    fn timestamp_of<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name
            .strip_prefix(self.base_name.as_str())?
            .strip_prefix('_')?
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')
    }

    /// Copy `source` into the backup directory stamped with the current minute.
    pub fn create_backup(&self, source: &Path) -> Result<BackupRecord> {
        self.create_backup_at(source, timestamp::now())
    }

    /// Copy `source` stamped with `now`. A backup from the same minute is overwritten.
    pub fn create_backup_at(&self, source: &Path, now: NaiveDateTime) -> Result<BackupRecord> {
        std::fs::create_dir_all(&self.backup_dir)?;

        let stamp = timestamp::format_timestamp(now);
        let path = self.backup_dir.join(self.backup_file_name(&stamp));
        std::fs::copy(source, &path)?;
        debug!("Copied {} -> {}", source.display(), path.display());

        Ok(BackupRecord {
            taken_at: timestamp::parse_timestamp(&stamp),
            timestamp: stamp,
            label: timestamp::describe_elapsed(chrono::Duration::zero()),
            path,
        })
    }

    /// All backups of this target, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.list_backups_at(timestamp::now())
    }

    /// All backups of this target, newest first, labelled relative to `now`.
    ///
    /// Entries whose suffix does not parse are kept with an "unknown time" label.
    pub fn list_backups_at(&self, now: NaiveDateTime) -> Result<Vec<BackupRecord>> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(stamp) = self.timestamp_of(file_name) else {
                continue;
            };

            let taken_at = timestamp::parse_timestamp(stamp);
            let label = match taken_at {
                Some(at) => timestamp::describe_elapsed(now - at),
                None => timestamp::UNKNOWN_TIME_LABEL.to_string(),
            };

            records.push(BackupRecord {
                timestamp: stamp.to_string(),
                taken_at,
                label,
                path: entry.path(),
            });
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Copy the backup with `stamp` over `{destination_dir}/{base}.{ext}`.
    pub fn restore_backup(&self, stamp: &str, destination_dir: &Path) -> Result<PathBuf> {
        if stamp.is_empty() || stamp.contains(|c: char| c == '/' || c == '\\') || stamp.contains("..") {
            return Err(SaveGuardError::InvalidTimestamp(stamp.to_string()));
        }

        let source = self.backup_dir.join(self.backup_file_name(stamp));
        if !source.is_file() {
            return Err(SaveGuardError::NotFound(format!(
                "Backup file not found: {}",
                source.display()
            )));
        }

        let destination = destination_dir.join(format!("{}.{}", self.base_name, self.extension));
        std::fs::copy(&source, &destination)?;
        Ok(destination)
    }

    /// Delete all but the newest `keep` backups. Malformed entries are never touched.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let mut removed = 0;
        for record in self
            .list_backups()?
            .into_iter()
            .filter(|r| r.taken_at.is_some())
            .skip(keep)
        {
            std::fs::remove_file(&record.path)?;
            debug!("Removed old backup {}", record.path.display());
            removed += 1;
        }
        Ok(removed)
    }
}
