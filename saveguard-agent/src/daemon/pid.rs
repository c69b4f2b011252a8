//! Pid file marking a running monitor.
//!
//! `run` holds a [`PidFile`] in the backup directory for as long as it
//! watches. Commands that write the live save check for it first, since a
//! write made outside the monitor cannot pause its detector.

use crate::utils::{Result, SaveGuardError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const PID_FILE_NAME: &str = "saveguard.pid";

/// Removes the file on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Record the current process in `dir`. A stale file left by a crash is overwritten.
    pub fn create(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(PID_FILE_NAME);
        fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Contents of the pid file in `dir`, if there is one.
    pub fn read(dir: &Path) -> io::Result<Option<String>> {
        match fs::read_to_string(dir.join(PID_FILE_NAME)) {
            Ok(pid) => Ok(Some(pid.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove pid file {}: {}", self.path.display(), e);
            }
        }
    }
}

/// `MonitorActive` when a monitor holds a pid file in `dir`.
pub fn ensure_no_monitor(dir: &Path) -> Result<()> {
    match PidFile::read(dir)? {
        Some(pid) => Err(SaveGuardError::MonitorActive { pid }),
        None => Ok(()),
    }
}
