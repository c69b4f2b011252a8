//! Change detection for the watched save file.
//!
//! Two interchangeable strategies sit behind [`ChangeDetector`]:
//! native filesystem notifications ([`notify_watcher::NotifyDetector`]) and
//! mtime polling ([`poll::PollingDetector`]). Both deliver at most one
//! [`ChangeEvent`] per burst of writes.

pub mod debounce;
pub mod notify_watcher;
pub mod poll;

use crate::utils::{LogSink, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Minimum spacing between accepted notifications
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);

/// Wait after an accepted notification before the file is treated as stable
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// What is being protected and where its backups go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchTarget {
    /// Directory holding the live save file
    pub source_dir: PathBuf,

    /// Save file name without extension (the map name)
    pub base_name: String,

    /// Save file extension without the dot
    pub extension: String,

    pub backup_dir: PathBuf,
}

impl WatchTarget {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        base_name: impl Into<String>,
        extension: impl Into<String>,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            base_name: base_name.into(),
            extension: extension.into(),
            backup_dir: backup_dir.into(),
        }
    }

    /// `{base}.{ext}`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.base_name, self.extension)
    }

    /// Absolute location of the live save file
    pub fn live_file(&self) -> PathBuf {
        self.source_dir.join(self.file_name())
    }
}

/// The watched file changed and has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
}

/// Watches one file and reports debounced changes.
///
/// `start` must be called from within a tokio runtime. `stop` is idempotent
/// and releases the watch or poll loop before returning. Pausing keeps the
/// detector's baseline so that resuming does not report stale writes.
pub trait ChangeDetector: Send + Sync {
    fn start(&mut self, target: &WatchTarget, events: UnboundedSender<ChangeEvent>) -> Result<()>;

    fn stop(&mut self);

    fn pause(&self);

    fn resume(&self);

    fn is_running(&self) -> bool;
}

/// Detection strategy, selected from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorStrategy {
    #[default]
    Events,
    Polling,
}

impl DetectorStrategy {
    pub fn build(self, poll_interval: Duration, log: Arc<dyn LogSink>) -> Box<dyn ChangeDetector> {
        match self {
            DetectorStrategy::Events => Box::new(notify_watcher::NotifyDetector::new(log)),
            DetectorStrategy::Polling => {
                Box::new(poll::PollingDetector::new(log).with_interval(poll_interval))
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_target_paths() {
        let target = WatchTarget::new("/games/SavedArks", "TheIsland", "ark", "/backups");
        assert_eq!(target.file_name(), "TheIsland.ark");
        assert_eq!(target.live_file(), PathBuf::from("/games/SavedArks/TheIsland.ark"));
    }

    #[test]
    fn test_strategy_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            detector: DetectorStrategy,
        }
        let parsed: Wrapper = toml::from_str("detector = \"polling\"").unwrap();
        assert_eq!(parsed.detector, DetectorStrategy::Polling);
        assert_eq!(DetectorStrategy::default(), DetectorStrategy::Events);
    }
}
