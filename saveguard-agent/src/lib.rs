//! SaveGuard Library
//!
//! Watches a single game save file, keeps timestamped local backups of it and
//! mirrors the save folder into a size-bounded remote git repository.

pub mod backup;
pub mod config;
pub mod daemon;
pub mod fs;
pub mod orchestrator;
pub mod remote;
pub mod utils;
pub mod watch;

// Re-export commonly used types
pub use backup::{BackupRecord, BackupStore};
pub use config::Config;
pub use orchestrator::{SyncEvent, SyncOrchestrator, SyncState};
pub use remote::RemoteSync;
pub use utils::errors::{Result, SaveGuardError};
pub use watch::{ChangeDetector, DetectorStrategy, WatchTarget};
