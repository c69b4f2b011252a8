//! Error taxonomy for the save guard.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SaveGuardError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Copy, pull and metadata failures. Logged and retried on the next cycle.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid backup timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Raised by the retention policy; it triggers eviction rather than failing a push.
    #[error("Repository size {size} bytes exceeds the retention ceiling of {ceiling} bytes")]
    SizeCeilingExceeded { size: u64, ceiling: u64 },

    #[error("Push rejected, remote has diverged (non-fast-forward): {0}")]
    NonFastForward(String),

    #[error("Remote sync is not initialized")]
    Uninitialized,

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote API error: {0}")]
    RemoteApi(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("Background task failed: {0}")]
    Task(String),

    /// A `run` process is watching the same save; restoring now would be backed up and pushed.
    #[error("A monitor (pid {pid}) is watching this save. Stop it before restoring, or pass --force if it is no longer running")]
    MonitorActive { pid: String },
}

impl SaveGuardError {
    /// Errors that must reach the caller of an explicit user action instead
    /// of only being logged.
    pub fn is_escalated(&self) -> bool {
        matches!(
            self,
            SaveGuardError::NonFastForward(_) | SaveGuardError::Authentication(_)
        )
    }
}

impl From<tokio::task::JoinError> for SaveGuardError {
    fn from(err: tokio::task::JoinError) -> Self {
        SaveGuardError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SaveGuardError>;
