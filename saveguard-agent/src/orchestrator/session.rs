//! One run of the orchestrator: the change worker and what it needs.

use super::SyncEvent;
use crate::backup::BackupStore;
use crate::fs::walker;
use crate::remote::{PushReport, RemoteSync};
use crate::utils::{LogSink, Result, SaveGuardError, Severity};
use crate::watch::ChangeEvent;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Live state of a started orchestrator. Dropped on `stop`.
pub(crate) struct SyncSession {
    pub(crate) cancel: CancellationToken,
    pub(crate) worker: JoinHandle<()>,
    pub(crate) remote: Option<Arc<Mutex<RemoteSync>>>,
}

/// Everything a single backup-then-push cycle touches.
pub(crate) struct ChangeCycle {
    pub(crate) store: BackupStore,
    pub(crate) source_dir: PathBuf,
    pub(crate) keep_backups: Option<usize>,
    pub(crate) remote: Option<Arc<Mutex<RemoteSync>>>,
    pub(crate) log: Arc<dyn LogSink>,
    pub(crate) events: broadcast::Sender<SyncEvent>,
}

impl SyncSession {
    /// Spawn the worker. Changes are handled one at a time, in arrival order.
    pub(crate) fn spawn(
        cycle: ChangeCycle,
        changes: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let remote = cycle.remote.clone();
        let worker = tokio::spawn(run_worker(cycle, changes, cancel.clone()));
        Self {
            cancel,
            worker,
            remote,
        }
    }
}

async fn run_worker(
    cycle: ChangeCycle,
    mut changes: mpsc::UnboundedReceiver<ChangeEvent>,
    cancel: CancellationToken,
) {
    loop {
        // A started cycle runs to completion; cancellation is only observed between cycles.
        let change = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            change = changes.recv() => change,
        };
        match change {
            Some(change) => cycle.handle(change).await,
            None => break,
        }
    }
    tracing::debug!("Sync worker stopped");
}

impl ChangeCycle {
    pub(crate) async fn handle(&self, change: ChangeEvent) {
        let store = self.store.clone();
        let live_file = change.path.clone();
        let created = match tokio::task::spawn_blocking(move || store.create_backup(&live_file)).await {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        };

        let record = match created {
            Ok(record) => record,
            Err(e) => {
                self.log
                    .log(&format!("Failed to create backup: {}", e), Severity::Error);
                self.emit(SyncEvent::BackupFailed {
                    error: e.to_string(),
                });
                // Without a fresh local backup there is nothing new to push.
                return;
            }
        };

        self.log.log(
            &format!("Backup created: {}", record.path.display()),
            Severity::Success,
        );
        self.emit(SyncEvent::BackupCreated { record });

        if let Some(keep) = self.keep_backups {
            let store = self.store.clone();
            let pruned = match tokio::task::spawn_blocking(move || store.prune(keep)).await {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            };
            match pruned {
                Ok(0) => {}
                Ok(removed) => self.log.log(
                    &format!("Removed {} old backup(s), keeping {}", removed, keep),
                    Severity::Success,
                ),
                Err(e) => self
                    .log
                    .log(&format!("Failed to prune old backups: {}", e), Severity::Warning),
            }
        }

        if let Some(remote) = &self.remote {
            let result = self.push(remote).await;
            match result {
                Ok(report) => self.emit(SyncEvent::RemotePushed { report }),
                Err(e) => self.emit(SyncEvent::RemotePushFailed {
                    escalated: e.is_escalated(),
                    error: e.to_string(),
                }),
            }
        }
    }

    async fn push(&self, remote: &Mutex<RemoteSync>) -> Result<PushReport> {
        let source_dir = self.source_dir.clone();
        let files = match tokio::task::spawn_blocking(move || walker::list_files(&source_dir)).await {
            Ok(result) => result.map_err(SaveGuardError::from),
            Err(e) => Err(e.into()),
        };
        let files = match files {
            Ok(files) => files,
            Err(e) => {
                self.log.log(
                    &format!("Could not list {}: {}", self.source_dir.display(), e),
                    Severity::Error,
                );
                return Err(e);
            }
        };
        // RemoteSync::push logs its own failures.
        remote.lock().await.push(&files).await
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
