//! Wires change detection to local backups and the remote mirror.
//!
//! Each detected change runs one cycle on a single worker task: create a
//! local backup, optionally prune old ones, then push the source folder to
//! the remote when one is attached. Cycles never overlap. Callers observe
//! completion through [`SyncOrchestrator::subscribe`].

mod session;

use crate::backup::{BackupRecord, BackupStore};
use crate::remote::{PushReport, RemoteRepoHandle, RemoteSync};
use crate::utils::{LogSink, Result, SaveGuardError, Severity};
use crate::watch::{ChangeDetector, WatchTarget};
use serde::Serialize;
use session::{ChangeCycle, SyncSession};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};

/// How long `stop` waits for an in-flight cycle
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Stopped,
    Watching,
    WatchingWithRemote,
}

/// Outcome of a change cycle step.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    BackupCreated { record: BackupRecord },
    BackupFailed { error: String },
    RemotePushed { report: PushReport },
    RemotePushFailed { error: String, escalated: bool },
}

pub struct SyncOrchestrator {
    target: WatchTarget,
    store: BackupStore,
    detector: Box<dyn ChangeDetector>,
    log: Arc<dyn LogSink>,
    keep_backups: Option<usize>,
    events: broadcast::Sender<SyncEvent>,
    state: SyncState,
    session: Option<SyncSession>,
}

impl SyncOrchestrator {
    pub fn new(target: WatchTarget, detector: Box<dyn ChangeDetector>, log: Arc<dyn LogSink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: BackupStore::for_target(&target),
            target,
            detector,
            log,
            keep_backups: None,
            events,
            state: SyncState::Stopped,
            session: None,
        }
    }

    /// Keep only the newest `keep` backups after each new one.
    pub fn with_keep_backups(mut self, keep: Option<usize>) -> Self {
        self.keep_backups = keep;
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Replace the watch target. Only allowed while stopped.
    pub fn retarget(&mut self, target: WatchTarget) -> Result<()> {
        if self.state != SyncState::Stopped {
            return Err(SaveGuardError::Config(
                "cannot change the watch target while monitoring".to_string(),
            ));
        }
        self.store = BackupStore::for_target(&target);
        self.target = target;
        Ok(())
    }

    /// Start monitoring. Starting a running orchestrator does nothing.
    ///
    /// A remote that fails to initialise is dropped and monitoring continues
    /// with local backups only.
    pub async fn start(&mut self, remote: Option<RemoteSync>) -> Result<SyncState> {
        if self.session.is_some() {
            return Ok(self.state);
        }

        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.detector.start(&self.target, changes_tx) {
            self.log
                .log(&format!("Could not start monitoring: {}", e), Severity::Error);
            return Err(e);
        }
        self.log.log(
            &format!("Started monitoring {}", self.target.live_file().display()),
            Severity::Success,
        );

        let remote = match remote {
            Some(mut remote) => match remote.initialize().await {
                Ok(()) => Some(Arc::new(Mutex::new(remote))),
                Err(_) => {
                    self.log.log(
                        "Remote sync unavailable. Continuing with local backups only.",
                        Severity::Warning,
                    );
                    None
                }
            },
            None => None,
        };

        self.state = if remote.is_some() {
            SyncState::WatchingWithRemote
        } else {
            SyncState::Watching
        };

        let cycle = ChangeCycle {
            store: self.store.clone(),
            source_dir: self.target.source_dir.clone(),
            keep_backups: self.keep_backups,
            remote,
            log: self.log.clone(),
            events: self.events.clone(),
        };
        self.session = Some(SyncSession::spawn(cycle, changes_rx));

        Ok(self.state)
    }

    /// Stop monitoring. The remote is left as it is.
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.cancel.cancel();
        self.detector.stop();

        if tokio::time::timeout(STOP_TIMEOUT, session.worker).await.is_err() {
            self.log.log(
                "Sync worker did not finish its current cycle in time.",
                Severity::Warning,
            );
        }

        self.state = SyncState::Stopped;
        self.log.log("Stopped monitoring.", Severity::Success);
    }

    /// Suspend change detection without leaving the current state.
    pub fn pause(&self) {
        self.detector.pause();
    }

    pub fn resume(&self) {
        self.detector.resume();
    }

    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.store.list_backups()
    }

    /// Overwrite the live save with the backup taken at `stamp`.
    ///
    /// Detection is paused for the copy so the restore is not itself backed up.
    pub async fn restore_backup(&self, stamp: &str) -> Result<PathBuf> {
        let running = self.session.is_some();
        if running {
            self.pause();
        }

        let store = self.store.clone();
        let (stamp_owned, destination) = (stamp.to_string(), self.target.source_dir.clone());
        let result =
            match tokio::task::spawn_blocking(move || store.restore_backup(&stamp_owned, &destination)).await {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            };

        if running {
            self.resume();
        }

        match &result {
            Ok(path) => self.log.log(
                &format!("Backup {} restored to {}", stamp, path.display()),
                Severity::Success,
            ),
            Err(e) => self
                .log
                .log(&format!("Failed to restore backup: {}", e), Severity::Error),
        }
        result
    }

    /// Snapshot of the attached remote, if any.
    pub async fn remote_handle(&self) -> Option<RemoteRepoHandle> {
        let remote = self.session.as_ref()?.remote.as_ref()?;
        let remote = remote.lock().await;
        remote.handle().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::timestamp;
    use crate::remote::fake::FakeRemote;
    use crate::utils::logger::testing::MemorySink;
    use crate::watch::testing::{ManualDetector, ManualTrigger};
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        target: WatchTarget,
        log: Arc<MemorySink>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let save_dir = dir.path().join("SavedArks");
            fs::create_dir(&save_dir).unwrap();
            fs::write(save_dir.join("TheIsland.ark"), b"world-v1").unwrap();
            fs::write(save_dir.join("TheIsland.bak"), b"old").unwrap();
            let target = WatchTarget::new(&save_dir, "TheIsland", "ark", dir.path().join("backups"));
            Self {
                dir,
                target,
                log: Arc::new(MemorySink::new()),
            }
        }

        fn orchestrator(&self) -> (SyncOrchestrator, ManualTrigger) {
            let (detector, trigger) = ManualDetector::new();
            let orchestrator =
                SyncOrchestrator::new(self.target.clone(), Box::new(detector), self.log.clone());
            (orchestrator, trigger)
        }

        fn remote(&self, fake: &Arc<FakeRemote>) -> RemoteSync {
            RemoteSync::new(
                fake.clone(),
                fake.clone(),
                "TheIsland",
                &self.dir.path().join("clones"),
                self.log.clone(),
            )
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for sync event")
            .unwrap()
    }

    #[tokio::test]
    async fn test_change_creates_local_backup() {
        let fx = Fixture::new();
        let (mut orchestrator, trigger) = fx.orchestrator();
        let mut events = orchestrator.subscribe();

        let state = orchestrator.start(None).await.unwrap();
        assert_eq!(state, SyncState::Watching);

        assert!(trigger.fire());
        match next_event(&mut events).await {
            SyncEvent::BackupCreated { record } => {
                assert_eq!(record.label, "Backup just now");
                assert_eq!(fs::read(&record.path).unwrap(), b"world-v1");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(orchestrator.list_backups().unwrap().len(), 1);

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_change_pushes_to_remote() {
        let fx = Fixture::new();
        let fake = Arc::new(FakeRemote::new("survivor"));
        let (mut orchestrator, trigger) = fx.orchestrator();
        let mut events = orchestrator.subscribe();

        let state = orchestrator.start(Some(fx.remote(&fake))).await.unwrap();
        assert_eq!(state, SyncState::WatchingWithRemote);
        assert_eq!(
            orchestrator.remote_handle().await.unwrap().remote.full_name,
            "survivor/TheIsland-repo"
        );

        trigger.fire();
        assert!(matches!(next_event(&mut events).await, SyncEvent::BackupCreated { .. }));
        match next_event(&mut events).await {
            SyncEvent::RemotePushed { report } => {
                assert_eq!(report.staged, ["TheIsland.ark"]);
                assert!(report.committed);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(fake.history("survivor/TheIsland-repo").len(), 1);

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_failed_remote_initialization_degrades_to_local() {
        let fx = Fixture::new();
        let fake = Arc::new(FakeRemote::unauthorized());
        let (mut orchestrator, trigger) = fx.orchestrator();
        let mut events = orchestrator.subscribe();

        let state = orchestrator.start(Some(fx.remote(&fake))).await.unwrap();
        assert_eq!(state, SyncState::Watching);
        assert!(fx.log.contains("local backups only", Severity::Warning));
        assert!(orchestrator.remote_handle().await.is_none());

        trigger.fire();
        assert!(matches!(next_event(&mut events).await, SyncEvent::BackupCreated { .. }));

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_push_failure_keeps_watching() {
        let fx = Fixture::new();
        let fake = Arc::new(FakeRemote::new("survivor"));
        fake.set_reject_push(true);
        let (mut orchestrator, trigger) = fx.orchestrator();
        let mut events = orchestrator.subscribe();
        orchestrator.start(Some(fx.remote(&fake))).await.unwrap();

        trigger.fire();
        assert!(matches!(next_event(&mut events).await, SyncEvent::BackupCreated { .. }));
        match next_event(&mut events).await {
            SyncEvent::RemotePushFailed { escalated, .. } => assert!(escalated),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(orchestrator.state(), SyncState::WatchingWithRemote);

        // The next change retries independently.
        fake.set_reject_push(false);
        fs::write(fx.target.live_file(), b"world-v2").unwrap();
        trigger.fire();
        assert!(matches!(next_event(&mut events).await, SyncEvent::BackupCreated { .. }));
        assert!(matches!(next_event(&mut events).await, SyncEvent::RemotePushed { .. }));

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_backup_failure_skips_push() {
        let fx = Fixture::new();
        let fake = Arc::new(FakeRemote::new("survivor"));
        let (mut orchestrator, trigger) = fx.orchestrator();
        let mut events = orchestrator.subscribe();
        orchestrator.start(Some(fx.remote(&fake))).await.unwrap();

        fs::remove_file(fx.target.live_file()).unwrap();
        trigger.fire();
        assert!(matches!(next_event(&mut events).await, SyncEvent::BackupFailed { .. }));

        orchestrator.stop().await;
        assert!(fake.history("survivor/TheIsland-repo").is_empty());
        assert!(fx.log.contains("Failed to create backup", Severity::Error));
    }

    #[tokio::test]
    async fn test_stop_and_start_are_idempotent() {
        let fx = Fixture::new();
        let (mut orchestrator, trigger) = fx.orchestrator();

        orchestrator.stop().await;
        orchestrator.start(None).await.unwrap();
        assert_eq!(orchestrator.start(None).await.unwrap(), SyncState::Watching);

        orchestrator.stop().await;
        assert_eq!(orchestrator.state(), SyncState::Stopped);
        assert!(!trigger.fire());
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_retarget_only_while_stopped() {
        let fx = Fixture::new();
        let (mut orchestrator, _trigger) = fx.orchestrator();
        let other = WatchTarget::new(fx.dir.path(), "Ragnarok", "ark", fx.dir.path().join("rb"));

        orchestrator.start(None).await.unwrap();
        assert!(matches!(orchestrator.retarget(other.clone()), Err(SaveGuardError::Config(_))));

        orchestrator.stop().await;
        orchestrator.retarget(other.clone()).unwrap();
        assert_eq!(orchestrator.target(), &other);
    }

    #[tokio::test]
    async fn test_restore_pauses_and_resumes_detector() {
        let fx = Fixture::new();
        let (mut orchestrator, trigger) = fx.orchestrator();
        let mut events = orchestrator.subscribe();
        orchestrator.start(None).await.unwrap();

        trigger.fire();
        let record = match next_event(&mut events).await {
            SyncEvent::BackupCreated { record } => record,
            other => panic!("unexpected event {:?}", other),
        };
        fs::write(fx.target.live_file(), b"corrupted").unwrap();

        let restored = orchestrator.restore_backup(&record.timestamp).await.unwrap();
        assert_eq!(fs::read(restored).unwrap(), b"world-v1");
        assert_eq!(trigger.pause_calls(), 1);
        assert!(!trigger.is_paused());

        let err = orchestrator.restore_backup("2001.01.01_00.00").await.unwrap_err();
        assert!(matches!(err, SaveGuardError::NotFound(_)));
        assert_eq!(trigger.pause_calls(), 2);
        assert!(!trigger.is_paused());

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_keep_backups_prunes_after_each_backup() {
        let fx = Fixture::new();
        let backup_dir = &fx.target.backup_dir;
        fs::create_dir_all(backup_dir).unwrap();
        for day in 1..=3 {
            let stamp = NaiveDate::from_ymd_opt(2020, 1, day)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap();
            let name = format!("TheIsland_{}.ark", timestamp::format_timestamp(stamp));
            fs::write(backup_dir.join(name), b"old").unwrap();
        }

        let (detector, trigger) = ManualDetector::new();
        let mut orchestrator =
            SyncOrchestrator::new(fx.target.clone(), Box::new(detector), fx.log.clone())
                .with_keep_backups(Some(2));
        let mut events = orchestrator.subscribe();
        orchestrator.start(None).await.unwrap();

        trigger.fire();
        assert!(matches!(next_event(&mut events).await, SyncEvent::BackupCreated { .. }));
        orchestrator.stop().await;

        let backups = orchestrator.list_backups().unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[1].timestamp, "2020.01.03_12.00");
        assert!(fx.log.contains("Removed 2 old backup(s)", Severity::Success));
    }
}
