//! Polling change detection: compare the save file's mtime on a fixed interval.
//!
//! Several writes inside one interval collapse into one change, so no
//! debounce window is needed.

use super::debounce::ModifiedBaseline;
use super::{ChangeDetector, ChangeEvent, WatchTarget, DEFAULT_POLL_INTERVAL};
use crate::utils::{LogSink, Result, Severity};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct PollingDetector {
    interval: Duration,
    log: Arc<dyn LogSink>,
    paused: Arc<AtomicBool>,
    baseline: Arc<Mutex<ModifiedBaseline>>,
    live_file: Option<PathBuf>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl PollingDetector {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            log,
            paused: Arc::new(AtomicBool::new(false)),
            baseline: Arc::new(Mutex::new(ModifiedBaseline::default())),
            live_file: None,
            cancel: None,
            task: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn rebaseline(&self, path: &Path) {
        match modified_time(path) {
            Ok(current) => self
                .baseline
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .reset(current),
            Err(e) => self.log.log(
                &format!("Could not read modification time of {}: {}", path.display(), e),
                Severity::Warning,
            ),
        }
    }
}

impl ChangeDetector for PollingDetector {
    fn start(&mut self, target: &WatchTarget, events: UnboundedSender<ChangeEvent>) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let path = target.live_file();
        self.rebaseline(&path);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            path.clone(),
            self.interval,
            self.baseline.clone(),
            self.paused.clone(),
            self.log.clone(),
            events,
            cancel.clone(),
        ));

        self.live_file = Some(path);
        self.cancel = Some(cancel);
        self.task = Some(task);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Writes made while paused (a restore) become the new baseline.
    fn resume(&self) {
        if let Some(path) = &self.live_file {
            self.rebaseline(path);
        }
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for PollingDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Modification time, or `None` if the file does not exist.
fn modified_time(path: &Path) -> io::Result<Option<SystemTime>> {
    match std::fs::metadata(path) {
        Ok(metadata) => metadata.modified().map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn poll_loop(
    path: PathBuf,
    interval: Duration,
    baseline: Arc<Mutex<ModifiedBaseline>>,
    paused: Arc<AtomicBool>,
    log: Arc<dyn LogSink>,
    events: UnboundedSender<ChangeEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if paused.load(Ordering::SeqCst) {
            continue;
        }

        let current = match modified_time(&path) {
            Ok(current) => current,
            Err(e) => {
                log.log(
                    &format!("Could not read modification time of {}: {}", path.display(), e),
                    Severity::Warning,
                );
                continue;
            }
        };

        let changed = baseline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .observe(current);
        if changed && events.send(ChangeEvent { path: path.clone() }).is_err() {
            break;
        }
    }
}
