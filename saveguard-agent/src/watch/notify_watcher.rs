//! Event-driven change detection using native filesystem notifications.
//!
//! The notify callback runs on the watcher's own thread and only forwards the
//! instant a relevant raw event was observed. A tokio task applies the
//! debounce window to those instants, waits for the write to settle and then
//! emits one [`ChangeEvent`].

use super::debounce::Debouncer;
use super::{ChangeDetector, ChangeEvent, WatchTarget, DEBOUNCE_WINDOW, SETTLE_DELAY};
use crate::utils::{LogSink, Result, SaveGuardError, Severity};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct NotifyDetector {
    settle: Duration,
    log: Arc<dyn LogSink>,
    paused: Arc<AtomicBool>,
    /// Survives pause/resume and restarts
    debouncer: Arc<Mutex<Debouncer>>,
    watcher: Option<RecommendedWatcher>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl NotifyDetector {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self::with_timing(log, DEBOUNCE_WINDOW, SETTLE_DELAY)
    }

    pub fn with_timing(log: Arc<dyn LogSink>, debounce: Duration, settle: Duration) -> Self {
        Self {
            settle,
            log,
            paused: Arc::new(AtomicBool::new(false)),
            debouncer: Arc::new(Mutex::new(Debouncer::new(debounce))),
            watcher: None,
            cancel: None,
            task: None,
        }
    }
}

impl ChangeDetector for NotifyDetector {
    fn start(&mut self, target: &WatchTarget, events: UnboundedSender<ChangeEvent>) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if !target.source_dir.is_dir() {
            return Err(SaveGuardError::NotFound(format!(
                "Save directory does not exist: {}",
                target.source_dir.display()
            )));
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<Instant>();
        let file_name = target.file_name();
        let paused = self.paused.clone();
        let log = self.log.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let relevant = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().is_some_and(|n| n == file_name.as_str()));
                    if !relevant || paused.load(Ordering::SeqCst) {
                        return;
                    }
                    debug!("Raw change event: {:?}", event.kind);
                    let _ = raw_tx.send(Instant::now());
                }
                Err(e) => log.log(&format!("File watcher error: {}", e), Severity::Warning),
            },
            Config::default(),
        )?;
        watcher.watch(&target.source_dir, RecursiveMode::NonRecursive)?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(settle_loop(
            raw_rx,
            self.debouncer.clone(),
            self.paused.clone(),
            self.settle,
            target.live_file(),
            events,
            cancel.clone(),
        ));

        self.watcher = Some(watcher);
        self.cancel = Some(cancel);
        self.task = Some(task);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        // Dropping the watcher unregisters it and closes the raw channel.
        self.watcher.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.watcher.is_some()
    }
}

impl Drop for NotifyDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn settle_loop(
    mut raw_rx: UnboundedReceiver<Instant>,
    debouncer: Arc<Mutex<Debouncer>>,
    paused: Arc<AtomicBool>,
    settle: Duration,
    path: PathBuf,
    events: UnboundedSender<ChangeEvent>,
    cancel: CancellationToken,
) {
    loop {
        let observed_at = tokio::select! {
            _ = cancel.cancelled() => break,
            raw = raw_rx.recv() => match raw {
                Some(at) => at,
                None => break,
            },
        };

        if paused.load(Ordering::SeqCst) {
            continue;
        }

        let accepted = debouncer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .accept(observed_at);
        if !accepted {
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(settle) => {}
        }

        if events.send(ChangeEvent { path: path.clone() }).is_err() {
            break;
        }
    }
}
