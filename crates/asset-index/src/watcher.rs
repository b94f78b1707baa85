use crate::error::{AssetIndexError, Result};
use log::{debug, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    Add,
    Change,
    Unlink,
}

impl WatchEventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Unlink => "unlink",
        }
    }
}

/// A debounced, classified filesystem change for one file (absolute path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FsWatcherConfig {
    /// Quiet period a path must see before its burst of raw events is delivered.
    pub debounce: Duration,
    pub channel_capacity: usize,
}

impl Default for FsWatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            channel_capacity: 1024,
        }
    }
}

/// Recursive watcher on the project root that fans classified events out to subscribers.
#[derive(Clone)]
pub struct FsWatcher {
    inner: Arc<FsWatcherInner>,
}

struct FsWatcherInner {
    root: PathBuf,
    event_tx: broadcast::Sender<WatchEvent>,
    command_tx: mpsc::Sender<WatcherCommand>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

enum WatcherCommand {
    Shutdown,
}

impl FsWatcher {
    /// Start watching `root`. Must be called from within a tokio runtime.
    pub fn start(root: &Path, config: FsWatcherConfig) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::channel(1024);
        let (command_tx, command_rx) = mpsc::channel(4);
        let (event_tx, _) = broadcast::channel(config.channel_capacity.max(1));

        let watcher = create_fs_watcher(root, raw_tx)?;
        spawn_debounce_loop(config.debounce, raw_rx, command_rx, event_tx.clone());
        debug!("Watching {}", root.display());

        Ok(Self {
            inner: Arc::new(FsWatcherInner {
                root: root.to_path_buf(),
                event_tx,
                command_tx,
                watcher: Mutex::new(Some(watcher)),
            }),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Sender side of the event stream, for wiring consumers that subscribe themselves.
    #[must_use]
    pub fn sender(&self) -> broadcast::Sender<WatchEvent> {
        self.inner.event_tx.clone()
    }

    /// Stop the OS watcher and the debounce loop. Idempotent.
    pub fn close(&self) {
        if self.inner.watcher.lock().take().is_some() {
            debug!("Closing watcher on {}", self.inner.root.display());
        }
        let _ = self.inner.command_tx.try_send(WatcherCommand::Shutdown);
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            self.close();
        }
    }
}

fn create_fs_watcher(
    root: &Path,
    sender: mpsc::Sender<notify::Result<Event>>,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = sender.blocking_send(res);
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive).map_err(|e| {
        AssetIndexError::Other(format!("failed to watch {}: {e}", root.display()))
    })?;
    Ok(watcher)
}

fn spawn_debounce_loop(
    debounce: Duration,
    mut raw_rx: mpsc::Receiver<notify::Result<Event>>,
    mut command_rx: mpsc::Receiver<WatcherCommand>,
    event_tx: broadcast::Sender<WatchEvent>,
) {
    tokio::spawn(async move {
        let mut state = DebounceState::new(debounce);

        loop {
            let next_deadline = state.next_deadline();

            tokio::select! {
                maybe_event = raw_rx.recv() => {
                    match maybe_event {
                        Some(event) => handle_raw_event(event, &mut state),
                        None => break,
                    }
                }
                Some(cmd) = command_rx.recv() => {
                    match cmd {
                        WatcherCommand::Shutdown => break,
                    }
                }
                () = async {
                    if let Some(deadline) = next_deadline {
                        time::sleep_until(deadline).await;
                    }
                }, if next_deadline.is_some() => {
                    for (path, created) in state.take_ready(Instant::now()) {
                        for event in classify(path, created).await {
                            // No receivers is fine: nothing is listening yet.
                            let _ = event_tx.send(event);
                        }
                    }
                }
            }
        }

        debug!("Watch debounce loop stopped");
    });
}

fn handle_raw_event(event: notify::Result<Event>, state: &mut DebounceState) {
    let event = match event {
        Ok(event) => event,
        Err(err) => {
            warn!("Watcher error: {err}");
            return;
        }
    };

    match event.kind {
        EventKind::Access(_) => {}
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths = [from, to]
            for (idx, path) in event.paths.into_iter().enumerate() {
                state.record(path, idx == 1);
            }
        }
        // Some backends report both sides of a rename as `Any`; the vanished side still
        // classifies as unlink at delivery.
        EventKind::Create(_)
        | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => {
            for path in event.paths {
                state.record(path, true);
            }
        }
        _ => {
            for path in event.paths {
                state.record(path, false);
            }
        }
    }
}

/// Decide add/change/unlink from the path's state at delivery time. A directory that
/// appeared in the burst expands to an add for every file below it; a vanished path is
/// reported once and consumers drop whatever they hold under it.
async fn classify(path: PathBuf, created: bool) -> Vec<WatchEvent> {
    match tokio::fs::metadata(&path).await {
        Err(_) => vec![WatchEvent::new(WatchEventKind::Unlink, path)],
        Ok(meta) if meta.is_dir() => {
            if !created {
                return Vec::new();
            }
            let dir = path.clone();
            match tokio::task::spawn_blocking(move || files_under(&dir)).await {
                Ok(files) => files
                    .into_iter()
                    .map(|file| WatchEvent::new(WatchEventKind::Add, file))
                    .collect(),
                Err(err) => {
                    warn!("Walking new directory {} failed: {err}", path.display());
                    Vec::new()
                }
            }
        }
        Ok(_) if created => vec![WatchEvent::new(WatchEventKind::Add, path)],
        Ok(_) => vec![WatchEvent::new(WatchEventKind::Change, path)],
    }
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!("Skipping entry under {}: {err}", dir.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

struct PendingPath {
    created: bool,
    last_event: Instant,
}

struct DebounceState {
    debounce: Duration,
    pending: HashMap<PathBuf, PendingPath>,
}

impl DebounceState {
    fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: HashMap::new(),
        }
    }

    fn record(&mut self, path: PathBuf, created: bool) {
        let now = Instant::now();
        self.pending
            .entry(path)
            .and_modify(|entry| {
                entry.created |= created;
                entry.last_event = now;
            })
            .or_insert(PendingPath {
                created,
                last_event: now,
            });
    }

    fn next_deadline(&self) -> Option<time::Instant> {
        self.pending
            .values()
            .map(|entry| entry.last_event + self.debounce)
            .min()
            .map(time::Instant::from_std)
    }

    /// Remove and return every path whose quiet period has elapsed, in path order.
    fn take_ready(&mut self, now: Instant) -> Vec<(PathBuf, bool)> {
        let debounce = self.debounce;
        let mut ready: Vec<(PathBuf, bool)> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.last_event + debounce <= now)
            .map(|(path, entry)| (path.clone(), entry.created))
            .collect();
        for (path, _) in &ready {
            self.pending.remove(path);
        }
        ready.sort();
        ready
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.pending.len()
    }
}
