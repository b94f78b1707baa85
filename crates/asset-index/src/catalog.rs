use crate::asset::{Asset, AssetGroup, AssetType};
use crate::coalesce::ScanCoalescer;
use crate::config::AssetIndexConfig;
use crate::error::{AssetIndexError, Result};
use crate::filter::PathFilter;
use crate::path::relative_posix;
use crate::watcher::{WatchEvent, WatchEventKind};
use futures::FutureExt;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

type ScanOutcome = std::result::Result<Arc<Vec<Asset>>, Arc<AssetIndexError>>;

/// Change notification for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogChange {
    pub event: WatchEventKind,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total_assets: usize,
    pub total_size: u64,
    pub by_type: BTreeMap<AssetType, usize>,
}

/// Authoritative set of known assets, keyed by project-relative path.
#[derive(Clone)]
pub struct CatalogIndex {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    root: PathBuf,
    filter: PathFilter,
    assets: RwLock<BTreeMap<String, Asset>>,
    coalescer: ScanCoalescer<ScanOutcome>,
    change_tx: broadcast::Sender<CatalogChange>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
    walks: AtomicU64,
}

impl CatalogIndex {
    pub fn new(config: &AssetIndexConfig) -> Result<Self> {
        Ok(Self::with_filter(
            &config.root,
            PathFilter::from_config(config)?,
        ))
    }

    pub fn with_filter(root: &Path, filter: PathFilter) -> Self {
        let (change_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(CatalogInner {
                root: root.to_path_buf(),
                filter,
                assets: RwLock::new(BTreeMap::new()),
                coalescer: ScanCoalescer::new(),
                change_tx,
                watch_task: Mutex::new(None),
                walks: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Walk the include directories and replace the snapshot. Concurrent calls share
    /// the in-flight walk.
    pub async fn scan(&self) -> Result<Vec<Asset>> {
        let inner = self.inner.clone();
        let outcome = self
            .inner
            .coalescer
            .run(move || async move { inner.walk_and_replace().await.map_err(Arc::new) }.boxed())
            .await;
        match outcome {
            Ok(assets) => Ok(assets.as_ref().clone()),
            Err(err) => Err(AssetIndexError::Shared(err)),
        }
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.inner.coalescer.is_running()
    }

    /// Number of directory walks started since construction.
    #[must_use]
    pub fn walk_count(&self) -> u64 {
        self.inner.walks.load(Ordering::SeqCst)
    }

    /// All assets, path-sorted.
    #[must_use]
    pub fn get_assets(&self) -> Vec<Asset> {
        self.inner.assets.read().values().cloned().collect()
    }

    #[must_use]
    pub fn get_asset(&self, path: &str) -> Option<Asset> {
        self.inner.assets.read().get(path).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.assets.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.assets.read().is_empty()
    }

    /// Assets partitioned by directory; groups directory-sorted, members name-sorted.
    #[must_use]
    pub fn get_grouped_assets(&self) -> Vec<AssetGroup> {
        let mut groups: BTreeMap<String, Vec<Asset>> = BTreeMap::new();
        for asset in self.inner.assets.read().values() {
            groups
                .entry(asset.directory.clone())
                .or_default()
                .push(asset.clone());
        }

        groups
            .into_iter()
            .map(|(directory, mut assets)| {
                assets.sort_by(|a, b| a.name.cmp(&b.name));
                AssetGroup {
                    directory,
                    count: assets.len(),
                    assets,
                }
            })
            .collect()
    }

    /// Case-insensitive substring match over name and path. Empty query returns everything.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<Asset> {
        let needle = query.trim().to_lowercase();
        let assets = self.inner.assets.read();
        if needle.is_empty() {
            return assets.values().cloned().collect();
        }
        assets
            .values()
            .filter(|asset| {
                asset.name.to_lowercase().contains(&needle)
                    || asset.path.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> CatalogStats {
        let mut stats = CatalogStats::default();
        for asset in self.inner.assets.read().values() {
            stats.total_assets += 1;
            stats.total_size = stats.total_size.saturating_add(asset.size);
            *stats.by_type.entry(asset.asset_type).or_insert(0) += 1;
        }
        stats
    }

    /// Apply `update` to every asset in one write section.
    pub fn annotate_all(&self, mut update: impl FnMut(&mut Asset)) {
        for asset in self.inner.assets.write().values_mut() {
            update(asset);
        }
    }

    /// Apply `update` to the listed assets that are still present.
    pub fn annotate_paths<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a String>,
        mut update: impl FnMut(&mut Asset),
    ) {
        let mut assets = self.inner.assets.write();
        for path in paths {
            if let Some(asset) = assets.get_mut(path) {
                update(asset);
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogChange> {
        self.inner.change_tx.subscribe()
    }

    /// Apply one watch event to the snapshot. Never fails: stat errors leave the asset
    /// unchanged and yield `None`.
    pub async fn handle_watch_event(&self, event: &WatchEvent) -> Option<CatalogChange> {
        let rel = relative_posix(&self.inner.root, &event.path)?;
        if !self.inner.filter.accepts_asset(&rel) {
            return None;
        }

        match event.kind {
            WatchEventKind::Unlink => {
                self.inner.assets.write().remove(&rel)?;
            }
            WatchEventKind::Add | WatchEventKind::Change => {
                let meta = match tokio::fs::metadata(&event.path).await {
                    Ok(meta) if meta.is_file() => meta,
                    Ok(_) => return None,
                    Err(err) => {
                        debug!("Skipping {} ({}): {err}", rel, event.kind.as_str());
                        return None;
                    }
                };
                let mut asset = Asset::from_metadata(rel.clone(), event.path.clone(), &meta);
                let mut assets = self.inner.assets.write();
                if let Some(previous) = assets.get(&rel) {
                    asset.inherit_annotations(previous);
                }
                assets.insert(rel.clone(), asset);
            }
        }

        let change = CatalogChange {
            event: event.kind,
            path: rel,
        };
        let _ = self.inner.change_tx.send(change.clone());
        Some(change)
    }

    /// Remove every asset below a directory that vanished, emitting one unlink change per
    /// asset. Paths with nothing indexed below them yield no changes.
    pub fn handle_directory_unlink(&self, event: &WatchEvent) -> Vec<CatalogChange> {
        if event.kind != WatchEventKind::Unlink {
            return Vec::new();
        }
        let Some(rel) = relative_posix(&self.inner.root, &event.path) else {
            return Vec::new();
        };
        let prefix = format!("{rel}/");

        let removed: Vec<String> = {
            let mut assets = self.inner.assets.write();
            let doomed: Vec<String> = assets
                .range(prefix.clone()..)
                .take_while(|(path, _)| path.starts_with(&prefix))
                .map(|(path, _)| path.clone())
                .collect();
            for path in &doomed {
                assets.remove(path);
            }
            doomed
        };
        if !removed.is_empty() {
            debug!("Directory {rel} vanished, dropped {} assets", removed.len());
        }

        removed
            .into_iter()
            .map(|path| {
                let change = CatalogChange {
                    event: WatchEventKind::Unlink,
                    path,
                };
                let _ = self.inner.change_tx.send(change.clone());
                change
            })
            .collect()
    }

    /// Consume a watch stream in a background task, replacing any previous one.
    pub fn watch(&self, mut events: broadcast::Receiver<WatchEvent>) {
        let index = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if index.handle_watch_event(&event).await.is_none() {
                            index.handle_directory_unlink(&event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Catalog watcher lagged, {skipped} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = self.inner.watch_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stop watching and clear the snapshot. An in-flight scan still resolves for its callers.
    pub fn destroy(&self) {
        if let Some(task) = self.inner.watch_task.lock().take() {
            task.abort();
        }
        self.inner.assets.write().clear();
    }
}

impl CatalogInner {
    async fn walk_and_replace(&self) -> Result<Arc<Vec<Asset>>> {
        let started = Instant::now();
        self.walks.fetch_add(1, Ordering::SeqCst);

        let root = self.root.clone();
        let filter = self.filter.clone();
        let assets = tokio::task::spawn_blocking(move || walk_assets(&root, &filter)).await??;

        {
            let mut snapshot = self.assets.write();
            let previous = std::mem::take(&mut *snapshot);
            *snapshot = assets
                .iter()
                .map(|asset| {
                    let mut asset = asset.clone();
                    if let Some(old) = previous.get(&asset.path) {
                        asset.inherit_annotations(old);
                    }
                    (asset.path.clone(), asset)
                })
                .collect();
        }

        info!(
            "Catalog scan found {} assets in {}ms",
            assets.len(),
            started.elapsed().as_millis()
        );
        let snapshot: Vec<Asset> = self.assets.read().values().cloned().collect();
        Ok(Arc::new(snapshot))
    }
}

fn walk_assets(root: &Path, filter: &PathFilter) -> Result<Vec<Asset>> {
    if !root.is_dir() {
        return Err(AssetIndexError::InvalidPath(format!(
            "Path is not a directory: {}",
            root.display()
        )));
    }

    let mut assets = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        relative_posix(root, entry.path()).is_none_or(|rel| !filter.is_excluded_dir(&rel))
    });

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative_posix(root, entry.path()) else {
            continue;
        };
        if !filter.accepts_asset(&rel) {
            continue;
        }
        let meta = entry.metadata()?;
        assets.push(Asset::from_metadata(rel, entry.path().to_path_buf(), &meta));
    }

    Ok(assets)
}
