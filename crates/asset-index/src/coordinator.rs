//! Composition of the three indexes.
//!
//! `init` runs the bulk scans in dependency order and cross-annotates the catalog.
//! `connect` subscribes to each index's change stream and, for every change, finishes the
//! dependent recomputation before handing the event to the host. A host therefore never
//! sees an event whose assets carry annotations older than the event itself.

use crate::catalog::{CatalogChange, CatalogIndex};
use crate::config::AssetIndexConfig;
use crate::duplicates::{DuplicateChange, DuplicateGrouper};
use crate::error::Result;
use crate::imports::{ImportChange, ImportGraph};
use crate::watcher::{FsWatcher, FsWatcherConfig, WatchEvent};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Change forwarded to the host, tagged with the index it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "payload")]
pub enum IndexEvent {
    #[serde(rename = "assets:change")]
    Assets(CatalogChange),
    #[serde(rename = "importers:change")]
    Importers(ImportChange),
    #[serde(rename = "duplicates:change")]
    Duplicates(DuplicateChange),
}

impl IndexEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Assets(_) => "assets:change",
            Self::Importers(_) => "importers:change",
            Self::Duplicates(_) => "duplicates:change",
        }
    }
}

/// Cheap handle bundle shared with the forwarding tasks.
#[derive(Clone)]
struct Indexes {
    catalog: CatalogIndex,
    imports: ImportGraph,
    duplicates: DuplicateGrouper,
}

impl Indexes {
    fn annotate_all(&self) {
        self.catalog.annotate_all(|asset| {
            asset.importers_count = self.imports.get_importers(&asset.path).len();
            let info = self.duplicates.get_duplicate_info(&asset.path);
            asset.content_hash = info.hash;
            asset.duplicates_count = info.duplicates_count;
        });
    }

    fn annotate_importers(&self, change: &ImportChange) {
        // A reference may be keyed with or without the public prefix.
        let resolver = self.imports.resolver();
        let mut paths: BTreeSet<String> = BTreeSet::new();
        for asset in &change.affected_assets {
            paths.insert(asset.clone());
            if let Some(alternate) = resolver.public_alternate(asset) {
                paths.insert(alternate);
            }
        }
        self.catalog.annotate_paths(&paths, |asset| {
            asset.importers_count = self.imports.get_importers(&asset.path).len();
        });
    }

    fn annotate_duplicates(&self, change: &DuplicateChange) {
        let mut paths: BTreeSet<String> = BTreeSet::new();
        paths.insert(change.path.clone());
        for hash in &change.affected_hashes {
            paths.extend(self.duplicates.get_duplicates_by_hash(hash));
        }
        self.catalog.annotate_paths(&paths, |asset| {
            let info = self.duplicates.get_duplicate_info(&asset.path);
            asset.content_hash = info.hash;
            asset.duplicates_count = info.duplicates_count;
        });
    }

    async fn refresh_duplicates(&self) {
        let assets = self.catalog.get_assets();
        if let Err(err) = self.duplicates.scan_assets(&assets).await {
            warn!("Duplicate rescan after catalog change failed: {err}");
        }
        self.annotate_all();
    }
}

pub struct IndexCoordinator {
    config: AssetIndexConfig,
    indexes: Indexes,
    watcher: Mutex<Option<FsWatcher>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl IndexCoordinator {
    /// Build the three indexes for `config`. The root is canonicalized when possible so
    /// paths reported by the OS watcher strip cleanly against it.
    pub fn new(mut config: AssetIndexConfig) -> Result<Self> {
        if let Ok(canonical) = std::fs::canonicalize(&config.root) {
            config.root = canonical;
        }
        let catalog = CatalogIndex::new(&config)?;
        let imports = ImportGraph::new(&config)?;
        let duplicates = DuplicateGrouper::new(&config)?;
        Ok(Self::from_parts(config, catalog, imports, duplicates))
    }

    pub fn from_parts(
        config: AssetIndexConfig,
        catalog: CatalogIndex,
        imports: ImportGraph,
        duplicates: DuplicateGrouper,
    ) -> Self {
        Self {
            config,
            indexes: Indexes {
                catalog,
                imports,
                duplicates,
            },
            watcher: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AssetIndexConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &CatalogIndex {
        &self.indexes.catalog
    }

    #[must_use]
    pub fn imports(&self) -> &ImportGraph {
        &self.indexes.imports
    }

    #[must_use]
    pub fn duplicates(&self) -> &DuplicateGrouper {
        &self.indexes.duplicates
    }

    /// Catalog scan, then import scan, then duplicate grouping over the current catalog,
    /// then annotation of every asset.
    pub async fn init(&self) -> Result<()> {
        let started = Instant::now();
        let indexes = &self.indexes;

        indexes.catalog.scan().await?;
        let import_stats = indexes.imports.scan().await?;
        let duplicate_stats = indexes
            .duplicates
            .scan_assets(&indexes.catalog.get_assets())
            .await?;
        indexes.annotate_all();

        info!(
            "Indexed {} assets ({} references, {} duplicate groups) in {}ms",
            indexes.catalog.len(),
            import_stats.references,
            duplicate_stats.duplicate_groups,
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Start the filesystem watcher and wire it through [`IndexCoordinator::connect`].
    /// With watching disabled this is a no-op and the snapshot from `init` stays static.
    pub fn setup_watchers<F>(&self, on_event: F) -> Result<()>
    where
        F: Fn(IndexEvent) + Send + Sync + 'static,
    {
        if !self.config.watch {
            info!("Watching disabled; serving a static snapshot");
            return Ok(());
        }

        let watcher = FsWatcher::start(
            &self.config.root,
            FsWatcherConfig {
                debounce: self.config.watch_debounce(),
                ..FsWatcherConfig::default()
            },
        )?;
        self.connect(&watcher.sender(), on_event);
        if let Some(previous) = self.watcher.lock().replace(watcher) {
            previous.close();
        }
        Ok(())
    }

    /// Feed `events` to every index and forward their changes to `on_event`, replacing any
    /// previous wiring.
    pub fn connect<F>(&self, events: &broadcast::Sender<WatchEvent>, on_event: F)
    where
        F: Fn(IndexEvent) + Send + Sync + 'static,
    {
        let on_event = Arc::new(on_event);
        let indexes = &self.indexes;

        // Subscribe before the indexes start consuming so no change is missed.
        let mut catalog_rx = indexes.catalog.subscribe();
        let mut imports_rx = indexes.imports.subscribe();
        let mut duplicates_rx = indexes.duplicates.subscribe();

        let mut tasks = Vec::with_capacity(3);

        let (ix, emit) = (indexes.clone(), on_event.clone());
        tasks.push(tokio::spawn(async move {
            while let Some(change) = next_change(&mut catalog_rx, "catalog").await {
                ix.refresh_duplicates().await;
                emit(IndexEvent::Assets(change));
            }
        }));

        let (ix, emit) = (indexes.clone(), on_event.clone());
        tasks.push(tokio::spawn(async move {
            while let Some(change) = next_change(&mut imports_rx, "import graph").await {
                ix.annotate_importers(&change);
                emit(IndexEvent::Importers(change));
            }
        }));

        let (ix, emit) = (indexes.clone(), on_event);
        tasks.push(tokio::spawn(async move {
            while let Some(change) = next_change(&mut duplicates_rx, "duplicate grouper").await {
                ix.annotate_duplicates(&change);
                emit(IndexEvent::Duplicates(change));
            }
        }));

        indexes.catalog.watch(events.subscribe());
        indexes.imports.watch(events.subscribe());
        indexes.duplicates.watch(events.subscribe());

        let previous = std::mem::replace(&mut *self.tasks.lock(), tasks);
        for task in previous {
            task.abort();
        }
        debug!("Coordinator connected to watch stream");
    }

    /// Close the watcher, stop forwarding and clear every index.
    pub fn destroy(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.close();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.indexes.catalog.destroy();
        self.indexes.imports.destroy();
        self.indexes.duplicates.destroy();
    }
}

async fn next_change<T: Clone>(rx: &mut broadcast::Receiver<T>, source: &str) -> Option<T> {
    loop {
        match rx.recv().await {
            Ok(change) => return Some(change),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Coordinator lagged behind {source}, {skipped} changes dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
