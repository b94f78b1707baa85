//! Static-import graph: which source files reference which assets.
//!
//! Two maps form one structure: `by_asset` (asset → importers, used by queries) and
//! `by_file` (source file → referenced assets, used to retract a file's contribution).
//! A file's contribution is always retracted and reinserted inside one write section.

mod patterns;
mod resolve;

pub use patterns::{ImportType, ResolutionRule, MAX_SNIPPET_CHARS};
pub use resolve::ImportResolver;

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
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

type ScanOutcome = std::result::Result<ImportStats, Arc<AssetIndexError>>;

/// One located reference from a source file to an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Importer {
    pub file_path: String,
    pub absolute_path: PathBuf,
    pub line: usize,
    pub column: usize,
    pub import_type: ImportType,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportChange {
    pub event: WatchEventKind,
    pub path: String,
    /// Assets referenced before or after the update, sorted.
    pub affected_assets: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStats {
    pub source_files: usize,
    pub references: usize,
    pub referenced_assets: usize,
}

#[derive(Debug, Default)]
struct GraphState {
    by_asset: HashMap<String, Vec<Importer>>,
    by_file: HashMap<String, BTreeSet<String>>,
}

impl GraphState {
    /// Remove every forward entry contributed by `file`; returns the assets it referenced.
    fn retract(&mut self, file: &str) -> BTreeSet<String> {
        let Some(previous) = self.by_file.remove(file) else {
            return BTreeSet::new();
        };
        for asset in &previous {
            if let Some(importers) = self.by_asset.get_mut(asset) {
                importers.retain(|importer| importer.file_path != file);
                if importers.is_empty() {
                    self.by_asset.remove(asset);
                }
            }
        }
        previous
    }

    /// Insert a file's references; returns the assets now referenced.
    fn insert(&mut self, file: &str, references: Vec<(String, Importer)>) -> BTreeSet<String> {
        let mut assets = BTreeSet::new();
        for (asset, importer) in references {
            let importers = self.by_asset.entry(asset.clone()).or_default();
            importers.push(importer);
            importers.sort_by(|a, b| {
                (a.file_path.as_str(), a.line, a.column).cmp(&(b.file_path.as_str(), b.line, b.column))
            });
            assets.insert(asset);
        }
        if !assets.is_empty() {
            self.by_file.insert(file.to_string(), assets.clone());
        }
        assets
    }

    /// Forward entries contributed by `file`, for carrying them into a fresh state.
    fn contribution(&self, file: &str) -> Vec<(String, Importer)> {
        let Some(assets) = self.by_file.get(file) else {
            return Vec::new();
        };
        let mut references = Vec::new();
        for asset in assets {
            for importer in self.by_asset.get(asset).into_iter().flatten() {
                if importer.file_path == file {
                    references.push((asset.clone(), importer.clone()));
                }
            }
        }
        references
    }

    fn stats(&self) -> ImportStats {
        ImportStats {
            source_files: self.by_file.len(),
            references: self.by_asset.values().map(Vec::len).sum(),
            referenced_assets: self.by_asset.len(),
        }
    }
}

struct Extractor {
    root: PathBuf,
    filter: PathFilter,
    resolver: ImportResolver,
}

impl Extractor {
    /// Resolved references in `content` of source file `file`.
    fn extract(&self, file: &str, content: &str) -> Vec<(String, Importer)> {
        let absolute_path = self.root.join(file);
        let mut references = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            for raw in patterns::scan_line(line) {
                if !self
                    .filter
                    .is_asset_extension(&resolve::specifier_extension(&raw.specifier))
                {
                    continue;
                }
                let Some(asset) = self.resolver.resolve(&raw.specifier, file, raw.rule) else {
                    continue;
                };
                references.push((
                    asset,
                    Importer {
                        file_path: file.to_string(),
                        absolute_path: absolute_path.clone(),
                        line: idx + 1,
                        column: raw.column,
                        import_type: raw.import_type,
                        snippet: patterns::snippet(line),
                    },
                ));
            }
        }

        references
    }
}

/// Bidirectional map between source files and the assets they reference.
#[derive(Clone)]
pub struct ImportGraph {
    inner: Arc<GraphInner>,
}

struct GraphInner {
    extractor: Arc<Extractor>,
    batch_size: usize,
    state: RwLock<GraphState>,
    coalescer: ScanCoalescer<ScanOutcome>,
    change_tx: broadcast::Sender<ImportChange>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
    walks: AtomicU64,
}

impl ImportGraph {
    pub fn new(config: &AssetIndexConfig) -> Result<Self> {
        let (change_tx, _) = broadcast::channel(256);
        Ok(Self {
            inner: Arc::new(GraphInner {
                extractor: Arc::new(Extractor {
                    root: config.root.clone(),
                    filter: PathFilter::from_config(config)?,
                    resolver: ImportResolver::from_config(config),
                }),
                batch_size: config.effective_batch_size(),
                state: RwLock::new(GraphState::default()),
                coalescer: ScanCoalescer::new(),
                change_tx,
                watch_task: Mutex::new(None),
                walks: AtomicU64::new(0),
            }),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.extractor.root
    }

    /// Rebuild the graph from every source file. Concurrent calls share the in-flight scan.
    pub async fn scan(&self) -> Result<ImportStats> {
        let inner = self.inner.clone();
        self.inner
            .coalescer
            .run(move || async move { inner.scan_all().await.map_err(Arc::new) }.boxed())
            .await
            .map_err(AssetIndexError::Shared)
    }

    #[must_use]
    pub fn walk_count(&self) -> u64 {
        self.inner.walks.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn resolver(&self) -> &ImportResolver {
        &self.inner.extractor.resolver
    }

    /// Importers of `asset_path`, also trying the path with the public directory
    /// prefix added or removed.
    #[must_use]
    pub fn get_importers(&self, asset_path: &str) -> Vec<Importer> {
        let state = self.inner.state.read();
        let mut importers = state.by_asset.get(asset_path).cloned().unwrap_or_default();
        if let Some(alternate) = self.inner.extractor.resolver.public_alternate(asset_path) {
            if let Some(more) = state.by_asset.get(&alternate) {
                importers.extend(more.iter().cloned());
            }
        }
        importers
    }

    /// Assets referenced by one source file, sorted.
    #[must_use]
    pub fn get_references(&self, file: &str) -> Vec<String> {
        self.inner
            .state
            .read()
            .by_file
            .get(file)
            .map(|assets| assets.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn stats(&self) -> ImportStats {
        self.inner.state.read().stats()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ImportChange> {
        self.inner.change_tx.subscribe()
    }

    /// Re-extract one source file after a watch event. A read failure keeps the file's
    /// previous contribution; nothing is emitted in that case.
    pub async fn handle_watch_event(&self, event: &WatchEvent) -> Option<ImportChange> {
        let extractor = &self.inner.extractor;
        let rel = relative_posix(&extractor.root, &event.path)?;
        if !extractor.filter.accepts_source(&rel) {
            return None;
        }

        let references = match event.kind {
            WatchEventKind::Unlink => None,
            WatchEventKind::Add | WatchEventKind::Change => {
                match read_source(&event.path).await {
                    Ok(content) => Some(extractor.extract(&rel, &content)),
                    Err(err) => {
                        debug!("Keeping previous references for {rel}: {err}");
                        return None;
                    }
                }
            }
        };

        let affected = {
            let mut state = self.inner.state.write();
            let mut affected = state.retract(&rel);
            if let Some(references) = references {
                affected.extend(state.insert(&rel, references));
            }
            affected
        };

        if affected.is_empty() {
            return None;
        }

        let change = ImportChange {
            event: event.kind,
            path: rel,
            affected_assets: affected.into_iter().collect(),
        };
        let _ = self.inner.change_tx.send(change.clone());
        Some(change)
    }

    /// Retract every source file below a directory that vanished, one change per file that
    /// contributed references.
    pub fn handle_directory_unlink(&self, event: &WatchEvent) -> Vec<ImportChange> {
        if event.kind != WatchEventKind::Unlink {
            return Vec::new();
        }
        let Some(rel) = relative_posix(&self.inner.extractor.root, &event.path) else {
            return Vec::new();
        };
        let prefix = format!("{rel}/");

        let retracted: Vec<(String, BTreeSet<String>)> = {
            let mut state = self.inner.state.write();
            let mut files: Vec<String> = state
                .by_file
                .keys()
                .filter(|file| file.starts_with(&prefix))
                .cloned()
                .collect();
            files.sort();
            files
                .into_iter()
                .map(|file| {
                    let affected = state.retract(&file);
                    (file, affected)
                })
                .collect()
        };

        retracted
            .into_iter()
            .map(|(path, affected)| {
                let change = ImportChange {
                    event: WatchEventKind::Unlink,
                    path,
                    affected_assets: affected.into_iter().collect(),
                };
                let _ = self.inner.change_tx.send(change.clone());
                change
            })
            .collect()
    }

    pub fn watch(&self, mut events: broadcast::Receiver<WatchEvent>) {
        let graph = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if graph.handle_watch_event(&event).await.is_none() {
                            graph.handle_directory_unlink(&event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Import graph watcher lagged, {skipped} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = self.inner.watch_task.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn destroy(&self) {
        if let Some(task) = self.inner.watch_task.lock().take() {
            task.abort();
        }
        *self.inner.state.write() = GraphState::default();
    }
}

impl GraphInner {
    async fn scan_all(&self) -> Result<ImportStats> {
        let started = Instant::now();
        self.walks.fetch_add(1, Ordering::SeqCst);

        let extractor = self.extractor.clone();
        let files = tokio::task::spawn_blocking(move || {
            walk_sources(&extractor.root, &extractor.filter)
        })
        .await??;

        let mut fresh = GraphState::default();
        for batch in files.chunks(self.batch_size) {
            let mut tasks = Vec::with_capacity(batch.len());
            for rel in batch {
                let extractor = self.extractor.clone();
                let rel = rel.clone();
                tasks.push(tokio::spawn(async move {
                    let result = read_source(&extractor.root.join(&rel))
                        .await
                        .map(|content| extractor.extract(&rel, &content));
                    (rel, result)
                }));
            }

            for task in tasks {
                let (rel, result) = task.await?;
                match result {
                    Ok(references) => {
                        fresh.insert(&rel, references);
                    }
                    Err(err) => {
                        debug!("Keeping previous references for {rel}: {err}");
                        let previous = self.state.read().contribution(&rel);
                        fresh.insert(&rel, previous);
                    }
                }
            }
        }

        let stats = fresh.stats();
        *self.state.write() = fresh;

        info!(
            "Import graph scan: {} files, {} references to {} assets in {}ms",
            files.len(),
            stats.references,
            stats.referenced_assets,
            started.elapsed().as_millis()
        );
        Ok(stats)
    }
}

async fn read_source(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn walk_sources(root: &Path, filter: &PathFilter) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(AssetIndexError::InvalidPath(format!(
            "Path is not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
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
        if let Some(rel) = relative_posix(root, entry.path()) {
            if filter.accepts_source(&rel) {
                files.push(rel);
            }
        }
    }

    files.sort();
    Ok(files)
}
