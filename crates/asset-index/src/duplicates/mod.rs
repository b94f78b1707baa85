//! Content-duplicate grouping.
//!
//! Bulk passes (`scan_assets`) memoize per-file hashes by `(mtime, size)` and rebuild the
//! groups from scratch. Watch events take the incremental path (`handle_asset_change`),
//! which only moves one path between groups.

mod hasher;

pub use hasher::{ContentHasher, Sha256Hasher};

use crate::asset::{mtime_ms, Asset};
use crate::coalesce::ScanCoalescer;
use crate::config::AssetIndexConfig;
use crate::error::{AssetIndexError, Result};
use crate::filter::PathFilter;
use crate::path::relative_posix;
use crate::watcher::{WatchEvent, WatchEventKind};
use futures::future::join_all;
use futures::FutureExt;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

type ScanOutcome = std::result::Result<DuplicateStats, Arc<AssetIndexError>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateInfo {
    /// `None` for paths that are not in any group.
    pub hash: Option<String>,
    /// Group size minus one.
    pub duplicates_count: usize,
}

/// Counts over groups with more than one member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateStats {
    pub duplicate_groups: usize,
    pub duplicate_files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub hash: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateChange {
    pub event: WatchEventKind,
    pub path: String,
    /// Hash the path left and hash it joined, sorted.
    pub affected_hashes: Vec<String>,
}

#[derive(Debug, Clone)]
struct CachedHash {
    hash: String,
    mtime: f64,
    size: u64,
}

struct HashTarget {
    path: String,
    absolute_path: PathBuf,
    mtime: f64,
    size: u64,
}

impl From<&Asset> for HashTarget {
    fn from(asset: &Asset) -> Self {
        Self {
            path: asset.path.clone(),
            absolute_path: asset.absolute_path.clone(),
            mtime: asset.mtime,
            size: asset.size,
        }
    }
}

/// `path_to_hash[p] == h` iff `p` is in `groups[h]`.
#[derive(Debug, Default)]
struct GroupState {
    groups: HashMap<String, BTreeSet<String>>,
    path_to_hash: HashMap<String, String>,
}

impl GroupState {
    fn insert(&mut self, path: String, hash: String) {
        self.remove(&path);
        self.groups
            .entry(hash.clone())
            .or_default()
            .insert(path.clone());
        self.path_to_hash.insert(path, hash);
    }

    /// Remove `path` from its group, dropping the group when emptied. Returns the old hash.
    fn remove(&mut self, path: &str) -> Option<String> {
        let hash = self.path_to_hash.remove(path)?;
        if let Some(members) = self.groups.get_mut(&hash) {
            members.remove(path);
            if members.is_empty() {
                self.groups.remove(&hash);
            }
        }
        Some(hash)
    }

    fn stats(&self) -> DuplicateStats {
        let mut stats = DuplicateStats::default();
        for members in self.groups.values().filter(|m| m.len() > 1) {
            stats.duplicate_groups += 1;
            stats.duplicate_files += members.len();
        }
        stats
    }
}

#[derive(Clone)]
pub struct DuplicateGrouper {
    inner: Arc<GrouperInner>,
}

struct GrouperInner {
    root: PathBuf,
    filter: PathFilter,
    batch_size: usize,
    hasher: Arc<dyn ContentHasher>,
    hash_cache: Mutex<HashMap<String, CachedHash>>,
    state: RwLock<GroupState>,
    coalescer: ScanCoalescer<ScanOutcome>,
    change_tx: broadcast::Sender<DuplicateChange>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl DuplicateGrouper {
    pub fn new(config: &AssetIndexConfig) -> Result<Self> {
        Self::with_hasher(
            config,
            Arc::new(Sha256Hasher::new(config.stream_threshold_bytes)),
        )
    }

    pub fn with_hasher(config: &AssetIndexConfig, hasher: Arc<dyn ContentHasher>) -> Result<Self> {
        let (change_tx, _) = broadcast::channel(256);
        Ok(Self {
            inner: Arc::new(GrouperInner {
                root: config.root.clone(),
                filter: PathFilter::from_config(config)?,
                batch_size: config.effective_batch_size(),
                hasher,
                hash_cache: Mutex::new(HashMap::new()),
                state: RwLock::new(GroupState::default()),
                coalescer: ScanCoalescer::new(),
                change_tx,
                watch_task: Mutex::new(None),
            }),
        })
    }

    /// Recompute every group for `assets`. Hashes are reused when `(mtime, size)` match the
    /// cache. A concurrent call shares the running pass and its result.
    pub async fn scan_assets(&self, assets: &[Asset]) -> Result<DuplicateStats> {
        let inner = self.inner.clone();
        let targets: Vec<HashTarget> = assets.iter().map(HashTarget::from).collect();
        self.inner
            .coalescer
            .run(move || async move { inner.rebuild(targets).await.map_err(Arc::new) }.boxed())
            .await
            .map_err(AssetIndexError::Shared)
    }

    #[must_use]
    pub fn get_duplicate_info(&self, path: &str) -> DuplicateInfo {
        let state = self.inner.state.read();
        let Some(hash) = state.path_to_hash.get(path) else {
            return DuplicateInfo::default();
        };
        let size = state.groups.get(hash).map_or(0, BTreeSet::len);
        DuplicateInfo {
            hash: Some(hash.clone()),
            duplicates_count: size.saturating_sub(1),
        }
    }

    /// Sorted member paths of the group for `hash`.
    #[must_use]
    pub fn get_duplicates_by_hash(&self, hash: &str) -> Vec<String> {
        self.inner
            .state
            .read()
            .groups
            .get(hash)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get_stats(&self) -> DuplicateStats {
        self.inner.state.read().stats()
    }

    /// Groups with more than one member, hash-sorted.
    #[must_use]
    pub fn get_duplicate_groups(&self) -> Vec<DuplicateGroup> {
        let state = self.inner.state.read();
        let mut groups: Vec<DuplicateGroup> = state
            .groups
            .iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(hash, members)| DuplicateGroup {
                hash: hash.clone(),
                paths: members.iter().cloned().collect(),
            })
            .collect();
        groups.sort_by(|a, b| a.hash.cmp(&b.hash));
        groups
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DuplicateChange> {
        self.inner.change_tx.subscribe()
    }

    /// Move one asset between groups after a watch event. Hash failures leave the path
    /// ungrouped; nothing is returned when no group was touched.
    pub async fn handle_asset_change(
        &self,
        event: WatchEventKind,
        path: &str,
    ) -> Option<DuplicateChange> {
        let new_hash = match event {
            WatchEventKind::Unlink => None,
            WatchEventKind::Add | WatchEventKind::Change => {
                let absolute_path = self.inner.root.join(path);
                match tokio::fs::metadata(&absolute_path).await {
                    Ok(meta) if meta.is_file() => {
                        let target = HashTarget {
                            path: path.to_string(),
                            mtime: mtime_ms(&meta),
                            size: meta.len(),
                            absolute_path,
                        };
                        self.inner.get_or_compute_hash(&target).await
                    }
                    Ok(_) => None,
                    Err(err) => {
                        debug!("Cannot stat {path} for hashing: {err}");
                        None
                    }
                }
            }
        };

        let mut affected = BTreeSet::new();
        {
            let mut state = self.inner.state.write();
            if let Some(old) = state.remove(path) {
                affected.insert(old);
            }
            if let Some(hash) = new_hash {
                affected.insert(hash.clone());
                state.insert(path.to_string(), hash);
            }
        }
        if event == WatchEventKind::Unlink {
            self.inner.hash_cache.lock().remove(path);
        }

        if affected.is_empty() {
            return None;
        }

        let change = DuplicateChange {
            event,
            path: path.to_string(),
            affected_hashes: affected.into_iter().collect(),
        };
        let _ = self.inner.change_tx.send(change.clone());
        Some(change)
    }

    /// Ungroup every asset below the directory `dir`, which no longer exists. One change is
    /// returned per ungrouped path.
    pub fn handle_directory_unlink(&self, dir: &str) -> Vec<DuplicateChange> {
        let prefix = format!("{dir}/");
        let removed: Vec<(String, String)> = {
            let mut state = self.inner.state.write();
            let mut paths: Vec<String> = state
                .path_to_hash
                .keys()
                .filter(|path| path.starts_with(&prefix))
                .cloned()
                .collect();
            paths.sort();
            paths
                .into_iter()
                .filter_map(|path| state.remove(&path).map(|hash| (path, hash)))
                .collect()
        };
        self.inner
            .hash_cache
            .lock()
            .retain(|path, _| !path.starts_with(&prefix));
        if !removed.is_empty() {
            debug!("Ungrouped {} assets under removed directory {dir}", removed.len());
        }

        removed
            .into_iter()
            .map(|(path, hash)| {
                let change = DuplicateChange {
                    event: WatchEventKind::Unlink,
                    path,
                    affected_hashes: vec![hash],
                };
                let _ = self.inner.change_tx.send(change.clone());
                change
            })
            .collect()
    }

    pub fn watch(&self, mut events: broadcast::Receiver<WatchEvent>) {
        let grouper = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(rel) = relative_posix(&grouper.inner.root, &event.path) else {
                            continue;
                        };
                        let handled = grouper.inner.filter.accepts_asset(&rel)
                            && grouper.handle_asset_change(event.kind, &rel).await.is_some();
                        if !handled && event.kind == WatchEventKind::Unlink {
                            grouper.handle_directory_unlink(&rel);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Duplicate grouper watcher lagged, {skipped} events dropped");
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
        *self.inner.state.write() = GroupState::default();
        self.inner.hash_cache.lock().clear();
    }
}

impl GrouperInner {
    async fn get_or_compute_hash(&self, target: &HashTarget) -> Option<String> {
        let cached = self
            .hash_cache
            .lock()
            .get(&target.path)
            .filter(|entry| entry.mtime == target.mtime && entry.size == target.size)
            .map(|entry| entry.hash.clone());
        if cached.is_some() {
            return cached;
        }

        let hasher = self.hasher.clone();
        let path = target.absolute_path.clone();
        let size = target.size;
        match tokio::task::spawn_blocking(move || hasher.hash_file(&path, size)).await {
            Ok(Ok(hash)) => {
                self.hash_cache.lock().insert(
                    target.path.clone(),
                    CachedHash {
                        hash: hash.clone(),
                        mtime: target.mtime,
                        size: target.size,
                    },
                );
                Some(hash)
            }
            Ok(Err(err)) => {
                debug!("Failed to hash {}: {err}", target.path);
                None
            }
            Err(err) => {
                warn!("Hash task for {} failed: {err}", target.path);
                None
            }
        }
    }

    async fn rebuild(&self, targets: Vec<HashTarget>) -> Result<DuplicateStats> {
        let started = Instant::now();

        let mut hashed: Vec<(String, String)> = Vec::with_capacity(targets.len());
        for batch in targets.chunks(self.batch_size) {
            let results = join_all(batch.iter().map(|t| self.get_or_compute_hash(t))).await;
            for (target, hash) in batch.iter().zip(results) {
                if let Some(hash) = hash {
                    hashed.push((target.path.clone(), hash));
                }
            }
        }

        let live: HashSet<&str> = targets.iter().map(|t| t.path.as_str()).collect();
        self.hash_cache
            .lock()
            .retain(|path, _| live.contains(path.as_str()));

        let mut fresh = GroupState::default();
        for (path, hash) in hashed {
            fresh.insert(path, hash);
        }
        let stats = fresh.stats();
        *self.state.write() = fresh;

        info!(
            "Duplicate scan: {} assets, {} groups, {} files in {}ms",
            targets.len(),
            stats.duplicate_groups,
            stats.duplicate_files,
            started.elapsed().as_millis()
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn group_state_moves_paths_between_groups() {
        let mut state = GroupState::default();
        state.insert("a".to_string(), "h1".to_string());
        state.insert("b".to_string(), "h1".to_string());
        assert_eq!(state.stats().duplicate_groups, 1);

        state.insert("b".to_string(), "h2".to_string());
        assert_eq!(state.path_to_hash["b"], "h2");
        assert_eq!(state.groups["h1"].len(), 1);
        assert_eq!(state.stats(), DuplicateStats::default());

        assert_eq!(state.remove("a").as_deref(), Some("h1"));
        assert!(!state.groups.contains_key("h1"));
        assert_eq!(state.remove("a"), None);
    }

    #[tokio::test]
    async fn incremental_change_reports_vacated_and_joined_hashes() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/a.png"), b"same").unwrap();
        fs::write(tmp.path().join("src/b.png"), b"same").unwrap();

        let grouper = DuplicateGrouper::new(&AssetIndexConfig::for_root(tmp.path())).unwrap();
        grouper.handle_asset_change(WatchEventKind::Add, "src/a.png").await;
        let joined = grouper
            .handle_asset_change(WatchEventKind::Add, "src/b.png")
            .await
            .unwrap();
        let same = Sha256Hasher::hash_bytes(b"same");
        assert_eq!(joined.affected_hashes, vec![same.clone()]);
        assert_eq!(grouper.get_duplicate_info("src/a.png").duplicates_count, 1);

        fs::write(tmp.path().join("src/b.png"), b"different").unwrap();
        let moved = grouper
            .handle_asset_change(WatchEventKind::Change, "src/b.png")
            .await
            .unwrap();
        let different = Sha256Hasher::hash_bytes(b"different");
        let mut expected = vec![same.clone(), different];
        expected.sort();
        assert_eq!(moved.affected_hashes, expected);
        assert_eq!(grouper.get_duplicate_info("src/a.png").duplicates_count, 0);

        fs::remove_file(tmp.path().join("src/a.png")).unwrap();
        let removed = grouper
            .handle_asset_change(WatchEventKind::Unlink, "src/a.png")
            .await
            .unwrap();
        assert_eq!(removed.affected_hashes, vec![same.clone()]);
        assert!(grouper.get_duplicates_by_hash(&same).is_empty());
        assert_eq!(grouper.get_duplicate_info("src/a.png"), DuplicateInfo::default());
    }

    #[tokio::test]
    async fn removed_directory_ungroups_its_assets() {
        let tmp = tempfile::tempdir().unwrap();
        for rel in ["src/img/a.png", "src/img/deep/b.png", "src/imgs.png"] {
            let path = tmp.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"same").unwrap();
        }

        let grouper = DuplicateGrouper::new(&AssetIndexConfig::for_root(tmp.path())).unwrap();
        for rel in ["src/img/a.png", "src/img/deep/b.png", "src/imgs.png"] {
            grouper.handle_asset_change(WatchEventKind::Add, rel).await;
        }
        assert_eq!(grouper.get_duplicate_info("src/imgs.png").duplicates_count, 2);

        fs::remove_dir_all(tmp.path().join("src/img")).unwrap();
        let changes = grouper.handle_directory_unlink("src/img");

        let same = Sha256Hasher::hash_bytes(b"same");
        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["src/img/a.png", "src/img/deep/b.png"]);
        assert!(changes.iter().all(|c| c.affected_hashes == vec![same.clone()]));
        assert_eq!(grouper.get_duplicates_by_hash(&same), vec!["src/imgs.png".to_string()]);
        assert_eq!(grouper.get_duplicate_info("src/img/a.png"), DuplicateInfo::default());
        assert!(!grouper.inner.hash_cache.lock().contains_key("src/img/a.png"));
    }

    #[tokio::test]
    async fn unknown_path_change_is_silent() {
        let tmp = tempfile::tempdir().unwrap();
        let grouper = DuplicateGrouper::new(&AssetIndexConfig::for_root(tmp.path())).unwrap();
        assert!(grouper
            .handle_asset_change(WatchEventKind::Change, "src/ghost.png")
            .await
            .is_none());
    }
}
