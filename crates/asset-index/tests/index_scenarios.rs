//! End-to-end behaviour of the individual indexes against scratch project trees.

use anyhow::{Context, Result};
use asset_index::{
    AssetIndexConfig, CatalogIndex, ContentHasher, DuplicateGrouper, DuplicateStats, ImportGraph,
    ImportType, Sha256Hasher, WatchEvent, WatchEventKind,
};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn write(root: &Path, rel: &str, bytes: &[u8]) -> Result<PathBuf> {
    let path = root.join(rel);
    let parent = path.parent().context("file has no parent")?;
    std::fs::create_dir_all(parent).with_context(|| format!("mkdir {}", parent.display()))?;
    std::fs::write(&path, bytes).with_context(|| format!("write {rel}"))?;
    Ok(path)
}

/// Counts every file read while delegating to SHA-256.
struct CountingHasher {
    reads: AtomicUsize,
    inner: Sha256Hasher,
}

impl ContentHasher for CountingHasher {
    fn hash_file(&self, path: &Path, size: u64) -> std::io::Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.hash_file(path, size)
    }
}

#[tokio::test]
async fn grouped_assets_are_directory_sorted() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    write(tmp.path(), "src/logo.png", &[7; 1024])?;
    write(tmp.path(), "public/hero.jpg", &[9; 2048])?;

    let catalog = CatalogIndex::new(&AssetIndexConfig::for_root(tmp.path()))?;
    catalog.scan().await?;
    let groups = catalog.get_grouped_assets();

    let summary: Vec<(&str, usize)> = groups
        .iter()
        .map(|g| (g.directory.as_str(), g.count))
        .collect();
    assert_eq!(summary, vec![("public", 1), ("src", 1)]);
    assert_eq!(groups[0].assets[0].size, 2048);
    assert_eq!(groups[1].assets[0].size, 1024);
    Ok(())
}

#[tokio::test]
async fn identical_content_forms_one_group() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    write(tmp.path(), "src/a.png", b"same pixels")?;
    write(tmp.path(), "src/b.png", b"same pixels")?;
    write(tmp.path(), "src/c.png", b"other pixels")?;

    let config = AssetIndexConfig::for_root(tmp.path());
    let catalog = CatalogIndex::new(&config)?;
    let assets = catalog.scan().await?;
    let grouper = DuplicateGrouper::new(&config)?;
    grouper.scan_assets(&assets).await?;

    let a = grouper.get_duplicate_info("src/a.png");
    let b = grouper.get_duplicate_info("src/b.png");
    assert_eq!(a.duplicates_count, 1);
    assert_eq!(a.hash, b.hash);
    assert_eq!(grouper.get_duplicate_info("src/c.png").duplicates_count, 0);
    assert_eq!(
        grouper.get_stats(),
        DuplicateStats {
            duplicate_groups: 1,
            duplicate_files: 2,
        }
    );

    let hash = a.hash.context("grouped asset has a hash")?;
    assert_eq!(
        grouper.get_duplicates_by_hash(&hash),
        vec!["src/a.png".to_string(), "src/b.png".to_string()]
    );
    assert_eq!(grouper.get_duplicate_groups().len(), 1);
    assert_eq!(grouper.get_duplicate_info("src/unknown.png").hash, None);
    Ok(())
}

#[tokio::test]
async fn unchanged_files_are_not_rehashed() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    write(tmp.path(), "src/a.png", b"content")?;

    let config = AssetIndexConfig::for_root(tmp.path());
    let catalog = CatalogIndex::new(&config)?;
    let assets = catalog.scan().await?;

    let hasher = Arc::new(CountingHasher {
        reads: AtomicUsize::new(0),
        inner: Sha256Hasher::new(config.stream_threshold_bytes),
    });
    let grouper = DuplicateGrouper::with_hasher(&config, hasher.clone())?;

    grouper.scan_assets(&assets).await?;
    grouper.scan_assets(&assets).await?;
    assert_eq!(hasher.reads.load(Ordering::SeqCst), 1);

    // A different size invalidates the cached entry.
    let mut grown = assets.clone();
    grown[0].size += 1;
    grouper.scan_assets(&grown).await?;
    assert_eq!(hasher.reads.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn es_import_is_resolved_exactly() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    write(
        tmp.path(),
        "src/App.tsx",
        b"import logo from './assets/logo.png'\nexport default logo\n",
    )?;

    let graph = ImportGraph::new(&AssetIndexConfig::for_root(tmp.path()))?;
    graph.scan().await?;

    let importers = graph.get_importers("src/assets/logo.png");
    assert_eq!(importers.len(), 1);
    assert_eq!(importers[0].file_path, "src/App.tsx");
    assert_eq!(importers[0].import_type, ImportType::EsImport);
    assert_eq!(importers[0].line, 1);
    assert_eq!(importers[0].column, 1);
    assert!(graph.get_importers("src/assets/Logo.png").is_empty());
    assert!(graph.get_importers("src\\assets\\logo.png").is_empty());
    Ok(())
}

#[tokio::test]
async fn removed_reference_is_retracted_on_change() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    let app = write(
        tmp.path(),
        "src/App.tsx",
        b"import logo from './assets/logo.png'\n",
    )?;

    let graph = ImportGraph::new(&AssetIndexConfig::for_root(tmp.path()))?;
    graph.scan().await?;
    let mut changes = graph.subscribe();

    std::fs::write(&app, "export const App = () => null\n").context("rewrite App.tsx")?;
    let change = graph
        .handle_watch_event(&WatchEvent::new(WatchEventKind::Change, app))
        .await
        .context("change event expected")?;

    assert!(graph.get_importers("src/assets/logo.png").is_empty());
    assert!(change
        .affected_assets
        .contains(&"src/assets/logo.png".to_string()));
    assert_eq!(changes.recv().await.context("broadcast")?, change);
    Ok(())
}

#[tokio::test]
async fn streaming_and_buffered_hashes_share_format() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    let content: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
    let big = write(tmp.path(), "big.bin", &content)?;
    let small = write(tmp.path(), "small.bin", &content[..1000])?;

    let hasher = Sha256Hasher::new(64 * 1024);
    assert!(hasher.uses_streaming(content.len() as u64));
    assert!(!hasher.uses_streaming(1000));

    let streamed = hasher.hash_file(&big, content.len() as u64)?;
    let buffered = hasher.hash_file(&small, 1000)?;
    for hash in [&streamed, &buffered] {
        assert_eq!(hash.len(), 64);
        assert!(hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
    }

    // Same bytes through the other path give the same digest.
    let forced_buffer = Sha256Hasher::new(u64::MAX).hash_file(&big, content.len() as u64)?;
    assert_eq!(streamed, forced_buffer);
    Ok(())
}

#[tokio::test]
async fn rescans_are_idempotent() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    write(tmp.path(), "src/a.png", &[1; 10])?;
    write(tmp.path(), "assets/fonts/b.woff2", &[2; 20])?;
    write(tmp.path(), "public/c.mp4", &[3; 30])?;

    let catalog = CatalogIndex::new(&AssetIndexConfig::for_root(tmp.path()))?;
    let first = catalog.scan().await?;
    let second = catalog.scan().await?;

    let key = |assets: &[asset_index::Asset]| -> Vec<(String, u64, f64)> {
        assets
            .iter()
            .map(|a| (a.path.clone(), a.size, a.mtime))
            .collect()
    };
    assert_eq!(first.len(), 3);
    assert_eq!(key(&first), key(&second));
    assert_eq!(catalog.walk_count(), 2);
    Ok(())
}

#[tokio::test]
async fn concurrent_scans_share_one_walk() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    for i in 0..200 {
        write(tmp.path(), &format!("src/img/{i}.png"), &[0; 8])?;
        write(
            tmp.path(),
            &format!("src/pages/{i}.ts"),
            format!("import a from '../img/{i}.png'\n").as_bytes(),
        )?;
    }
    let config = AssetIndexConfig::for_root(tmp.path());

    let catalog = CatalogIndex::new(&config)?;
    let (a, b) = tokio::join!(catalog.scan(), catalog.scan());
    assert_eq!(a?.len(), 200);
    assert_eq!(b?.len(), 200);
    assert_eq!(catalog.walk_count(), 1);
    assert!(!catalog.is_scanning());

    let graph = ImportGraph::new(&config)?;
    let (a, b) = tokio::join!(graph.scan(), graph.scan());
    assert_eq!(a?, b?);
    assert_eq!(graph.walk_count(), 1);
    assert_eq!(graph.stats().references, 200);
    Ok(())
}

#[tokio::test]
async fn concurrent_grouping_hashes_each_asset_once() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    write(tmp.path(), "src/a.png", b"same")?;
    write(tmp.path(), "src/b.png", b"same")?;
    write(tmp.path(), "src/c.png", b"other")?;

    let config = AssetIndexConfig::for_root(tmp.path());
    let assets = CatalogIndex::new(&config)?.scan().await?;
    let hasher = Arc::new(CountingHasher {
        reads: AtomicUsize::new(0),
        inner: Sha256Hasher::new(config.stream_threshold_bytes),
    });
    let grouper = DuplicateGrouper::with_hasher(&config, hasher.clone())?;

    let (a, b) = tokio::join!(grouper.scan_assets(&assets), grouper.scan_assets(&assets));
    let (a, b) = (a?, b?);
    assert_eq!(a, b);
    assert_eq!(a.duplicate_groups, 1);
    assert_eq!(hasher.reads.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn walk_failure_reaches_every_coalesced_caller() -> Result<()> {
    let tmp = tempfile::tempdir().context("tempdir")?;
    let catalog = CatalogIndex::new(&AssetIndexConfig::for_root(tmp.path().join("gone")))?;

    let (a, b) = tokio::join!(catalog.scan(), catalog.scan());
    assert!(a.is_err());
    assert!(b.is_err());
    assert_eq!(catalog.walk_count(), 1);
    Ok(())
}
