//! # Asset Index
//!
//! Incremental indexing of a project's static assets.
//!
//! ## Pipeline
//!
//! ```text
//! Project root
//!     │
//!     ├──> Catalog Index (include/exclude globs, extension allow-list)
//!     │      └─> Assets (path, size, mtime, type)
//!     │
//!     ├──> Import Graph (line regex table)
//!     │      └─> asset → importers, source file → assets
//!     │
//!     ├──> Duplicate Grouper (SHA-256, memoized by mtime + size)
//!     │      └─> hash → paths
//!     │
//!     └──> Coordinator
//!            ├─ init: scan in order, annotate assets
//!            └─ watch: recompute dependents, then forward IndexEvent
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use asset_index::{AssetIndexConfig, IndexCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AssetIndexConfig::load("/path/to/project")?;
//!     let coordinator = IndexCoordinator::new(config)?;
//!     coordinator.init().await?;
//!
//!     for asset in coordinator.catalog().get_assets() {
//!         println!("{} ({} importers)", asset.path, asset.importers_count);
//!     }
//!     Ok(())
//! }
//! ```

mod asset;
mod catalog;
mod coalesce;
mod config;
mod coordinator;
mod duplicates;
mod error;
mod filter;
mod imports;
mod path;
mod watcher;

pub use asset::{Asset, AssetGroup, AssetType};
pub use catalog::{CatalogChange, CatalogIndex, CatalogStats};
pub use config::{AssetIndexConfig, CONFIG_FILE_NAME, DEFAULT_STREAM_THRESHOLD_BYTES};
pub use coordinator::{IndexCoordinator, IndexEvent};
pub use duplicates::{
    ContentHasher, DuplicateChange, DuplicateGroup, DuplicateGrouper, DuplicateInfo,
    DuplicateStats, Sha256Hasher,
};
pub use error::{AssetIndexError, Result};
pub use filter::PathFilter;
pub use imports::{
    ImportChange, ImportGraph, ImportResolver, ImportStats, ImportType, Importer,
    ResolutionRule, MAX_SNIPPET_CHARS,
};
pub use path::ROOT_DIRECTORY;
pub use watcher::{FsWatcher, FsWatcherConfig, WatchEvent, WatchEventKind};
