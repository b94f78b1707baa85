use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the project root by [`AssetIndexConfig::load`].
pub const CONFIG_FILE_NAME: &str = "asset-index.toml";

/// Files strictly larger than this are hashed by streaming instead of a full read.
pub const DEFAULT_STREAM_THRESHOLD_BYTES: u64 = 1024 * 1024;

const DEFAULT_INCLUDE: &[&str] = &["src", "public", "assets"];

const DEFAULT_EXCLUDE: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/dist/**",
    "**/build/**",
    "**/target/**",
];

const DEFAULT_ASSET_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico", "bmp", "tiff",
    // video
    "mp4", "webm", "mov", "avi", "mkv", "ogv",
    // audio
    "mp3", "wav", "ogg", "flac", "aac", "m4a",
    // fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // documents
    "pdf", "txt",
    // data
    "csv", "xml",
];

const DEFAULT_SOURCE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "vue", "svelte", "astro", "html", "css", "scss",
    "sass", "less",
];

/// Engine configuration, resolved by the host and treated as opaque input by the indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetIndexConfig {
    pub root: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub extensions: Vec<String>,
    pub source_extensions: Vec<String>,
    pub aliases: BTreeMap<String, String>,
    pub public_dir: String,
    pub stream_threshold_bytes: u64,
    pub watch: bool,
    pub watch_debounce_ms: u64,
    pub batch_size: usize,
}

impl Default for AssetIndexConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            include: to_strings(DEFAULT_INCLUDE),
            exclude: to_strings(DEFAULT_EXCLUDE),
            extensions: to_strings(DEFAULT_ASSET_EXTENSIONS),
            source_extensions: to_strings(DEFAULT_SOURCE_EXTENSIONS),
            aliases: BTreeMap::from([("@".to_string(), "src".to_string())]),
            public_dir: "public".to_string(),
            stream_threshold_bytes: DEFAULT_STREAM_THRESHOLD_BYTES,
            watch: true,
            watch_debounce_ms: 100,
            batch_size: 32,
        }
    }
}

impl AssetIndexConfig {
    /// Default configuration rooted at `root`.
    pub fn for_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load `asset-index.toml` from the project root, falling back to defaults when absent.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::for_root(root));
        }
        Self::load_file(&path, root)
    }

    /// Load an explicit config file; `root` always overrides any `root` key in the file.
    pub fn load_file(path: &Path, root: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        config.root = root.as_ref().to_path_buf();
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    #[must_use]
    pub const fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    /// Batch size used for bounded per-file parallelism, never zero.
    #[must_use]
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}
