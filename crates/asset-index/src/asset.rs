use crate::path::{extension_of, file_name, parent_dir};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

/// Closed set of asset kinds, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Image,
    Video,
    Audio,
    Font,
    Document,
    Data,
    Other,
}

impl AssetType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "avif" | "ico" | "bmp" | "tif"
            | "tiff" => Self::Image,
            "mp4" | "webm" | "mov" | "avi" | "mkv" | "ogv" => Self::Video,
            "mp3" | "wav" | "ogg" | "flac" | "aac" | "m4a" | "opus" => Self::Audio,
            "woff" | "woff2" | "ttf" | "otf" | "eot" => Self::Font,
            "pdf" | "txt" | "md" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" => {
                Self::Document
            }
            "json" | "csv" | "xml" | "yaml" | "yml" | "toml" => Self::Data,
            _ => Self::Other,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Font => "font",
            Self::Document => "document",
            Self::Data => "data",
            Self::Other => "other",
        }
    }
}

/// One tracked file. Owned by the catalog; other indexes refer to it by `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub path: String,
    pub absolute_path: PathBuf,
    pub name: String,
    pub extension: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub size: u64,
    /// Last-modified time in milliseconds since the Unix epoch.
    pub mtime: f64,
    pub directory: String,
    pub importers_count: usize,
    pub content_hash: Option<String>,
    pub duplicates_count: usize,
}

impl Asset {
    pub fn new(path: impl Into<String>, absolute_path: PathBuf, size: u64, mtime: f64) -> Self {
        let path = path.into();
        let extension = extension_of(&path);
        Self {
            name: file_name(&path).to_string(),
            asset_type: AssetType::from_extension(&extension),
            directory: parent_dir(&path).to_string(),
            extension,
            absolute_path,
            size,
            mtime,
            path,
            importers_count: 0,
            content_hash: None,
            duplicates_count: 0,
        }
    }

    pub fn from_metadata(path: impl Into<String>, absolute_path: PathBuf, meta: &Metadata) -> Self {
        Self::new(path, absolute_path, meta.len(), mtime_ms(meta))
    }

    /// Copy annotation fields owned by the dependent indexes from a previous version.
    pub fn inherit_annotations(&mut self, previous: &Self) {
        self.importers_count = previous.importers_count;
        self.content_hash.clone_from(&previous.content_hash);
        self.duplicates_count = previous.duplicates_count;
    }
}

/// Assets sharing one directory, as returned by grouped catalog reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetGroup {
    pub directory: String,
    pub assets: Vec<Asset>,
    pub count: usize,
}

/// Modification time in float milliseconds; 0 when the platform cannot report it.
pub fn mtime_ms(meta: &Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map_or(0.0, |duration| duration.as_secs_f64() * 1000.0)
}
