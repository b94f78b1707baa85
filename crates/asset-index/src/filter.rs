use crate::config::AssetIndexConfig;
use crate::error::Result;
use crate::path::extension_of;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;

/// Compiled include/exclude globs and extension allow-lists shared by the indexes.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
    exclude_dirs: GlobSet,
    asset_extensions: HashSet<String>,
    source_extensions: HashSet<String>,
}

impl PathFilter {
    pub fn from_config(config: &AssetIndexConfig) -> Result<Self> {
        let mut include = GlobSetBuilder::new();
        for pattern in &config.include {
            let pattern = pattern.trim().trim_start_matches("./").trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }
            include.add(Glob::new(pattern)?);
            // A bare directory name selects everything below it.
            if !has_glob_meta(pattern) {
                include.add(Glob::new(&format!("{pattern}/**"))?);
            }
        }

        let mut exclude = GlobSetBuilder::new();
        let mut exclude_dirs = GlobSetBuilder::new();
        for pattern in &config.exclude {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            exclude.add(Glob::new(pattern)?);
            if let Some(dir) = pattern.strip_suffix("/**") {
                exclude_dirs.add(Glob::new(dir)?);
            }
        }

        Ok(Self {
            include: include.build()?,
            exclude: exclude.build()?,
            exclude_dirs: exclude_dirs.build()?,
            asset_extensions: normalize_extensions(&config.extensions),
            source_extensions: normalize_extensions(&config.source_extensions),
        })
    }

    /// Whether a directory (project-relative) should be pruned from walks.
    pub fn is_excluded_dir(&self, rel_dir: &str) -> bool {
        self.exclude_dirs.is_match(rel_dir) || self.exclude.is_match(rel_dir)
    }

    pub fn is_excluded(&self, rel_path: &str) -> bool {
        self.exclude.is_match(rel_path)
    }

    pub fn is_asset_extension(&self, ext: &str) -> bool {
        self.asset_extensions.contains(ext)
    }

    /// Catalog membership: included, not excluded, and on the asset allow-list.
    pub fn accepts_asset(&self, rel_path: &str) -> bool {
        self.include.is_match(rel_path)
            && !self.is_excluded(rel_path)
            && self.is_asset_extension(&extension_of(rel_path))
    }

    /// Import-graph membership: any non-excluded file with a source extension.
    pub fn accepts_source(&self, rel_path: &str) -> bool {
        !self.is_excluded(rel_path) && self.source_extensions.contains(&extension_of(rel_path))
    }
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

fn normalize_extensions(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> PathFilter {
        PathFilter::from_config(&AssetIndexConfig::default()).unwrap()
    }

    #[test]
    fn bare_directory_includes_subtree() {
        let filter = filter();
        assert!(filter.accepts_asset("src/logo.png"));
        assert!(filter.accepts_asset("public/img/deep/hero.JPG"));
        assert!(!filter.accepts_asset("docs/diagram.png"));
    }

    #[test]
    fn excluded_directories_are_pruned() {
        let filter = filter();
        assert!(filter.is_excluded_dir("node_modules"));
        assert!(filter.is_excluded_dir("src/node_modules"));
        assert!(!filter.is_excluded_dir("src"));
        assert!(!filter.accepts_asset("src/node_modules/pkg/icon.png"));
    }

    #[test]
    fn extension_allow_lists() {
        let filter = filter();
        assert!(!filter.accepts_asset("src/App.tsx"));
        assert!(filter.accepts_source("src/App.tsx"));
        assert!(filter.accepts_source("index.html"));
        assert!(!filter.accepts_source("dist/bundle.js"));
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let config = AssetIndexConfig {
            exclude: vec!["src/[".to_string()],
            ..AssetIndexConfig::default()
        };
        assert!(PathFilter::from_config(&config).is_err());
    }
}
