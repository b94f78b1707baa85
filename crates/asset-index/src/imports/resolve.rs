use super::patterns::ResolutionRule;
use crate::config::AssetIndexConfig;
use crate::path::{normalize_relative, parent_dir, ROOT_DIRECTORY};

const EXTERNAL_PREFIXES: &[&str] = &["//", "data:", "mailto:", "tel:", "javascript:", "#"];

/// Maps captured specifiers to project-relative asset paths.
#[derive(Debug, Clone)]
pub struct ImportResolver {
    public_dir: String,
    /// (prefix, target), longest prefix first.
    aliases: Vec<(String, String)>,
}

impl ImportResolver {
    pub fn from_config(config: &AssetIndexConfig) -> Self {
        let mut aliases: Vec<(String, String)> = config
            .aliases
            .iter()
            .map(|(prefix, target)| {
                (
                    prefix.trim().trim_end_matches('/').to_string(),
                    clean_dir(target),
                )
            })
            .filter(|(prefix, _)| !prefix.is_empty())
            .collect();
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self {
            public_dir: clean_dir(&config.public_dir),
            aliases,
        }
    }

    #[must_use]
    pub fn public_dir(&self) -> &str {
        &self.public_dir
    }

    /// Resolve `specifier` found in `source` (project-relative). External URLs, bare
    /// module names and paths escaping the root yield `None`.
    pub fn resolve(&self, specifier: &str, source: &str, rule: ResolutionRule) -> Option<String> {
        let spec = strip_query(specifier.trim());
        if spec.is_empty() || spec.contains("://") || spec.contains("${") {
            return None;
        }
        if EXTERNAL_PREFIXES.iter().any(|prefix| spec.starts_with(prefix)) {
            return None;
        }

        if let Some(resolved) = self.resolve_alias(spec) {
            return resolved;
        }

        if let Some(rest) = spec.strip_prefix('/') {
            return normalize_relative(&join(&self.public_dir, rest));
        }

        let is_relative = spec.starts_with("./") || spec.starts_with("../");
        if !is_relative && rule == ResolutionRule::ModuleSpecifier {
            return None;
        }

        let base = parent_dir(source);
        let base = if base == ROOT_DIRECTORY { "" } else { base };
        normalize_relative(&join(base, spec))
    }

    /// Alternate spelling of `path` with the public-directory prefix added or removed.
    pub fn public_alternate(&self, path: &str) -> Option<String> {
        if self.public_dir.is_empty() {
            return None;
        }
        match path.strip_prefix(&self.public_dir) {
            Some(rest) if rest.starts_with('/') => Some(rest[1..].to_string()),
            _ => Some(join(&self.public_dir, path)),
        }
    }

    fn resolve_alias(&self, spec: &str) -> Option<Option<String>> {
        for (prefix, target) in &self.aliases {
            let rest = if spec == prefix {
                ""
            } else if let Some(rest) = spec
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                rest
            } else {
                continue;
            };
            return Some(normalize_relative(&join(target, rest)));
        }
        None
    }
}

fn strip_query(spec: &str) -> &str {
    let end = spec.find(['?', '#']).unwrap_or(spec.len());
    &spec[..end]
}

fn clean_dir(dir: &str) -> String {
    dir.trim()
        .trim_start_matches("./")
        .trim_matches('/')
        .to_string()
}

fn join(base: &str, rest: &str) -> String {
    if base.is_empty() {
        rest.to_string()
    } else {
        format!("{base}/{rest}")
    }
}

/// Extension of a specifier after dropping any query or fragment.
pub fn specifier_extension(specifier: &str) -> String {
    crate::path::extension_of(strip_query(specifier.trim()))
}
