//! Fixed table of syntactic reference patterns. Line-level regex heuristics, not a parser.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Longest snippet kept for display, in characters.
pub const MAX_SNIPPET_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportType {
    EsImport,
    DynamicImport,
    Require,
    CssUrl,
    HtmlSrc,
    HtmlHref,
}

impl ImportType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EsImport => "es-import",
            Self::DynamicImport => "dynamic-import",
            Self::Require => "require",
            Self::CssUrl => "css-url",
            Self::HtmlSrc => "html-src",
            Self::HtmlHref => "html-href",
        }
    }
}

/// How a captured specifier is turned into a project path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionRule {
    /// Module specifiers: bare names are packages and get rejected.
    ModuleSpecifier,
    /// URL-ish attributes: a bare path is relative to the referencing file.
    UrlReference,
}

pub struct ReferencePattern {
    pub import_type: ImportType,
    pub regex: Regex,
    pub rule: ResolutionRule,
}

/// One syntactic match on a line, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReference {
    pub import_type: ImportType,
    pub rule: ResolutionRule,
    pub specifier: String,
    /// 1-indexed, in characters.
    pub column: usize,
}

static PATTERNS: Lazy<Vec<ReferencePattern>> = Lazy::new(|| {
    let table: [(ImportType, &str, ResolutionRule); 6] = [
        (
            ImportType::EsImport,
            r#"\b(?:import|export)\s+(?:[\w$*{},\s]+?\s+from\s+)?["']([^"'\n]+)["']"#,
            ResolutionRule::ModuleSpecifier,
        ),
        (
            ImportType::DynamicImport,
            r#"\bimport\s*\(\s*["'`]([^"'`\n]+)["'`]\s*\)"#,
            ResolutionRule::ModuleSpecifier,
        ),
        (
            ImportType::Require,
            r#"\brequire\s*\(\s*["']([^"'\n]+)["']\s*\)"#,
            ResolutionRule::ModuleSpecifier,
        ),
        (
            ImportType::CssUrl,
            r#"\burl\(\s*["']?([^"')\s]+)["']?\s*\)"#,
            ResolutionRule::UrlReference,
        ),
        (
            ImportType::HtmlSrc,
            r#"\bsrc\s*=\s*["']([^"'\n]+)["']"#,
            ResolutionRule::UrlReference,
        ),
        (
            ImportType::HtmlHref,
            r#"\bhref\s*=\s*["']([^"'\n]+)["']"#,
            ResolutionRule::UrlReference,
        ),
    ];

    table
        .into_iter()
        .map(|(import_type, pattern, rule)| ReferencePattern {
            import_type,
            regex: Regex::new(pattern).expect("reference pattern table must compile"),
            rule,
        })
        .collect()
});

pub fn reference_patterns() -> &'static [ReferencePattern] {
    &PATTERNS
}

/// Every pattern match on one line, ordered by column.
pub fn scan_line(line: &str) -> Vec<RawReference> {
    let mut found = Vec::new();
    for pattern in reference_patterns() {
        for caps in pattern.regex.captures_iter(line) {
            let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            found.push(RawReference {
                import_type: pattern.import_type,
                rule: pattern.rule,
                specifier: spec.as_str().to_string(),
                column: line[..whole.start()].chars().count() + 1,
            });
        }
    }
    found.sort_by_key(|r| r.column);
    found
}

/// Trimmed line of at most [`MAX_SNIPPET_CHARS`] chars; a cut line ends in `…`.
pub fn snippet(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() <= MAX_SNIPPET_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_SNIPPET_CHARS - 1).collect();
    format!("{cut}…")
}
