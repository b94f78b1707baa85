//! Project-relative path helpers. Every index keys its state by POSIX-separated paths
//! relative to the project root.

use std::path::Path;

/// Directory value used for files that live directly in the project root.
pub const ROOT_DIRECTORY: &str = ".";

/// Project-relative, `/`-separated form of `path`, or `None` if it is outside `root`.
pub fn relative_posix(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut normalized = relative.to_string_lossy().to_string();
    if normalized.contains('\\') {
        normalized = normalized.replace('\\', "/");
    }
    if normalized.is_empty() {
        return None;
    }
    Some(normalized)
}

/// Collapse `.` and `..` segments. Returns `None` when the path climbs above the root.
pub fn normalize_relative(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Parent directory of a relative path, or [`ROOT_DIRECTORY`].
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => ROOT_DIRECTORY,
    }
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Lowercased extension without the dot; empty when there is none.
pub fn extension_of(path: &str) -> String {
    let name = file_name(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx + 1..].to_lowercase(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn relative_posix_strips_root() {
        let root = PathBuf::from("/project");
        assert_eq!(
            relative_posix(&root, &root.join("src").join("logo.png")).as_deref(),
            Some("src/logo.png")
        );
        assert_eq!(relative_posix(&root, Path::new("/other/x.png")), None);
        assert_eq!(relative_posix(&root, &root), None);
    }

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(
            normalize_relative("src/components/../assets/./logo.png").as_deref(),
            Some("src/assets/logo.png")
        );
        assert_eq!(normalize_relative("../outside.png"), None);
        assert_eq!(normalize_relative("src/../.."), None);
    }

    #[test]
    fn parent_and_extension() {
        assert_eq!(parent_dir("src/img/a.PNG"), "src/img");
        assert_eq!(parent_dir("favicon.ico"), ROOT_DIRECTORY);
        assert_eq!(extension_of("src/img/a.PNG"), "png");
        assert_eq!(extension_of("src/.gitkeep"), "");
        assert_eq!(extension_of("Makefile"), "");
    }
}
