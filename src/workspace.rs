//! Workspace validation and request-path resolution.
//!
//! The bridge only ever acts inside a Chromium checkout. A workspace root is
//! considered valid when one of its path components contains the `src`
//! marker and the directory actually exists. Validation re-reads the
//! filesystem on every call — the checkout can disappear or move between
//! server start and an incoming request, and a stale answer here would let
//! the editor jump into the void.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Substring identifying the Chromium source root component.
pub const SRC_MARKER: &str = "src";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace root {0:?} does not exist")]
    RootMissing(PathBuf),
    #[error("workspace root {0:?} has no '{SRC_MARKER}' component")]
    MarkerAbsent(PathBuf),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{0:?} does not exist in the local checkout")]
    NotFound(PathBuf),
    #[error("{0:?} escapes the local checkout")]
    OutsideTree(PathBuf),
}

/// A validated view of the configured workspace root.
#[derive(Debug, Clone)]
pub struct Workspace {
    src_root: PathBuf,
}

impl Workspace {
    /// Validate `root` and truncate it at the marker component.
    pub fn current(root: &Path) -> Result<Self, WorkspaceError> {
        if !root.is_dir() {
            return Err(WorkspaceError::RootMissing(root.to_path_buf()));
        }
        let src_root = truncate_at_marker(root)
            .ok_or_else(|| WorkspaceError::MarkerAbsent(root.to_path_buf()))?;
        Ok(Self { src_root })
    }

    /// The checkout root — the workspace path up to and including the marker
    /// component. Inbound requests resolve underneath this directory.
    pub fn src_root(&self) -> &Path {
        &self.src_root
    }

    /// Resolve a request-relative path to an absolute one inside the checkout.
    ///
    /// The candidate is canonicalized and any result that lands outside the
    /// checkout (`../` chains, absolute paths, symlinks pointing elsewhere)
    /// is rejected rather than opened.
    pub fn resolve_request_path(&self, relative: &str) -> Result<PathBuf, ResolveError> {
        let candidate = self.src_root.join(relative);
        let resolved = candidate
            .canonicalize()
            .map_err(|_| ResolveError::NotFound(candidate.clone()))?;
        let root = self
            .src_root
            .canonicalize()
            .map_err(|_| ResolveError::NotFound(self.src_root.clone()))?;
        if !resolved.starts_with(&root) {
            return Err(ResolveError::OutsideTree(candidate));
        }
        Ok(resolved)
    }
}

/// Keep the components of `path` up to and including the first one whose
/// name contains [`SRC_MARKER`]. `None` if no component matches.
fn truncate_at_marker(path: &Path) -> Option<PathBuf> {
    let mut truncated = PathBuf::new();
    for component in path.components() {
        truncated.push(component);
        if is_marker(&component) {
            return Some(truncated);
        }
    }
    None
}

/// The part of `path` after the marker component, or `None` when the marker
/// is absent. This is the path the web viewer addresses files by.
pub fn relative_after_marker(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    for component in components.by_ref() {
        if is_marker(&component) {
            let rest: PathBuf = components.collect();
            if rest.as_os_str().is_empty() {
                return None;
            }
            return Some(rest);
        }
    }
    None
}

fn is_marker(component: &Component<'_>) -> bool {
    matches!(component, Component::Normal(name)
        if name.to_string_lossy().contains(SRC_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn truncates_root_at_marker_component() {
        let ws = path_with_marker("/home/dev/chromium/src/chrome");
        assert_eq!(ws, Some(PathBuf::from("/home/dev/chromium/src")));
    }

    #[test]
    fn marker_matches_by_substring() {
        // The original extension matched `src` anywhere in the name.
        let ws = path_with_marker("/home/dev/chromium-src/out");
        assert_eq!(ws, Some(PathBuf::from("/home/dev/chromium-src")));
    }

    #[test]
    fn no_marker_yields_none() {
        assert_eq!(path_with_marker("/home/dev/webkit/checkout"), None);
    }

    fn path_with_marker(p: &str) -> Option<PathBuf> {
        truncate_at_marker(Path::new(p))
    }

    #[test]
    fn relative_path_drops_everything_through_marker() {
        let rel = relative_after_marker(Path::new("/w/chromium/src/chrome/browser/foo.cc"));
        assert_eq!(rel, Some(PathBuf::from("chrome/browser/foo.cc")));
    }

    #[test]
    fn relative_path_of_marker_itself_is_none() {
        assert_eq!(relative_after_marker(Path::new("/w/chromium/src")), None);
        assert_eq!(relative_after_marker(Path::new("/w/webkit/foo.cc")), None);
    }

    #[test]
    fn current_rejects_missing_root() {
        let err = Workspace::current(Path::new("/definitely/not/a/src/dir")).unwrap_err();
        assert!(matches!(err, WorkspaceError::RootMissing(_)));
    }

    #[test]
    fn current_rejects_root_without_marker() {
        let dir = TempDir::new().unwrap();
        let err = Workspace::current(dir.path()).unwrap_err();
        assert!(matches!(err, WorkspaceError::MarkerAbsent(_)));
    }

    fn checkout(dir: &TempDir) -> PathBuf {
        let root = dir.path().join("chromium").join("src");
        std::fs::create_dir_all(root.join("chrome/browser")).unwrap();
        std::fs::write(root.join("chrome/browser/foo.cc"), "// foo").unwrap();
        root
    }

    #[test]
    fn resolves_existing_file_inside_checkout() {
        let dir = TempDir::new().unwrap();
        let root = checkout(&dir);
        let ws = Workspace::current(&root).unwrap();

        let resolved = ws.resolve_request_path("chrome/browser/foo.cc").unwrap();
        assert!(resolved.ends_with("chrome/browser/foo.cc"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let root = checkout(&dir);
        let ws = Workspace::current(&root).unwrap();

        let err = ws.resolve_request_path("chrome/browser/nope.cc").unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[test]
    fn traversal_out_of_checkout_is_rejected() {
        let dir = TempDir::new().unwrap();
        let root = checkout(&dir);
        // An existing file one level above src/ — reachable via `..` but
        // outside the checkout.
        std::fs::write(dir.path().join("chromium").join("secrets.txt"), "x").unwrap();
        let ws = Workspace::current(&root).unwrap();

        let err = ws.resolve_request_path("../secrets.txt").unwrap_err();
        assert!(matches!(err, ResolveError::OutsideTree(_)));
    }

    #[test]
    fn absolute_request_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        let root = checkout(&dir);
        let ws = Workspace::current(&root).unwrap();

        // Path::join replaces the base entirely for absolute paths; the
        // canonicalized result must still be inside the checkout.
        let err = ws.resolve_request_path("/etc/hostname");
        assert!(err.is_err());
    }
}
