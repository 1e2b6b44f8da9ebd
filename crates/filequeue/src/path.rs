//! Path-string helpers for handle attributes.
//!
//! Paths are treated as plain strings. Nothing here touches the filesystem,
//! resolves symlinks or collapses `.`/`..`.

use std::path::Path;

/// Final component of `path`, or an empty string if there is none.
pub fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("")
}

/// Parent of `path`, or `None` for a root or a bare relative name.
pub fn parent(path: &str) -> Option<&str> {
    Path::new(path)
        .parent()
        .and_then(|parent| parent.to_str())
        .filter(|parent| !parent.is_empty())
}

/// Extension of the final component without the dot.
///
/// Dotfiles such as `.bashrc` have no extension.
pub fn extension(path: &str) -> Option<&str> {
    Path::new(path).extension().and_then(|ext| ext.to_str())
}
