// src/watch/path_utils.rs

//! Path normalization for watcher events.

use std::path::Path;

/// Convert a path into a string relative to `root`, with forward slashes.
///
/// - First try a direct `strip_prefix(root)`.
/// - If that fails (symlinks, different absolute prefixes — notably
///   /private/var vs /var on macOS), canonicalize both sides and try again.
///
/// Returns `None` if the path cannot be related to `root`; callers log and
/// drop such events.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(rel.to_string_lossy().replace('\\', "/"));
    }

    if let (Ok(root_canon), Ok(path_canon)) = (root.canonicalize(), path.canonicalize()) {
        if let Ok(rel) = path_canon.strip_prefix(&root_canon) {
            return Some(rel.to_string_lossy().replace('\\', "/"));
        }
    }

    None
}
