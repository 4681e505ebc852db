//! Dump file name handling.

use std::path::{Path, PathBuf};

/// Resolve `name` inside `dump_dir`.
///
/// Only a single plain path segment is accepted: no separators, no leading
/// dot, not empty. Nothing touches the file system here.
#[must_use]
pub fn sanitize_filename(dump_dir: &Path, name: &str) -> Option<PathBuf> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return None;
    }
    Some(dump_dir.join(name))
}
