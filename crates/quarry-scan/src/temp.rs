//! Temporary files for downloaded and extracted archives.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

const PREFIX: &str = "quarry--";
/// Separates the random part of a temp filename from the original leaf,
/// so logs can show the leaf alone.
const LEAF_SEPARATOR: &str = "---";

/// Owns every temp file the scan creates and deletes them, newest first,
/// when the session closes.
#[derive(Debug, Default)]
pub struct TempFileRegistry {
    files: Mutex<Vec<PathBuf>>,
}

impl TempFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (and register) an empty temp file whose name ends with a
    /// sanitised form of `leaf`, e.g. `quarry--a1b2c3---inner.jar`.
    pub fn create(&self, leaf: &str) -> std::io::Result<(std::fs::File, PathBuf)> {
        let suffix = format!("{LEAF_SEPARATOR}{}", sanitize_leaf(leaf));
        let file = tempfile::Builder::new()
            .prefix(PREFIX)
            .suffix(&suffix)
            .tempfile()?;
        // The registry owns deletion; detach the guard.
        let (file, path) = file.keep().map_err(|err| err.error)?;
        tracing::debug!(target: "quarry.scan", path = %path.display(), "created temp file");
        self.files.lock().push(path.clone());
        Ok((file, path))
    }

    pub fn count(&self) -> usize {
        self.files.lock().len()
    }

    /// Delete every registered file, in reverse order of creation.
    pub fn close(&self) {
        let mut files = self.files.lock();
        for path in files.drain(..).rev() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::debug!(
                        target: "quarry.scan",
                        path = %path.display(),
                        error = %err,
                        "failed to delete temp file"
                    );
                }
            }
        }
    }
}

impl Drop for TempFileRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

/// The original leaf name of a temp file created by
/// [`TempFileRegistry::create`], for display purposes.
pub fn temp_file_leaf(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    let (_, leaf) = name.split_once(LEAF_SEPARATOR)?;
    Some(leaf)
}

fn sanitize_leaf(leaf: &str) -> String {
    let leaf = leaf.rsplit(['/', '\\', '!']).next().unwrap_or(leaf);
    leaf.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_close_and_leaf_recovery() {
        let registry = TempFileRegistry::new();
        let (_file, path) = registry.create("lib/inner archive.jar").unwrap();
        assert!(path.exists());
        assert_eq!(temp_file_leaf(&path), Some("inner_archive.jar"));
        assert_eq!(registry.count(), 1);

        registry.close();
        assert!(!path.exists());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn leaves_are_taken_from_the_last_nested_segment() {
        assert_eq!(sanitize_leaf("outer.jar!BOOT-INF/lib/dep.jar"), "dep.jar");
        assert_eq!(sanitize_leaf("weird:name?.jar"), "weird_name_.jar");
    }
}
