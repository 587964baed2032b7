//! Materialising nested-path keys into files, slices and open archives.
//!
//! A nested key has the form `seg0!seg1!…!segN`: each `!` marks descent
//! into an archive, and the rightmost segment may name an in-archive
//! directory pinned as a package root. Resolution recurses on the
//! rightmost `!`, so the left side shrinks every step and terminates.
//!
//! Every result is memoised in a [`SingletonMap`], which also guarantees
//! that downloading a remote archive or extracting a deflated inner
//! archive happens exactly once per canonical key, no matter how many
//! workers race for it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_sync::{Recycler, SingletonMap};
use quarry_zip::{
    ArchiveEntry, Compression, EntryReader, Inflater, LogicalArchive, PhysicalArchive, ZipError,
};

use crate::temp::TempFileRegistry;
use crate::{ScanError, ScanLog};

/// What a nested key resolved to.
#[derive(Clone, Debug)]
pub struct NestedResolution {
    /// A real file on disk: the user's own file, a downloaded archive, or
    /// the extraction of a deflated inner archive. Stored inner archives
    /// resolve to their enclosing physical file and are read in place.
    pub file: PathBuf,
    /// In-archive directories pinned as package roots along the key.
    pub package_roots: Vec<String>,
    /// The canonical key identifying the archive for further descent:
    /// equal to `file` for physical archives, `parent!entry` for stored
    /// inner archives.
    collapsed_key: String,
}

impl NestedResolution {
    pub fn archive_key(&self) -> &str {
        &self.collapsed_key
    }
}

/// An archive opened through the cache, with its pooled per-worker
/// decompressors.
pub struct ArchiveHandle {
    physical: Option<Arc<PhysicalArchive>>,
    logical: LogicalArchive,
    inflaters: Recycler<Inflater>,
}

impl ArchiveHandle {
    pub fn logical(&self) -> &LogicalArchive {
        &self.logical
    }

    /// Open an entry stream backed by this archive's decompressor pool.
    pub fn open_entry(&self, entry: &ArchiveEntry) -> Result<EntryReader, ZipError> {
        self.logical.open_entry_pooled(entry, &self.inflaters)
    }

    fn close(&self) {
        self.inflaters.force_close();
        if let Some(physical) = &self.physical {
            physical.close();
        }
    }
}

pub struct NestedArchiveCache {
    temp: Arc<TempFileRegistry>,
    log: ScanLog,
    resolutions: SingletonMap<String, NestedResolution>,
    archives: SingletonMap<String, ArchiveHandle>,
    /// Extracted inner file → enclosing parent file, for walking back to
    /// the outermost archive.
    inner_to_outer: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl NestedArchiveCache {
    pub fn new(temp: Arc<TempFileRegistry>, log: ScanLog) -> Self {
        Self {
            temp,
            log,
            resolutions: SingletonMap::new(),
            archives: SingletonMap::new(),
            inner_to_outer: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `key` to a physical file and accumulated package roots.
    pub fn resolve(&self, key: &str) -> Result<Arc<NestedResolution>, ScanError> {
        self.resolutions
            .get_or_create(key.to_string(), || self.resolve_uncached(key))
            .map_err(|err| ScanError::from_singleton(err, key))
    }

    /// Open (once) the archive a resolved key denotes.
    pub fn open_archive(&self, archive_key: &str) -> Result<Arc<ArchiveHandle>, ScanError> {
        self.archives
            .get_or_create(archive_key.to_string(), || {
                self.open_archive_uncached(archive_key)
            })
            .map_err(|err| ScanError::from_singleton(err, archive_key))
    }

    /// The file physically enclosing `inner`, if `inner` was extracted
    /// from a nested entry; walks to the outermost archive.
    pub fn outermost_file(&self, inner: &Path) -> Option<PathBuf> {
        let map = self.inner_to_outer.lock();
        let mut current = map.get(inner)?;
        while let Some(outer) = map.get(current) {
            current = outer;
        }
        Some(current.clone())
    }

    /// Close every archive opened through the cache. Temp files are owned
    /// by the registry and deleted by the session.
    pub fn close(&self) {
        for handle in self.archives.drain() {
            handle.close();
        }
        self.resolutions.drain();
    }

    fn resolve_uncached(&self, key: &str) -> Result<NestedResolution, ScanError> {
        let Some((left, right)) = key.rsplit_once('!') else {
            return self.resolve_physical(key);
        };

        let parent = self.resolve(left)?;
        if parent.collapsed_key != left {
            // Canonicalisation changed the parent; re-entering with the
            // canonical key converges in one extra step.
            let rewritten = format!("{}!{right}", parent.collapsed_key);
            return self.resolve(&rewritten).map(|r| (*r).clone());
        }

        let handle = self.open_archive(&parent.collapsed_key)?;
        let right = right.trim_matches('/');

        let Some(entry) = handle.logical.entry(right) else {
            // No file entry: treat as a package-root directory. Archives
            // commonly omit directory records, so match by prefix.
            if handle.logical.has_directory(right) {
                let mut package_roots = parent.package_roots.clone();
                package_roots.push(right.to_string());
                return Ok(NestedResolution {
                    file: parent.file.clone(),
                    package_roots,
                    collapsed_key: parent.collapsed_key.clone(),
                });
            }
            return Err(ScanError::MissingNestedEntry {
                key: left.to_string(),
                entry: right.to_string(),
            });
        };

        match entry.method() {
            Compression::Stored => {
                // Readable in place through a slice; no temp file.
                Ok(NestedResolution {
                    file: parent.file.clone(),
                    package_roots: parent.package_roots.clone(),
                    collapsed_key: format!("{}!{right}", parent.collapsed_key),
                })
            }
            Compression::Deflated => {
                let (mut file, path) = self.temp.create(right)?;
                let mut reader = handle.logical.open_entry(entry)?;
                std::io::copy(&mut reader, &mut file)?;
                file.sync_all()?;
                drop(file);

                let canonical = canonicalize(&path)?;
                self.log.log(format_args!(
                    "extracted nested archive {key} to {}",
                    canonical.display()
                ));
                self.inner_to_outer
                    .lock()
                    .insert(canonical.clone(), parent.file.clone());
                Ok(NestedResolution {
                    collapsed_key: canonical.to_string_lossy().into_owned(),
                    file: canonical,
                    package_roots: Vec::new(),
                })
            }
        }
    }

    fn resolve_physical(&self, key: &str) -> Result<NestedResolution, ScanError> {
        if has_http_scheme(key) {
            return self.download(key);
        }

        let canonical = canonicalize(Path::new(key))?;
        let metadata = std::fs::metadata(&canonical)?;
        if !metadata.is_file() && !metadata.is_dir() {
            return Err(ScanError::NotAFile { path: canonical });
        }
        Ok(NestedResolution {
            collapsed_key: canonical.to_string_lossy().into_owned(),
            file: canonical,
            package_roots: Vec::new(),
        })
    }

    fn download(&self, url: &str) -> Result<NestedResolution, ScanError> {
        let leaf = url.rsplit('/').next().unwrap_or(url);
        let (mut file, path) = self.temp.create(leaf)?;

        let response = ureq::get(url).call().map_err(|err| ScanError::Http {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        file.sync_all()?;
        drop(file);

        let canonical = canonicalize(&path)?;
        let metadata = std::fs::metadata(&canonical)?;
        if !metadata.is_file() {
            return Err(ScanError::NotAFile { path: canonical });
        }
        self.log
            .log(format_args!("downloaded {url} to {}", canonical.display()));
        Ok(NestedResolution {
            collapsed_key: canonical.to_string_lossy().into_owned(),
            file: canonical,
            package_roots: Vec::new(),
        })
    }

    fn open_archive_uncached(&self, archive_key: &str) -> Result<ArchiveHandle, ScanError> {
        match archive_key.rsplit_once('!') {
            None => {
                let physical = PhysicalArchive::open(Path::new(archive_key))?;
                let logical = LogicalArchive::open_physical(&physical)?;
                Ok(ArchiveHandle {
                    physical: Some(physical),
                    logical,
                    inflaters: Recycler::new(),
                })
            }
            Some((parent_key, entry_name)) => {
                // Only stored inner archives keep a `!` in their key;
                // deflated ones collapse to an extracted temp file.
                let parent = self.open_archive(parent_key)?;
                let entry = parent.logical.entry(entry_name).ok_or_else(|| {
                    ScanError::MissingNestedEntry {
                        key: parent_key.to_string(),
                        entry: entry_name.to_string(),
                    }
                })?;
                let slice = parent.logical.entry_data_slice(entry)?;
                let logical = LogicalArchive::open(slice)?;
                Ok(ArchiveHandle {
                    physical: None,
                    logical,
                    inflaters: Recycler::new(),
                })
            }
        }
    }
}

fn has_http_scheme(key: &str) -> bool {
    let bytes = key.as_bytes();
    (bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"http://"))
        || (bytes.len() >= 8 && bytes[..8].eq_ignore_ascii_case(b"https://"))
}

fn canonicalize(path: &Path) -> Result<PathBuf, ScanError> {
    dunce::canonicalize(path).map_err(|source| ScanError::Canonicalize {
        path: path.to_path_buf(),
        source,
    })
}
