//! Mapped archives, slices and positional readers.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};
use quarry_sync::{SingletonError, SingletonMap};

use crate::ZipError;

/// Upper bound on a single mapped region. Region `i` covers bytes
/// `[i * region_size, min(len, (i + 1) * region_size))`; archives larger
/// than one region are covered by several maps and reads spanning a
/// boundary are stitched from two sub-reads.
pub const DEFAULT_REGION_SIZE: u64 = 1 << 32;

/// An open, memory-mapped archive file.
///
/// Regions are materialised lazily on first access, exactly once each,
/// and are plain read-only maps that can be shared freely across threads.
pub struct PhysicalArchive {
    path: PathBuf,
    file: File,
    len: u64,
    region_size: u64,
    regions: SingletonMap<usize, Mmap>,
    closed: AtomicBool,
}

impl std::fmt::Debug for PhysicalArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalArchive")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl PhysicalArchive {
    pub fn open(path: &Path) -> Result<Arc<Self>, ZipError> {
        Self::open_with_region_size(path, DEFAULT_REGION_SIZE)
    }

    /// [`PhysicalArchive::open`] with a custom region bound, so boundary
    /// stitching can be exercised without multi-gigabyte fixtures.
    pub fn open_with_region_size(path: &Path, region_size: u64) -> Result<Arc<Self>, ZipError> {
        assert!(region_size > 0, "region size must be nonzero");
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(ZipError::EmptyArchive {
                path: path.to_path_buf(),
            });
        }
        tracing::debug!(target: "quarry.zip", path = %path.display(), len, "opened archive");
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            file,
            len,
            region_size,
            regions: SingletonMap::new(),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A slice covering the whole file.
    pub fn whole(self: &Arc<Self>) -> ArchiveSlice {
        ArchiveSlice {
            archive: Arc::clone(self),
            start: 0,
            len: self.len,
        }
    }

    /// Drop all mapped regions and refuse further reads.
    ///
    /// Readers holding a region keep it mapped until they finish; new
    /// reads fail with [`ZipError::Closed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let regions = self.regions.drain();
            tracing::debug!(
                target: "quarry.zip",
                path = %self.path.display(),
                regions = regions.len(),
                "closed archive"
            );
        }
    }

    fn region(&self, index: usize) -> Result<Arc<Mmap>, ZipError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ZipError::Closed {
                path: self.path.clone(),
            });
        }
        self.regions
            .get_or_create(index, || {
                let offset = index as u64 * self.region_size;
                let len = (self.len - offset).min(self.region_size) as usize;
                // Safety: the file is opened read-only and the map is never
                // written through; concurrent external truncation of an
                // archive being scanned is outside the supported model.
                let mmap = unsafe { MmapOptions::new().offset(offset).len(len).map(&self.file)? };
                Ok::<_, ZipError>(mmap)
            })
            .map_err(|err| match err {
                SingletonError::Init(err) => err,
                SingletonError::Poisoned => ZipError::RegionUnavailable {
                    path: self.path.clone(),
                    index,
                },
            })
    }
}

/// `(archive, start, length)`: a logical sub-archive inside a physical
/// file. Nested archives stored without compression are read in place
/// through a slice at the entry's data offset.
#[derive(Clone)]
pub struct ArchiveSlice {
    archive: Arc<PhysicalArchive>,
    start: u64,
    len: u64,
}

impl std::fmt::Debug for ArchiveSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSlice")
            .field("path", &self.archive.path)
            .field("start", &self.start)
            .field("len", &self.len)
            .finish()
    }
}

impl PartialEq for ArchiveSlice {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.archive, &other.archive)
            && self.start == other.start
            && self.len == other.len
    }
}

impl Eq for ArchiveSlice {}

impl ArchiveSlice {
    /// A sub-slice; `start` is relative to this slice.
    pub fn slice(&self, start: u64, len: u64) -> Result<Self, ZipError> {
        if start.checked_add(len).is_none() || start + len > self.len {
            return Err(self.eof(start, len));
        }
        Ok(Self {
            archive: Arc::clone(&self.archive),
            start: self.start + start,
            len,
        })
    }

    pub fn archive(&self) -> &Arc<PhysicalArchive> {
        &self.archive
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.archive.path
    }

    fn eof(&self, offset: u64, len: u64) -> ZipError {
        ZipError::UnexpectedEof {
            path: self.archive.path.clone(),
            offset,
            len,
            slice_len: self.len,
        }
    }
}

/// Positional reads over an [`ArchiveSlice`].
///
/// All offsets are slice-relative; reads that straddle a region boundary
/// are stitched from two sub-reads. Multi-byte fields go through unsigned
/// 64-bit intermediates, so offsets and sizes above 2 GiB survive intact.
#[derive(Clone, Debug)]
pub struct SliceReader {
    slice: ArchiveSlice,
}

impl SliceReader {
    pub fn new(slice: ArchiveSlice) -> Self {
        Self { slice }
    }

    pub fn slice(&self) -> &ArchiveSlice {
        &self.slice
    }

    pub fn len(&self) -> u64 {
        self.slice.len
    }

    pub fn is_empty(&self) -> bool {
        self.slice.len == 0
    }

    /// Fill `buf` from `offset`, failing on any short read.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), ZipError> {
        let len = buf.len() as u64;
        if offset.checked_add(len).is_none() || offset + len > self.slice.len {
            return Err(self.slice.eof(offset, len));
        }

        let archive = &self.slice.archive;
        let mut absolute = self.slice.start + offset;
        let mut buf = buf;
        while !buf.is_empty() {
            let index = (absolute / archive.region_size) as usize;
            let within = (absolute % archive.region_size) as usize;
            let region = archive.region(index)?;
            let n = buf.len().min(region.len() - within);
            buf[..n].copy_from_slice(&region[within..within + n]);
            buf = &mut buf[n..];
            absolute += n as u64;
        }
        Ok(())
    }

    pub fn u16_le(&self, offset: u64) -> Result<u16, ZipError> {
        let mut b = [0u8; 2];
        self.read_at(offset, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn u32_le(&self, offset: u64) -> Result<u32, ZipError> {
        let mut b = [0u8; 4];
        self.read_at(offset, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn u64_le(&self, offset: u64) -> Result<u64, ZipError> {
        let mut b = [0u8; 8];
        self.read_at(offset, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    /// Read `len` bytes at `offset` as UTF-8, replacing invalid sequences.
    pub fn utf8(&self, offset: u64, len: usize) -> Result<String, ZipError> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
