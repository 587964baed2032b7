//! Memory-mapped ZIP archive access.
//!
//! Archives are opened read-only and mapped as a sequence of bounded
//! regions so files larger than a single mappable range still work. The
//! central directory is parsed once per archive (ZIP64 aware, with DOS
//! guards); entry data is reached through lazily-validated local headers
//! and streamed out either straight from the map (stored entries) or
//! through a pooled raw-deflate decompressor.
//!
//! Structural defects (missing end-of-central-directory, bad signatures,
//! multi-disk archives, oversized entry counts) fail the whole archive;
//! defects confined to one entry (encryption, unsupported compression,
//! malformed extra fields) skip that entry and keep the directory scan
//! going.

mod archive;
mod directory;
mod entry;
mod manifest;
mod mine;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use archive::{ArchiveSlice, PhysicalArchive, SliceReader, DEFAULT_REGION_SIZE};
pub use directory::{ArchiveEntry, Compression, LogicalArchive};
pub use entry::{EntryReader, Inflater};
pub use manifest::ManifestInfo;
pub use mine::{MinedLayout, VisibleEntry, BASE_VERSION, CLASSES_PREFIXES, LIB_PREFIXES};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZipError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}: empty file is not an archive", .path.display())]
    EmptyArchive { path: PathBuf },

    #[error("{}: archive is closed", .path.display())]
    Closed { path: PathBuf },

    #[error("{}: mapping region {} failed for an earlier reader", .path.display(), .index)]
    RegionUnavailable { path: PathBuf, index: usize },

    #[error(
        "{}: read of {} bytes at offset {} exceeds slice of {} bytes",
        .path.display(), .len, .offset, .slice_len
    )]
    UnexpectedEof {
        path: PathBuf,
        offset: u64,
        len: u64,
        slice_len: u64,
    },

    #[error("{}: end of central directory record not found", .path.display())]
    MissingEndOfCentralDirectory { path: PathBuf },

    #[error("{}: multi-disk archives are not supported", .path.display())]
    MultiDisk { path: PathBuf },

    #[error("{}: bad ZIP64 end of central directory record at offset {}", .path.display(), .offset)]
    BadZip64Record { path: PathBuf, offset: u64 },

    #[error(
        "{}: central directory claims {} entries but at most {} fit in {} bytes",
        .path.display(), .claimed, .max, .cd_size
    )]
    TooManyEntries {
        path: PathBuf,
        claimed: u64,
        max: u64,
        cd_size: u64,
    },

    #[error("{}: bad central directory record signature at offset {}", .path.display(), .offset)]
    BadCentralRecord { path: PathBuf, offset: u64 },

    #[error("{}: entry {}: local header offset {} is out of range", .path.display(), .entry, .offset)]
    LocalHeaderOutOfRange {
        path: PathBuf,
        entry: String,
        offset: u64,
    },

    #[error("{}: entry {}: bad local header signature", .path.display(), .entry)]
    BadLocalHeader { path: PathBuf, entry: String },

    #[error("{}: entry {}: inflate failed: {}", .path.display(), .entry, .message)]
    Inflate {
        path: PathBuf,
        entry: String,
        message: String,
    },
}
