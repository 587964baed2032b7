//! Central-directory parsing: EOCD discovery, ZIP64 handling and record
//! validation.

use std::sync::Arc;
use std::sync::OnceLock;

use quarry_sync::{Recycler, RecyclerHandle};

use crate::archive::{ArchiveSlice, PhysicalArchive, SliceReader};
use crate::entry::{EntryReader, Inflater, InflaterSource};
use crate::manifest::ManifestInfo;
use crate::mine::MinedLayout;
use crate::ZipError;

pub(crate) const LOC_SIG: u32 = 0x0403_4b50;
const CEN_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;
const EOCD64_SIG: u32 = 0x0606_4b50;
const EOCD64_LOCATOR_SIG: u32 = 0x0706_4b50;

const EOCD_MIN: u64 = 22;
const EOCD64_MIN: u64 = 56;
const EOCD64_LOCATOR_LEN: u64 = 20;
const CEN_MIN: u64 = 46;
const LOC_MIN: u64 = 30;
/// EOCD may be followed by a comment of at most this many bytes.
const MAX_COMMENT: u64 = 0xFFFF;

const U16_SENTINEL: u64 = 0xFFFF;
const U32_SENTINEL: u64 = 0xFFFF_FFFF;

/// Flag bit 0: the entry data is encrypted.
const FLAG_ENCRYPTED: u16 = 0x0001;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Deflated,
}

/// One file entry from the central directory.
///
/// Names are sanitised on parse: no leading `/`, no `.` or `..` segments.
/// The local-header offset is taken from the directory record; the data
/// offset behind it is validated lazily on first access.
#[derive(Debug)]
pub struct ArchiveEntry {
    name: String,
    method: Compression,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    data_offset: OnceLock<u64>,
}

impl ArchiveEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> Compression {
        self.method
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn local_header_offset(&self) -> u64 {
        self.local_header_offset
    }
}

/// A parsed archive: an [`ArchiveSlice`] plus its central directory and
/// manifest metadata. Entries keep central-directory order; the sorted,
/// masked view is produced by [`LogicalArchive::mined`].
pub struct LogicalArchive {
    reader: SliceReader,
    entries: Vec<ArchiveEntry>,
    manifest: ManifestInfo,
}

impl LogicalArchive {
    /// Parse the archive found in `slice`.
    pub fn open(slice: ArchiveSlice) -> Result<Self, ZipError> {
        let reader = SliceReader::new(slice);
        let entries = parse_central_directory(&reader)?;
        let mut archive = Self {
            reader,
            entries,
            manifest: ManifestInfo::default(),
        };
        // The manifest drives multi-release and nested-layout mining; a
        // manifest that fails to decompress degrades to defaults.
        let manifest_bytes = archive
            .entry("META-INF/MANIFEST.MF")
            .map(|entry| archive.read_entry(entry));
        match manifest_bytes {
            Some(Ok(bytes)) => archive.manifest = ManifestInfo::parse(&bytes),
            Some(Err(err)) => {
                tracing::debug!(
                    target: "quarry.zip",
                    path = %archive.reader.slice().path().display(),
                    error = %err,
                    "failed to read archive manifest"
                );
            }
            None => {}
        }
        Ok(archive)
    }

    /// Parse a physical archive from its start, skipping any
    /// self-extracting prefix in front of the first local header.
    pub fn open_physical(archive: &Arc<PhysicalArchive>) -> Result<Self, ZipError> {
        let whole = archive.whole();
        let reader = SliceReader::new(whole.clone());
        let start = find_zip_start(&reader)?;
        let slice = if start > 0 {
            tracing::debug!(
                target: "quarry.zip",
                path = %archive.path().display(),
                prefix = start,
                "skipping self-extracting prefix"
            );
            whole.slice(start, whole.len() - start)?
        } else {
            whole
        };
        Self::open(slice)
    }

    pub fn slice(&self) -> &ArchiveSlice {
        self.reader.slice()
    }

    pub fn manifest(&self) -> &ManifestInfo {
        &self.manifest
    }

    /// Entries in central-directory order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// True when some entry lives under the directory `prefix` (with or
    /// without an explicit directory record, which archives commonly
    /// omit).
    pub fn has_directory(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return true;
        }
        self.entries.iter().any(|e| {
            e.name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// The masked multi-release / framework-layout view of this archive.
    pub fn mined(&self, runtime_version: u32) -> MinedLayout {
        MinedLayout::build(self, runtime_version)
    }

    /// The byte range holding `entry`'s raw (possibly compressed) data.
    ///
    /// For stored entries this doubles as an in-place slice of the nested
    /// archive content.
    pub fn entry_data_slice(&self, entry: &ArchiveEntry) -> Result<ArchiveSlice, ZipError> {
        let offset = self.entry_data_offset(entry)?;
        self.reader.slice().slice(offset, entry.compressed_size)
    }

    /// Open a streaming reader over `entry`, constructing a fresh
    /// decompressor when one is needed.
    pub fn open_entry(&self, entry: &ArchiveEntry) -> Result<EntryReader, ZipError> {
        let data = self.entry_data_slice(entry)?;
        let inflater = match entry.method {
            Compression::Stored => None,
            Compression::Deflated => Some(InflaterSource::Owned(Inflater::new())),
        };
        Ok(EntryReader::new(data, entry, inflater))
    }

    /// Like [`LogicalArchive::open_entry`], but deflate state is acquired
    /// from `pool` and returns to it when the reader is dropped.
    pub fn open_entry_pooled(
        &self,
        entry: &ArchiveEntry,
        pool: &Recycler<Inflater>,
    ) -> Result<EntryReader, ZipError> {
        let data = self.entry_data_slice(entry)?;
        let inflater = match entry.method {
            Compression::Stored => None,
            Compression::Deflated => {
                let handle: RecyclerHandle<Inflater> =
                    pool.acquire_with(|| Ok::<_, ZipError>(Inflater::new()))?;
                Some(InflaterSource::Pooled(handle))
            }
        };
        Ok(EntryReader::new(data, entry, inflater))
    }

    /// Read `entry` fully into memory.
    pub fn read_entry(&self, entry: &ArchiveEntry) -> Result<Vec<u8>, ZipError> {
        use std::io::Read as _;

        let mut reader = self.open_entry(entry)?;
        // Pre-size from the directory, but cap the trust put in it.
        let hint = entry.uncompressed_size.min(1 << 20) as usize;
        let mut out = Vec::with_capacity(hint);
        reader.read_to_end(&mut out).map_err(|err| {
            err.downcast::<ZipError>()
                .unwrap_or_else(ZipError::Io)
        })?;
        Ok(out)
    }

    fn entry_data_offset(&self, entry: &ArchiveEntry) -> Result<u64, ZipError> {
        if let Some(offset) = entry.data_offset.get() {
            return Ok(*offset);
        }
        let local = entry.local_header_offset;
        if self.reader.u32_le(local)? != LOC_SIG {
            return Err(ZipError::BadLocalHeader {
                path: self.reader.slice().path().to_path_buf(),
                entry: entry.name.clone(),
            });
        }
        let name_len = self.reader.u16_le(local + 26)? as u64;
        let extra_len = self.reader.u16_le(local + 28)? as u64;
        let offset = local + LOC_MIN + name_len + extra_len;
        if offset
            .checked_add(entry.compressed_size)
            .is_none_or(|end| end > self.reader.len())
        {
            return Err(ZipError::LocalHeaderOutOfRange {
                path: self.reader.slice().path().to_path_buf(),
                entry: entry.name.clone(),
                offset: local,
            });
        }
        let _ = entry.data_offset.set(offset);
        Ok(offset)
    }
}

/// Scan the leading bytes for the first local-header signature. Archives
/// produced by self-extracting tools carry an executable stub before the
/// first entry; the logical archive starts at the marker.
pub(crate) fn find_zip_start(reader: &SliceReader) -> Result<u64, ZipError> {
    if reader.len() >= 4 && reader.u32_le(0)? == LOC_SIG {
        return Ok(0);
    }

    const NEEDLE: &[u8; 4] = b"PK\x03\x04";
    let len = reader.len();
    let mut chunk = vec![0u8; 64 * 1024];
    let mut pos = 0u64;
    while pos < len {
        let take = chunk.len().min((len - pos) as usize);
        reader.read_at(pos, &mut chunk[..take])?;
        if let Some(found) = chunk[..take]
            .windows(NEEDLE.len())
            .position(|window| window == NEEDLE)
        {
            return Ok(pos + found as u64);
        }
        if take < NEEDLE.len() {
            break;
        }
        // Overlap by three bytes so a marker straddling chunks is found.
        pos += (take - (NEEDLE.len() - 1)) as u64;
    }
    // No local header anywhere; let the EOCD search decide whether this
    // is an entry-less archive or not an archive at all.
    Ok(0)
}

struct DirectoryBounds {
    count: u64,
    cd_offset: u64,
    cd_size: u64,
}

fn locate_eocd(reader: &SliceReader) -> Result<u64, ZipError> {
    let len = reader.len();
    if len < EOCD_MIN {
        return Err(ZipError::MissingEndOfCentralDirectory {
            path: reader.slice().path().to_path_buf(),
        });
    }
    let mut pos = len - EOCD_MIN;
    let lowest = pos.saturating_sub(MAX_COMMENT);
    loop {
        if reader.u32_le(pos)? == EOCD_SIG {
            return Ok(pos);
        }
        if pos == lowest {
            return Err(ZipError::MissingEndOfCentralDirectory {
                path: reader.slice().path().to_path_buf(),
            });
        }
        pos -= 1;
    }
}

fn directory_bounds(reader: &SliceReader) -> Result<DirectoryBounds, ZipError> {
    let path = || reader.slice().path().to_path_buf();
    let eocd = locate_eocd(reader)?;

    let disk = reader.u16_le(eocd + 4)?;
    let cd_start_disk = reader.u16_le(eocd + 6)?;
    let disk_entries = reader.u16_le(eocd + 8)? as u64;
    let mut count = reader.u16_le(eocd + 10)? as u64;
    let mut cd_size = reader.u32_le(eocd + 12)? as u64;
    let mut cd_offset = reader.u32_le(eocd + 16)? as u64;

    if disk != 0 || cd_start_disk != 0 || disk_entries != count {
        return Err(ZipError::MultiDisk { path: path() });
    }

    let mut count_disagrees = false;
    if eocd >= EOCD64_LOCATOR_LEN && reader.u32_le(eocd - EOCD64_LOCATOR_LEN)? == EOCD64_LOCATOR_SIG
    {
        let locator = eocd - EOCD64_LOCATOR_LEN;
        let eocd64_disk = reader.u32_le(locator + 4)?;
        let total_disks = reader.u32_le(locator + 16)?;
        if eocd64_disk != 0 || total_disks > 1 {
            return Err(ZipError::MultiDisk { path: path() });
        }

        let eocd64 = reader.u64_le(locator + 8)?;
        if eocd64
            .checked_add(EOCD64_MIN)
            .is_none_or(|end| end > reader.len())
            || reader.u32_le(eocd64)? != EOCD64_SIG
        {
            return Err(ZipError::BadZip64Record {
                path: path(),
                offset: eocd64,
            });
        }
        if reader.u32_le(eocd64 + 16)? != 0 || reader.u32_le(eocd64 + 20)? != 0 {
            return Err(ZipError::MultiDisk { path: path() });
        }

        let disk_count64 = reader.u64_le(eocd64 + 24)?;
        let count64 = reader.u64_le(eocd64 + 32)?;
        let cd_size64 = reader.u64_le(eocd64 + 40)?;
        let cd_offset64 = reader.u64_le(eocd64 + 48)?;
        if disk_count64 != count64 {
            return Err(ZipError::MultiDisk { path: path() });
        }

        if count == U16_SENTINEL {
            count = count64;
        } else if count != count64 {
            // The two records disagree; the directory itself decides.
            count_disagrees = true;
        }
        if cd_size == U32_SENTINEL {
            cd_size = cd_size64;
        }
        if cd_offset == U32_SENTINEL {
            cd_offset = cd_offset64;
        }
    }

    if cd_offset
        .checked_add(cd_size)
        .is_none_or(|end| end > reader.len())
    {
        return Err(ZipError::BadCentralRecord {
            path: path(),
            offset: cd_offset,
        });
    }

    // DOS guard: a directory of `cd_size` bytes cannot hold more records
    // than `cd_size / 46`, and we never index more than 32 bits of them.
    let max = (cd_size / CEN_MIN).min(u32::MAX as u64);
    if count_disagrees {
        count = count_records(reader, cd_offset, cd_size, max)?;
        tracing::debug!(
            target: "quarry.zip",
            path = %reader.slice().path().display(),
            count,
            "entry counts disagree between EOCD and ZIP64 EOCD; counted records manually"
        );
    }
    if count > max {
        return Err(ZipError::TooManyEntries {
            path: path(),
            claimed: count,
            max,
            cd_size,
        });
    }

    Ok(DirectoryBounds {
        count,
        cd_offset,
        cd_size,
    })
}

/// Walk the central directory and count the records actually present.
fn count_records(
    reader: &SliceReader,
    cd_offset: u64,
    cd_size: u64,
    max: u64,
) -> Result<u64, ZipError> {
    let end = cd_offset + cd_size;
    let mut pos = cd_offset;
    let mut count = 0u64;
    while pos + CEN_MIN <= end && count < max {
        if reader.u32_le(pos)? != CEN_SIG {
            break;
        }
        let name_len = reader.u16_le(pos + 28)? as u64;
        let extra_len = reader.u16_le(pos + 30)? as u64;
        let comment_len = reader.u16_le(pos + 32)? as u64;
        pos += CEN_MIN + name_len + extra_len + comment_len;
        count += 1;
    }
    Ok(count)
}

fn parse_central_directory(reader: &SliceReader) -> Result<Vec<ArchiveEntry>, ZipError> {
    let bounds = directory_bounds(reader)?;
    let end = bounds.cd_offset + bounds.cd_size;
    let path = reader.slice().path();

    let mut entries = Vec::with_capacity(bounds.count.min(4096) as usize);
    let mut pos = bounds.cd_offset;
    for _ in 0..bounds.count {
        if pos + CEN_MIN > end {
            return Err(ZipError::BadCentralRecord {
                path: path.to_path_buf(),
                offset: pos,
            });
        }
        if reader.u32_le(pos)? != CEN_SIG {
            return Err(ZipError::BadCentralRecord {
                path: path.to_path_buf(),
                offset: pos,
            });
        }

        let flags = reader.u16_le(pos + 8)?;
        let method = reader.u16_le(pos + 10)?;
        let mut compressed = reader.u32_le(pos + 20)? as u64;
        let mut uncompressed = reader.u32_le(pos + 24)? as u64;
        let name_len = reader.u16_le(pos + 28)? as u64;
        let extra_len = reader.u16_le(pos + 30)? as u64;
        let comment_len = reader.u16_le(pos + 32)? as u64;
        let mut local = reader.u32_le(pos + 42)? as u64;
        let record_end = pos + CEN_MIN + name_len + extra_len + comment_len;
        if record_end > end {
            return Err(ZipError::BadCentralRecord {
                path: path.to_path_buf(),
                offset: pos,
            });
        }

        let raw_name = reader.utf8(pos + CEN_MIN, name_len as usize)?;
        let is_dir = raw_name.ends_with('/');

        if compressed == U32_SENTINEL || uncompressed == U32_SENTINEL || local == U32_SENTINEL {
            apply_zip64_extra(
                reader,
                pos + CEN_MIN + name_len,
                extra_len,
                &mut uncompressed,
                &mut compressed,
                &mut local,
            )?;
        }

        let skip_reason = if is_dir {
            None // directory records are dropped silently
        } else if flags & FLAG_ENCRYPTED != 0 {
            Some("encrypted entry")
        } else if method != METHOD_STORED && method != METHOD_DEFLATED {
            Some("unsupported compression method")
        } else if compressed == U32_SENTINEL || uncompressed == U32_SENTINEL || local == U32_SENTINEL
        {
            Some("unresolved zip64 field")
        } else if local.checked_add(LOC_MIN).is_none_or(|e| e > reader.len()) {
            Some("local header offset out of range")
        } else {
            None
        };

        if let Some(reason) = skip_reason {
            tracing::debug!(
                target: "quarry.zip",
                path = %path.display(),
                entry = %raw_name,
                reason,
                "skipping archive entry"
            );
        } else if !is_dir {
            let name = sanitize_entry_name(&raw_name);
            if !name.is_empty() {
                entries.push(ArchiveEntry {
                    name,
                    method: if method == METHOD_STORED {
                        Compression::Stored
                    } else {
                        Compression::Deflated
                    },
                    compressed_size: compressed,
                    uncompressed_size: uncompressed,
                    local_header_offset: local,
                    data_offset: OnceLock::new(),
                });
            }
        }

        pos = record_end;
    }

    Ok(entries)
}

/// Replace 32-bit sentinel fields from a ZIP64 extended-information extra
/// field (tag 1). The field carries, in order, only the values whose
/// 32-bit counterparts are `0xFFFFFFFF`. Malformed extra data is ignored;
/// unresolved sentinels make the caller skip the entry.
fn apply_zip64_extra(
    reader: &SliceReader,
    extra_start: u64,
    extra_len: u64,
    uncompressed: &mut u64,
    compressed: &mut u64,
    local: &mut u64,
) -> Result<(), ZipError> {
    let end = extra_start + extra_len;
    let mut pos = extra_start;
    while pos + 4 <= end {
        let tag = reader.u16_le(pos)?;
        let size = reader.u16_le(pos + 2)? as u64;
        let field_end = pos + 4 + size;
        if field_end > end {
            break;
        }
        if tag == 0x0001 {
            let mut q = pos + 4;
            if *uncompressed == U32_SENTINEL && q + 8 <= field_end {
                *uncompressed = reader.u64_le(q)?;
                q += 8;
            }
            if *compressed == U32_SENTINEL && q + 8 <= field_end {
                *compressed = reader.u64_le(q)?;
                q += 8;
            }
            if *local == U32_SENTINEL && q + 8 <= field_end {
                *local = reader.u64_le(q)?;
            }
            break;
        }
        pos = field_end;
    }
    Ok(())
}

/// Strip a leading `/` and drop `.`/`..` segments so no entry can name a
/// path outside the archive root.
fn sanitize_entry_name(raw: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            continue;
        }
        segments.push(segment);
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::sanitize_entry_name;

    #[test]
    fn entry_names_cannot_traverse() {
        assert_eq!(sanitize_entry_name("/abs/path"), "abs/path");
        assert_eq!(sanitize_entry_name("./a/b"), "a/b");
        assert_eq!(sanitize_entry_name("../a/b"), "a/b");
        assert_eq!(sanitize_entry_name("a/./b"), "a/b");
        assert_eq!(sanitize_entry_name("a/../b"), "a/b");
        assert_eq!(sanitize_entry_name("a//b"), "a/b");
        assert_eq!(sanitize_entry_name("../../.."), "");
    }
}
