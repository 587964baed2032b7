//! Programmatic ZIP construction for tests.
//!
//! Deliberately small: just enough of the format to build stored and
//! deflated entries, directory records, per-entry ZIP64 extra fields,
//! ZIP64 end-of-central-directory records (with optionally inconsistent
//! counts) and self-extracting prefixes.

use std::io::Write as _;
use std::path::Path;

use flate2::write::DeflateEncoder;

struct FixtureEntry {
    name: String,
    method: u16,
    flags: u16,
    crc32: u32,
    data: Vec<u8>,
    uncompressed_len: u32,
    zip64_extra: bool,
}

#[derive(Default)]
pub struct ZipBuilder {
    prefix: Vec<u8>,
    entries: Vec<FixtureEntry>,
    force_zip64: bool,
    eocd_count: Option<u16>,
    zip64_count: Option<u64>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend raw bytes before the first local header, as a
    /// self-extracting stub would.
    pub fn prefix(mut self, bytes: &[u8]) -> Self {
        self.prefix.extend_from_slice(bytes);
        self
    }

    pub fn stored(mut self, name: &str, data: &[u8]) -> Self {
        self.entries.push(FixtureEntry {
            name: name.to_string(),
            method: 0,
            flags: 0,
            crc32: crc32(data),
            data: data.to_vec(),
            uncompressed_len: data.len() as u32,
            zip64_extra: false,
        });
        self
    }

    pub fn deflated(mut self, name: &str, data: &[u8]) -> Self {
        let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).expect("in-memory deflate");
        let compressed = encoder.finish().expect("in-memory deflate");
        self.entries.push(FixtureEntry {
            name: name.to_string(),
            method: 8,
            flags: 0,
            crc32: crc32(data),
            data: compressed,
            uncompressed_len: data.len() as u32,
            zip64_extra: false,
        });
        self
    }

    /// A directory record (name ends in `/`, no data).
    pub fn directory(mut self, name: &str) -> Self {
        let name = format!("{}/", name.trim_end_matches('/'));
        self.entries.push(FixtureEntry {
            name,
            method: 0,
            flags: 0,
            crc32: 0,
            data: Vec::new(),
            uncompressed_len: 0,
            zip64_extra: false,
        });
        self
    }

    /// An entry flagged as encrypted (readers must skip it).
    pub fn encrypted(mut self, name: &str, data: &[u8]) -> Self {
        self.entries.push(FixtureEntry {
            name: name.to_string(),
            method: 0,
            flags: 0x0001,
            crc32: crc32(data),
            data: data.to_vec(),
            uncompressed_len: data.len() as u32,
            zip64_extra: false,
        });
        self
    }

    /// A stored entry whose central-directory sizes and offset are the
    /// 32-bit sentinel, with the real values in a ZIP64 extra field.
    pub fn stored_zip64(mut self, name: &str, data: &[u8]) -> Self {
        self.entries.push(FixtureEntry {
            name: name.to_string(),
            method: 0,
            flags: 0,
            crc32: crc32(data),
            data: data.to_vec(),
            uncompressed_len: data.len() as u32,
            zip64_extra: true,
        });
        self
    }

    pub fn manifest(self, text: &str) -> Self {
        self.deflated("META-INF/MANIFEST.MF", text.as_bytes())
    }

    /// Always emit a ZIP64 end-of-central-directory record and locator.
    pub fn force_zip64(mut self) -> Self {
        self.force_zip64 = true;
        self
    }

    /// Override the 16-bit entry counts written into the EOCD record.
    pub fn eocd_count(mut self, count: u16) -> Self {
        self.eocd_count = Some(count);
        self
    }

    /// Override the 64-bit entry counts written into the ZIP64 EOCD
    /// record (implies emitting one).
    pub fn zip64_count(mut self, count: u64) -> Self {
        self.zip64_count = Some(count);
        self.force_zip64 = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = self.prefix.clone();
        let zip_base = out.len();

        let mut local_offsets = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            local_offsets.push((out.len() - zip_base) as u64);
            le32(&mut out, 0x0403_4b50);
            le16(&mut out, 20); // version needed
            le16(&mut out, entry.flags);
            le16(&mut out, entry.method);
            le16(&mut out, 0); // mod time
            le16(&mut out, 0); // mod date
            le32(&mut out, entry.crc32);
            le32(&mut out, entry.data.len() as u32);
            le32(&mut out, entry.uncompressed_len);
            le16(&mut out, entry.name.len() as u16);
            le16(&mut out, 0); // extra len
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&entry.data);
        }

        let cd_offset = (out.len() - zip_base) as u64;
        for (entry, &local_offset) in self.entries.iter().zip(&local_offsets) {
            let mut extra = Vec::new();
            let (comp, uncomp, local) = if entry.zip64_extra {
                le16(&mut extra, 0x0001);
                le16(&mut extra, 24);
                le64(&mut extra, entry.uncompressed_len as u64);
                le64(&mut extra, entry.data.len() as u64);
                le64(&mut extra, local_offset);
                (0xFFFF_FFFF, 0xFFFF_FFFF, 0xFFFF_FFFF)
            } else {
                (
                    entry.data.len() as u32,
                    entry.uncompressed_len,
                    local_offset as u32,
                )
            };

            le32(&mut out, 0x0201_4b50);
            le16(&mut out, 20); // version made by
            le16(&mut out, 20); // version needed
            le16(&mut out, entry.flags);
            le16(&mut out, entry.method);
            le16(&mut out, 0); // mod time
            le16(&mut out, 0); // mod date
            le32(&mut out, entry.crc32);
            le32(&mut out, comp);
            le32(&mut out, uncomp);
            le16(&mut out, entry.name.len() as u16);
            le16(&mut out, extra.len() as u16);
            le16(&mut out, 0); // comment len
            le16(&mut out, 0); // disk number start
            le16(&mut out, 0); // internal attrs
            le32(&mut out, 0); // external attrs
            le32(&mut out, local);
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&extra);
        }
        let cd_size = (out.len() - zip_base) as u64 - cd_offset;

        let real_count = self.entries.len() as u64;
        let needs_zip64 = self.force_zip64 || real_count >= 0xFFFF;
        if needs_zip64 {
            let zip64_count = self.zip64_count.unwrap_or(real_count);
            let eocd64_offset = (out.len() - zip_base) as u64;
            le32(&mut out, 0x0606_4b50);
            le64(&mut out, 44); // size of remaining record
            le16(&mut out, 45); // version made by
            le16(&mut out, 45); // version needed
            le32(&mut out, 0); // this disk
            le32(&mut out, 0); // cd start disk
            le64(&mut out, zip64_count);
            le64(&mut out, zip64_count);
            le64(&mut out, cd_size);
            le64(&mut out, cd_offset);

            le32(&mut out, 0x0706_4b50);
            le32(&mut out, 0); // disk with zip64 eocd
            le64(&mut out, eocd64_offset);
            le32(&mut out, 1); // total disks
        }

        let eocd_count = self
            .eocd_count
            .unwrap_or_else(|| real_count.min(0xFFFF) as u16);
        le32(&mut out, 0x0605_4b50);
        le16(&mut out, 0); // this disk
        le16(&mut out, 0); // cd start disk
        le16(&mut out, eocd_count);
        le16(&mut out, eocd_count);
        le32(&mut out, cd_size.min(0xFFFF_FFFF) as u32);
        le32(&mut out, cd_offset.min(0xFFFF_FFFF) as u32);
        le16(&mut out, 0); // comment len

        out
    }

    pub fn write_to(self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.build())
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

fn le16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn le32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn le64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}
