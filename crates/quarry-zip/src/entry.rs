//! Streaming entry readers.

use std::io;

use flate2::{Decompress, FlushDecompress, Status};
use quarry_sync::{Recyclable, RecyclerHandle};

use crate::archive::{ArchiveSlice, SliceReader};
use crate::directory::{ArchiveEntry, Compression};
use crate::ZipError;

const INPUT_CHUNK: usize = 64 * 1024;

/// Raw-deflate decompression state, pooled per archive so each worker
/// reuses one allocation instead of re-creating zlib state per entry.
pub struct Inflater {
    raw: Decompress,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            // Entry data is a bare deflate stream with no zlib header.
            raw: Decompress::new(false),
        }
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl Recyclable for Inflater {
    fn recycle(&mut self) {
        self.raw.reset(false);
    }
}

/// Where an [`EntryReader`]'s decompressor came from.
pub enum InflaterSource {
    Owned(Inflater),
    Pooled(RecyclerHandle<Inflater>),
}

impl InflaterSource {
    fn raw(&mut self) -> &mut Decompress {
        match self {
            InflaterSource::Owned(inflater) => &mut inflater.raw,
            InflaterSource::Pooled(handle) => &mut handle.raw,
        }
    }
}

enum ReaderState {
    Stored,
    Deflated {
        inflater: InflaterSource,
        input: Box<[u8]>,
        input_len: usize,
        input_pos: usize,
        finished: bool,
    },
}

/// A read-only stream over one entry's decompressed bytes.
///
/// Stored entries read straight out of the mapped regions; deflated
/// entries run chunks of mapped input through an [`Inflater`]. Reads cope
/// with region-boundary crossings and partial output fills; dropping the
/// reader releases (or repools) the decompressor, so close is implicit
/// and idempotent.
pub struct EntryReader {
    data: SliceReader,
    entry_name: String,
    uncompressed_size: u64,
    compressed_pos: u64,
    produced: u64,
    state: ReaderState,
}

impl EntryReader {
    pub(crate) fn new(
        data: ArchiveSlice,
        entry: &ArchiveEntry,
        inflater: Option<InflaterSource>,
    ) -> Self {
        let state = match (entry.method(), inflater) {
            (Compression::Stored, _) => ReaderState::Stored,
            (Compression::Deflated, Some(inflater)) => ReaderState::Deflated {
                inflater,
                input: vec![0u8; INPUT_CHUNK].into_boxed_slice(),
                input_len: 0,
                input_pos: 0,
                finished: false,
            },
            (Compression::Deflated, None) => {
                unreachable!("deflated entries are always opened with an inflater")
            }
        };
        Self {
            data: SliceReader::new(data),
            entry_name: entry.name().to_string(),
            uncompressed_size: entry.uncompressed_size(),
            compressed_pos: 0,
            produced: 0,
            state,
        }
    }

    /// Decompressed bytes not yet read. A hint, in the same way
    /// `available` is on a standard input stream.
    pub fn remaining(&self) -> u64 {
        self.uncompressed_size.saturating_sub(self.produced)
    }

}

impl io::Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match &mut self.state {
            ReaderState::Stored => {
                let remaining = self.data.len() - self.compressed_pos;
                let n = (buf.len() as u64).min(remaining) as usize;
                if n == 0 {
                    return Ok(0);
                }
                self.data
                    .read_at(self.compressed_pos, &mut buf[..n])
                    .map_err(io::Error::other)?;
                self.compressed_pos += n as u64;
                self.produced += n as u64;
                Ok(n)
            }
            ReaderState::Deflated {
                inflater,
                input,
                input_len,
                input_pos,
                finished,
            } => {
                if *finished {
                    return Ok(0);
                }
                loop {
                    if *input_pos == *input_len && self.compressed_pos < self.data.len() {
                        let take =
                            input.len().min((self.data.len() - self.compressed_pos) as usize);
                        self.data
                            .read_at(self.compressed_pos, &mut input[..take])
                            .map_err(io::Error::other)?;
                        self.compressed_pos += take as u64;
                        *input_len = take;
                        *input_pos = 0;
                    }

                    let raw = inflater.raw();
                    let before_in = raw.total_in();
                    let before_out = raw.total_out();
                    let status = raw
                        .decompress(&input[*input_pos..*input_len], buf, FlushDecompress::None)
                        .map_err(|err| {
                            let message = err.to_string();
                            io::Error::other(ZipError::Inflate {
                                path: self.data.slice().path().to_path_buf(),
                                entry: self.entry_name.clone(),
                                message,
                            })
                        })?;
                    *input_pos += (raw.total_in() - before_in) as usize;
                    let written = (raw.total_out() - before_out) as usize;
                    self.produced += written as u64;

                    match status {
                        Status::StreamEnd => {
                            *finished = true;
                            return Ok(written);
                        }
                        _ if written > 0 => return Ok(written),
                        Status::Ok => continue,
                        Status::BufError => {
                            if *input_pos == *input_len
                                && self.compressed_pos >= self.data.len()
                            {
                                return Err(io::Error::other(ZipError::Inflate {
                                    path: self.data.slice().path().to_path_buf(),
                                    entry: self.entry_name.clone(),
                                    message: "truncated deflate stream".to_string(),
                                }));
                            }
                            continue;
                        }
                    }
                }
            }
        }
    }
}
