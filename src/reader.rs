//! Split-aware record reader.
//!
//! Each shard scans its own byte range for record start tags, but once a record has started
//! it is read to its end tag even when that lies past the shard boundary. The neighbouring
//! shard never sees a complete start tag for that record, so every record is emitted by
//! exactly one shard no matter where the boundaries fall.

use crate::config::ReaderConfig;
use crate::models::{RawRecord, Shard};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// A seekable byte stream that every shard worker can open independently.
pub trait ByteSource: Sync {
    type Stream: Read + Seek;

    fn open(&self) -> io::Result<Self::Stream>;

    fn byte_len(&self) -> io::Result<u64>;
}

pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    type Stream = File;

    fn open(&self) -> io::Result<File> {
        File::open(&self.path)
    }

    fn byte_len(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

/// Shared in-memory bytes; cheap to open once per shard.
#[derive(Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    type Stream = Cursor<Arc<[u8]>>;

    fn open(&self) -> io::Result<Self::Stream> {
        Ok(Cursor::new(Arc::clone(&self.data)))
    }

    fn byte_len(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Looking for a start tag; bytes are discarded and the shard end is honoured.
    Seeking,
    /// Inside a record; bytes are buffered and the shard end is ignored.
    Capturing,
}

pub struct SplitReader<R> {
    inner: BufReader<R>,
    start_tag: Vec<u8>,
    end_tag: Vec<u8>,
    end: u64,
    pos: u64,
    buf: Vec<u8>,
    done: bool,
}

impl<R: Read + Seek> SplitReader<R> {
    pub fn new(inner: R, shard: &Shard, config: &ReaderConfig) -> io::Result<Self> {
        let mut inner = BufReader::with_capacity(config.buffer_size, inner);
        inner.seek(SeekFrom::Start(shard.start))?;

        Ok(Self {
            inner,
            start_tag: config.start_tag.as_bytes().to_vec(),
            end_tag: config.end_tag.as_bytes().to_vec(),
            end: shard.end,
            pos: shard.start,
            buf: Vec::new(),
            done: false,
        })
    }

    /// Current stream offset; monotonic while the shard is read.
    pub fn position(&self) -> u64 {
        self.pos
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        loop {
            let b = match self.inner.fill_buf() {
                Ok([]) => return Ok(None),
                Ok(available) => available[0],
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.inner.consume(1);
            self.pos += 1;
            return Ok(Some(b));
        }
    }

    /// Scans for the delimiter of `mode`. Returns false at end of stream, or in seeking
    /// mode once the shard end is reached with no partial match in progress.
    fn scan(&mut self, mode: Mode) -> io::Result<bool> {
        let tag_len = match mode {
            Mode::Seeking => self.start_tag.len(),
            Mode::Capturing => self.end_tag.len(),
        };
        let mut matched = 0;

        loop {
            let b = match self.next_byte()? {
                Some(b) => b,
                None => return Ok(false),
            };

            if mode == Mode::Capturing {
                self.buf.push(b);
            }

            let expected = match mode {
                Mode::Seeking => self.start_tag[matched],
                Mode::Capturing => self.end_tag[matched],
            };

            // Reset without re-testing `b`: a start tag beginning exactly at the shard end
            // must stay invisible to this shard.
            if b == expected {
                matched += 1;
                if matched >= tag_len {
                    return Ok(true);
                }
            } else {
                matched = 0;
            }

            if mode == Mode::Seeking && matched == 0 && self.pos >= self.end {
                return Ok(false);
            }
        }
    }

    fn read_record(&mut self) -> io::Result<Option<RawRecord>> {
        if self.pos >= self.end {
            return Ok(None);
        }
        if !self.scan(Mode::Seeking)? {
            trace!(pos = self.pos, "No start tag before shard end");
            return Ok(None);
        }

        self.buf.clear();
        self.buf.extend_from_slice(&self.start_tag);
        if !self.scan(Mode::Capturing)? {
            trace!(
                pos = self.pos,
                dropped = self.buf.len(),
                "Stream ended inside a record"
            );
            self.buf.clear();
            return Ok(None);
        }

        Ok(Some(RawRecord {
            bytes: std::mem::take(&mut self.buf),
            end_offset: self.pos,
        }))
    }
}

impl<R: Read + Seek> Iterator for SplitReader<R> {
    type Item = io::Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Opens a fresh stream on `source` positioned at the start of `shard`.
pub fn read_shard<S: ByteSource>(
    source: &S,
    shard: &Shard,
    config: &ReaderConfig,
) -> io::Result<SplitReader<S::Stream>> {
    SplitReader::new(source.open()?, shard, config)
}
