//! Segment Scanner
//!
//! Sequential walk over entry headers, building index entries without
//! reading record bodies.

use std::fs::File;
use std::io::{BufReader, Read};

use crate::error::Result;
use crate::record::{FileHandle, RecordIndexEntry};
use crate::AtlasError;

use super::{le_u32, ENTRY_HEADER_SIZE, HEADER_SIZE, MAGIC, MAX_KEY_LEN, VERSION};

/// One step of a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scanned {
    /// A well-formed entry
    Entry(RecordIndexEntry),

    /// An entry that had to be skipped
    Malformed { offset: u64, reason: String },
}

/// Iterator over the entries of a segment file in file order
pub struct SegmentScanner {
    file: BufReader<File>,
    /// Handle stamped into every produced index entry
    handle: FileHandle,
    file_len: u64,
    /// Offset of the next entry header
    offset: u64,
    /// Stream ended in the middle of an entry
    truncated: bool,
    done: bool,
}

impl SegmentScanner {
    /// Open a segment file and validate its header
    ///
    /// A zero-length file is an empty segment.
    pub fn open(handle: FileHandle) -> Result<Self> {
        let file = File::open(&handle)?;
        let file_len = file.metadata()?.len();
        let mut file = BufReader::new(file);

        if file_len == 0 {
            return Ok(Self {
                file,
                handle,
                file_len,
                offset: 0,
                truncated: false,
                done: true,
            });
        }

        let name = handle.display().to_string();
        if file_len < HEADER_SIZE {
            return Err(AtlasError::corrupt(name, "file is shorter than the segment header"));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(AtlasError::corrupt(
                name,
                format!("invalid segment magic: expected ATDS, got {:?}", &header[0..4]),
            ));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(AtlasError::corrupt(
                name,
                format!("unsupported segment version: {}", version),
            ));
        }

        Ok(Self {
            file,
            handle,
            file_len,
            offset: HEADER_SIZE,
            truncated: false,
            done: false,
        })
    }

    /// Whether the scan stopped at a partially written trailing entry
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn read_next(&mut self) -> Result<Option<Scanned>> {
        if self.done || self.offset >= self.file_len {
            return Ok(None);
        }

        let entry_offset = self.offset;
        if self.file_len - entry_offset < ENTRY_HEADER_SIZE {
            return Ok(self.stop_truncated());
        }

        // Read entry header
        let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
        self.file.read_exact(&mut header)?;
        let key_len = le_u32(&header[0..4]);
        let body_len = le_u32(&header[4..8]) as u64;

        if key_len > MAX_KEY_LEN {
            // Boundary is lost; nothing after this point can be trusted
            self.done = true;
            return Ok(Some(Scanned::Malformed {
                offset: entry_offset,
                reason: format!("key length {} exceeds limit {}", key_len, MAX_KEY_LEN),
            }));
        }

        let byte_start = entry_offset + ENTRY_HEADER_SIZE + key_len as u64;
        let byte_end = byte_start + body_len;
        if byte_end > self.file_len {
            return Ok(self.stop_truncated());
        }

        // Read key, skip body
        let mut key = vec![0u8; key_len as usize];
        self.file.read_exact(&mut key)?;
        self.file.seek_relative(body_len as i64)?;
        self.offset = byte_end;

        match String::from_utf8(key) {
            Ok(key) => Ok(Some(Scanned::Entry(RecordIndexEntry::new(
                key,
                byte_start,
                byte_end,
                FileHandle::clone(&self.handle),
            )))),
            Err(_) => Ok(Some(Scanned::Malformed {
                offset: entry_offset,
                reason: "key is not valid UTF-8".to_string(),
            })),
        }
    }

    /// A partial trailing entry counts as never written
    fn stop_truncated(&mut self) -> Option<Scanned> {
        tracing::debug!(
            path = %self.handle.display(),
            offset = self.offset,
            "Discarding truncated trailing segment entry"
        );
        self.truncated = true;
        self.done = true;
        None
    }
}

impl Iterator for SegmentScanner {
    type Item = Result<Scanned>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(scanned)) => Some(Ok(scanned)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
