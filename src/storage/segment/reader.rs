//! Segment Reader
//!
//! Reads single record bodies by seeking straight to their span.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::Result;
use crate::record::{Document, RecordIndexEntry};
use crate::AtlasError;

use super::{le_u32, ENTRY_HEADER_SIZE};

/// Positional reader over one segment file
pub struct SpanReader {
    file: BufReader<File>,
}

impl SpanReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            file: BufReader::new(File::open(path)?),
        })
    }

    /// Read the raw body bytes of an entry, checking them against the
    /// entry header and its checksum
    pub fn read_body(&mut self, entry: &RecordIndexEntry) -> Result<Vec<u8>> {
        let key = entry.key.as_bytes();
        let header_start = entry
            .byte_start
            .checked_sub(ENTRY_HEADER_SIZE + key.len() as u64)
            .ok_or_else(|| AtlasError::corrupt(&entry.key, "span starts inside the file header"))?;

        // Seek directly to the entry header
        self.file.seek(SeekFrom::Start(header_start))?;

        let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
        self.read_exact_or_corrupt(&mut header, &entry.key)?;
        let key_len = le_u32(&header[0..4]) as usize;
        let body_len = le_u32(&header[4..8]) as u64;
        let expected_crc = le_u32(&header[8..12]);

        if key_len != key.len() || body_len != entry.len() {
            return Err(AtlasError::corrupt(
                &entry.key,
                "entry header does not match the indexed span",
            ));
        }

        let mut stored_key = vec![0u8; key_len];
        self.read_exact_or_corrupt(&mut stored_key, &entry.key)?;
        if stored_key != key {
            return Err(AtlasError::corrupt(&entry.key, "span belongs to a different key"));
        }

        let mut body = vec![0u8; body_len as usize];
        self.read_exact_or_corrupt(&mut body, &entry.key)?;

        let actual_crc = crc32fast::hash(&body);
        if actual_crc != expected_crc {
            return Err(AtlasError::corrupt(
                &entry.key,
                format!(
                    "checksum mismatch: expected {:08x}, got {:08x}",
                    expected_crc, actual_crc
                ),
            ));
        }

        Ok(body)
    }

    /// Read and parse the body of an entry
    pub fn read_document(&mut self, entry: &RecordIndexEntry) -> Result<Document> {
        let body = self.read_body(entry)?;
        serde_json::from_slice(&body).map_err(|e| AtlasError::corrupt(&entry.key, e))
    }

    fn read_exact_or_corrupt(&mut self, buf: &mut [u8], key: &str) -> Result<()> {
        match self.file.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(AtlasError::corrupt(key, "span runs past the end of the file"))
            }
            Err(e) => Err(e.into()),
        }
    }
}
