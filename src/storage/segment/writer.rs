//! Segment Writer
//!
//! Writes length-prefixed entries to a new segment file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::AtlasError;

use super::{ENTRY_HEADER_SIZE, HEADER_SIZE, MAGIC, MAX_KEY_LEN, VERSION};

/// Builder for a segment file
pub struct SegmentWriter {
    /// Output file path
    path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Current write position
    offset: u64,
    /// Number of entries written
    entry_count: u64,
}

impl SegmentWriter {
    /// Create (or truncate) a segment file and write its header
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            offset: HEADER_SIZE,
            entry_count: 0,
        })
    }

    /// Append one entry, returning the `[start, end)` span of its body
    pub fn append(&mut self, key: &str, body: &[u8]) -> Result<(u64, u64)> {
        let key_bytes = key.as_bytes();
        if key_bytes.len() > MAX_KEY_LEN as usize {
            return Err(AtlasError::Encode {
                key: key.to_string(),
                reason: format!("key is {} bytes, limit is {}", key_bytes.len(), MAX_KEY_LEN),
            });
        }
        let body_len = u32::try_from(body.len()).map_err(|_| AtlasError::Encode {
            key: key.to_string(),
            reason: format!("body of {} bytes does not fit a segment entry", body.len()),
        })?;

        // [key_len(4)][body_len(4)][crc(4)][key][body]
        self.writer.write_all(&(key_bytes.len() as u32).to_le_bytes())?;
        self.writer.write_all(&body_len.to_le_bytes())?;
        self.writer.write_all(&crc32fast::hash(body).to_le_bytes())?;
        self.writer.write_all(key_bytes)?;
        self.writer.write_all(body)?;

        let start = self.offset + ENTRY_HEADER_SIZE + key_bytes.len() as u64;
        let end = start + body.len() as u64;
        self.offset = end;
        self.entry_count += 1;

        Ok((start, end))
    }

    /// Number of entries appended so far
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Flush, fsync and close the file; returns its size in bytes
    pub fn finish(self) -> Result<u64> {
        let file = self.writer.into_inner().map_err(|e| {
            AtlasError::store_write(&self.path, format!("Failed to flush segment: {}", e.error()))
        })?;
        file.sync_all()?;
        Ok(self.offset)
    }
}
