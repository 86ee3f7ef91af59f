use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;
use crate::record::{self, Record};

/// An append-only segment file. Segments are named by the decimal form of
/// their id and live directly under the store directory. Bytes are never
/// rewritten in place: writes go to the end of the file, reads seek to an
/// explicit offset.
#[derive(Debug)]
pub struct Segment {
    id: u64,
    path: PathBuf,
    file: File,
    opened_at: SystemTime,
}

impl Segment {
    /// Opens the segment with the given id under dir, creating it if
    /// absent.
    pub fn open(dir: &Path, id: u64) -> Result<Self> {
        let path = dir.join(id.to_string());

        let mut options = File::options();
        options.create(true).append(true).read(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o766);
        }
        let file = options.open(&path)?;

        Ok(Self {
            id,
            path,
            file,
            opened_at: SystemTime::now(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When this handle entered the open-handle pool.
    pub fn opened_at(&self) -> SystemTime {
        self.opened_at
    }

    /// Appends an encoded record. The file is opened in append mode, so
    /// the write lands at end-of-file regardless of any read position.
    pub fn append(&self, encoded: &[u8]) -> Result<()> {
        let mut file = &self.file;
        file.write_all(encoded)?;
        Ok(())
    }

    /// Decodes the record starting at the given offset. Ok(None) means a
    /// clean end of file at a record boundary.
    pub fn read_record(&self, offset: u64) -> Result<Option<Record>> {
        record::read_at(&self.file, offset)
    }

    /// Flushes file contents to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Parses a directory entry name as a segment id. Non-numeric names (the
/// backup directory, stray files) return None.
pub fn parse_id(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}
