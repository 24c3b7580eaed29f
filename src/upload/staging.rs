//! Staging file naming and low-level append/slice operations.
//!
//! Staging files live under a configurable directory, one per newly
//! created file, named `<counter>_<nonce>`. The counter is a per-process
//! monotonic sequence; the nonce adds collision safety across process
//! restarts that might otherwise reuse the same counter value against a
//! leftover staging directory.

use crate::error::Result;
use rand::Rng;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_COUNTER: AtomicU64 = AtomicU64::new(1);

pub fn staging_path(staging_dir: &Path) -> PathBuf {
    let counter = NEXT_COUNTER.fetch_add(1, Ordering::SeqCst);
    let nonce: u64 = rand::thread_rng().gen();
    staging_dir.join(format!("{counter}_{nonce}"))
}

pub struct StagingFile {
    path: PathBuf,
    file: File,
    len: u64,
}

impl StagingFile {
    pub fn create(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new().create(true).write(true).read(true).open(&path)?;
        Ok(Self { path, file, len: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Appends `data` at the current end of the staging file. The upload
    /// subsystem's write path only ever appends (random writes to new
    /// files are `NotSupported`), so this is always called with the staging
    /// file's current length as the offset.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        self.len += data.len() as u64;
        Ok(())
    }

    /// Reads back `[start, end)` of the staged tail, used to slice off a
    /// part once the threshold is crossed.
    pub fn read_range(&mut self, start: u64, end: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; (end - start) as usize];
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn remove(&self) -> Result<()> {
        std::fs::remove_file(&self.path).or_else(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(e.into())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_accumulates_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = staging_path(dir.path());
        let mut staging = StagingFile::create(path).unwrap();
        staging.append(b"hi\n").unwrap();
        assert_eq!(staging.len(), 3);
        let back = staging.read_range(0, 3).unwrap();
        assert_eq!(back, b"hi\n");
        staging.remove().unwrap();
    }

    #[test]
    fn staging_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = staging_path(dir.path());
        let b = staging_path(dir.path());
        assert_ne!(a, b);
    }
}
