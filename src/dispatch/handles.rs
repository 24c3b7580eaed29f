//! Handle tables: `file_handles`/`dir_handles`, each keyed by a monotonic
//! handle ID with free-list reuse, bounded so a runaway client cannot
//! exhaust memory by leaking opens.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Maximum number of concurrently open handles, per table.
pub const MAX_HANDLES: u64 = 1_000_000;

/// What an open file handle points at. A `RemoteReadOnly` handle is backed
/// by the prefetch subsystem; `LocalCopyReadOnly` serves a materialized
/// local copy for data-object kinds the prefetcher has no business chunking
/// (applets, workflows, records, databases — whole-object metadata blobs,
/// not large binaries); `NewlyCreatedReadWrite` is a staging file backed by
/// the upload subsystem.
pub enum FileHandle {
    RemoteReadOnly { inode: u64, prefetch_handle: u64 },
    LocalCopyReadOnly { inode: u64, file: std::sync::Mutex<std::fs::File> },
    NewlyCreatedReadWrite { inode: u64 },
}

impl FileHandle {
    pub fn inode(&self) -> u64 {
        match self {
            FileHandle::RemoteReadOnly { inode, .. } => *inode,
            FileHandle::LocalCopyReadOnly { inode, .. } => *inode,
            FileHandle::NewlyCreatedReadWrite { inode } => *inode,
        }
    }
}

/// A stable directory listing snapshot, taken at `opendir` time, so repeated
/// `readdir` calls against the same open see a consistent enumeration even
/// if the directory changes concurrently.
pub struct DirHandle {
    pub entries: Vec<(u64, fuser::FileType, String)>,
}

pub struct HandleTable<T> {
    slots: HashMap<u64, T>,
    next_id: u64,
    free_ids: Vec<u64>,
    max_handles: u64,
}

impl<T> HandleTable<T> {
    pub fn new(max_handles: u64) -> Self {
        Self {
            slots: HashMap::new(),
            next_id: 1,
            free_ids: Vec::new(),
            max_handles,
        }
    }

    pub fn insert(&mut self, value: T) -> Result<u64> {
        if self.slots.len() as u64 >= self.max_handles {
            return Err(Error::not_supported("too many open handles"));
        }
        let id = self.free_ids.pop().unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id += 1;
            id
        });
        self.slots.insert(id, value);
        Ok(id)
    }

    pub fn get(&self, id: u64) -> Option<&T> {
        self.slots.get(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<T> {
        let value = self.slots.remove(&id);
        if value.is_some() {
            self.free_ids.push(id);
        }
        value
    }
}
