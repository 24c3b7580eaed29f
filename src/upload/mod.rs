//! Background upload subsystem: staged writes to newly created files,
//! chunked multi-part upload with ordering and close semantics.
//!
//! The subsystem is handed two narrow capabilities instead of a reference
//! to the whole filesystem: a "remote uploader" for the part/close/describe
//! calls, and an "index updater" to record the final size/mtime once the
//! platform reports the file closed.

pub mod staging;
pub mod worker;

use crate::config::TuningConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use staging::StagingFile;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use worker::PartJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Open,
    Sealing,
    Closing,
    Closed,
    Failed,
}

#[async_trait]
pub trait RemoteUploader: Send + Sync {
    async fn upload_part_url(&self, file_id: &str, part_index: u64) -> Result<String>;
    async fn upload_part(&self, url: &str, data: Bytes) -> Result<()>;
    async fn close(&self, file_id: &str) -> Result<()>;
    async fn is_closed(&self, file_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait IndexUpdater: Send + Sync {
    async fn update_file(&self, inode: u64, new_size: u64, new_mtime: i64) -> Result<()>;
}

pub struct UploadFile {
    inode: u64,
    file_id: String,
    staging: AsyncMutex<StagingFile>,
    sliced_offset: AtomicU64,
    next_part_index: AtomicU64,
    pending_parts: AsyncMutex<u64>,
    parts_done: Notify,
    state: AsyncMutex<UploadState>,
    part_threshold: u64,
}

impl UploadFile {
    async fn on_part_done(&self, part_index: u64, result: Result<()>) {
        match result {
            Ok(()) => {
                let mut pending = self.pending_parts.lock().await;
                *pending = pending.saturating_sub(1);
                if *pending == 0 {
                    self.parts_done.notify_waiters();
                }
            }
            Err(e) => {
                tracing::error!(error = %e, part_index, inode = self.inode, "part upload failed permanently");
                *self.state.lock().await = UploadState::Failed;
                let mut pending = self.pending_parts.lock().await;
                *pending = pending.saturating_sub(1);
                if *pending == 0 {
                    self.parts_done.notify_waiters();
                }
            }
        }
    }

    async fn wait_for_parts(&self) {
        loop {
            {
                let pending = self.pending_parts.lock().await;
                if *pending == 0 {
                    return;
                }
            }
            self.parts_done.notified().await;
        }
    }
}

pub struct UploadManager {
    files: StdMutex<HashMap<u64, Arc<UploadFile>>>,
    uploader: Arc<dyn RemoteUploader>,
    updater: Arc<dyn IndexUpdater>,
    part_tx: mpsc::UnboundedSender<PartJob>,
    part_threshold: u64,
    retry_count: u32,
    retry_backoff: Duration,
    drain_timeout: Duration,
}

impl UploadManager {
    pub fn new(tuning: &TuningConfig, uploader: Arc<dyn RemoteUploader>, updater: Arc<dyn IndexUpdater>) -> Arc<Self> {
        let retry_backoff = Duration::from_millis(tuning.retry_backoff_ms);
        let part_tx = worker::spawn_workers(tuning.upload_workers, uploader.clone(), tuning.retry_count, retry_backoff);
        Arc::new(Self {
            files: StdMutex::new(HashMap::new()),
            uploader,
            updater,
            part_tx,
            part_threshold: tuning.upload_part_threshold_bytes,
            retry_count: tuning.retry_count,
            retry_backoff,
            drain_timeout: Duration::from_secs(tuning.upload_drain_timeout_seconds),
        })
    }

    /// Registers a newly created file's upload state. `staging_path` has
    /// already been allocated and created by the dispatch layer's create
    /// path via [`staging::staging_path`]/[`StagingFile::create`].
    pub fn create(&self, inode: u64, file_id: String, staging: StagingFile) -> Result<()> {
        let file = Arc::new(UploadFile {
            inode,
            file_id,
            staging: AsyncMutex::new(staging),
            sliced_offset: AtomicU64::new(0),
            next_part_index: AtomicU64::new(1),
            pending_parts: AsyncMutex::new(0),
            parts_done: Notify::new(),
            state: AsyncMutex::new(UploadState::Open),
            part_threshold: self.part_threshold,
        });
        let mut files = self.files.lock().unwrap_or_else(|p| p.into_inner());
        if files.contains_key(&inode) {
            return Err(Error::exists(format!("upload state already exists for inode {inode}")));
        }
        files.insert(inode, file);
        Ok(())
    }

    fn get(&self, inode: u64) -> Result<Arc<UploadFile>> {
        self.files
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&inode)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no upload state for inode {inode}")))
    }

    /// Appends `data` at `offset`. Random writes to a newly created file
    /// are rejected outright.
    pub async fn write(&self, inode: u64, offset: u64, data: &[u8]) -> Result<u32> {
        let file = self.get(inode)?;
        {
            let state = *file.state.lock().await;
            if state != UploadState::Open {
                return Err(Error::io(format!("inode {inode} is not open for writing (state {state:?})")));
            }
        }

        let mut staging = file.staging.lock().await;
        if offset != staging.len() {
            return Err(Error::not_supported("random writes to newly created files are not supported"));
        }
        staging.append(data)?;
        let total_len = staging.len();
        drop(staging);

        self.maybe_slice_part(&file, total_len, false).await?;
        Ok(data.len() as u32)
    }

    async fn maybe_slice_part(&self, file: &Arc<UploadFile>, total_len: u64, force_final: bool) -> Result<()> {
        let sliced = file.sliced_offset.load(Ordering::SeqCst);
        let unsliced = total_len - sliced;
        if !force_final && unsliced < file.part_threshold {
            return Ok(());
        }
        if unsliced == 0 {
            return Ok(());
        }

        let data = {
            let mut staging = file.staging.lock().await;
            staging.read_range(sliced, total_len)?
        };
        file.sliced_offset.store(total_len, Ordering::SeqCst);
        let part_index = file.next_part_index.fetch_add(1, Ordering::SeqCst);

        {
            let mut pending = file.pending_parts.lock().await;
            *pending += 1;
        }
        let job = PartJob {
            file: file.clone(),
            part_index,
            data: Bytes::from(data),
        };
        self.part_tx
            .send(job)
            .map_err(|_| Error::io("upload worker pool channel closed"))?;
        Ok(())
    }

    /// Schedules finalization and returns immediately: a writable file's
    /// release never blocks on the remote close.
    pub fn release(self: &Arc<Self>, inode: u64) -> Result<()> {
        let file = self.get(inode)?;
        let manager = self.clone();
        tokio::spawn(async move {
            manager.finalize(file).await;
        });
        Ok(())
    }

    async fn finalize(&self, file: Arc<UploadFile>) {
        *file.state.lock().await = UploadState::Sealing;

        let total_len = file.staging.lock().await.len();
        if let Err(e) = self.maybe_slice_part(&file, total_len, true).await {
            tracing::error!(error = %e, inode = file.inode, "failed to slice final upload part");
            *file.state.lock().await = UploadState::Failed;
            return;
        }

        file.wait_for_parts().await;

        if *file.state.lock().await == UploadState::Failed {
            return;
        }

        *file.state.lock().await = UploadState::Closing;

        if let Err(e) = self.uploader.close(&file.file_id).await {
            tracing::error!(error = %e, inode = file.inode, "remote close failed");
            *file.state.lock().await = UploadState::Failed;
            return;
        }

        let mut closed = false;
        for _ in 0..self.retry_count.max(1) * 4 {
            match self.uploader.is_closed(&file.file_id).await {
                Ok(true) => {
                    closed = true;
                    break;
                }
                Ok(false) => tokio::time::sleep(self.retry_backoff).await,
                Err(e) => {
                    tracing::warn!(error = %e, inode = file.inode, "polling remote close state failed");
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }

        if !closed {
            tracing::error!(inode = file.inode, "remote file never reported closed");
            *file.state.lock().await = UploadState::Failed;
            return;
        }

        let final_size = file.staging.lock().await.len();
        let final_mtime = crate::index::types::now_unix();
        if let Err(e) = self.updater.update_file(file.inode, final_size, final_mtime).await {
            tracing::error!(error = %e, inode = file.inode, "failed to record final metadata after close");
            *file.state.lock().await = UploadState::Failed;
            return;
        }

        *file.state.lock().await = UploadState::Closed;
        if let Err(e) = file.staging.lock().await.remove() {
            tracing::warn!(error = %e, inode = file.inode, "failed to remove staging file after close");
        }
        self.files.lock().unwrap_or_else(|p| p.into_inner()).remove(&file.inode);
    }

    pub async fn state_of(&self, inode: u64) -> Result<UploadState> {
        let file = self.get(inode)?;
        Ok(*file.state.lock().await)
    }

    /// Drains outstanding uploads on unmount. Files still `Open`/`Sealing`
    /// after `self.drain_timeout` transition to `Failed`.
    pub async fn drain(self: &Arc<Self>) {
        let files: Vec<Arc<UploadFile>> = self
            .files
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();

        let mut tasks = Vec::new();
        for file in files {
            let manager = self.clone();
            tasks.push(tokio::spawn(async move { manager.finalize(file).await }));
        }

        let all = futures_util::future::join_all(tasks);
        if tokio::time::timeout(self.drain_timeout, all).await.is_err() {
            tracing::warn!("upload drain timed out; marking unfinished files failed");
            for file in self.files.lock().unwrap_or_else(|p| p.into_inner()).values() {
                let mut state = file.state.lock().await;
                if *state != UploadState::Closed {
                    *state = UploadState::Failed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeUploader {
        parts: AtomicUsize,
        closed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl RemoteUploader for FakeUploader {
        async fn upload_part_url(&self, _file_id: &str, _part_index: u64) -> Result<String> {
            Ok("http://fake/upload".into())
        }
        async fn upload_part(&self, _url: &str, _data: Bytes) -> Result<()> {
            self.parts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn close(&self, _file_id: &str) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn is_closed(&self, _file_id: &str) -> Result<bool> {
            Ok(self.closed.load(Ordering::SeqCst))
        }
    }

    struct FakeUpdater {
        updates: StdMutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl IndexUpdater for FakeUpdater {
        async fn update_file(&self, inode: u64, new_size: u64, _new_mtime: i64) -> Result<()> {
            self.updates.lock().unwrap().push((inode, new_size));
            Ok(())
        }
    }

    #[tokio::test]
    async fn write_then_release_closes_the_file() {
        let mut tuning = TuningConfig::default();
        tuning.upload_part_threshold_bytes = 1024;
        let uploader = Arc::new(FakeUploader { parts: AtomicUsize::new(0), closed: std::sync::atomic::AtomicBool::new(false) });
        let updater = Arc::new(FakeUpdater { updates: StdMutex::new(Vec::new()) });
        let manager = UploadManager::new(&tuning, uploader.clone(), updater.clone());

        let dir = tempfile::tempdir().unwrap();
        let staging = StagingFile::create(staging::staging_path(dir.path())).unwrap();
        manager.create(42, "file-1".into(), staging).unwrap();
        manager.write(42, 0, b"hi\n").await.unwrap();
        manager.release(42).unwrap();

        for _ in 0..50 {
            if updater.updates.lock().unwrap().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(updater.updates.lock().unwrap()[0], (42, 3));
    }

    #[tokio::test]
    async fn out_of_order_write_is_rejected() {
        let tuning = TuningConfig::default();
        let uploader = Arc::new(FakeUploader { parts: AtomicUsize::new(0), closed: std::sync::atomic::AtomicBool::new(false) });
        let updater = Arc::new(FakeUpdater { updates: StdMutex::new(Vec::new()) });
        let manager = UploadManager::new(&tuning, uploader, updater);
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingFile::create(staging::staging_path(dir.path())).unwrap();
        manager.create(7, "file-2".into(), staging).unwrap();
        let err = manager.write(7, 10, b"oops").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotSupported);
    }
}
