//! Per-open-file sequential read-ahead (spec.md §4.2).
//!
//! The prefetcher never holds the filesystem-wide mutex; it is handed a
//! narrow [`RemoteByteSource`] capability per handle instead of a reference
//! to the whole filesystem (spec.md §9's "cyclic references broken by
//! capability objects"). Background window fetches run on a small fixed
//! worker pool, mirroring the shape of the upload worker pool for textural
//! consistency within the crate.

pub mod cache;
pub mod window;

use crate::config::TuningConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::remote::DownloadUrl;
use async_trait::async_trait;
use bytes::Bytes;
use cache::{ChunkKey, GlobalChunkCache};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use window::{DetectorState, SequentialityDetector, Window};

/// The capability a [`PrefetchHandle`] is given to do its work: get (and
/// refresh) a download URL, and fetch a byte range through it. Implemented
/// by a thin adapter over [`crate::remote::RemoteClient`] bound to one file.
#[async_trait]
pub trait RemoteByteSource: Send + Sync {
    async fn download_url(&self) -> Result<DownloadUrl>;
    async fn fetch_range(&self, url: &DownloadUrl, start: u64, end: u64) -> Result<Bytes>;
}

struct HandleState {
    file_size: u64,
    source: Arc<dyn RemoteByteSource>,
    download_url: DownloadUrl,
    window: Window,
    detector: SequentialityDetector,
    known_offsets: Vec<u64>,
    inflight: bool,
    cancelled: bool,
}

pub struct PrefetchHandle {
    id: u64,
    state: AsyncMutex<HandleState>,
}

struct FetchJob {
    handle: Arc<PrefetchHandle>,
    offset: u64,
    len: u64,
}

pub struct PrefetchManager {
    handles: StdMutex<HashMap<u64, Arc<PrefetchHandle>>>,
    next_id: AtomicU64,
    global_cache: Arc<GlobalChunkCache>,
    job_tx: mpsc::UnboundedSender<FetchJob>,
    initial_window_bytes: u64,
    max_window_bytes: u64,
    retry_count: u32,
    retry_backoff_ms: u64,
}

impl PrefetchManager {
    pub fn new(tuning: &TuningConfig) -> Arc<Self> {
        let (job_tx, job_rx) = mpsc::unbounded_channel::<FetchJob>();
        let manager = Arc::new(Self {
            handles: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            global_cache: Arc::new(GlobalChunkCache::new(tuning.prefetch_memory_budget_bytes)),
            job_tx,
            initial_window_bytes: tuning.prefetch_initial_window_bytes,
            max_window_bytes: tuning.prefetch_max_window_bytes,
            retry_count: tuning.retry_count,
            retry_backoff_ms: tuning.retry_backoff_ms,
        });

        let job_rx = Arc::new(AsyncMutex::new(job_rx));
        for worker_id in 0..tuning.prefetch_workers.max(1) {
            let job_rx = job_rx.clone();
            let manager = manager.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = job_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else { break };
                    tracing::debug!(worker_id, offset = job.offset, len = job.len, "prefetch worker running job");
                    manager.run_background_fetch(job).await;
                }
            });
        }

        manager
    }

    /// Opens a new prefetch handle for a remote-read file.
    pub fn open(&self, file_size: u64, source: Arc<dyn RemoteByteSource>, initial_url: DownloadUrl) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(PrefetchHandle {
            id,
            state: AsyncMutex::new(HandleState {
                file_size,
                source,
                download_url: initial_url,
                window: Window::new(0, self.initial_window_bytes),
                detector: SequentialityDetector::new(),
                known_offsets: Vec::new(),
                inflight: false,
                cancelled: false,
            }),
        });
        self.handles.lock().unwrap_or_else(|p| p.into_inner()).insert(id, handle);
        id
    }

    /// Cancels outstanding background fetches and drops the handle's
    /// cached chunks, per spec.md §5 ("released read handles cancel
    /// outstanding prefetches").
    pub async fn release(&self, handle_id: u64) {
        let handle = self.handles.lock().unwrap_or_else(|p| p.into_inner()).remove(&handle_id);
        if let Some(handle) = handle {
            let known_offsets = {
                let mut state = handle.state.lock().await;
                state.cancelled = true;
                std::mem::take(&mut state.known_offsets)
            };
            self.global_cache.evict_handle(handle_id, &known_offsets);
        }
    }

    pub async fn read(&self, handle_id: u64, offset: u64, length: u32) -> Result<Bytes> {
        let handle = self
            .handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&handle_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no prefetch handle {handle_id}")))?;

        self.global_cache.pin(handle_id);
        let result = self.read_inner(&handle, offset, length as u64).await;
        self.global_cache.unpin(handle_id);
        result
    }

    async fn read_inner(&self, handle: &Arc<PrefetchHandle>, offset: u64, length: u64) -> Result<Bytes> {
        let end = offset + length;

        let existing_chunk = {
            let state = handle.state.lock().await;
            state
                .known_offsets
                .iter()
                .rev()
                .find(|&&chunk_offset| chunk_offset <= offset)
                .copied()
        };

        if let Some(chunk_offset) = existing_chunk {
            if let Some(data) = self.global_cache.get(&ChunkKey { handle_id: handle.id, offset: chunk_offset }) {
                let chunk_end = chunk_offset + data.len() as u64;
                if chunk_end >= end {
                    let start = (offset - chunk_offset) as usize;
                    let slice_end = (end - chunk_offset) as usize;
                    return Ok(self.observe_and_maybe_schedule(handle, offset, length, data.slice(start..slice_end)).await);
                }
            }
        }

        // No single cached chunk fully covers the request; treat the whole
        // range as missing and fetch it synchronously.
        let data = self.fetch_with_retry(handle, offset, end).await?;
        {
            let mut state = handle.state.lock().await;
            state.known_offsets.push(offset);
        }
        self.global_cache.insert(ChunkKey { handle_id: handle.id, offset }, data.clone());
        Ok(self.observe_and_maybe_schedule(handle, offset, length, data).await)
    }

    async fn observe_and_maybe_schedule(&self, handle: &Arc<PrefetchHandle>, offset: u64, length: u64, data: Bytes) -> Bytes {
        let should_schedule = {
            let mut state = handle.state.lock().await;
            let detector_state = state.detector.observe(offset);
            state.detector.record_served(offset, length);
            detector_state == DetectorState::Sequential && !state.inflight
        };

        if should_schedule {
            let window = {
                let mut state = handle.state.lock().await;
                if state.inflight {
                    None
                } else {
                    // Never schedule a window behind data already served.
                    state.window.offset = state.window.offset.max(offset + length);
                    state.inflight = true;
                    Some(state.window)
                }
            };
            if let Some(window) = window {
                if window.offset < handle_file_size(handle).await {
                    let job = FetchJob {
                        handle: handle.clone(),
                        offset: window.offset,
                        len: window.bytes,
                    };
                    let _ = self.job_tx.send(job);
                } else {
                    handle.state.lock().await.inflight = false;
                }
            }
        }

        data
    }

    async fn run_background_fetch(&self, job: FetchJob) {
        let result = self.fetch_with_retry(&job.handle, job.offset, job.offset + job.len).await;
        let mut state = job.handle.state.lock().await;
        state.inflight = false;
        if state.cancelled {
            return;
        }
        match result {
            Ok(data) => {
                state.known_offsets.push(job.offset);
                let max_window = self.max_window_bytes;
                state.window.offset = job.offset;
                state.window.advance_and_double(max_window);
                drop(state);
                self.global_cache.insert(ChunkKey { handle_id: job.handle.id, offset: job.offset }, data);
            }
            Err(e) => {
                tracing::warn!(error = %e, offset = job.offset, "background prefetch window fetch failed");
            }
        }
    }

    /// Fetches `[start, end)`, refreshing the download URL once on an auth
    /// failure and retrying transient failures with exponential backoff,
    /// per spec.md §4.2's "Refresh" paragraph.
    async fn fetch_with_retry(&self, handle: &Arc<PrefetchHandle>, start: u64, end: u64) -> Result<Bytes> {
        let mut backoff = std::time::Duration::from_millis(self.retry_backoff_ms);
        let mut last_err = None;
        for attempt in 0..=self.retry_count {
            let (source, url) = {
                let state = handle.state.lock().await;
                (state.source.clone(), state.download_url.clone())
            };
            match source.fetch_range(&url, start, end).await {
                Ok(data) => return Ok(data),
                Err(e) if e.kind() == ErrorKind::Auth => {
                    match source.download_url().await {
                        Ok(fresh) => {
                            handle.state.lock().await.download_url = fresh;
                        }
                        Err(refresh_err) => return Err(refresh_err),
                    }
                    last_err = Some(e);
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt < self.retry_count {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::io("prefetch fetch exhausted retries")))
    }
}

async fn handle_file_size(handle: &Arc<PrefetchHandle>) -> u64 {
    handle.state.lock().await.file_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeSource {
        fetch_calls: AtomicUsize,
        data: Bytes,
    }

    #[async_trait]
    impl RemoteByteSource for FakeSource {
        async fn download_url(&self) -> Result<DownloadUrl> {
            Ok(DownloadUrl { url: "http://fake".into(), headers: vec![] })
        }

        async fn fetch_range(&self, _url: &DownloadUrl, start: u64, end: u64) -> Result<Bytes> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let start = start.min(self.data.len() as u64) as usize;
            let end = end.min(self.data.len() as u64) as usize;
            Ok(self.data.slice(start..end))
        }
    }

    fn tuning() -> TuningConfig {
        TuningConfig::default()
    }

    #[tokio::test]
    async fn sequential_reads_are_served_from_window_cache() {
        let manager = PrefetchManager::new(&tuning());
        let data = Bytes::from(vec![7u8; 1 << 20]);
        let source = Arc::new(FakeSource { fetch_calls: AtomicUsize::new(0), data: data.clone() });
        let url = DownloadUrl { url: "http://fake".into(), headers: vec![] };
        let handle_id = manager.open(data.len() as u64, source, url);

        let chunk = manager.read(handle_id, 0, 4096).await.unwrap();
        assert_eq!(chunk.len(), 4096);
        manager.release(handle_id).await;
    }
}
