//! `open` and `read` for the read path: remote-backed files go through the
//! prefetch subsystem, small non-regular data-object kinds (applets,
//! workflows, records, databases) are materialized once into a local copy,
//! symlinks refuse `open` outright (their content is only ever served
//! through `readlink`), and files still open for writing return their
//! existing writable handle.

use super::handles::FileHandle;
use super::DispatchState;
use crate::error::{errno_for, Error, Result};
use crate::index::types::DataObjectKind;
use crate::prefetch::RemoteByteSource;
use crate::remote::{DownloadUrl, RemoteClient};
use async_trait::async_trait;
use bytes::Bytes;
use fuser::{ReplyData, ReplyOpen, Request};
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

/// The narrow capability a [`crate::prefetch::PrefetchManager`] handle is
/// given: refresh and use a download URL for one remote file, without
/// holding a reference to the dispatch state or the metadata index.
struct RemoteFileSource {
    remote: Arc<dyn RemoteClient>,
    remote_id: String,
}

#[async_trait]
impl RemoteByteSource for RemoteFileSource {
    async fn download_url(&self) -> Result<DownloadUrl> {
        self.remote.file_download_url(&self.remote_id).await
    }

    async fn fetch_range(&self, url: &DownloadUrl, start: u64, end: u64) -> Result<Bytes> {
        self.remote.download_range(url, start, end).await
    }
}

pub fn open(state: &mut DispatchState, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
    let result = (|| -> Result<u64> {
        let obj = state.index.data_object_by_inode(ino)?;

        match obj.kind {
            DataObjectKind::Symlink => Err(Error::not_supported("symlinks are not opened for read")),

            DataObjectKind::Regular if !obj.inline_data.is_empty() => {
                // A non-empty `inline_data` on a regular file is a staging
                // path: this inode was created by this mount and may still
                // be open for writing.
                let upload_state = state.runtime.block_on(state.upload.state_of(ino));
                if upload_state.is_ok() {
                    let handle = FileHandle::NewlyCreatedReadWrite { inode: ino };
                    return state.file_handles.insert(handle);
                }
                open_remote(state, ino, &obj.remote_id, obj.size)
            }

            DataObjectKind::Regular => open_remote(state, ino, &obj.remote_id, obj.size),

            _ => open_local_copy(state, ino, &obj.remote_id, obj.size),
        }
    })();

    match result {
        Ok(fh) => reply.opened(fh, 0),
        Err(e) => reply.error(errno_for(&e)),
    }
}

fn open_remote(state: &mut DispatchState, inode: u64, remote_id: &str, file_size: u64) -> Result<u64> {
    let source = Arc::new(RemoteFileSource {
        remote: state.remote.clone(),
        remote_id: remote_id.to_string(),
    });
    let remote_id = remote_id.to_string();
    let remote = state.remote.clone();
    let url = state.runtime.block_on(async move { remote.file_download_url(&remote_id).await })?;

    let prefetch_handle = state.prefetch.open(file_size, source, url);
    state.file_handles.insert(FileHandle::RemoteReadOnly { inode, prefetch_handle })
}

/// Downloads the whole object once into a local temp file under the staging
/// directory; these kinds are small metadata projections, not large
/// binaries, so there is nothing for the prefetcher's windowing to buy.
fn open_local_copy(state: &mut DispatchState, inode: u64, remote_id: &str, file_size: u64) -> Result<u64> {
    let remote = state.remote.clone();
    let remote_id = remote_id.to_string();
    let data = state.runtime.block_on(async move {
        let url = remote.file_download_url(&remote_id).await?;
        remote.download_range(&url, 0, file_size).await
    })?;

    let path = crate::upload::staging::staging_path(&state.config.staging_dir);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)?;
    std::io::Write::write_all(&mut file, &data)?;
    file.seek(SeekFrom::Start(0))?;

    state.file_handles.insert(FileHandle::LocalCopyReadOnly {
        inode,
        file: std::sync::Mutex::new(file),
    })
}

pub fn read(state: &mut DispatchState, _req: &Request<'_>, _ino: u64, fh: u64, offset: i64, size: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyData) {
    let Some(handle) = state.file_handles.get(fh) else {
        reply.error(libc::EBADF);
        return;
    };

    let result: Result<Bytes> = match handle {
        FileHandle::RemoteReadOnly { prefetch_handle, .. } => {
            let prefetch_handle = *prefetch_handle;
            let prefetch = state.prefetch.clone();
            state.runtime.block_on(async move { prefetch.read(prefetch_handle, offset.max(0) as u64, size).await })
        }
        FileHandle::LocalCopyReadOnly { file, .. } => {
            let mut file = file.lock().unwrap_or_else(|p| p.into_inner());
            (|| -> Result<Bytes> {
                file.seek(SeekFrom::Start(offset.max(0) as u64))?;
                let mut buf = vec![0u8; size as usize];
                let n = file.read(&mut buf)?;
                buf.truncate(n);
                Ok(Bytes::from(buf))
            })()
        }
        FileHandle::NewlyCreatedReadWrite { .. } => Err(Error::not_supported("cannot read a file open for writing")),
    };

    match result {
        Ok(data) => reply.data(&data),
        Err(e) => reply.error(errno_for(&e)),
    }
}

/// Releases a read-path file handle. Called from the dispatcher's combined
/// `release` after it has determined the handle is not the write-path
/// variant; writable-file release lives in `create_write::release_write_handle`.
pub fn release_read_handle(state: &DispatchState, handle: FileHandle) {
    match handle {
        FileHandle::RemoteReadOnly { prefetch_handle, .. } => {
            let prefetch = state.prefetch.clone();
            state.runtime.block_on(async move { prefetch.release(prefetch_handle).await });
        }
        FileHandle::LocalCopyReadOnly { .. } => {
            // Dropping the handle closes the descriptor; the staging file
            // it backed is leaked intentionally (no API contract promises
            // it is short-lived, and it lives under the configured staging
            // directory the operator already owns).
        }
        FileHandle::NewlyCreatedReadWrite { .. } => unreachable!("handled by the write-path release"),
    }
}
