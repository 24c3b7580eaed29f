//! Library surface for the remote object filesystem core.
//!
//! Splitting the core out from the binary exists so `tests/` can exercise
//! the metadata index, prefetch subsystem, and upload subsystem directly,
//! without a kernel mount.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod index;
pub mod manifest;
pub mod prefetch;
pub mod remote;
pub mod upload;

use crate::config::MountConfig;
use crate::dispatch::{DispatchState, FsWrapper};
use crate::index::MetadataIndex;
use crate::manifest::Manifest;
use crate::prefetch::PrefetchManager;
use crate::remote::RemoteClient;
use crate::upload::{IndexUpdater, RemoteUploader, UploadManager};
use std::sync::Arc;

/// Adapts [`MetadataIndex`] to the narrow [`IndexUpdater`] capability the
/// upload subsystem is given, instead of a reference to the whole index.
struct IndexUpdaterAdapter(Arc<MetadataIndex>);

#[async_trait::async_trait]
impl IndexUpdater for IndexUpdaterAdapter {
    async fn update_file(&self, inode: u64, new_size: u64, new_mtime: i64) -> error::Result<()> {
        self.0.update_file(inode, new_size, new_mtime)
    }
}

/// Adapts [`RemoteClient`] to the narrow [`RemoteUploader`] capability the
/// upload subsystem is given.
struct RemoteUploaderAdapter(Arc<dyn RemoteClient>);

#[async_trait::async_trait]
impl RemoteUploader for RemoteUploaderAdapter {
    async fn upload_part_url(&self, file_id: &str, part_index: u64) -> error::Result<String> {
        self.0.file_upload_part_url(file_id, part_index).await
    }

    async fn upload_part(&self, url: &str, data: bytes::Bytes) -> error::Result<()> {
        self.0.file_upload_part(url, data).await
    }

    async fn close(&self, file_id: &str) -> error::Result<()> {
        self.0.file_close(file_id).await
    }

    async fn is_closed(&self, file_id: &str) -> error::Result<bool> {
        self.0.file_is_closed(file_id).await
    }
}

/// Everything [`main`] needs to mount: the wired-up dispatch state plus the
/// runtime and upload manager it must drain on unmount.
pub struct Mount {
    pub fs: FsWrapper,
    pub runtime: Arc<tokio::runtime::Runtime>,
    pub upload: Arc<UploadManager>,
}

/// Builds one mount's worth of wired-together subsystems: opens the
/// metadata store, bootstraps it from `manifest`, and constructs the
/// prefetch/upload managers bound to `remote` through narrow capability
/// adapters.
pub fn build_mount(
    manifest: &Manifest,
    remote: Arc<dyn RemoteClient>,
    config: MountConfig,
    runtime: Arc<tokio::runtime::Runtime>,
) -> error::Result<Mount> {
    let index = Arc::new(MetadataIndex::open(&config.metadata_db_path)?);
    index.bootstrap(manifest)?;

    std::fs::create_dir_all(&config.staging_dir)?;

    let prefetch = PrefetchManager::new(&config.tuning);
    let upload = UploadManager::new(
        &config.tuning,
        Arc::new(RemoteUploaderAdapter(remote.clone())),
        Arc::new(IndexUpdaterAdapter(index.clone())),
    );

    let state = DispatchState::new(index, remote, prefetch, upload.clone(), config, runtime.clone());
    let fs = FsWrapper(Arc::new(std::sync::Mutex::new(state)));

    Ok(Mount { fs, runtime, upload })
}
