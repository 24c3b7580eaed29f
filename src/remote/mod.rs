//! The remote platform client adapter.
//!
//! Out of scope per spec.md §1 beyond the interface the core consumes: this
//! module defines that interface as [`RemoteClient`] and provides one real
//! implementation, [`http::HttpRemoteClient`], built the way the teacher's
//! `api_client.rs` talks to its own toy server — `reqwest` calls returning
//! `Result`s the dispatch layer's `runtime.block_on` drives.

pub mod http;
pub mod pool;
pub mod types;

use crate::error::Result;
use crate::index::types::RemoteDataObjectDesc;
use async_trait::async_trait;

/// A listing of one folder's direct children, as returned by `DescribeFolder`.
#[derive(Debug, Clone, Default)]
pub struct FolderListing {
    pub data_objects: Vec<RemoteDataObjectDesc>,
    pub subdirs: Vec<String>,
    /// Set when the remote adapter has more pages; the caller should
    /// request the next page with the same folder and this token.
    pub next_page_token: Option<String>,
}

/// A download URL plus any headers required to use it (e.g. a bearer token
/// injected by the platform's signing step).
#[derive(Debug, Clone)]
pub struct DownloadUrl {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// The narrow capability the prefetcher and upload subsystem are given
/// instead of a handle to the whole filesystem (spec.md §9: breaking cyclic
/// references with narrow capability objects rather than full ownership).
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn describe_project(&self, project_id: &str) -> Result<ProjectDesc>;

    async fn describe_folder(
        &self,
        project_id: &str,
        folder: &str,
        page_token: Option<&str>,
    ) -> Result<FolderListing>;

    async fn file_new(
        &self,
        project_id: &str,
        name: &str,
        folder: &str,
        nonce: &str,
    ) -> Result<String>;

    async fn file_upload_part_url(&self, file_id: &str, part_index: u64) -> Result<String>;

    async fn file_upload_part(&self, url: &str, data: bytes::Bytes) -> Result<()>;

    async fn file_close(&self, file_id: &str) -> Result<()>;

    /// Polls until the platform reports the file closed, or a bounded
    /// number of attempts elapse.
    async fn file_is_closed(&self, file_id: &str) -> Result<bool>;

    async fn file_download_url(&self, file_id: &str) -> Result<DownloadUrl>;

    async fn download_range(&self, url: &DownloadUrl, start: u64, end: u64) -> Result<bytes::Bytes>;

    async fn find_project(&self, name: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct ProjectDesc {
    pub project_id: String,
    pub name: String,
    pub read_only: bool,
}
