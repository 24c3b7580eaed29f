//! `reqwest`-backed [`RemoteClient`]: plain async functions issuing JSON
//! requests against a base URL, with retries and backoff layered on top.

use super::pool::ClientPool;
use super::types::*;
use super::{DownloadUrl, FolderListing, ProjectDesc, RemoteClient};
use crate::config::TuningConfig;
use crate::error::{Error, Result};
use crate::index::types::{DataObjectKind, RemoteDataObjectDesc};
use async_trait::async_trait;
use std::time::Duration;

pub struct HttpRemoteClient {
    pool: ClientPool,
    base_url: String,
    retry_count: u32,
    retry_backoff: Duration,
}

impl HttpRemoteClient {
    pub fn new(base_url: impl Into<String>, tuning: &TuningConfig) -> Self {
        Self {
            pool: ClientPool::new(tuning.http_client_pool_size),
            base_url: base_url.into(),
            retry_count: tuning.retry_count,
            retry_backoff: Duration::from_millis(tuning.retry_backoff_ms),
        }
    }

    /// Runs `attempt` up to `retry_count + 1` times with exponential
    /// backoff. Auth failures are *not* retried here — the prefetcher is
    /// responsible for refreshing the download URL and retrying the whole
    /// read, not this adapter.
    async fn with_retry<T, F, Fut>(&self, op: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut backoff = self.retry_backoff;
        let mut last_err = None;
        for try_number in 0..=self.retry_count {
            match attempt().await {
                Ok(v) => return Ok(v),
                Err(e) if e.kind() == crate::error::ErrorKind::Auth => return Err(e),
                Err(e) => {
                    tracing::warn!(op, try_number, error = %e, "remote call failed, retrying");
                    last_err = Some(e);
                    if try_number < self.retry_count {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::io(format!("{op}: exhausted retries"))))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn describe_project(&self, project_id: &str) -> Result<ProjectDesc> {
        self.with_retry("describe_project", || async {
            let client = self.pool.acquire().await;
            let url = format!("{}/projects/{}", self.base_url, project_id);
            let resp: WireProjectDesc = client.get(&url).send().await?.error_for_status()?.json().await?;
            Ok(ProjectDesc {
                project_id: resp.id,
                name: resp.name,
                read_only: resp.read_only,
            })
        })
        .await
    }

    async fn describe_folder(
        &self,
        project_id: &str,
        folder: &str,
        page_token: Option<&str>,
    ) -> Result<FolderListing> {
        self.with_retry("describe_folder", || async {
            let client = self.pool.acquire().await;
            let mut url = format!(
                "{}/projects/{}/folders?path={}",
                self.base_url, project_id, folder
            );
            if let Some(token) = page_token {
                url.push_str("&page_token=");
                url.push_str(token);
            }
            let resp: WireFolderListing =
                client.get(&url).send().await?.error_for_status()?.json().await?;
            Ok(FolderListing {
                data_objects: resp
                    .data_objects
                    .into_iter()
                    .map(|o| RemoteDataObjectDesc {
                        remote_id: o.id,
                        name: o.name,
                        size: o.size,
                        ctime: o.ctime,
                        mtime: o.mtime,
                        symlink_target: o.symlink_path,
                        kind: o.kind.as_deref().map(DataObjectKind::from_str).unwrap_or(DataObjectKind::Regular),
                    })
                    .collect(),
                subdirs: resp.subdirs,
                next_page_token: resp.next_page_token,
            })
        })
        .await
    }

    async fn file_new(
        &self,
        project_id: &str,
        name: &str,
        folder: &str,
        nonce: &str,
    ) -> Result<String> {
        self.with_retry("file_new", || async {
            let client = self.pool.acquire().await;
            let url = format!("{}/projects/{}/files", self.base_url, project_id);
            let body = serde_json::json!({ "name": name, "folder": folder, "nonce": nonce });
            let resp: WireFileNewResponse = client
                .post(&url)
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(resp.id)
        })
        .await
    }

    async fn file_upload_part_url(&self, file_id: &str, part_index: u64) -> Result<String> {
        self.with_retry("file_upload_part_url", || async {
            let client = self.pool.acquire().await;
            let url = format!(
                "{}/files/{}/upload_url?part={}",
                self.base_url, file_id, part_index
            );
            let resp: WireUploadUrlResponse =
                client.get(&url).send().await?.error_for_status()?.json().await?;
            Ok(resp.url)
        })
        .await
    }

    async fn file_upload_part(&self, url: &str, data: bytes::Bytes) -> Result<()> {
        self.with_retry("file_upload_part", || async {
            let client = self.pool.acquire().await;
            client
                .put(url)
                .body(data.clone())
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
        .await
    }

    async fn file_close(&self, file_id: &str) -> Result<()> {
        self.with_retry("file_close", || async {
            let client = self.pool.acquire().await;
            let url = format!("{}/files/{}/close", self.base_url, file_id);
            client.post(&url).send().await?.error_for_status()?;
            Ok(())
        })
        .await
    }

    async fn file_is_closed(&self, file_id: &str) -> Result<bool> {
        self.with_retry("file_is_closed", || async {
            let client = self.pool.acquire().await;
            let url = format!("{}/files/{}", self.base_url, file_id);
            let resp: WireFileDescribe =
                client.get(&url).send().await?.error_for_status()?.json().await?;
            Ok(resp.state == "closed")
        })
        .await
    }

    async fn file_download_url(&self, file_id: &str) -> Result<DownloadUrl> {
        self.with_retry("file_download_url", || async {
            let client = self.pool.acquire().await;
            let url = format!("{}/files/{}/download_url", self.base_url, file_id);
            let resp: WireDownloadUrlResponse =
                client.get(&url).send().await?.error_for_status()?.json().await?;
            Ok(DownloadUrl {
                url: resp.url,
                headers: resp.headers.into_iter().collect(),
            })
        })
        .await
    }

    async fn download_range(&self, url: &DownloadUrl, start: u64, end: u64) -> Result<bytes::Bytes> {
        self.with_retry("download_range", || async {
            let client = self.pool.acquire().await;
            let mut req = client.get(&url.url).header("Range", format!("bytes={}-{}", start, end.saturating_sub(1)));
            for (k, v) in &url.headers {
                req = req.header(k, v);
            }
            let resp = req.send().await?;
            if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 {
                return Err(Error::auth(format!("download url expired: {}", resp.status())));
            }
            Ok(resp.error_for_status()?.bytes().await?)
        })
        .await
    }

    async fn find_project(&self, name: &str) -> Result<String> {
        self.with_retry("find_project", || async {
            let client = self.pool.acquire().await;
            let url = format!("{}/projects/find?name={}", self.base_url, name);
            let resp: WireFindProjectResponse =
                client.get(&url).send().await?.error_for_status()?.json().await?;
            Ok(resp.id)
        })
        .await
    }
}
