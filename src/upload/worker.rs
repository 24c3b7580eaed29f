//! Fixed-size worker pool consuming the part-upload queue, shaped like the
//! prefetch worker pool for textural consistency within the crate.

use super::{RemoteUploader, UploadFile};
use crate::error::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

pub struct PartJob {
    pub file: Arc<UploadFile>,
    pub part_index: u64,
    pub data: Bytes,
}

pub fn spawn_workers(
    worker_count: usize,
    uploader: Arc<dyn RemoteUploader>,
    retry_count: u32,
    retry_backoff: Duration,
) -> mpsc::UnboundedSender<PartJob> {
    let (tx, rx) = mpsc::unbounded_channel::<PartJob>();
    let rx = Arc::new(AsyncMutex::new(rx));

    for worker_id in 0..worker_count.max(1) {
        let rx = rx.clone();
        let uploader = uploader.clone();
        let retry_backoff = retry_backoff;
        tokio::spawn(async move {
            loop {
                let job = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                let Some(job) = job else { break };
                tracing::debug!(worker_id, part_index = job.part_index, "uploading part");
                let result = upload_part_with_retry(uploader.as_ref(), &job, retry_count, retry_backoff).await;
                job.file.on_part_done(job.part_index, result).await;
            }
        });
    }

    tx
}

async fn upload_part_with_retry(
    uploader: &dyn RemoteUploader,
    job: &PartJob,
    retry_count: u32,
    mut backoff: Duration,
) -> Result<()> {
    let mut last_err = None;
    for attempt in 0..=retry_count {
        let url = uploader.upload_part_url(&job.file.file_id, job.part_index).await;
        let outcome = match url {
            Ok(url) => uploader.upload_part(&url, job.data.clone()).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, part_index = job.part_index, attempt, "part upload failed, retrying");
                last_err = Some(e);
                if attempt < retry_count {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| crate::error::Error::io("part upload exhausted retries")))
}
