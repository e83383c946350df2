//! Document uploads.
//!
//! A document is posted as multipart field `file`; the backend pins it and
//! answers with its content id. The uploader mirrors the lifecycle the panel
//! shows:
//!
//! ```text
//! idle -> uploading -> anchoring(cid) -> success(cid) -> idle
//!              \-----> error
//! ```
//!
//! `anchoring` lasts a fixed delay while the backend mints the ledger block;
//! `success` returns to `idle` after the settle delay. Both run on a task the
//! uploader owns and aborts on drop. Only one upload may be in flight.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::configs::StreamConfig;
use crate::error::FetchError;
use crate::retrieve::ApiClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Idle,
    Uploading,
    Anchoring { cid: String },
    Success { cid: String },
    Error { reason: String },
}

impl UploadStatus {
    pub fn is_busy(&self) -> bool {
        matches!(self, UploadStatus::Uploading | UploadStatus::Anchoring { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub cid: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    success: bool,
    #[serde(default)]
    cid: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct DocumentUploader {
    client: ApiClient,
    path: String,
    anchoring_delay: Duration,
    settle_delay: Duration,
    status: Arc<watch::Sender<UploadStatus>>,
    settle_task: Mutex<Option<JoinHandle<()>>>,
}

impl DocumentUploader {
    pub fn new(client: ApiClient, config: &StreamConfig) -> Self {
        let (status, _) = watch::channel(UploadStatus::Idle);
        Self {
            client,
            path: config.upload_path.clone(),
            anchoring_delay: config.anchoring_delay(),
            settle_delay: config.upload_settle(),
            status: Arc::new(status),
            settle_task: Mutex::new(None),
        }
    }

    pub fn status(&self) -> UploadStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<UploadStatus> {
        self.status.subscribe()
    }

    /// Uploads one document and resolves once it is reported anchored.
    ///
    /// Dropping the returned future is safe. Cancelled before the backend
    /// answers, the status returns to [`UploadStatus::Idle`]; cancelled after,
    /// the anchoring and settle steps still run to completion.
    ///
    /// # Errors
    /// [`FetchError::Rejected`] if another upload is in flight or the backend
    /// answers `success: false`; any request failure otherwise. Both leave the
    /// status at [`UploadStatus::Error`] except the in-flight rejection, which
    /// leaves the running upload untouched.
    pub async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<UploadReceipt, FetchError> {
        let started = self.status.send_if_modified(|status| {
            if status.is_busy() {
                return false;
            }
            *status = UploadStatus::Uploading;
            true
        });
        if !started {
            return Err(FetchError::Rejected("an upload is already in progress".to_string()));
        }
        let mut in_flight = InFlight {
            status: &self.status,
            armed: true,
        };
        self.cancel_settle();
        tracing::info!(file_name, size = bytes.len(), "Uploading document");

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.to_string()));
        let response = self
            .client
            .post_multipart::<UploadResponse>(&self.path, form)
            .await
            .and_then(|r| r.into_data());
        in_flight.armed = false;

        let cid = match response {
            Ok(UploadResponse {
                success: true,
                cid: Some(cid),
                ..
            }) => cid,
            Ok(rejected) => {
                let reason = rejected
                    .error
                    .unwrap_or_else(|| "backend did not accept the document".to_string());
                return Err(self.fail(FetchError::Rejected(reason)));
            }
            Err(e) => return Err(self.fail(e)),
        };

        let anchored = self.finish(file_name, cid.clone());
        anchored
            .await
            .map_err(|_| FetchError::Rejected("uploader shut down before anchoring finished".to_string()))?;
        Ok(UploadReceipt { cid })
    }

    fn fail(&self, err: FetchError) -> FetchError {
        tracing::warn!(error = %err, "Document upload failed");
        self.status.send_replace(UploadStatus::Error { reason: err.to_string() });
        err
    }

    /// Runs `anchoring -> success -> idle` on a task owned by the uploader, so
    /// the sequence completes even if the caller stops waiting. The receiver
    /// resolves when `success` is reported.
    fn finish(&self, file_name: &str, cid: String) -> oneshot::Receiver<()> {
        let (anchored_tx, anchored_rx) = oneshot::channel();
        let status = Arc::clone(&self.status);
        let anchoring = self.anchoring_delay;
        let settle = self.settle_delay;
        let file_name = file_name.to_string();

        status.send_replace(UploadStatus::Anchoring { cid: cid.clone() });
        let task = tokio::spawn(async move {
            tokio::time::sleep(anchoring).await;
            status.send_replace(UploadStatus::Success { cid: cid.clone() });
            tracing::info!(file_name, %cid, "Document anchored");
            let _ = anchored_tx.send(());

            tokio::time::sleep(settle).await;
            status.send_if_modified(|s| {
                if matches!(s, UploadStatus::Success { .. }) {
                    *s = UploadStatus::Idle;
                    true
                } else {
                    false
                }
            });
        });

        let mut slot = self.settle_task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        anchored_rx
    }

    fn cancel_settle(&self) {
        let mut slot = self.settle_task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

/// Resets `Uploading` to `Idle` if the request future is dropped before the
/// backend answers.
struct InFlight<'a> {
    status: &'a watch::Sender<UploadStatus>,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.status.send_if_modified(|s| {
            if *s == UploadStatus::Uploading {
                *s = UploadStatus::Idle;
                true
            } else {
                false
            }
        });
        tracing::info!("Document upload cancelled before the backend answered");
    }
}

impl Drop for DocumentUploader {
    fn drop(&mut self) {
        self.cancel_settle();
    }
}
