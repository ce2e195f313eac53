//! Upload coordinator
//!
//! Each submitted artifact becomes its own [`UploadTask`] with its own
//! status channel; tasks share nothing but the HTTP client, so one task's
//! failure never touches another's status.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

use crate::capture::{ArtifactKind, CaptureArtifact};
use crate::config::UploadConfig;
use crate::errors::{Result, SessionError};

/// Descriptor returned by a storage endpoint on success
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub message: String,
    /// `data` from the recording endpoint, `result` from the screenshot one
    #[serde(default, alias = "result")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum UploadStatus {
    Pending,
    InFlight,
    Succeeded(UploadReceipt),
    Failed(String),
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Succeeded(_) | UploadStatus::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::InFlight => "in_flight",
            UploadStatus::Succeeded(_) => "succeeded",
            UploadStatus::Failed(_) => "failed",
        }
    }
}

/// Handle on one in-flight transfer.
///
/// Dropping it does not cancel the upload.
#[derive(Debug, Clone)]
pub struct UploadTask {
    id: String,
    kind: ArtifactKind,
    status: watch::Receiver<UploadStatus>,
}

impl UploadTask {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn status(&self) -> UploadStatus {
        self.status.borrow().clone()
    }

    /// Receiver for every status transition
    pub fn watch(&self) -> watch::Receiver<UploadStatus> {
        self.status.clone()
    }

    /// Wait for the terminal status.
    pub async fn wait(&self) -> UploadStatus {
        let mut status = self.status.clone();
        loop {
            let current = status.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if status.changed().await.is_err() {
                // Sender gone without a terminal status: the worker died.
                let last = status.borrow().clone();
                return if last.is_terminal() {
                    last
                } else {
                    UploadStatus::Failed("upload worker stopped unexpectedly".to_string())
                };
            }
        }
    }
}

/// Posts artifacts to the storage endpoints as multipart forms
#[derive(Debug, Clone)]
pub struct UploadCoordinator {
    http: Client,
    recording_url: String,
    screenshot_url: String,
}

impl UploadCoordinator {
    pub fn new(config: &UploadConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SessionError::Upload(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            recording_url: config.recording_url(),
            screenshot_url: config.screenshot_url(),
        })
    }

    pub fn endpoint(&self, kind: ArtifactKind) -> &str {
        match kind {
            ArtifactKind::Recording => &self.recording_url,
            ArtifactKind::Screenshot => &self.screenshot_url,
        }
    }

    /// Start transferring `artifact`; the returned task reports progress.
    ///
    /// Must be called inside a tokio runtime.
    pub fn submit(&self, artifact: CaptureArtifact) -> UploadTask {
        let id = uuid::Uuid::new_v4().to_string();
        let kind = artifact.kind();
        let (tx, rx) = watch::channel(UploadStatus::Pending);
        log::info!(
            "Upload {} queued: {} ({} bytes) for {}",
            id,
            kind,
            artifact.len(),
            artifact.session_code()
        );

        let http = self.http.clone();
        let url = self.endpoint(kind).to_string();
        let task_id = id.clone();
        tokio::spawn(async move {
            tx.send_replace(UploadStatus::InFlight);
            log::info!("Upload {} in flight to {}", task_id, url);

            let status = match post_artifact(&http, &url, artifact).await {
                Ok(receipt) => {
                    log::info!("Upload {} succeeded: {}", task_id, receipt.message);
                    UploadStatus::Succeeded(receipt)
                }
                Err(e) => {
                    log::warn!("Upload {} failed: {}", task_id, e);
                    UploadStatus::Failed(e.to_string())
                }
            };
            // Nobody may be watching any more; that is fine.
            tx.send_replace(status);
        });

        UploadTask {
            id,
            kind,
            status: rx,
        }
    }
}

async fn post_artifact(http: &Client, url: &str, artifact: CaptureArtifact) -> Result<UploadReceipt> {
    let kind = artifact.kind();
    let payload = artifact.payload().clone();
    let len = payload.len() as u64;
    let part = Part::stream_with_length(reqwest::Body::from(payload), len)
        .file_name(kind.file_name())
        .mime_str(artifact.mime_type())
        .map_err(|e| SessionError::Upload(format!("invalid mime type: {}", e)))?;

    let form = Form::new()
        .part(kind.form_field(), part)
        .text("applicantId", artifact.applicant_id().to_string())
        .text("ekycCode", artifact.session_code().to_string());

    let res = http
        .post(url)
        .multipart(form)
        .send()
        .await
        .map_err(|e| SessionError::Upload(format!("request failed: {}", e)))?;

    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(SessionError::Upload(format!(
            "unexpected status {}: {}",
            status, body
        )));
    }

    // A 2xx with an unreadable body still means the artifact was stored.
    Ok(serde_json::from_str(&body).unwrap_or_else(|_| UploadReceipt {
        message: body,
        data: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionMetadata;

    fn artifact(kind: ArtifactKind) -> CaptureArtifact {
        let metadata = SessionMetadata {
            applicant_id: "APP7".to_string(),
            ekyc_code: "SESSION42".to_string(),
        };
        CaptureArtifact::new(kind, vec![1u8, 2, 3], "video/webm", &metadata)
    }

    #[test]
    fn test_endpoints_by_kind() {
        let coordinator = UploadCoordinator::new(&UploadConfig::default()).unwrap();
        assert_eq!(
            coordinator.endpoint(ArtifactKind::Recording),
            "http://localhost:3000/api/upload"
        );
        assert_eq!(
            coordinator.endpoint(ArtifactKind::Screenshot),
            "http://localhost:3000/api/upload-screenshot"
        );
    }

    #[test]
    fn test_receipt_accepts_result_alias() {
        let receipt: UploadReceipt = serde_json::from_str(
            r#"{"message":"Screenshot uploaded successfully!","result":{"key":"k"}}"#,
        )
        .unwrap();
        assert_eq!(receipt.message, "Screenshot uploaded successfully!");
        assert_eq!(receipt.data.unwrap()["key"], "k");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!UploadStatus::Pending.is_terminal());
        assert!(!UploadStatus::InFlight.is_terminal());
        assert!(UploadStatus::Failed("x".into()).is_terminal());
        assert!(UploadStatus::Succeeded(UploadReceipt::default()).is_terminal());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_task() {
        let config = UploadConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_ms: 2000,
            ..UploadConfig::default()
        };
        let coordinator = UploadCoordinator::new(&config).unwrap();
        let task = coordinator.submit(artifact(ArtifactKind::Recording));

        let status = task.wait().await;
        assert!(matches!(status, UploadStatus::Failed(_)));
        assert_eq!(task.status(), status);
    }
}
