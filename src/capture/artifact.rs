use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::SessionMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Recording,
    Screenshot,
}

impl ArtifactKind {
    /// Multipart field the storage endpoint reads the file from
    pub fn form_field(&self) -> &'static str {
        match self {
            ArtifactKind::Recording => "video",
            ArtifactKind::Screenshot => "screenshot",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Recording => "recording.webm",
            ArtifactKind::Screenshot => "screenshot.png",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Recording => f.write_str("recording"),
            ArtifactKind::Screenshot => f.write_str("screenshot"),
        }
    }
}

/// A fully assembled recording or screenshot, tagged with its session.
///
/// There are no setters: once built an artifact is never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureArtifact {
    kind: ArtifactKind,
    payload: Bytes,
    mime_type: String,
    session_code: String,
    applicant_id: String,
    created_at: DateTime<Utc>,
}

impl CaptureArtifact {
    pub fn new(
        kind: ArtifactKind,
        payload: impl Into<Bytes>,
        mime_type: impl Into<String>,
        metadata: &SessionMetadata,
    ) -> Self {
        Self {
            kind,
            payload: payload.into(),
            mime_type: mime_type.into(),
            session_code: metadata.ekyc_code.clone(),
            applicant_id: metadata.applicant_id.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn session_code(&self) -> &str {
        &self.session_code
    }

    pub fn applicant_id(&self) -> &str {
        &self.applicant_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            applicant_id: self.applicant_id.clone(),
            ekyc_code: self.session_code.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_carries_metadata() {
        let metadata = SessionMetadata {
            applicant_id: "APP7".to_string(),
            ekyc_code: "SESSION42".to_string(),
        };
        let artifact =
            CaptureArtifact::new(ArtifactKind::Recording, vec![1u8, 2, 3], "video/webm", &metadata);

        assert_eq!(artifact.len(), 3);
        assert_eq!(artifact.session_code(), "SESSION42");
        assert_eq!(artifact.applicant_id(), "APP7");
        assert_eq!(artifact.metadata(), metadata);
    }

    #[test]
    fn test_kind_fields() {
        assert_eq!(ArtifactKind::Recording.form_field(), "video");
        assert_eq!(ArtifactKind::Screenshot.form_field(), "screenshot");
        assert!(ArtifactKind::Screenshot.file_name().ends_with(".png"));
    }
}
