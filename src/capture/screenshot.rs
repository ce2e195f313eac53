//! Point-in-time PNG snapshot of a stream's current frame

use std::io::Cursor;

use super::{ArtifactKind, CaptureArtifact};
use crate::errors::{Result, SessionError};
use crate::identity::SessionMetadata;
use crate::media::{MediaHandle, VideoFrame};

pub const SCREENSHOT_MIME: &str = "image/png";

/// Snapshot the frame currently shown for `stream` at its native size.
pub fn capture_screenshot(
    stream: &MediaHandle,
    metadata: &SessionMetadata,
) -> Result<CaptureArtifact> {
    if !stream.has_video() {
        return Err(SessionError::Capture(format!(
            "stream {} has no video track",
            stream.id()
        )));
    }
    let frame = stream.current_frame().ok_or_else(|| {
        SessionError::Capture(format!("stream {} has not rendered a frame yet", stream.id()))
    })?;

    let png = encode_png(&frame)?;
    log::info!(
        "Screenshot of {} captured: {}x{}, {} bytes",
        stream.id(),
        frame.width,
        frame.height,
        png.len()
    );
    Ok(CaptureArtifact::new(
        ArtifactKind::Screenshot,
        png,
        SCREENSHOT_MIME,
        metadata,
    ))
}

/// Encode an RGBA frame as PNG
pub fn encode_png(frame: &VideoFrame) -> Result<Vec<u8>> {
    if !frame.is_valid() {
        return Err(SessionError::Capture(format!(
            "frame buffer holds {} bytes, expected {} for {}x{} RGBA",
            frame.data.len(),
            frame.expected_len(),
            frame.width,
            frame.height
        )));
    }

    let img = image::RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or_else(|| SessionError::Capture("failed to build image from frame".to_string()))?;

    let mut png = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| SessionError::Capture(format!("PNG encoding failed: {}", e)))?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaSource, TrackKind};
    use crate::testing::synthetic_video_frame;

    fn metadata() -> SessionMetadata {
        SessionMetadata {
            applicant_id: "APP7".to_string(),
            ekyc_code: "SESSION42".to_string(),
        }
    }

    #[test]
    fn test_screenshot_matches_native_resolution() {
        let stream = MediaHandle::new(MediaSource::Local, vec![TrackKind::Video], 4);
        stream.publish_frame(synthetic_video_frame(1, 64, 48));

        let artifact = capture_screenshot(&stream.remote_view(), &metadata()).unwrap();
        assert_eq!(artifact.kind(), ArtifactKind::Screenshot);
        assert_eq!(artifact.mime_type(), "image/png");

        let decoded = image::load_from_memory(artifact.payload()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_no_frame_is_an_error() {
        let stream = MediaHandle::new(MediaSource::Local, vec![TrackKind::Video], 4);
        assert!(matches!(
            capture_screenshot(&stream, &metadata()),
            Err(SessionError::Capture(_))
        ));
    }

    #[test]
    fn test_audio_only_stream_is_an_error() {
        let stream = MediaHandle::new(MediaSource::Local, vec![TrackKind::Audio], 4);
        assert!(capture_screenshot(&stream, &metadata()).is_err());
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let frame = VideoFrame::new(4, 4, vec![0u8; 10]);
        assert!(encode_png(&frame).is_err());
    }
}
