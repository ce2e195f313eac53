//! Capture pipeline
//!
//! Two independent modes over a bound stream: [`Recorder`] buffers encoded
//! chunks until stopped, [`capture_screenshot`] encodes the current frame
//! on demand. Both only ever hand out fully assembled artifacts.

mod artifact;
mod recorder;
mod screenshot;

pub use artifact::{ArtifactKind, CaptureArtifact};
pub use recorder::{Recorder, RecordingStats};
pub use screenshot::{capture_screenshot, encode_png, SCREENSHOT_MIME};
