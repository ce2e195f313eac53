//! Testing utilities for ekyc-session
//!
//! Synthetic media devices and feeds so sessions can be exercised offline,
//! without cameras or a browser.

pub mod synthetic_media;

pub use synthetic_media::{
    drive_synthetic_feed, synthetic_chunk, synthetic_video_frame, SyntheticMediaDevices,
};
