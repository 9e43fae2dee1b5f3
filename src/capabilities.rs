// src/capabilities.rs
//
// Seams to the external vision models. The pipeline only ever sees these
// traits; errors coming out of them are treated as "nothing detected".

use crate::types::{Detection, Frame, TrackedObject};
use anyhow::Result;

/// Detector + tracker: boxes with identities that persist while the object
/// stays continuously visible.
pub trait Tracker: Send {
    fn track(&mut self, frame: &Frame, classes: &[u32], confidence: f32)
        -> Result<Vec<TrackedObject>>;

    /// Forget all identities (new stream).
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Untracked detector run inside a crop (licence plates, PPE items).
pub trait RegionDetector: Send {
    fn detect(&mut self, crop: &Frame, confidence: f32) -> Result<Vec<Detection>>;
}

/// Best-effort OCR. Empty string when nothing was read.
pub trait TextReader: Send {
    fn read_text(&mut self, crop: &Frame) -> Result<String>;
}
