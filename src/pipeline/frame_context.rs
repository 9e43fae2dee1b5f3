// src/pipeline/frame_context.rs
//
// Everything the stages learn about one frame. Crops are always cut from
// `frame`, which stays pristine; drawing happens on the output copy once
// all stages are done.

use crate::overlay::{self, Overlay};
use crate::types::{Frame, TrackedObject};

#[derive(Debug, Clone)]
pub struct FrameContext {
    pub frame_id: u64,
    pub timestamp_ms: f64,
    pub frame: Frame,

    pub vehicles: Vec<TrackedObject>,
    pub persons: Vec<TrackedObject>,
    pub overlays: Vec<Overlay>,
}

impl FrameContext {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame_id: frame.index,
            timestamp_ms: frame.timestamp_ms,
            frame,
            vehicles: Vec::new(),
            persons: Vec::new(),
            overlays: Vec::new(),
        }
    }

    pub fn annotate(&mut self, overlay: Overlay) {
        self.overlays.push(overlay);
    }

    /// Consume the context and return the frame with overlays painted.
    pub fn render(self) -> Frame {
        let mut out = self.frame;
        overlay::draw_all(&mut out, &self.overlays);
        out
    }
}
