// src/session/state.rs
//
// Live / Paused / Resuming view state for one stream.
//
// The mode only decides which frame the preview shows. Processing and
// recording never stop while paused.

use crate::types::Frame;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Live,
    Paused,
    /// Freshly resumed; behaves like Live and becomes Live on the next frame.
    Resuming,
}

#[derive(Debug)]
struct SessionState {
    mode: ViewMode,
    active: bool,
    frozen: Option<Arc<Frame>>,
    preview: Option<Arc<Frame>>,
}

/// Shared handle to the session. The frame loop and the control side each
/// hold a clone; every read and write goes through one lock.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<SessionState>>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                mode: ViewMode::Live,
                active: true,
                frozen: None,
                preview: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Live/Resuming -> Paused. The next presented frame becomes the freeze.
    pub fn pause(&self) -> bool {
        let mut s = self.state();
        if s.mode == ViewMode::Paused {
            return false;
        }
        s.mode = ViewMode::Paused;
        s.frozen = None;
        info!("⏸️  Preview paused");
        true
    }

    /// Paused -> Resuming.
    pub fn resume(&self) -> bool {
        let mut s = self.state();
        if s.mode != ViewMode::Paused {
            return false;
        }
        s.mode = ViewMode::Resuming;
        info!("▶️  Preview resuming");
        true
    }

    /// Jump straight back to the live view from any mode.
    pub fn go_live(&self) {
        let mut s = self.state();
        s.mode = ViewMode::Live;
        s.frozen = None;
        info!("🔴 Preview live");
    }

    /// Cooperative stop; the frame loop exits at the top of its next pass.
    pub fn stop(&self) {
        let mut s = self.state();
        if s.active {
            s.active = false;
            info!("⏹️  Stream stop requested");
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.state().mode
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    /// Frame most recently served to the preview.
    pub fn preview(&self) -> Option<Arc<Frame>> {
        self.state().preview.clone()
    }

    /// Pick the preview frame for this tick given the newest processed frame.
    pub fn present(&self, processed: Arc<Frame>) -> Arc<Frame> {
        let mut s = self.state();
        let served = match s.mode {
            ViewMode::Paused => s.frozen.get_or_insert(processed).clone(),
            ViewMode::Resuming => {
                s.frozen = None;
                s.mode = ViewMode::Live;
                processed
            }
            ViewMode::Live => processed,
        };
        s.preview = Some(served.clone());
        served
    }
}
