// src/session/mod.rs

pub mod frame_loop;
pub mod recorder;
pub mod state;
pub mod throttle;

pub use frame_loop::FrameLoop;
pub use recorder::{ClipFactory, ClipRecorder, ClipWriter};
pub use state::{SessionHandle, ViewMode};
pub use throttle::FrameThrottle;

#[cfg(test)]
pub mod testing;
