// src/pipeline/mod.rs

pub mod annotator;
pub mod anpr;
pub mod event_bus;
pub mod frame_context;
pub mod metrics;
pub mod ppe;

#[cfg(test)]
pub mod testing;

pub use annotator::{Capabilities, FrameAnnotator, FrameProcessor};
pub use event_bus::{EventBus, PipelineEvent};
pub use frame_context::FrameContext;
pub use metrics::PipelineMetrics;
