// src/session/frame_loop.rs
//
// The single worker that drives a stream: pull -> process -> record ->
// present -> preview -> throttle, one frame at a time.

use super::recorder::ClipRecorder;
use super::state::SessionHandle;
use super::throttle::FrameThrottle;
use crate::pipeline::{FrameProcessor, PipelineMetrics};
use crate::video_processor::{FrameSource, PreviewSink};
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct FrameLoop {
    source: Box<dyn FrameSource>,
    processor: Box<dyn FrameProcessor>,
    recorder: ClipRecorder,
    preview: Box<dyn PreviewSink>,
    session: SessionHandle,
    throttle: FrameThrottle,
    metrics: PipelineMetrics,
}

impl FrameLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        processor: Box<dyn FrameProcessor>,
        recorder: ClipRecorder,
        preview: Box<dyn PreviewSink>,
        session: SessionHandle,
        throttle: FrameThrottle,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            source,
            processor,
            recorder,
            preview,
            session,
            throttle,
            metrics,
        }
    }

    /// One pass. `Ok(false)` once the session was stopped or the source ran
    /// dry.
    pub fn step(&mut self) -> Result<bool> {
        if !self.session.is_active() {
            return Ok(false);
        }
        self.throttle.begin(Instant::now());

        let Some(frame) = self.source.next_frame()? else {
            info!("📭 Source exhausted");
            return Ok(false);
        };

        let processed = self.processor.process(frame);

        let rotations_before = self.recorder.rotations();
        if let Err(e) = self.recorder.record(&processed, Instant::now()) {
            warn!("⚠️  Recording frame {} failed: {:#}", processed.index, e);
        }
        let rotated = self.recorder.rotations() - rotations_before;
        if rotated > 0 {
            self.metrics.add(&self.metrics.clips_rotated, rotated);
        }

        let served = self.session.present(Arc::new(processed));
        match self.preview.publish(&served) {
            Ok(()) => self.metrics.inc(&self.metrics.previews_published),
            Err(e) => warn!("⚠️  Preview update failed: {:#}", e),
        }

        self.throttle.wait();
        Ok(true)
    }

    /// Run until stopped. The open clip is always finished on the way out.
    pub fn run(mut self) -> Result<PipelineMetrics> {
        info!("🎬 Stream started");
        self.processor.reset();

        let outcome = loop {
            match self.step() {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.recorder.finish();
        self.session.stop();

        let summary = self.metrics.summary();
        info!(
            "🏁 Stream ended: {} frames, {} ANPR events, {} violation upserts, {} clips rotated",
            summary.total_frames,
            summary.anpr_events,
            summary.violation_upserts,
            summary.clips_rotated
        );

        outcome.map(|_| self.metrics)
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }
}
