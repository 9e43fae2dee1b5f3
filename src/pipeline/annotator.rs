// src/pipeline/annotator.rs
//
// Per-frame orchestration: ANPR stage, then PPE stage, then eviction of
// stale per-track state, then overlay rendering. Only the stages' emission
// gates touch the event store; drawing never does.

use super::anpr::{AnprSettings, AnprStage};
use super::event_bus::{EventBus, PipelineEvent};
use super::frame_context::FrameContext;
use super::metrics::PipelineMetrics;
use super::ppe::{PpeSettings, PpeStage};
use crate::capabilities::{RegionDetector, TextReader, Tracker};
use crate::event_store::EventStore;
use crate::image_store::ImageStore;
use crate::types::{Config, Frame};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

const MAX_PENDING_EVENTS: usize = 1024;

/// Anything the frame loop can hand a raw frame to.
pub trait FrameProcessor: Send {
    fn process(&mut self, frame: Frame) -> Frame;

    /// Forget per-track state before a new stream.
    fn reset(&mut self) {}
}

/// The external models the stages call.
pub struct Capabilities {
    pub vehicle_tracker: Box<dyn Tracker>,
    pub plate_detector: Box<dyn RegionDetector>,
    pub ocr: Box<dyn TextReader>,
    pub person_tracker: Box<dyn Tracker>,
    pub ppe_detector: Box<dyn RegionDetector>,
}

/// Shared collaborators lent to a stage for one frame.
pub struct StageEnv<'a> {
    pub store: &'a dyn EventStore,
    pub images: &'a ImageStore,
    pub bus: &'a mut EventBus,
    pub metrics: &'a PipelineMetrics,
}

impl StageEnv<'_> {
    pub fn external_failure(&mut self, capability: &'static str, error: anyhow::Error) {
        self.metrics.inc(&self.metrics.external_failures);
        self.bus.publish(PipelineEvent::ExternalCallFailed {
            capability,
            error: format!("{:#}", error),
        });
    }

    pub fn persistence_failure(&mut self, track_id: u32, what: &'static str, error: anyhow::Error) {
        self.metrics.inc(&self.metrics.persistence_failures);
        self.bus.publish(PipelineEvent::PersistenceFailed {
            track_id,
            what,
            error: format!("{:#}", error),
        });
    }
}

pub struct FrameAnnotator {
    anpr: AnprStage,
    ppe: PpeStage,
    store: Arc<dyn EventStore>,
    images: ImageStore,
    bus: EventBus,
    metrics: PipelineMetrics,
    track_ttl_ms: f64,
}

impl FrameAnnotator {
    pub fn new(
        config: &Config,
        capabilities: Capabilities,
        store: Arc<dyn EventStore>,
        images: ImageStore,
        metrics: PipelineMetrics,
    ) -> Self {
        let anpr = AnprStage::new(
            AnprSettings::from_config(config),
            capabilities.vehicle_tracker,
            capabilities.plate_detector,
            capabilities.ocr,
        );
        let ppe = PpeStage::new(
            PpeSettings::from_config(config),
            capabilities.person_tracker,
            capabilities.ppe_detector,
        );
        Self {
            anpr,
            ppe,
            store,
            images,
            bus: EventBus::new(MAX_PENDING_EVENTS),
            metrics,
            track_ttl_ms: config.tracking.track_ttl_secs * 1000.0,
        }
    }

    /// Run both stages on `frame`; returns the annotated frame and what
    /// happened while producing it.
    pub fn analyze(&mut self, frame: Frame) -> (Frame, Vec<PipelineEvent>) {
        let started = Instant::now();
        let now_ms = frame.timestamp_ms;
        let mut ctx = FrameContext::new(frame);

        let mut env = StageEnv {
            store: self.store.as_ref(),
            images: &self.images,
            bus: &mut self.bus,
            metrics: &self.metrics,
        };
        self.anpr.run(&mut ctx, &mut env);
        self.ppe.run(&mut ctx, &mut env);

        let evicted =
            self.anpr.evict_stale(now_ms, self.track_ttl_ms) + self.ppe.evict_stale(now_ms, self.track_ttl_ms);
        if evicted > 0 {
            self.metrics.add(&self.metrics.tracks_evicted, evicted as u64);
            self.bus.publish(PipelineEvent::TracksEvicted { count: evicted });
        }

        self.metrics
            .add(&self.metrics.vehicles_seen, ctx.vehicles.len() as u64);
        self.metrics
            .add(&self.metrics.persons_seen, ctx.persons.len() as u64);
        self.metrics.inc(&self.metrics.total_frames);
        self.metrics.set_timing(
            &self.metrics.frame_time_us,
            started.elapsed().as_micros() as u64,
        );

        (ctx.render(), self.bus.drain())
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn anpr(&self) -> &AnprStage {
        &self.anpr
    }

    pub fn ppe(&self) -> &PpeStage {
        &self.ppe
    }
}

impl FrameProcessor for FrameAnnotator {
    fn process(&mut self, frame: Frame) -> Frame {
        let (out, events) = self.analyze(frame);
        for event in &events {
            event.log();
        }
        out
    }

    fn reset(&mut self) {
        if let Err(e) = self.anpr.reset() {
            warn!("⚠️  Vehicle tracker reset failed: {:#}", e);
        }
        if let Err(e) = self.ppe.reset() {
            warn!("⚠️  Person tracker reset failed: {:#}", e);
        }
        self.bus.drain();
    }
}
