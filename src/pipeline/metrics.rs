// src/pipeline/metrics.rs
//
// Counters for the frame loop. Shared by clone; all updates are relaxed
// atomics since they only feed logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub vehicles_seen: Arc<AtomicU64>,
    pub persons_seen: Arc<AtomicU64>,
    pub plates_finalized: Arc<AtomicU64>,
    pub anpr_events: Arc<AtomicU64>,
    pub duplicate_plates_suppressed: Arc<AtomicU64>,
    pub violation_upserts: Arc<AtomicU64>,
    pub external_failures: Arc<AtomicU64>,
    pub persistence_failures: Arc<AtomicU64>,
    pub tracks_evicted: Arc<AtomicU64>,
    pub clips_rotated: Arc<AtomicU64>,
    pub previews_published: Arc<AtomicU64>,
    pub frame_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            vehicles_seen: Arc::new(AtomicU64::new(0)),
            persons_seen: Arc::new(AtomicU64::new(0)),
            plates_finalized: Arc::new(AtomicU64::new(0)),
            anpr_events: Arc::new(AtomicU64::new(0)),
            duplicate_plates_suppressed: Arc::new(AtomicU64::new(0)),
            violation_upserts: Arc::new(AtomicU64::new(0)),
            external_failures: Arc::new(AtomicU64::new(0)),
            persistence_failures: Arc::new(AtomicU64::new(0)),
            tracks_evicted: Arc::new(AtomicU64::new(0)),
            clips_rotated: Arc::new(AtomicU64::new(0)),
            previews_published: Arc::new(AtomicU64::new(0)),
            frame_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn get(&self, counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.get(&self.total_frames),
            fps: self.fps(),
            vehicles_seen: self.get(&self.vehicles_seen),
            persons_seen: self.get(&self.persons_seen),
            plates_finalized: self.get(&self.plates_finalized),
            anpr_events: self.get(&self.anpr_events),
            duplicate_plates_suppressed: self.get(&self.duplicate_plates_suppressed),
            violation_upserts: self.get(&self.violation_upserts),
            external_failures: self.get(&self.external_failures),
            persistence_failures: self.get(&self.persistence_failures),
            tracks_evicted: self.get(&self.tracks_evicted),
            clips_rotated: self.get(&self.clips_rotated),
            previews_published: self.get(&self.previews_published),
            last_frame_us: self.get(&self.frame_time_us),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub vehicles_seen: u64,
    pub persons_seen: u64,
    pub plates_finalized: u64,
    pub anpr_events: u64,
    pub duplicate_plates_suppressed: u64,
    pub violation_upserts: u64,
    pub external_failures: u64,
    pub persistence_failures: u64,
    pub tracks_evicted: u64,
    pub clips_rotated: u64,
    pub previews_published: u64,
    pub last_frame_us: u64,
    pub elapsed_secs: f64,
}
