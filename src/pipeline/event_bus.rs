// src/pipeline/event_bus.rs
//
// Per-frame outcome log. Stages publish what happened instead of logging
// inline; the frame loop drains and reports once per frame.

use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    PlateFinalized {
        track_id: u32,
        plate: String,
    },

    AnprEventStored {
        track_id: u32,
        plate: String,
        vehicle_image: String,
        plate_image: String,
    },

    DuplicatePlateSuppressed {
        track_id: u32,
        plate: String,
        original_track_id: u32,
    },

    ViolationsMerged {
        person_id: u32,
        violations: BTreeSet<String>,
    },

    PersistenceFailed {
        track_id: u32,
        what: &'static str,
        error: String,
    },

    ExternalCallFailed {
        capability: &'static str,
        error: String,
    },

    TracksEvicted {
        count: usize,
    },
}

impl PipelineEvent {
    pub fn log(&self) {
        match self {
            Self::PlateFinalized { track_id, plate } => {
                debug!("🔒 Track {} plate frozen: {}", track_id, plate)
            }
            Self::AnprEventStored {
                track_id, plate, ..
            } => info!("🚗 ANPR event: track {} plate {}", track_id, plate),
            Self::DuplicatePlateSuppressed {
                track_id,
                plate,
                original_track_id,
            } => info!(
                "♻️  Plate {} on track {} already reported by track {}",
                plate, track_id, original_track_id
            ),
            Self::ViolationsMerged {
                person_id,
                violations,
            } => info!("🦺 Person {} violations: {:?}", person_id, violations),
            Self::PersistenceFailed {
                track_id,
                what,
                error,
            } => warn!(
                "⚠️  Persisting {} for track {} failed, will retry: {}",
                what, track_id, error
            ),
            Self::ExternalCallFailed { capability, error } => {
                warn!("⚠️  {} call failed, treating as no detections: {}", capability, error)
            }
            Self::TracksEvicted { count } => debug!("Evicted {} stale track(s)", count),
        }
    }
}

pub struct EventBus {
    events: VecDeque<PipelineEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}
