// src/pipeline/anpr.rs
//
// Vehicle -> plate -> OCR -> consensus -> exactly-once ANPR event.
//
// Emission gate: the consensus buffer reported `just_finalized` and the
// track is not already in `emitted` or waiting for a retry.
// A track enters `emitted` only after both crops and the event row were
// written. A failed write keeps the plate and crops in `retry`, which is
// drained at the top of every frame whether or not the track is still in
// view, so the event is never lost and never duplicated.

use super::annotator::StageEnv;
use super::event_bus::PipelineEvent;
use super::frame_context::FrameContext;
use crate::capabilities::{RegionDetector, TextReader, Tracker};
use crate::consensus::{ConsensusConfig, PlateConsensus};
use crate::event_store::AnprEvent;
use crate::image_store::ImageKind;
use crate::overlay::{colors, Overlay, DETECTING_LABEL};
use crate::plate_text::normalize_with_min;
use crate::types::{Config, Frame};
use anyhow::Result;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct AnprSettings {
    pub camera_id: u32,
    pub vehicle_classes: Vec<u32>,
    pub vehicle_confidence: f32,
    pub plate_confidence: f32,
    pub min_plate_len: usize,
    pub consensus: ConsensusConfig,
    /// Same plate from a different track inside this window is not
    /// re-emitted. 0 disables the check.
    pub plate_dedup_ms: f64,
}

impl AnprSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            camera_id: config.camera.id,
            vehicle_classes: config.anpr.vehicle_classes.clone(),
            vehicle_confidence: config.anpr.vehicle_confidence,
            plate_confidence: config.anpr.plate_confidence,
            min_plate_len: config.anpr.min_plate_len,
            consensus: ConsensusConfig {
                window: config.anpr.consensus_window,
                single_frame_fast_path: config.anpr.single_frame_fast_path,
            },
            plate_dedup_ms: config.tracking.plate_dedup_secs * 1000.0,
        }
    }
}

/// Everything needed to write one ANPR event again.
#[derive(Debug, Clone)]
struct PendingEmission {
    plate: String,
    vehicle_crop: Frame,
    plate_crop: Frame,
}

pub struct AnprStage {
    settings: AnprSettings,
    tracker: Box<dyn Tracker>,
    plate_detector: Box<dyn RegionDetector>,
    ocr: Box<dyn TextReader>,
    consensus: PlateConsensus,
    emitted: HashSet<u32>,
    retry: HashMap<u32, PendingEmission>,
    /// plate -> (track that reported it, when)
    recent_plates: HashMap<String, (u32, f64)>,
}

impl AnprStage {
    pub fn new(
        settings: AnprSettings,
        tracker: Box<dyn Tracker>,
        plate_detector: Box<dyn RegionDetector>,
        ocr: Box<dyn TextReader>,
    ) -> Self {
        let consensus = PlateConsensus::new(settings.consensus.clone());
        Self {
            settings,
            tracker,
            plate_detector,
            ocr,
            consensus,
            emitted: HashSet::new(),
            retry: HashMap::new(),
            recent_plates: HashMap::new(),
        }
    }

    pub fn run(&mut self, ctx: &mut FrameContext, env: &mut StageEnv<'_>) {
        let now_ms = ctx.timestamp_ms;
        self.retry_pending(now_ms, env);

        let vehicles = match self.tracker.track(
            &ctx.frame,
            &self.settings.vehicle_classes,
            self.settings.vehicle_confidence,
        ) {
            Ok(v) => v,
            Err(e) => {
                env.external_failure("vehicle tracker", e);
                return;
            }
        };

        for vehicle in &vehicles {
            let track_id = vehicle.track_id;
            self.consensus.touch(track_id, now_ms);

            let Some(vbox) = vehicle.bbox.clamped(ctx.frame.width, ctx.frame.height) else {
                continue;
            };
            let Some(vehicle_crop) = ctx.frame.crop(&vbox) else {
                continue;
            };
            ctx.annotate(Overlay::new(
                vbox,
                colors::VEHICLE_BLUE,
                format!("ID {}", track_id),
            ));

            let plates = match self
                .plate_detector
                .detect(&vehicle_crop, self.settings.plate_confidence)
            {
                Ok(p) => p,
                Err(e) => {
                    env.external_failure("plate detector", e);
                    continue;
                }
            };

            for plate in &plates {
                let Some(pbox) = plate.bbox.clamped(vehicle_crop.width, vehicle_crop.height)
                else {
                    continue;
                };
                let Some(plate_crop) = vehicle_crop.crop(&pbox) else {
                    continue;
                };

                let raw = match self.ocr.read_text(&plate_crop) {
                    Ok(t) => t,
                    Err(e) => {
                        env.external_failure("ocr", e);
                        String::new()
                    }
                };

                // Unreadable or non-plate text never reaches the buffer.
                if let Some(text) = normalize_with_min(&raw, self.settings.min_plate_len) {
                    let obs = self.consensus.observe(track_id, &text, now_ms);
                    if let Some(plate_text) = &obs.current_best {
                        if obs.just_finalized {
                            env.metrics.inc(&env.metrics.plates_finalized);
                            env.bus.publish(PipelineEvent::PlateFinalized {
                                track_id,
                                plate: plate_text.clone(),
                            });
                        }
                        let settled = self.emitted.contains(&track_id)
                            || self.retry.contains_key(&track_id);
                        if obs.just_finalized && !settled {
                            let pending = PendingEmission {
                                plate: plate_text.clone(),
                                vehicle_crop: vehicle_crop.clone(),
                                plate_crop: plate_crop.clone(),
                            };
                            self.emit(track_id, pending, now_ms, env);
                        }
                    }
                }

                let display = self
                    .consensus
                    .frozen(track_id)
                    .unwrap_or(DETECTING_LABEL)
                    .to_string();
                ctx.annotate(Overlay::new(
                    pbox.offset(vbox.x1, vbox.y1),
                    colors::PLATE_GREEN,
                    display,
                ));
            }
        }

        ctx.vehicles = vehicles;
    }

    /// Write every emission that failed on an earlier frame.
    fn retry_pending(&mut self, now_ms: f64, env: &mut StageEnv<'_>) {
        if self.retry.is_empty() {
            return;
        }
        let mut ids: Vec<u32> = self.retry.keys().copied().collect();
        ids.sort_unstable();
        for track_id in ids {
            if let Some(pending) = self.retry.remove(&track_id) {
                self.emit(track_id, pending, now_ms, env);
            }
        }
    }

    fn emit(
        &mut self,
        track_id: u32,
        pending: PendingEmission,
        now_ms: f64,
        env: &mut StageEnv<'_>,
    ) {
        let plate = pending.plate.as_str();
        if let Some(original_track_id) = self.recently_reported_by(plate, track_id, now_ms) {
            self.mark_emitted(track_id);
            env.metrics.inc(&env.metrics.duplicate_plates_suppressed);
            env.bus.publish(PipelineEvent::DuplicatePlateSuppressed {
                track_id,
                plate: plate.to_string(),
                original_track_id,
            });
            return;
        }

        let images = env.images;
        let store = env.store;
        let camera_id = self.settings.camera_id;
        let persisted = (|| -> Result<AnprEvent> {
            let vehicle_image = images.save(ImageKind::Vehicle, track_id, &pending.vehicle_crop)?;
            let plate_image = images.save(ImageKind::Plate, track_id, &pending.plate_crop)?;
            let event = AnprEvent::new(track_id, plate, &vehicle_image, &plate_image, camera_id);
            store.insert_anpr(&event)?;
            Ok(event)
        })();

        match persisted {
            Ok(event) => {
                self.mark_emitted(track_id);
                if self.settings.plate_dedup_ms > 0.0 {
                    self.recent_plates
                        .insert(plate.to_string(), (track_id, now_ms));
                }
                env.metrics.inc(&env.metrics.anpr_events);
                env.bus.publish(PipelineEvent::AnprEventStored {
                    track_id,
                    plate: event.plate_number,
                    vehicle_image: event.vehicle_image,
                    plate_image: event.plate_image,
                });
            }
            Err(e) => {
                self.retry.insert(track_id, pending);
                env.persistence_failure(track_id, "ANPR event", e);
            }
        }
    }

    /// A track evicted while its write was pending starts fresh if it
    /// returns, so only live tracks are remembered as emitted.
    fn mark_emitted(&mut self, track_id: u32) {
        if self.consensus.contains(track_id) {
            self.emitted.insert(track_id);
        }
    }

    fn recently_reported_by(&self, plate: &str, track_id: u32, now_ms: f64) -> Option<u32> {
        if self.settings.plate_dedup_ms <= 0.0 {
            return None;
        }
        let &(original, at) = self.recent_plates.get(plate)?;
        (original != track_id && now_ms - at <= self.settings.plate_dedup_ms).then_some(original)
    }

    pub fn evict_stale(&mut self, now_ms: f64, ttl_ms: f64) -> usize {
        let evicted = self.consensus.evict_stale(now_ms, ttl_ms);
        if evicted > 0 {
            let consensus = &self.consensus;
            self.emitted.retain(|id| consensus.contains(*id));
        }
        let window = self.settings.plate_dedup_ms;
        self.recent_plates.retain(|_, (_, at)| now_ms - *at <= window);
        evicted
    }

    pub fn reset(&mut self) -> Result<()> {
        self.consensus.reset();
        self.emitted.clear();
        self.retry.clear();
        self.recent_plates.clear();
        self.tracker.reset()
    }

    pub fn consensus(&self) -> &PlateConsensus {
        &self.consensus
    }

    pub fn has_emitted(&self, track_id: u32) -> bool {
        self.emitted.contains(&track_id)
    }

    pub fn pending_retries(&self) -> usize {
        self.retry.len()
    }
}
