// src/pipeline/ppe.rs
//
// Person -> PPE detector -> violation aggregation.
//
// Unlike plates there is no freeze: every frame that shows at least one
// missing-equipment label merges into the person's record.

use super::annotator::StageEnv;
use super::event_bus::PipelineEvent;
use super::frame_context::FrameContext;
use crate::capabilities::{RegionDetector, Tracker};
use crate::image_store::ImageKind;
use crate::overlay::{colors, Overlay};
use crate::types::Config;
use crate::violations::ViolationAggregator;
use anyhow::Result;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct PpeSettings {
    pub camera_id: u32,
    pub person_class: u32,
    pub person_confidence: f32,
    pub ppe_confidence: f32,
    pub violation_prefix: String,
}

impl PpeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            camera_id: config.camera.id,
            person_class: config.ppe.person_class,
            person_confidence: config.ppe.person_confidence,
            ppe_confidence: config.ppe.ppe_confidence,
            violation_prefix: config.ppe.violation_prefix.clone(),
        }
    }
}

pub struct PpeStage {
    settings: PpeSettings,
    tracker: Box<dyn Tracker>,
    detector: Box<dyn RegionDetector>,
    aggregator: ViolationAggregator,
    /// person id -> last seen (ms); present once the person image is on disk
    saved_persons: HashMap<u32, f64>,
}

impl PpeStage {
    pub fn new(settings: PpeSettings, tracker: Box<dyn Tracker>, detector: Box<dyn RegionDetector>) -> Self {
        Self {
            settings,
            tracker,
            detector,
            aggregator: ViolationAggregator::new(),
            saved_persons: HashMap::new(),
        }
    }

    pub fn run(&mut self, ctx: &mut FrameContext, env: &mut StageEnv<'_>) {
        let now_ms = ctx.timestamp_ms;
        let classes = [self.settings.person_class];
        let persons = match self
            .tracker
            .track(&ctx.frame, &classes, self.settings.person_confidence)
        {
            Ok(p) => p,
            Err(e) => {
                env.external_failure("person tracker", e);
                return;
            }
        };

        for person in &persons {
            let person_id = person.track_id;
            self.aggregator.touch(person_id, now_ms);

            let Some(pbox) = person.bbox.clamped(ctx.frame.width, ctx.frame.height) else {
                continue;
            };
            let Some(person_crop) = ctx.frame.crop(&pbox) else {
                continue;
            };

            // First sighting: keep one image of the person, violation or not.
            match self.saved_persons.get_mut(&person_id) {
                Some(last_seen) => *last_seen = now_ms,
                None => match env.images.save(ImageKind::Person, person_id, &person_crop) {
                    Ok(_) => {
                        self.saved_persons.insert(person_id, now_ms);
                    }
                    Err(e) => env.persistence_failure(person_id, "person image", e),
                },
            }
            let person_image = env.images.reference(ImageKind::Person, person_id);

            let items = match self.detector.detect(&person_crop, self.settings.ppe_confidence) {
                Ok(d) => d,
                Err(e) => {
                    env.external_failure("ppe detector", e);
                    Vec::new()
                }
            };

            let mut found = BTreeSet::new();
            for item in &items {
                if !item.class_name.starts_with(&self.settings.violation_prefix) {
                    continue;
                }
                // The label still counts when the box itself is unusable.
                if let Some(ibox) = item.bbox.clamped(person_crop.width, person_crop.height) {
                    ctx.annotate(Overlay::new(
                        ibox.offset(pbox.x1, pbox.y1),
                        colors::VIOLATION_RED,
                        item.class_name.clone(),
                    ));
                }
                found.insert(item.class_name.clone());
            }

            if !found.is_empty() {
                match self.aggregator.record(
                    person_id,
                    found.iter().map(String::as_str),
                    &person_image,
                    self.settings.camera_id,
                    now_ms,
                    env.store,
                ) {
                    Ok(violations) => {
                        env.metrics.inc(&env.metrics.violation_upserts);
                        env.bus.publish(PipelineEvent::ViolationsMerged {
                            person_id,
                            violations,
                        });
                    }
                    Err(e) => env.persistence_failure(person_id, "PPE violations", e),
                }
            }

            ctx.annotate(Overlay::new(
                pbox,
                colors::PERSON_GREEN,
                format!("Person {}", person_id),
            ));
        }

        ctx.persons = persons;
    }

    pub fn evict_stale(&mut self, now_ms: f64, ttl_ms: f64) -> usize {
        let before = self.saved_persons.len();
        self.saved_persons.retain(|_, last| now_ms - *last <= ttl_ms);
        let evicted_people = before - self.saved_persons.len();
        self.aggregator.evict_stale(now_ms, ttl_ms).max(evicted_people)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.aggregator.reset();
        self.saved_persons.clear();
        self.tracker.reset()
    }

    pub fn aggregator(&self) -> &ViolationAggregator {
        &self.aggregator
    }

    pub fn has_saved_image(&self, person_id: u32) -> bool {
        self.saved_persons.contains_key(&person_id)
    }
}
