// src/pipeline/testing.rs
//
// Hand-driven capability doubles. Each double shares its state through an
// Arc so a test can change what the "model" sees between frames.

use super::annotator::{Capabilities, FrameAnnotator};
use super::metrics::PipelineMetrics;
use crate::capabilities::{RegionDetector, TextReader, Tracker};
use crate::event_store::{
    AnprEvent, EventStore, MemoryEventStore, PpeViolationRecord, ViolationUpsert,
};
use crate::image_store::ImageStore;
use crate::types::{BBox, Config, Detection, Frame, StorageConfig, TrackedObject};
use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub type Shared<T> = Arc<Mutex<T>>;

pub struct SharedTracker {
    pub objects: Shared<Vec<TrackedObject>>,
    pub down: Arc<AtomicBool>,
}

impl Tracker for SharedTracker {
    fn track(&mut self, _frame: &Frame, classes: &[u32], _confidence: f32) -> Result<Vec<TrackedObject>> {
        if self.down.load(Ordering::SeqCst) {
            bail!("tracker offline");
        }
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|o| classes.contains(&o.class_id))
            .cloned()
            .collect())
    }
}

pub struct SharedDetector {
    pub detections: Shared<Vec<Detection>>,
}

impl RegionDetector for SharedDetector {
    fn detect(&mut self, _crop: &Frame, confidence: f32) -> Result<Vec<Detection>> {
        let detections = self.detections.lock().unwrap();
        Ok(detections
            .iter()
            .filter(|d| d.confidence >= confidence)
            .cloned()
            .collect())
    }
}

pub struct SharedReader {
    pub text: Shared<String>,
}

impl TextReader for SharedReader {
    fn read_text(&mut self, _crop: &Frame) -> Result<String> {
        Ok(self.text.lock().unwrap().clone())
    }
}

/// Memory store that can be switched off.
#[derive(Default)]
pub struct SwitchableStore {
    pub inner: MemoryEventStore,
    pub down: AtomicBool,
}

impl EventStore for SwitchableStore {
    fn insert_anpr(&self, event: &AnprEvent) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            bail!("database unavailable");
        }
        self.inner.insert_anpr(event)
    }

    fn upsert_violation(&self, upsert: &ViolationUpsert) -> Result<PpeViolationRecord> {
        if self.down.load(Ordering::SeqCst) {
            bail!("database unavailable");
        }
        self.inner.upsert_violation(upsert)
    }

    fn anpr_events(&self) -> Result<Vec<AnprEvent>> {
        self.inner.anpr_events()
    }

    fn ppe_violations(&self) -> Result<Vec<PpeViolationRecord>> {
        self.inner.ppe_violations()
    }
}

pub const CAR: u32 = 2;
pub const PERSON: u32 = 0;

pub fn vehicle(track_id: u32) -> TrackedObject {
    TrackedObject {
        bbox: BBox::new(10, 10, 110, 70),
        track_id,
        class_id: CAR,
    }
}

pub fn person(track_id: u32) -> TrackedObject {
    TrackedObject {
        bbox: BBox::new(120, 10, 150, 110),
        track_id,
        class_id: PERSON,
    }
}

pub fn detection(class_name: &str, bbox: BBox) -> Detection {
    Detection {
        bbox,
        class_name: class_name.to_string(),
        confidence: 0.9,
    }
}

pub fn frame(index: u64, timestamp_ms: f64) -> Frame {
    Frame::filled(160, 120, [40, 40, 40], index, timestamp_ms)
}

/// A fully wired annotator plus the knobs behind its doubles.
pub struct Rig {
    pub annotator: FrameAnnotator,
    pub store: Arc<SwitchableStore>,
    pub images: ImageStore,
    pub vehicles: Shared<Vec<TrackedObject>>,
    pub vehicle_tracker_down: Arc<AtomicBool>,
    pub plates: Shared<Vec<Detection>>,
    pub ocr_text: Shared<String>,
    pub persons: Shared<Vec<TrackedObject>>,
    pub ppe_items: Shared<Vec<Detection>>,
    pub dir: TempDir,
}

impl Rig {
    pub fn new(configure: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage = StorageConfig {
            events_dir: dir.path().join("db").to_string_lossy().into_owned(),
            vehicle_dir: dir.path().join("vehicles").to_string_lossy().into_owned(),
            plate_dir: dir.path().join("plates").to_string_lossy().into_owned(),
            person_dir: dir.path().join("persons").to_string_lossy().into_owned(),
        };
        configure(&mut config);

        let store = Arc::new(SwitchableStore::default());
        let vehicles: Shared<Vec<TrackedObject>> = Arc::default();
        let vehicle_tracker_down = Arc::new(AtomicBool::new(false));
        let plates = Arc::new(Mutex::new(vec![detection(
            "license_plate",
            BBox::new(20, 30, 80, 50),
        )]));
        let ocr_text: Shared<String> = Arc::default();
        let persons: Shared<Vec<TrackedObject>> = Arc::default();
        let ppe_items: Shared<Vec<Detection>> = Arc::default();

        let capabilities = Capabilities {
            vehicle_tracker: Box::new(SharedTracker {
                objects: vehicles.clone(),
                down: vehicle_tracker_down.clone(),
            }),
            plate_detector: Box::new(SharedDetector {
                detections: plates.clone(),
            }),
            ocr: Box::new(SharedReader {
                text: ocr_text.clone(),
            }),
            person_tracker: Box::new(SharedTracker {
                objects: persons.clone(),
                down: Arc::new(AtomicBool::new(false)),
            }),
            ppe_detector: Box::new(SharedDetector {
                detections: ppe_items.clone(),
            }),
        };

        let images = ImageStore::new(&config.storage, config.stream.jpeg_quality).unwrap();
        let annotator_images =
            ImageStore::new(&config.storage, config.stream.jpeg_quality).unwrap();
        let annotator = FrameAnnotator::new(
            &config,
            capabilities,
            store.clone(),
            annotator_images,
            PipelineMetrics::new(),
        );

        Self {
            annotator,
            store,
            images,
            vehicles,
            vehicle_tracker_down,
            plates,
            ocr_text,
            persons,
            ppe_items,
            dir,
        }
    }

    pub fn show_vehicles(&self, objects: Vec<TrackedObject>) {
        *self.vehicles.lock().unwrap() = objects;
    }

    pub fn show_persons(&self, objects: Vec<TrackedObject>) {
        *self.persons.lock().unwrap() = objects;
    }

    pub fn read_as(&self, text: &str) {
        *self.ocr_text.lock().unwrap() = text.to_string();
    }

    pub fn show_ppe(&self, items: Vec<Detection>) {
        *self.ppe_items.lock().unwrap() = items;
    }

    pub fn store_down(&self, down: bool) {
        self.store.down.store(down, Ordering::SeqCst);
    }

    pub fn anpr_rows(&self) -> Vec<AnprEvent> {
        self.store.anpr_events().unwrap()
    }

    pub fn ppe_rows(&self) -> Vec<PpeViolationRecord> {
        self.store.ppe_violations().unwrap()
    }
}
