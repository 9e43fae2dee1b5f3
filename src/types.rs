use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub anpr: AnprConfig,
    pub ppe: PpeConfig,
    pub tracking: TrackingConfig,
    pub stream: StreamConfig,
    pub storage: StorageConfig,
    pub vision: VisionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub id: u32,
    /// Directory of still images, or (with the `opencv` feature) a device
    /// index / video file path.
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnprConfig {
    /// COCO class ids treated as vehicles
    pub vehicle_classes: Vec<u32>,
    pub vehicle_confidence: f32,
    pub plate_confidence: f32,
    pub consensus_window: usize,
    pub min_plate_len: usize,
    pub single_frame_fast_path: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PpeConfig {
    pub person_class: u32,
    pub person_confidence: f32,
    pub ppe_confidence: f32,
    /// Labels with this prefix mark missing equipment
    pub violation_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Per-track state is dropped after this long without a sighting
    pub track_ttl_secs: f64,
    /// 0 disables plate-text re-identification across track ids
    pub plate_dedup_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub target_fps: f64,
    pub rotation_secs: u64,
    pub clip_dir: String,
    pub clip_format: ClipFormat,
    pub preview_path: String,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipFormat {
    Mjpeg,
    Mp4,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub events_dir: String,
    pub vehicle_dir: String,
    pub plate_dir: String,
    pub person_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub vehicle_model: String,
    pub plate_model: String,
    pub person_model: String,
    pub ppe_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            id: 1,
            source: "frames".to_string(),
        }
    }
}

impl Default for AnprConfig {
    fn default() -> Self {
        Self {
            vehicle_classes: vec![2, 3, 5, 7], // car, motorcycle, bus, truck
            vehicle_confidence: 0.4,
            plate_confidence: 0.4,
            consensus_window: 5,
            min_plate_len: crate::plate_text::MIN_PLATE_LEN,
            single_frame_fast_path: true,
        }
    }
}

impl Default for PpeConfig {
    fn default() -> Self {
        Self {
            person_class: 0,
            person_confidence: 0.5,
            ppe_confidence: 0.5,
            violation_prefix: "NO-".to_string(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            track_ttl_secs: 30.0,
            plate_dedup_secs: 0.0,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            target_fps: 5.0,
            rotation_secs: 180,
            clip_dir: "static/live_feed".to_string(),
            clip_format: ClipFormat::Mjpeg,
            preview_path: "static/live_feed/preview.jpg".to_string(),
            jpeg_quality: 85,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            events_dir: "databases".to_string(),
            vehicle_dir: "static/anpr/vehicles".to_string(),
            plate_dir: "static/anpr/plates".to_string(),
            person_dir: "static/ppe/violations".to_string(),
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8500".to_string(),
            timeout_ms: 2_000,
            vehicle_model: "vehicle".to_string(),
            plate_model: "plate".to_string(),
            person_model: "person".to_string(),
            ppe_model: "ppe".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// FRAMES AND DETECTIONS
// ============================================================================

/// Packed RGB8 frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub index: u64,
    pub timestamp_ms: f64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: usize, height: usize, index: u64, timestamp_ms: f64) -> Self {
        Self {
            data,
            width,
            height,
            index,
            timestamp_ms,
        }
    }

    /// Solid-colour frame, handy for synthetic input.
    pub fn filled(width: usize, height: usize, rgb: [u8; 3], index: u64, timestamp_ms: f64) -> Self {
        let data = rgb.iter().copied().cycle().take(width * height * 3).collect();
        Self::new(data, width, height, index, timestamp_ms)
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.width * self.height * 3
    }

    /// Copy out the region under `bbox`, clamped to the frame. `None` when the
    /// clamped region is empty.
    pub fn crop(&self, bbox: &BBox) -> Option<Frame> {
        if !self.is_valid() {
            return None;
        }
        let b = bbox.clamped(self.width, self.height)?;
        let (w, h) = (b.width() as usize, b.height() as usize);
        let mut data = Vec::with_capacity(w * h * 3);
        for y in b.y1 as usize..b.y2 as usize {
            let start = (y * self.width + b.x1 as usize) * 3;
            data.extend_from_slice(&self.data[start..start + w * 3]);
        }
        Some(Frame::new(data, w, h, self.index, self.timestamp_ms))
    }
}

/// Axis-aligned box in pixel coordinates, `[x1, x2) x [y1, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_xyxy(b: [f32; 4]) -> Self {
        Self::new(b[0] as i32, b[1] as i32, b[2] as i32, b[3] as i32)
    }

    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Shift a box found inside a crop back into parent-frame coordinates.
    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self::new(
            self.x1.saturating_add(dx),
            self.y1.saturating_add(dy),
            self.x2.saturating_add(dx),
            self.y2.saturating_add(dy),
        )
    }

    pub fn clamped(&self, width: usize, height: usize) -> Option<Self> {
        let (w, h) = (width as i32, height as i32);
        let b = Self::new(
            self.x1.clamp(0, w),
            self.y1.clamp(0, h),
            self.x2.clamp(0, w),
            self.y2.clamp(0, h),
        );
        (b.width() > 0 && b.height() > 0).then_some(b)
    }
}

/// One object from the tracker, identity included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub bbox: BBox,
    pub track_id: u32,
    pub class_id: u32,
}

/// One untracked detection inside a crop (plate or PPE item).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub class_name: String,
    pub confidence: f32,
}
