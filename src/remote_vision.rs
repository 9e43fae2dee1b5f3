// src/remote_vision.rs
//
// HTTP clients for the inference sidecar. Each capability is a thin
// blocking adapter over one async reqwest call; the frame loop runs on a
// blocking worker, so calls are driven with `Handle::block_on` and bounded
// by `vision.timeout_ms`.
//
// Endpoints (JSON, images as base64 JPEG):
//   POST /track   {model, session, image_base64, classes, confidence}
//   POST /detect  {model, image_base64, confidence}
//   POST /ocr     {image_base64}

use crate::capabilities::{RegionDetector, TextReader, Tracker};
use crate::image_store::encode_jpeg;
use crate::types::{BBox, Detection, Frame, TrackedObject, VisionConfig};
use anyhow::{anyhow, Context, Result};
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

const PAYLOAD_JPEG_QUALITY: u8 = 90;

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TrackRequest<'a> {
    pub model: &'a str,
    /// Tracker state on the sidecar is keyed by this id
    pub session: &'a str,
    pub image_base64: String,
    pub classes: &'a [u32],
    pub confidence: f32,
}

#[derive(Debug, Serialize)]
pub struct DetectRequest<'a> {
    pub model: &'a str,
    pub image_base64: String,
    pub confidence: f32,
}

#[derive(Debug, Serialize)]
pub struct OcrRequest {
    pub image_base64: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireObject {
    /// x1, y1, x2, y2 in pixels
    pub bbox: [f32; 4],
    pub track_id: Option<u32>,
    pub class_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackResponse {
    #[serde(default)]
    pub objects: Vec<WireObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireDetection {
    pub bbox: [f32; 4],
    pub class_name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub detections: Vec<WireDetection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrLine {
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrResponse {
    #[serde(default)]
    pub lines: Vec<OcrLine>,
}

impl TrackResponse {
    /// Objects the sidecar could not assign an identity to are dropped.
    pub fn into_tracked(self) -> Vec<TrackedObject> {
        self.objects
            .into_iter()
            .filter_map(|o| {
                Some(TrackedObject {
                    bbox: BBox::from_xyxy(o.bbox),
                    track_id: o.track_id?,
                    class_id: o.class_id,
                })
            })
            .collect()
    }
}

impl DetectResponse {
    pub fn into_detections(self) -> Vec<Detection> {
        self.detections
            .into_iter()
            .map(|d| Detection {
                bbox: BBox::from_xyxy(d.bbox),
                class_name: d.class_name,
                confidence: d.confidence,
            })
            .collect()
    }
}

impl OcrResponse {
    /// Lines concatenated in reading order.
    pub fn text(&self) -> String {
        self.lines.iter().map(|l| l.text.as_str()).collect()
    }
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct RemoteVision {
    http_client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    runtime: Handle,
}

impl RemoteVision {
    pub fn new(config: &VisionConfig, runtime: Handle) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        info!(
            "🌐 Vision sidecar at {} (timeout {} ms)",
            config.base_url, config.timeout_ms
        );

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            runtime,
        })
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(anyhow!("{} returned {}: {}", url, status, body));
        }

        response
            .json::<Resp>()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    /// Blocking call bounded by the configured timeout. Must not be called
    /// from inside an async task.
    fn call<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.runtime.block_on(async {
            tokio::time::timeout(self.timeout, self.post(path, body))
                .await
                .map_err(|_| anyhow!("{} timed out after {:?}", path, self.timeout))?
        })
    }
}

fn frame_payload(frame: &Frame) -> Result<String> {
    let jpeg = encode_jpeg(frame, PAYLOAD_JPEG_QUALITY)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
}

// ============================================================================
// CAPABILITY ADAPTERS
// ============================================================================

pub struct RemoteTracker {
    vision: Arc<RemoteVision>,
    model: String,
    session: String,
}

impl RemoteTracker {
    pub fn new(vision: Arc<RemoteVision>, model: impl Into<String>) -> Self {
        Self {
            vision,
            model: model.into(),
            session: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl Tracker for RemoteTracker {
    fn track(&mut self, frame: &Frame, classes: &[u32], confidence: f32) -> Result<Vec<TrackedObject>> {
        let request = TrackRequest {
            model: &self.model,
            session: &self.session,
            image_base64: frame_payload(frame)?,
            classes,
            confidence,
        };
        let response: TrackResponse = self.vision.call("/track", &request)?;
        Ok(response.into_tracked())
    }

    /// A fresh session id gives the sidecar a fresh tracker.
    fn reset(&mut self) -> Result<()> {
        self.session = uuid::Uuid::new_v4().to_string();
        debug!("Tracker {} now on session {}", self.model, self.session);
        Ok(())
    }
}

pub struct RemoteDetector {
    vision: Arc<RemoteVision>,
    model: String,
}

impl RemoteDetector {
    pub fn new(vision: Arc<RemoteVision>, model: impl Into<String>) -> Self {
        Self {
            vision,
            model: model.into(),
        }
    }
}

impl RegionDetector for RemoteDetector {
    fn detect(&mut self, crop: &Frame, confidence: f32) -> Result<Vec<Detection>> {
        let request = DetectRequest {
            model: &self.model,
            image_base64: frame_payload(crop)?,
            confidence,
        };
        let response: DetectResponse = self.vision.call("/detect", &request)?;
        Ok(response.into_detections())
    }
}

pub struct RemoteOcr {
    vision: Arc<RemoteVision>,
}

impl RemoteOcr {
    pub fn new(vision: Arc<RemoteVision>) -> Self {
        Self { vision }
    }
}

impl TextReader for RemoteOcr {
    fn read_text(&mut self, crop: &Frame) -> Result<String> {
        let request = OcrRequest {
            image_base64: frame_payload(crop)?,
        };
        let response: OcrResponse = self.vision.call("/ocr", &request)?;
        Ok(response.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untracked_objects_are_dropped() {
        let response: TrackResponse = serde_json::from_str(
            r#"{"objects": [
                {"bbox": [10.2, 20.0, 50.9, 60.0], "track_id": 4, "class_id": 2},
                {"bbox": [0, 0, 5, 5], "track_id": null, "class_id": 2}
            ]}"#,
        )
        .unwrap();
        let tracked = response.into_tracked();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].track_id, 4);
        assert_eq!(tracked[0].class_id, 2);
    }

    #[test]
    fn test_missing_lists_mean_nothing_found() {
        let track: TrackResponse = serde_json::from_str("{}").unwrap();
        assert!(track.into_tracked().is_empty());
        let detect: DetectResponse = serde_json::from_str("{}").unwrap();
        assert!(detect.into_detections().is_empty());
    }

    #[test]
    fn test_ocr_lines_are_concatenated() {
        let response: OcrResponse = serde_json::from_str(
            r#"{"lines": [{"text": "MH12", "confidence": 0.9}, {"text": "AB1234"}]}"#,
        )
        .unwrap();
        assert_eq!(response.text(), "MH12AB1234");
    }

    #[test]
    fn test_track_request_shape() {
        let frame = Frame::filled(4, 4, [9, 9, 9], 0, 0.0);
        let request = TrackRequest {
            model: "vehicles",
            session: "s-1",
            image_base64: frame_payload(&frame).unwrap(),
            classes: &[2, 3],
            confidence: 0.4,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["classes"], serde_json::json!([2, 3]));
        assert_eq!(json["session"], "s-1");
        let jpeg = base64::engine::general_purpose::STANDARD
            .decode(json["image_base64"].as_str().unwrap())
            .unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_stalled_sidecar_times_out() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        // Accepts connections (via the backlog) but never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = VisionConfig {
            base_url: format!("http://{}", listener.local_addr().unwrap()),
            timeout_ms: 150,
            ..VisionConfig::default()
        };
        let vision = Arc::new(RemoteVision::new(&config, runtime.handle().clone()).unwrap());
        let mut ocr = RemoteOcr::new(vision);

        let started = std::time::Instant::now();
        let result = ocr.read_text(&Frame::filled(4, 4, [0, 0, 0], 0, 0.0));
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }

    #[test]
    fn test_tracker_reset_changes_session() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let vision = Arc::new(
            RemoteVision::new(&VisionConfig::default(), runtime.handle().clone()).unwrap(),
        );
        let mut tracker = RemoteTracker::new(vision, "vehicles");
        let before = tracker.session.clone();
        tracker.reset().unwrap();
        assert_ne!(before, tracker.session);
    }
}
