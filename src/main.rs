// src/main.rs

mod capabilities;
mod config;
mod consensus;
mod event_store;
mod image_store;
#[cfg(feature = "opencv")]
mod opencv_io;
mod overlay;
mod pipeline;
mod plate_text;
mod remote_vision;
mod session;
mod types;
mod video_processor;
mod violations;

use anyhow::Result;
use capabilities::{RegionDetector, TextReader, Tracker};
use event_store::{EventStore, JsonlEventStore};
use image_store::ImageStore;
use pipeline::{Capabilities, FrameAnnotator, PipelineMetrics};
use remote_vision::{RemoteDetector, RemoteOcr, RemoteTracker, RemoteVision};
use session::{ClipFactory, ClipRecorder, FrameLoop, FrameThrottle, SessionHandle};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use types::{ClipFormat, Config, StreamConfig};
use video_processor::{FrameSource, ImageDirSource, JpegPreviewSink, MjpegClipFactory};

const RECENT_EVENTS_SHOWN: usize = 5;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("site_watch={},reqwest=warn", config.logging.level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🏗️  Site Watch starting (camera {})", config.camera.id);
    info!(
        "ANPR: window={} fast_path={} min_len={} | PPE prefix={:?} | TTL={}s dedup={}s",
        config.anpr.consensus_window,
        config.anpr.single_frame_fast_path,
        config.anpr.min_plate_len,
        config.ppe.violation_prefix,
        config.tracking.track_ttl_secs,
        config.tracking.plate_dedup_secs
    );

    let store: Arc<dyn EventStore> = Arc::new(JsonlEventStore::open(&config.storage.events_dir)?);
    let images = ImageStore::new(&config.storage, config.stream.jpeg_quality)?;
    info!("✓ Event store ready at {}", config.storage.events_dir);

    let vision = Arc::new(RemoteVision::new(&config.vision, Handle::current())?);
    let capabilities = remote_capabilities(&vision, &config);
    let metrics = PipelineMetrics::new();
    let annotator = FrameAnnotator::new(
        &config,
        capabilities,
        store.clone(),
        images,
        metrics.clone(),
    );

    let source = open_source(&config)?;
    let recorder = ClipRecorder::new(
        open_clip_factory(&config.stream)?,
        Duration::from_secs(config.stream.rotation_secs),
    );
    let preview = JpegPreviewSink::new(&config.stream.preview_path, config.stream.jpeg_quality)?;
    let session = SessionHandle::new();

    let frame_loop = FrameLoop::new(
        source,
        Box::new(annotator),
        recorder,
        Box::new(preview),
        session.clone(),
        FrameThrottle::new(config.stream.target_fps),
        metrics.clone(),
    );

    let worker = tokio::task::spawn_blocking(move || frame_loop.run());

    tokio::spawn(control_loop(
        spawn_stdin_reader(),
        session.clone(),
        store.clone(),
        metrics.clone(),
    ));

    let interrupt = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            interrupt.stop();
        }
    });

    match worker.await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!("❌ Stream failed: {:#}", e),
        Err(e) => error!("❌ Frame loop panicked: {}", e),
    }

    let clips = video_processor::list_final_clips(&config.stream.clip_dir)?;
    info!(
        "✅ Done. {} finished clip(s) in {}",
        clips.len(),
        config.stream.clip_dir
    );
    Ok(())
}

fn remote_capabilities(vision: &Arc<RemoteVision>, config: &Config) -> Capabilities {
    let vehicle_tracker: Box<dyn Tracker> =
        Box::new(RemoteTracker::new(vision.clone(), &config.vision.vehicle_model));
    let plate_detector: Box<dyn RegionDetector> =
        Box::new(RemoteDetector::new(vision.clone(), &config.vision.plate_model));
    let ocr: Box<dyn TextReader> = Box::new(RemoteOcr::new(vision.clone()));
    let person_tracker: Box<dyn Tracker> =
        Box::new(RemoteTracker::new(vision.clone(), &config.vision.person_model));
    let ppe_detector: Box<dyn RegionDetector> =
        Box::new(RemoteDetector::new(vision.clone(), &config.vision.ppe_model));

    Capabilities {
        vehicle_tracker,
        plate_detector,
        ocr,
        person_tracker,
        ppe_detector,
    }
}

// ============================================================================
// SOURCES AND CLIPS
// ============================================================================

fn open_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    let source = &config.camera.source;
    if Path::new(source).is_dir() {
        return Ok(Box::new(ImageDirSource::open(
            source,
            config.stream.target_fps,
        )?));
    }
    open_capture_device(source)
}

#[cfg(feature = "opencv")]
fn open_capture_device(source: &str) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(opencv_io::CameraSource::open(source)?))
}

#[cfg(not(feature = "opencv"))]
fn open_capture_device(source: &str) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "camera.source {:?} is not an image directory; cameras and video files need the `opencv` feature",
        source
    )
}

fn open_clip_factory(stream: &StreamConfig) -> Result<Box<dyn ClipFactory>> {
    match stream.clip_format {
        ClipFormat::Mjpeg => Ok(Box::new(MjpegClipFactory::new(
            &stream.clip_dir,
            stream.jpeg_quality,
        )?)),
        ClipFormat::Mp4 => open_mp4_factory(stream),
    }
}

#[cfg(feature = "opencv")]
fn open_mp4_factory(stream: &StreamConfig) -> Result<Box<dyn ClipFactory>> {
    Ok(Box::new(opencv_io::Mp4ClipFactory::new(
        &stream.clip_dir,
        stream.target_fps,
    )?))
}

#[cfg(not(feature = "opencv"))]
fn open_mp4_factory(_stream: &StreamConfig) -> Result<Box<dyn ClipFactory>> {
    anyhow::bail!("mp4 clips need the `opencv` feature")
}

// ============================================================================
// OPERATOR CONTROL
// ============================================================================

/// Stdin lines on a plain thread so a pending read never holds up shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn control_loop(
    mut commands: mpsc::Receiver<String>,
    session: SessionHandle,
    store: Arc<dyn EventStore>,
    metrics: PipelineMetrics,
) {
    info!("Commands: pause | play | live | stop | status | events");
    while let Some(line) = commands.recv().await {
        match line.trim().to_ascii_lowercase().as_str() {
            "" => {}
            "pause" => {
                session.pause();
            }
            "play" | "resume" => {
                if !session.resume() {
                    warn!("Not paused (mode is {:?})", session.mode());
                }
            }
            "live" => session.go_live(),
            "stop" => {
                session.stop();
                break;
            }
            "status" => {
                let summary = metrics.summary();
                let json = serde_json::to_string(&summary).unwrap_or_default();
                info!(
                    "📊 mode={:?} active={} {}",
                    session.mode(),
                    session.is_active(),
                    json
                );
            }
            "events" => {
                let store = store.clone();
                let shown =
                    tokio::task::spawn_blocking(move || show_recent_events(store.as_ref())).await;
                if let Err(e) = shown {
                    warn!("⚠️  Event listing failed: {}", e);
                }
            }
            other => warn!("Unknown command {:?}", other),
        }
    }
}

fn show_recent_events(store: &dyn EventStore) {
    match store.anpr_events() {
        Ok(events) => {
            info!("🚗 {} ANPR event(s)", events.len());
            for e in events.iter().take(RECENT_EVENTS_SHOWN) {
                info!(
                    "   #{} {} track {} at {}",
                    e.id, e.plate_number, e.track_id, e.timestamp
                );
            }
        }
        Err(e) => warn!("⚠️  Could not read ANPR events: {:#}", e),
    }
    match store.ppe_violations() {
        Ok(records) => {
            info!("🦺 {} PPE record(s)", records.len());
            for r in records.iter().take(RECENT_EVENTS_SHOWN) {
                info!(
                    "   #{} person {} [{}] at {}",
                    r.id, r.person_id, r.violations, r.timestamp
                );
            }
        }
        Err(e) => warn!("⚠️  Could not read PPE violations: {:#}", e),
    }
}
