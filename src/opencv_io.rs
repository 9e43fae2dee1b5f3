// src/opencv_io.rs
//
// OpenCV-backed capture and mp4 recording (feature `opencv`).

use crate::session::{ClipFactory, ClipWriter};
use crate::types::Frame;
use crate::video_processor::{clip_stem, unique_stem, FrameSource, FINAL_MARKER};
use anyhow::{bail, Context, Result};
use chrono::Local;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst, VideoWriter},
};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

const MP4_EXTENSION: &str = "mp4";
const LABEL_FONT_SCALE: f64 = 0.3;

/// Hershey text onto an RGB frame, baseline at (`x`, `baseline`).
pub fn put_label(frame: &mut Frame, text: &str, x: i32, baseline: i32, rgb: [u8; 3]) -> Result<()> {
    if !frame.is_valid() {
        bail!("Frame buffer does not match {}x{}", frame.width, frame.height);
    }
    let mut mat = Mat::from_slice(&frame.data)?
        .reshape(3, frame.height as i32)?
        .try_clone()?;
    imgproc::put_text(
        &mut mat,
        text,
        core::Point::new(x, baseline),
        imgproc::FONT_HERSHEY_SIMPLEX,
        LABEL_FONT_SCALE,
        core::Scalar::new(rgb[0] as f64, rgb[1] as f64, rgb[2] as f64, 0.0),
        1,
        imgproc::LINE_8,
        false,
    )?;
    frame.data.copy_from_slice(mat.data_bytes()?);
    Ok(())
}

/// Camera device (numeric source) or video file.
pub struct CameraSource {
    cap: VideoCapture,
    fps: f64,
    live: bool,
    opened_at: Instant,
    next_index: u64,
}

impl CameraSource {
    pub fn open(source: &str) -> Result<Self> {
        let (cap, live) = match source.parse::<i32>() {
            Ok(index) => {
                info!("Opening camera device {}", index);
                (VideoCapture::new(index, videoio::CAP_ANY)?, true)
            }
            Err(_) => {
                info!("Opening video: {}", source);
                (VideoCapture::from_file(source, videoio::CAP_ANY)?, false)
            }
        };

        if !cap.is_opened()? {
            bail!("Failed to open capture source {}", source);
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        info!("Capture properties: {}x{} @ {:.1} FPS", width, height, fps);

        Ok(Self {
            cap,
            fps,
            live,
            opened_at: Instant::now(),
            next_index: 0,
        })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use opencv::videoio::VideoCaptureTrait;

        let mut mat = Mat::default();
        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;
        let data = rgb_mat.data_bytes()?.to_vec();

        let index = self.next_index;
        self.next_index += 1;
        let timestamp_ms = if self.live || self.fps <= 0.0 {
            self.opened_at.elapsed().as_secs_f64() * 1000.0
        } else {
            index as f64 / self.fps * 1000.0
        };

        Ok(Some(Frame::new(
            data,
            rgb_mat.cols() as usize,
            rgb_mat.rows() as usize,
            index,
            timestamp_ms,
        )))
    }
}

/// mp4v clips; `<name>.mp4` while open, `<name>c.mp4` once finished.
pub struct Mp4ClipFactory {
    dir: PathBuf,
    fps: f64,
}

impl Mp4ClipFactory {
    pub fn new(dir: impl Into<PathBuf>, fps: f64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create clip dir {}", dir.display()))?;
        Ok(Self { dir, fps })
    }
}

impl ClipFactory for Mp4ClipFactory {
    fn open(&mut self, width: usize, height: usize) -> Result<Box<dyn ClipWriter>> {
        let stem = unique_stem(&self.dir, &clip_stem(Local::now()), MP4_EXTENSION);
        let path = self.dir.join(format!("{}.{}", stem, MP4_EXTENSION));
        let final_path = self
            .dir
            .join(format!("{}{}.{}", stem, FINAL_MARKER, MP4_EXTENSION));

        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            &path.to_string_lossy(),
            fourcc,
            self.fps,
            core::Size::new(width as i32, height as i32),
            true,
        )?;
        if !writer.is_opened()? {
            bail!("Failed to open video writer {}", path.display());
        }
        info!("🎥 Recording to {}", path.display());

        Ok(Box::new(Mp4ClipWriter {
            writer,
            path,
            final_path,
        }))
    }
}

pub struct Mp4ClipWriter {
    writer: VideoWriter,
    path: PathBuf,
    final_path: PathBuf,
}

impl ClipWriter for Mp4ClipWriter {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        let mat = Mat::from_slice(&frame.data)?;
        let mat = mat.reshape(3, frame.height as i32)?;
        let mut bgr = Mat::default();
        imgproc::cvt_color(&mat, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
        self.writer.write(&bgr)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<PathBuf> {
        self.writer.release()?;
        fs::rename(&self.path, &self.final_path).with_context(|| {
            format!(
                "Failed to finalize {} -> {}",
                self.path.display(),
                self.final_path.display()
            )
        })?;
        Ok(self.final_path.clone())
    }
}
