// src/video_processor.rs
//
// Frame sources, clip files and the preview image.
//
// Clips are written as `<name>.mjpeg.part` while open and renamed to
// `<name>c.mjpeg` once finished; only names ending in the `c` marker are
// treated as final elsewhere.

use crate::image_store::{encode_jpeg, write_atomic};
use crate::session::{ClipFactory, ClipWriter};
use crate::types::Frame;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const CLIP_PREFIX: &str = "live";
pub const CLIP_TIME_FORMAT: &str = "%d.%m.%Y - %H.%M.%S";
pub const FINAL_MARKER: char = 'c';
pub const MJPEG_EXTENSION: &str = "mjpeg";
const PART_SUFFIX: &str = "part";
const CLIP_EXTENSIONS: [&str; 2] = [MJPEG_EXTENSION, "mp4"];
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Anything that yields frames in order. `Ok(None)` ends the stream.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Receives the frame chosen for the live view.
pub trait PreviewSink: Send {
    fn publish(&mut self, frame: &Frame) -> Result<()>;
}

// ============================================================================
// CLIP NAMING
// ============================================================================

/// `live dd.mm.YYYY - HH.MM.SS`
pub fn clip_stem(at: DateTime<Local>) -> String {
    format!("{} {}", CLIP_PREFIX, at.format(CLIP_TIME_FORMAT))
}

/// First stem in `dir` not already taken by a part or final clip.
pub fn unique_stem(dir: &Path, stem: &str, extension: &str) -> String {
    let taken = |s: &str| {
        dir.join(format!("{}.{}.{}", s, extension, PART_SUFFIX)).exists()
            || dir.join(format!("{}.{}", s, extension)).exists()
            || dir.join(format!("{}{}.{}", s, FINAL_MARKER, extension)).exists()
    };
    if !taken(stem) {
        return stem.to_string();
    }
    (1u32..)
        .map(|n| format!("{} ({})", stem, n))
        .find(|s| !taken(s))
        .unwrap_or_else(|| stem.to_string())
}

pub fn is_final_clip(path: &Path) -> bool {
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| CLIP_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    let marked = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.ends_with(FINAL_MARKER));
    ext_ok && marked
}

/// Finished clips under `dir`, oldest first by name.
pub fn list_final_clips(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut clips: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_final_clip(p))
        .collect();
    clips.sort();
    Ok(clips)
}

// ============================================================================
// MJPEG CLIPS
// ============================================================================

pub struct MjpegClipFactory {
    dir: PathBuf,
    quality: u8,
}

impl MjpegClipFactory {
    pub fn new(dir: impl Into<PathBuf>, quality: u8) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create clip dir {}", dir.display()))?;
        Ok(Self { dir, quality })
    }
}

impl ClipFactory for MjpegClipFactory {
    fn open(&mut self, _width: usize, _height: usize) -> Result<Box<dyn ClipWriter>> {
        let stem = unique_stem(&self.dir, &clip_stem(Local::now()), MJPEG_EXTENSION);
        let part_path = self
            .dir
            .join(format!("{}.{}.{}", stem, MJPEG_EXTENSION, PART_SUFFIX));
        let final_path = self
            .dir
            .join(format!("{}{}.{}", stem, FINAL_MARKER, MJPEG_EXTENSION));

        let file = File::create(&part_path)
            .with_context(|| format!("Failed to create clip {}", part_path.display()))?;
        info!("🎥 Recording to {}", part_path.display());

        Ok(Box::new(MjpegClipWriter {
            out: BufWriter::new(file),
            part_path,
            final_path,
            quality: self.quality,
        }))
    }
}

pub struct MjpegClipWriter {
    out: BufWriter<File>,
    part_path: PathBuf,
    final_path: PathBuf,
    quality: u8,
}

impl ClipWriter for MjpegClipWriter {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        let jpeg = encode_jpeg(frame, self.quality)?;
        self.out
            .write_all(&jpeg)
            .with_context(|| format!("Failed to append to {}", self.part_path.display()))
    }

    fn finish(self: Box<Self>) -> Result<PathBuf> {
        let MjpegClipWriter {
            out,
            part_path,
            final_path,
            ..
        } = *self;
        let file = out
            .into_inner()
            .map_err(|e| e.into_error())
            .with_context(|| format!("Failed to flush {}", part_path.display()))?;
        file.sync_all()?;
        drop(file);
        fs::rename(&part_path, &final_path).with_context(|| {
            format!(
                "Failed to finalize {} -> {}",
                part_path.display(),
                final_path.display()
            )
        })?;
        Ok(final_path)
    }
}

// ============================================================================
// STILL-IMAGE SOURCE
// ============================================================================

/// Replays a directory of still images in file-name order.
pub struct ImageDirSource {
    files: VecDeque<PathBuf>,
    frame_interval_ms: f64,
    next_index: u64,
}

impl ImageDirSource {
    pub fn open(dir: impl AsRef<Path>, fps: f64) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            anyhow::bail!("Image source {} is not a directory", dir.display());
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort();

        info!("Found {} image files in {}", files.len(), dir.display());

        let frame_interval_ms = if fps > 0.0 { 1000.0 / fps } else { 0.0 };
        Ok(Self {
            files: files.into(),
            frame_interval_ms,
            next_index: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.files.len()
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        while let Some(path) = self.files.pop_front() {
            let rgb = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    warn!("⚠️  Skipping unreadable image {}: {}", path.display(), e);
                    continue;
                }
            };
            let index = self.next_index;
            self.next_index += 1;
            debug!("Frame {} <- {}", index, path.display());

            let (width, height) = (rgb.width() as usize, rgb.height() as usize);
            return Ok(Some(Frame::new(
                rgb.into_raw(),
                width,
                height,
                index,
                index as f64 * self.frame_interval_ms,
            )));
        }
        Ok(None)
    }
}

// ============================================================================
// PREVIEW
// ============================================================================

/// Keeps a single JPEG on disk in sync with the live view.
pub struct JpegPreviewSink {
    path: PathBuf,
    quality: u8,
}

impl JpegPreviewSink {
    pub fn new(path: impl Into<PathBuf>, quality: u8) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create preview dir {}", parent.display()))?;
        }
        Ok(Self { path, quality })
    }
}

impl PreviewSink for JpegPreviewSink {
    fn publish(&mut self, frame: &Frame) -> Result<()> {
        let jpeg = encode_jpeg(frame, self.quality)?;
        write_atomic(&self.path, &jpeg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_clip_stem_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(clip_stem(at), "live 07.03.2024 - 09.05.01");
    }

    #[test]
    fn test_final_clip_filter() {
        assert!(is_final_clip(Path::new("live 07.03.2024 - 09.05.01c.mjpeg")));
        assert!(is_final_clip(Path::new("live 07.03.2024 - 09.05.01c.MP4")));
        assert!(!is_final_clip(Path::new("live 07.03.2024 - 09.05.01.mp4")));
        assert!(!is_final_clip(Path::new("live 07.03.2024 - 09.05.01.mjpeg.part")));
    }

    #[test]
    fn test_mjpeg_clip_is_renamed_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = MjpegClipFactory::new(dir.path(), 80).unwrap();

        let mut writer = factory.open(8, 8).unwrap();
        writer.write(&Frame::filled(8, 8, [200, 10, 10], 0, 0.0)).unwrap();
        writer.write(&Frame::filled(8, 8, [10, 200, 10], 1, 200.0)).unwrap();
        assert!(list_final_clips(dir.path()).unwrap().is_empty());

        let path = writer.finish().unwrap();
        assert!(path.exists());
        assert_eq!(list_final_clips(dir.path()).unwrap(), vec![path.clone()]);

        // two concatenated JPEGs: two SOI markers
        let bytes = fs::read(&path).unwrap();
        let soi = bytes.windows(3).filter(|w| *w == [0xFF, 0xD8, 0xFF]).count();
        assert_eq!(soi, 2);
    }

    #[test]
    fn test_same_second_clips_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let stem = "live 07.03.2024 - 09.05.01";
        fs::write(dir.path().join(format!("{}c.mjpeg", stem)), b"x").unwrap();
        assert_eq!(
            unique_stem(dir.path(), stem, MJPEG_EXTENSION),
            "live 07.03.2024 - 09.05.01 (1)"
        );
    }

    #[test]
    fn test_image_dir_source_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("b.png", 20u8), ("a.png", 10), ("notes.txt", 0)] {
            let path = dir.path().join(name);
            if name.ends_with(".png") {
                image::RgbImage::from_pixel(6, 4, image::Rgb([shade, shade, shade]))
                    .save(&path)
                    .unwrap();
            } else {
                fs::write(&path, b"not an image").unwrap();
            }
        }

        let mut source = ImageDirSource::open(dir.path(), 5.0).unwrap();
        assert_eq!(source.remaining(), 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!((first.width, first.height, first.index), (6, 4, 0));
        assert_eq!(first.data[0], 10);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.timestamp_ms, 200.0);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_preview_sink_writes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live").join("preview.jpg");
        let mut sink = JpegPreviewSink::new(&path, 80).unwrap();
        sink.publish(&Frame::filled(8, 8, [1, 2, 3], 0, 0.0)).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
