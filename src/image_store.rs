// src/image_store.rs
//
// Crop persistence. One JPEG per track id and kind; re-deriving an image
// overwrites the previous file.

use crate::types::{Frame, StorageConfig};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Vehicle,
    Plate,
    Person,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vehicle => "vehicle",
            Self::Plate => "plate",
            Self::Person => "person",
        }
    }
}

pub struct ImageStore {
    vehicle_dir: PathBuf,
    plate_dir: PathBuf,
    person_dir: PathBuf,
    quality: u8,
}

impl ImageStore {
    pub fn new(config: &StorageConfig, quality: u8) -> Result<Self> {
        let store = Self {
            vehicle_dir: PathBuf::from(&config.vehicle_dir),
            plate_dir: PathBuf::from(&config.plate_dir),
            person_dir: PathBuf::from(&config.person_dir),
            quality,
        };
        for dir in [&store.vehicle_dir, &store.plate_dir, &store.person_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create image dir {}", dir.display()))?;
        }
        Ok(store)
    }

    /// Reference under which the image for `track_id` is (or will be) stored.
    pub fn path_for(&self, kind: ImageKind, track_id: u32) -> PathBuf {
        let dir = match kind {
            ImageKind::Vehicle => &self.vehicle_dir,
            ImageKind::Plate => &self.plate_dir,
            ImageKind::Person => &self.person_dir,
        };
        dir.join(format!("{}_{}.jpg", kind.as_str(), track_id))
    }

    pub fn reference(&self, kind: ImageKind, track_id: u32) -> String {
        self.path_for(kind, track_id).to_string_lossy().into_owned()
    }

    /// Encode and write the crop. Returns the image reference.
    pub fn save(&self, kind: ImageKind, track_id: u32, crop: &Frame) -> Result<String> {
        let path = self.path_for(kind, track_id);
        let jpeg = encode_jpeg(crop, self.quality)?;
        write_atomic(&path, &jpeg)?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Encode an RGB frame into JPEG bytes.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    use image::{ImageBuffer, RgbImage};

    if !frame.is_valid() {
        return Err(anyhow!(
            "Frame buffer does not match {}x{}",
            frame.width,
            frame.height
        ));
    }
    let img: RgbImage =
        ImageBuffer::from_raw(frame.width as u32, frame.height as u32, frame.data.clone())
            .ok_or_else(|| anyhow!("Frame buffer too small"))?;

    let mut buf = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .context("JPEG encoding failed")?;
    Ok(buf.into_inner())
}

/// Write via a sibling temp file so readers never see a half-written image.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
