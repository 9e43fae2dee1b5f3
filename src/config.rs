use crate::types::{ClipFormat, Config};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "SITE_WATCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `$SITE_WATCH_CONFIG` or `config.yaml`, falling back to
    /// defaults when the default file does not exist.
    pub fn load_from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.anpr.consensus_window == 0 {
            bail!("anpr.consensus_window must be at least 1");
        }
        if self.anpr.min_plate_len == 0 {
            bail!("anpr.min_plate_len must be at least 1");
        }
        if !(self.stream.target_fps > 0.0) {
            bail!("stream.target_fps must be positive");
        }
        if self.stream.rotation_secs == 0 {
            bail!("stream.rotation_secs must be positive");
        }
        if self.stream.jpeg_quality == 0 || self.stream.jpeg_quality > 100 {
            bail!("stream.jpeg_quality must be within 1..=100");
        }
        if self.tracking.track_ttl_secs <= 0.0 {
            bail!("tracking.track_ttl_secs must be positive");
        }
        if self.tracking.plate_dedup_secs < 0.0 {
            bail!("tracking.plate_dedup_secs cannot be negative");
        }
        if self.ppe.violation_prefix.is_empty() {
            bail!("ppe.violation_prefix cannot be empty");
        }
        if self.stream.clip_format == ClipFormat::Mp4 && !cfg!(feature = "opencv") {
            bail!("stream.clip_format = mp4 requires the `opencv` feature");
        }
        Ok(())
    }
}
