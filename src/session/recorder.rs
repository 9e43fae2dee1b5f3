// src/session/recorder.rs
//
// Wall-clock clip rotation. Every processed frame lands in exactly one clip;
// the previous clip is finished before the next one is opened.

use crate::types::Frame;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One open recording file.
pub trait ClipWriter: Send {
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close. Returns where the final clip ended up.
    fn finish(self: Box<Self>) -> Result<PathBuf>;
}

/// Opens clip files; the factory decides the name and container.
pub trait ClipFactory: Send {
    fn open(&mut self, width: usize, height: usize) -> Result<Box<dyn ClipWriter>>;
}

struct OpenClip {
    writer: Box<dyn ClipWriter>,
    opened_at: Instant,
    frames: u64,
}

pub struct ClipRecorder {
    factory: Box<dyn ClipFactory>,
    interval: Duration,
    current: Option<OpenClip>,
    rotations: u64,
    finished: Vec<PathBuf>,
}

impl ClipRecorder {
    pub fn new(factory: Box<dyn ClipFactory>, interval: Duration) -> Self {
        Self {
            factory,
            interval,
            current: None,
            rotations: 0,
            finished: Vec::new(),
        }
    }

    /// Append `frame` to the open clip, rotating first if the clip is older
    /// than the interval. A clip that fails to open is retried on the next
    /// frame.
    pub fn record(&mut self, frame: &Frame, now: Instant) -> Result<()> {
        let due = self
            .current
            .as_ref()
            .is_some_and(|c| now.saturating_duration_since(c.opened_at) >= self.interval);
        if due {
            self.close_current();
            self.rotations += 1;
        }

        if self.current.is_none() {
            let writer = self
                .factory
                .open(frame.width, frame.height)
                .with_context(|| {
                    format!("Failed to open clip; frame {} not recorded", frame.index)
                })?;
            self.current = Some(OpenClip {
                writer,
                opened_at: now,
                frames: 0,
            });
        }

        if let Some(clip) = self.current.as_mut() {
            clip.writer.write(frame).context("Failed to write clip frame")?;
            clip.frames += 1;
        }
        Ok(())
    }

    /// Finish the open clip, if any.
    pub fn finish(&mut self) {
        self.close_current();
    }

    fn close_current(&mut self) {
        let Some(clip) = self.current.take() else {
            return;
        };
        let frames = clip.frames;
        match clip.writer.finish() {
            Ok(path) => {
                info!("🎞️  Clip finished: {} ({} frames)", path.display(), frames);
                self.finished.push(path);
            }
            Err(e) => warn!("⚠️  Failed to finish clip: {:#}", e),
        }
    }

    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    pub fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    pub fn finished_clips(&self) -> &[PathBuf] {
        &self.finished
    }
}

impl Drop for ClipRecorder {
    fn drop(&mut self) {
        self.close_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::MemoryClips;

    fn frame(index: u64) -> Frame {
        Frame::filled(4, 4, [0, 0, 0], index, index as f64)
    }

    #[test]
    fn test_two_rotations_and_no_lost_frames() {
        let clips = MemoryClips::default();
        let mut rec = ClipRecorder::new(Box::new(clips.factory()), Duration::from_secs(180));
        let start = Instant::now();

        // 400s of stream at one frame every 10s: more than 2x the interval.
        for i in 0..=40u64 {
            rec.record(&frame(i), start + Duration::from_secs(i * 10)).unwrap();
        }
        rec.finish();

        assert_eq!(rec.rotations(), 2);
        let recorded = clips.clips();
        assert_eq!(recorded.len(), 3);
        let all: Vec<u64> = recorded.iter().flatten().copied().collect();
        assert_eq!(all, (0..=40).collect::<Vec<u64>>());
        assert_eq!(recorded[0].first(), Some(&0));
        assert_eq!(recorded[1].first(), Some(&18));
        assert_eq!(recorded[2].first(), Some(&36));
        assert_eq!(clips.finished(), 3);
    }

    #[test]
    fn test_open_failure_retries_next_frame() {
        let clips = MemoryClips::default();
        clips.fail_opens(1);
        let mut rec = ClipRecorder::new(Box::new(clips.factory()), Duration::from_secs(180));
        let start = Instant::now();

        assert!(rec.record(&frame(0), start).is_err());
        assert!(!rec.is_recording());
        rec.record(&frame(1), start + Duration::from_secs(1)).unwrap();
        assert!(rec.is_recording());
        assert_eq!(clips.clips(), vec![vec![1]]);
    }

    #[test]
    fn test_failed_open_at_rotation_names_the_dropped_frame() {
        let clips = MemoryClips::default();
        let mut rec = ClipRecorder::new(Box::new(clips.factory()), Duration::from_secs(10));
        let start = Instant::now();
        rec.record(&frame(0), start).unwrap();

        clips.fail_opens(1);
        let err = rec.record(&frame(7), start + Duration::from_secs(10)).unwrap_err();
        assert!(format!("{:#}", err).contains("frame 7 not recorded"));
        assert_eq!(clips.finished(), 1);

        rec.record(&frame(8), start + Duration::from_secs(11)).unwrap();
        assert_eq!(clips.clips(), vec![vec![0], vec![8]]);
    }

    #[test]
    fn test_previous_clip_finished_before_next_opens() {
        let clips = MemoryClips::default();
        let mut rec = ClipRecorder::new(Box::new(clips.factory()), Duration::from_secs(1));
        let start = Instant::now();
        rec.record(&frame(0), start).unwrap();
        rec.record(&frame(1), start + Duration::from_secs(2)).unwrap();
        assert_eq!(clips.finished(), 1);
        assert_eq!(rec.finished_clips().len(), 1);
    }

    #[test]
    fn test_drop_finishes_open_clip() {
        let clips = MemoryClips::default();
        {
            let mut rec =
                ClipRecorder::new(Box::new(clips.factory()), Duration::from_secs(180));
            rec.record(&frame(0), Instant::now()).unwrap();
        }
        assert_eq!(clips.finished(), 1);
    }
}
