// src/session/testing.rs
//
// In-memory clip and preview doubles.

use super::recorder::{ClipFactory, ClipWriter};
use crate::types::Frame;
use crate::video_processor::{FrameSource, PreviewSink};
use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct ClipLog {
    clips: Vec<Vec<u64>>,
    finished: usize,
    failing_opens: usize,
}

/// Records frame indices per clip.
#[derive(Clone, Default)]
pub struct MemoryClips {
    log: Arc<Mutex<ClipLog>>,
}

impl MemoryClips {
    pub fn factory(&self) -> MemoryClipFactory {
        MemoryClipFactory {
            log: self.log.clone(),
        }
    }

    pub fn fail_opens(&self, n: usize) {
        self.log.lock().unwrap().failing_opens = n;
    }

    pub fn clips(&self) -> Vec<Vec<u64>> {
        self.log.lock().unwrap().clips.clone()
    }

    pub fn finished(&self) -> usize {
        self.log.lock().unwrap().finished
    }
}

pub struct MemoryClipFactory {
    log: Arc<Mutex<ClipLog>>,
}

impl ClipFactory for MemoryClipFactory {
    fn open(&mut self, _width: usize, _height: usize) -> Result<Box<dyn ClipWriter>> {
        let mut log = self.log.lock().unwrap();
        if log.failing_opens > 0 {
            log.failing_opens -= 1;
            bail!("disk full");
        }
        log.clips.push(Vec::new());
        let slot = log.clips.len() - 1;
        Ok(Box::new(MemoryClipWriter {
            log: self.log.clone(),
            slot,
        }))
    }
}

struct MemoryClipWriter {
    log: Arc<Mutex<ClipLog>>,
    slot: usize,
}

impl ClipWriter for MemoryClipWriter {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        self.log.lock().unwrap().clips[self.slot].push(frame.index);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<PathBuf> {
        self.log.lock().unwrap().finished += 1;
        Ok(PathBuf::from(format!("clip-{}", self.slot)))
    }
}

/// Source that replays a fixed list of frames.
pub struct VecSource {
    pub frames: VecDeque<Frame>,
}

impl VecSource {
    pub fn new(count: u64) -> Self {
        Self {
            frames: (0..count)
                .map(|i| Frame::filled(4, 4, [0, 0, 0], i, i as f64 * 200.0))
                .collect(),
        }
    }
}

impl FrameSource for VecSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

/// Remembers the index of every published preview.
#[derive(Clone, Default)]
pub struct MemoryPreview {
    pub served: Arc<Mutex<Vec<u64>>>,
}

impl PreviewSink for MemoryPreview {
    fn publish(&mut self, frame: &Frame) -> Result<()> {
        self.served.lock().unwrap().push(frame.index);
        Ok(())
    }
}
