// src/session/throttle.rs
//
// Best-effort fixed tick rate: sleep whatever is left of the interval once
// a frame is done, never when the frame ran over.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval: Duration,
    tick_started: Option<Instant>,
}

impl FrameThrottle {
    /// `target_fps <= 0` disables throttling.
    pub fn new(target_fps: f64) -> Self {
        let interval = if target_fps > 0.0 {
            Duration::from_secs_f64(1.0 / target_fps)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            tick_started: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn begin(&mut self, now: Instant) {
        self.tick_started = Some(now);
    }

    /// Time left in the current tick as of `now`.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.tick_started {
            Some(started) => self
                .interval
                .saturating_sub(now.saturating_duration_since(started)),
            None => Duration::ZERO,
        }
    }

    /// Block the calling (frame loop) thread until the tick is over.
    pub fn wait(&self) {
        let left = self.remaining(Instant::now());
        if !left.is_zero() {
            std::thread::sleep(left);
        }
    }
}
