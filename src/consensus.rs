// src/consensus.rs
//
// Per-track plate consensus. Each vehicle track accumulates normalized OCR
// reads in a short window; once the window fills (or on the single-frame
// fast path) the most common read is frozen for the rest of the track's life.
//
// The `just_finalized` flag fires at most once per track id and is the only
// gate for ANPR event emission downstream.

use std::collections::{HashMap, VecDeque};
use tracing::debug;

pub const DEFAULT_WINDOW: usize = 5;

#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Reads required before a vote
    pub window: usize,
    /// Freeze on the very first read of a never-finalized track
    pub single_frame_fast_path: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            single_frame_fast_path: true,
        }
    }
}

/// Result of feeding one read into the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub current_best: Option<String>,
    pub just_finalized: bool,
}

#[derive(Debug, Default)]
struct TrackConsensus {
    observations: VecDeque<String>,
    frozen: Option<String>,
    last_seen_ms: f64,
}

pub struct PlateConsensus {
    config: ConsensusConfig,
    tracks: HashMap<u32, TrackConsensus>,
}

impl PlateConsensus {
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
        }
    }

    pub fn observe(&mut self, track_id: u32, text: &str, now_ms: f64) -> Observation {
        let window = self.config.window.max(1);
        let fast_path = self.config.single_frame_fast_path;
        let track = self.tracks.entry(track_id).or_default();
        track.last_seen_ms = now_ms;

        if let Some(frozen) = &track.frozen {
            return Observation {
                current_best: Some(frozen.clone()),
                just_finalized: false,
            };
        }

        track.observations.push_back(text.to_string());
        while track.observations.len() > window {
            track.observations.pop_front();
        }

        let first_read = track.observations.len() == 1;
        if track.observations.len() >= window || (fast_path && first_read) {
            let winner = stable_mode(&track.observations);
            debug!(
                "Track {} frozen as {:?} after {} read(s)",
                track_id,
                winner,
                track.observations.len()
            );
            track.frozen = winner.clone();
            return Observation {
                current_best: winner,
                just_finalized: track.frozen.is_some(),
            };
        }

        Observation {
            current_best: None,
            just_finalized: false,
        }
    }

    pub fn frozen(&self, track_id: u32) -> Option<&str> {
        self.tracks.get(&track_id)?.frozen.as_deref()
    }

    pub fn is_finalized(&self, track_id: u32) -> bool {
        self.frozen(track_id).is_some()
    }

    pub fn contains(&self, track_id: u32) -> bool {
        self.tracks.contains_key(&track_id)
    }

    /// Mark an existing track as still visible without recording a read.
    pub fn touch(&mut self, track_id: u32, now_ms: f64) {
        if let Some(track) = self.tracks.get_mut(&track_id) {
            track.last_seen_ms = now_ms;
        }
    }

    /// Drop tracks unseen for longer than `ttl_ms`. Returns how many went.
    pub fn evict_stale(&mut self, now_ms: f64, ttl_ms: f64) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|_, t| now_ms - t.last_seen_ms <= ttl_ms);
        before - self.tracks.len()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Most frequent entry; ties go to whichever value appeared first.
fn stable_mode(values: &VecDeque<String>) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for v in values {
        match counts.iter_mut().find(|(s, _)| *s == v.as_str()) {
            Some((_, n)) => *n += 1,
            None => counts.push((v.as_str(), 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (s, n) in counts {
        if best.map_or(true, |(_, bn)| n > bn) {
            best = Some((s, n));
        }
    }
    best.map(|(s, _)| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windowed() -> PlateConsensus {
        PlateConsensus::new(ConsensusConfig {
            window: 5,
            single_frame_fast_path: false,
        })
    }

    #[test]
    fn test_window_finalizes_on_fifth_read_with_majority() {
        let mut c = windowed();
        let reads = ["AB1234CD", "AB1234CD", "XY9999ZZ", "AB1234CD"];
        for (i, r) in reads.iter().enumerate() {
            let obs = c.observe(7, r, i as f64);
            assert!(!obs.just_finalized, "read {} finalized early", i);
            assert_eq!(obs.current_best, None);
        }

        let obs = c.observe(7, "XY9999ZZ", 4.0);
        assert!(obs.just_finalized);
        assert_eq!(obs.current_best.as_deref(), Some("AB1234CD"));
        assert_eq!(c.frozen(7), Some("AB1234CD"));
    }

    #[test]
    fn test_single_frame_fast_path() {
        let mut c = PlateConsensus::new(ConsensusConfig::default());
        let obs = c.observe(11, "KA01AB1234", 0.0);
        assert!(obs.just_finalized);
        assert_eq!(obs.current_best.as_deref(), Some("KA01AB1234"));
    }

    #[test]
    fn test_finalized_track_ignores_new_reads() {
        let mut c = PlateConsensus::new(ConsensusConfig::default());
        c.observe(3, "AB1234CD", 0.0);

        for (i, r) in ["ZZ0000ZZ", "ZZ0000ZZ", "ZZ0000ZZ", "ZZ0000ZZ", "ZZ0000ZZ", "ZZ0000ZZ"]
            .iter()
            .enumerate()
        {
            let obs = c.observe(3, r, i as f64);
            assert!(!obs.just_finalized);
            assert_eq!(obs.current_best.as_deref(), Some("AB1234CD"));
        }
    }

    #[test]
    fn test_just_finalized_fires_once_per_track() {
        let mut c = windowed();
        let mut fired = 0;
        for i in 0..20 {
            if c.observe(9, "AB1234CD", i as f64).just_finalized {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_tracks_are_independent() {
        let mut c = windowed();
        for i in 0..4 {
            c.observe(1, "AB1234CD", i as f64);
        }
        c.observe(2, "CD5678EF", 0.0);
        assert!(!c.is_finalized(1));
        assert!(!c.is_finalized(2));
        assert!(c.observe(1, "AB1234CD", 5.0).just_finalized);
        assert!(!c.is_finalized(2));
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let mut c = PlateConsensus::new(ConsensusConfig {
            window: 4,
            single_frame_fast_path: false,
        });
        for (i, r) in ["XY9999ZZ", "AB1234CD", "AB1234CD", "XY9999ZZ"].iter().enumerate() {
            c.observe(5, r, i as f64);
        }
        assert_eq!(c.frozen(5), Some("XY9999ZZ"));
    }

    #[test]
    fn test_evict_stale_drops_unseen_tracks() {
        let mut c = windowed();
        c.observe(1, "AB1234CD", 0.0);
        c.observe(2, "CD5678EF", 0.0);
        c.touch(2, 9_000.0);

        let evicted = c.evict_stale(10_000.0, 5_000.0);
        assert_eq!(evicted, 1);
        assert_eq!(c.len(), 1);
        assert!(c.observe(1, "AB1234CD", 10_000.0).current_best.is_none());
    }
}
