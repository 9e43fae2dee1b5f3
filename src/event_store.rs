// src/event_store.rs
//
// Durable sink for finalized events.
//
//   - ANPR events are append-only, one row per emitted vehicle track.
//   - PPE records are upserted per (camera, person) with a monotone label
//     union; the read-modify-write runs under one lock so concurrent camera
//     workers cannot lose labels.
//
// The JSONL store keeps the ANPR log as `anpr_events.jsonl` and the PPE table
// as a single `ppe_violations.json` snapshot rewritten on every upsert.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";
const VIOLATION_SEPARATOR: &str = ", ";

const ANPR_FILE: &str = "anpr_events.jsonl";
const PPE_FILE: &str = "ppe_violations.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnprEvent {
    pub id: u64,
    pub event_id: String,
    pub track_id: u32,
    pub plate_number: String,
    pub vehicle_image: String,
    pub plate_image: String,
    pub timestamp: String,
    pub camera_id: u32,
}

impl AnprEvent {
    /// New event stamped now; `id` is assigned by the store.
    pub fn new(
        track_id: u32,
        plate_number: &str,
        vehicle_image: &str,
        plate_image: &str,
        camera_id: u32,
    ) -> Self {
        Self {
            id: 0,
            event_id: uuid::Uuid::new_v4().to_string(),
            track_id,
            plate_number: plate_number.to_string(),
            vehicle_image: vehicle_image.to_string(),
            plate_image: plate_image.to_string(),
            timestamp: now_timestamp(),
            camera_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpeViolationRecord {
    pub id: u64,
    pub person_id: u32,
    /// Sorted, comma-joined label set
    pub violations: String,
    pub person_image: String,
    pub timestamp: String,
    pub camera_id: u32,
}

impl PpeViolationRecord {
    pub fn labels(&self) -> BTreeSet<String> {
        split_violations(&self.violations)
    }
}

/// Labels observed for one person on one frame.
#[derive(Debug, Clone)]
pub struct ViolationUpsert {
    pub person_id: u32,
    pub labels: BTreeSet<String>,
    pub person_image: String,
    pub camera_id: u32,
}

pub trait EventStore: Send + Sync {
    fn insert_anpr(&self, event: &AnprEvent) -> Result<()>;

    /// Merge `upsert.labels` into the stored set and refresh the timestamp.
    /// Returns the record as persisted.
    fn upsert_violation(&self, upsert: &ViolationUpsert) -> Result<PpeViolationRecord>;

    /// Newest first.
    fn anpr_events(&self) -> Result<Vec<AnprEvent>>;

    /// Most recently created first.
    fn ppe_violations(&self) -> Result<Vec<PpeViolationRecord>>;
}

pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

pub fn join_violations(labels: &BTreeSet<String>) -> String {
    labels
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(VIOLATION_SEPARATOR)
}

pub fn split_violations(joined: &str) -> BTreeSet<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Shared upsert rule for every store implementation.
fn merge_record(
    existing: Option<&PpeViolationRecord>,
    upsert: &ViolationUpsert,
    next_id: u64,
) -> PpeViolationRecord {
    match existing {
        Some(prev) => {
            let mut labels = prev.labels();
            labels.extend(upsert.labels.iter().cloned());
            PpeViolationRecord {
                violations: join_violations(&labels),
                timestamp: now_timestamp(),
                ..prev.clone()
            }
        }
        None => PpeViolationRecord {
            id: next_id,
            person_id: upsert.person_id,
            violations: join_violations(&upsert.labels),
            person_image: upsert.person_image.clone(),
            timestamp: now_timestamp(),
            camera_id: upsert.camera_id,
        },
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// JSONL STORE
// ============================================================================

type PersonKey = (u32, u32);

struct JsonlState {
    anpr_file: File,
    anpr_next_id: u64,
    ppe: BTreeMap<PersonKey, PpeViolationRecord>,
    ppe_next_id: u64,
}

pub struct JsonlEventStore {
    dir: PathBuf,
    state: Mutex<JsonlState>,
}

impl JsonlEventStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create events dir {}", dir.display()))?;

        let anpr_path = dir.join(ANPR_FILE);
        let log = if anpr_path.exists() {
            scan_anpr_log(&anpr_path)?
        } else {
            AnprLog::default()
        };
        let anpr_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&anpr_path)
            .with_context(|| format!("Failed to open {}", anpr_path.display()))?;
        if log.valid_len < log.file_len {
            warn!(
                "⚠️  Dropping {} byte(s) of unterminated ANPR log tail in {}",
                log.file_len - log.valid_len,
                anpr_path.display()
            );
            anpr_file
                .set_len(log.valid_len)
                .with_context(|| format!("Failed to truncate {}", anpr_path.display()))?;
        }
        let anpr_count = log.events.len();
        let anpr_next_id = log.events.iter().map(|e| e.id).max().unwrap_or(0) + 1;

        let ppe_path = dir.join(PPE_FILE);
        let mut ppe = BTreeMap::new();
        if ppe_path.exists() {
            let raw = fs::read_to_string(&ppe_path)
                .with_context(|| format!("Failed to read {}", ppe_path.display()))?;
            let records: Vec<PpeViolationRecord> = serde_json::from_str(&raw)
                .with_context(|| format!("Corrupt PPE snapshot {}", ppe_path.display()))?;
            for r in records {
                ppe.insert((r.camera_id, r.person_id), r);
            }
        }
        let ppe_next_id = ppe.values().map(|r| r.id).max().unwrap_or(0) + 1;

        info!(
            "💾 Event store at {} ({} ANPR events, {} PPE records)",
            dir.display(),
            anpr_count,
            ppe.len()
        );

        Ok(Self {
            dir,
            state: Mutex::new(JsonlState {
                anpr_file,
                anpr_next_id,
                ppe,
                ppe_next_id,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_ppe_snapshot(&self, ppe: &BTreeMap<PersonKey, PpeViolationRecord>) -> Result<()> {
        let records: Vec<&PpeViolationRecord> = ppe.values().collect();
        let json = serde_json::to_string_pretty(&records)?;
        let path = self.dir.join(PPE_FILE);
        let tmp = self.dir.join(format!("{}.tmp", PPE_FILE));
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AnprLog {
    events: Vec<AnprEvent>,
    /// Bytes up to the end of the last newline-terminated line
    valid_len: u64,
    file_len: u64,
}

/// Rows are only complete once their newline is on disk; anything after the
/// last newline is a torn write and is ignored. Corrupt complete lines are
/// skipped with a warning.
fn scan_anpr_log(path: &Path) -> Result<AnprLog> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut log = AnprLog {
        file_len: raw.len() as u64,
        ..AnprLog::default()
    };

    let mut offset = 0u64;
    for (lineno, chunk) in raw.split_inclusive(|b| *b == b'\n').enumerate() {
        offset += chunk.len() as u64;
        if !chunk.ends_with(b"\n") {
            break;
        }
        log.valid_len = offset;

        let line = String::from_utf8_lossy(chunk);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(event) => log.events.push(event),
            Err(e) => warn!(
                "⚠️  Skipping corrupt line {} of {}: {}",
                lineno + 1,
                path.display(),
                e
            ),
        }
    }
    Ok(log)
}

impl EventStore for JsonlEventStore {
    fn insert_anpr(&self, event: &AnprEvent) -> Result<()> {
        let mut state = lock(&self.state);
        let row = AnprEvent {
            id: state.anpr_next_id,
            ..event.clone()
        };
        let mut line = serde_json::to_string(&row)?;
        line.push('\n');

        let len_before = state.anpr_file.metadata()?.len();
        let written = state
            .anpr_file
            .write_all(line.as_bytes())
            .and_then(|_| state.anpr_file.flush());
        if let Err(e) = written {
            // A partial row must not survive to be read back or duplicated.
            if let Err(trunc) = state.anpr_file.set_len(len_before) {
                warn!("⚠️  Failed to roll back ANPR log: {}", trunc);
            }
            return Err(e).context("Failed to append ANPR event");
        }

        state.anpr_next_id += 1;
        debug!("ANPR event {} saved (track {})", row.id, row.track_id);
        Ok(())
    }

    fn upsert_violation(&self, upsert: &ViolationUpsert) -> Result<PpeViolationRecord> {
        let mut state = lock(&self.state);
        let key = (upsert.camera_id, upsert.person_id);
        let merged = merge_record(state.ppe.get(&key), upsert, state.ppe_next_id);

        // Only commit in memory once the snapshot is on disk.
        let mut next = state.ppe.clone();
        next.insert(key, merged.clone());
        self.write_ppe_snapshot(&next)?;

        if merged.id == state.ppe_next_id {
            state.ppe_next_id += 1;
        }
        state.ppe = next;
        Ok(merged)
    }

    fn anpr_events(&self) -> Result<Vec<AnprEvent>> {
        let _guard = lock(&self.state);
        let mut events = scan_anpr_log(&self.dir.join(ANPR_FILE))?.events;
        events.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(events)
    }

    fn ppe_violations(&self) -> Result<Vec<PpeViolationRecord>> {
        let state = lock(&self.state);
        let mut records: Vec<PpeViolationRecord> = state.ppe.values().cloned().collect();
        records.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(records)
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Non-durable store for tests and dry runs.
#[derive(Default)]
pub struct MemoryEventStore {
    anpr: Mutex<Vec<AnprEvent>>,
    ppe: Mutex<BTreeMap<PersonKey, PpeViolationRecord>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn insert_anpr(&self, event: &AnprEvent) -> Result<()> {
        let mut anpr = lock(&self.anpr);
        let id = anpr.len() as u64 + 1;
        anpr.push(AnprEvent {
            id,
            ..event.clone()
        });
        Ok(())
    }

    fn upsert_violation(&self, upsert: &ViolationUpsert) -> Result<PpeViolationRecord> {
        let mut ppe = lock(&self.ppe);
        let key = (upsert.camera_id, upsert.person_id);
        let next_id = ppe.len() as u64 + 1;
        let merged = merge_record(ppe.get(&key), upsert, next_id);
        ppe.insert(key, merged.clone());
        Ok(merged)
    }

    fn anpr_events(&self) -> Result<Vec<AnprEvent>> {
        let mut events = lock(&self.anpr).clone();
        events.reverse();
        Ok(events)
    }

    fn ppe_violations(&self) -> Result<Vec<PpeViolationRecord>> {
        let mut records: Vec<PpeViolationRecord> = lock(&self.ppe).values().cloned().collect();
        records.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(records)
    }
}
