// src/violations.rs
//
// PPE violation aggregation per person track.
//
// Labels only ever accumulate: if equipment was missing at any point while the
// person was tracked, it stays recorded. The in-memory set mirrors what the
// store acknowledged; labels from a failed upsert wait in `pending` and ride
// along with the next attempt.

use crate::event_store::{EventStore, ViolationUpsert};
use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct PersonViolations {
    persisted: BTreeSet<String>,
    pending: BTreeSet<String>,
    last_seen_ms: f64,
}

#[derive(Default)]
pub struct ViolationAggregator {
    people: HashMap<u32, PersonViolations>,
}

impl ViolationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge this frame's labels for `person_id` and persist the union.
    ///
    /// Persists even when nothing new was seen so the record's timestamp
    /// tracks the latest sighting. On store failure the labels are kept as
    /// pending and the error is returned.
    pub fn record<'a>(
        &mut self,
        person_id: u32,
        labels: impl IntoIterator<Item = &'a str>,
        person_image: &str,
        camera_id: u32,
        now_ms: f64,
        store: &dyn EventStore,
    ) -> Result<BTreeSet<String>> {
        let person = self.people.entry(person_id).or_default();
        person.last_seen_ms = now_ms;
        person.pending.extend(labels.into_iter().map(str::to_string));

        let mut merged = person.persisted.clone();
        merged.extend(person.pending.iter().cloned());

        let upsert = ViolationUpsert {
            person_id,
            labels: merged.clone(),
            person_image: person_image.to_string(),
            camera_id,
        };

        match store.upsert_violation(&upsert) {
            Ok(record) => {
                // The store may know labels from before an eviction.
                person.persisted = record.labels();
                person.persisted.extend(merged);
                person.pending.clear();
                debug!(
                    "Person {} violations now {:?}",
                    person_id, person.persisted
                );
                Ok(person.persisted.clone())
            }
            Err(e) => {
                warn!(
                    "⚠️  Violation upsert for person {} failed ({} label(s) pending): {:#}",
                    person_id,
                    person.pending.len(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Labels acknowledged by the store for `person_id`.
    pub fn violations(&self, person_id: u32) -> Option<&BTreeSet<String>> {
        self.people.get(&person_id).map(|p| &p.persisted)
    }

    pub fn pending(&self, person_id: u32) -> Option<&BTreeSet<String>> {
        self.people.get(&person_id).map(|p| &p.pending)
    }

    pub fn touch(&mut self, person_id: u32, now_ms: f64) {
        if let Some(p) = self.people.get_mut(&person_id) {
            p.last_seen_ms = now_ms;
        }
    }

    pub fn evict_stale(&mut self, now_ms: f64, ttl_ms: f64) -> usize {
        let before = self.people.len();
        self.people.retain(|_, p| now_ms - p.last_seen_ms <= ttl_ms);
        before - self.people.len()
    }

    pub fn reset(&mut self) {
        self.people.clear();
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }
}
