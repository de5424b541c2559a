//! Consolidation buffer for per-device partial readings.
//!
//! A Sonoff plug publishes its six quantities on six separate topics, and the
//! bridge forwards each one as its own request. The buffer keeps one
//! [`PartialRecord`] per device and hands back a [`CompletedRecord`] the
//! moment the last missing topic arrives, evicting the entry in the same
//! critical section.
//!
//! The whole write/check/evict sequence runs under a single mutex guard, so
//! concurrent requests for one device can never both complete it. The guard
//! is never held across an `.await`; persisting the completed record is the
//! caller's job once `update` has returned.
//!
//! Partial records have no implicit expiry. A device that stops halfway stays
//! in memory until [`ConsolidationBuffer::evict_stale`] is called, which only
//! happens when a TTL is configured.
//!
//! Completed records whose write failed can be parked with
//! [`ConsolidationBuffer::hold`]. They are kept apart from the partial map and
//! are retried as-is, never merged into the device's next reading.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

use crate::error::IngestError;
use crate::models::{CompletedRecord, Topic};

// ---

/// In-flight reading for one device.
#[derive(Debug, Clone)]
struct PartialRecord {
    // ---
    values: [Option<f64>; Topic::COUNT],
    observed_at: DateTime<Utc>,
    last_touched: Instant,
}

impl PartialRecord {
    // ---
    fn new(observed_at: DateTime<Utc>) -> Self {
        Self {
            values: [None; Topic::COUNT],
            observed_at,
            last_touched: Instant::now(),
        }
    }

    fn filled(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    fn is_complete(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }
}

/// Result of feeding one observation into the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    // ---
    /// Still waiting; `filled` topics have a value so far.
    Pending { filled: usize },
    /// All six topics arrived; the entry has been removed from the buffer.
    Completed(CompletedRecord),
}

/// Summary of one in-flight device, used for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDevice {
    pub device: String,
    pub filled: usize,
    pub observed_at: DateTime<Utc>,
}

/// Process-wide store of partial readings, shared through the router state.
#[derive(Debug)]
pub struct ConsolidationBuffer {
    // ---
    topic_prefix: String,
    entries: Mutex<HashMap<String, PartialRecord>>,
    held: Mutex<HashMap<String, Vec<CompletedRecord>>>,
}

impl ConsolidationBuffer {
    // ---
    pub fn new(topic_prefix: impl Into<String>) -> Self {
        Self {
            topic_prefix: topic_prefix.into(),
            entries: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
        }
    }

    // Every mutation leaves the map consistent, so a panic elsewhere while
    // holding the guard does not invalidate the data.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PartialRecord>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `value` for `topic` on `device`.
    ///
    /// Overwrites any earlier value for the same topic and moves the record's
    /// timestamp to `observed_at`. Returns [`UpdateOutcome::Completed`] exactly
    /// once per set of six topics, removing the entry in the same step.
    pub fn update(
        &self,
        device: &str,
        topic: Topic,
        value: f64,
        observed_at: DateTime<Utc>,
    ) -> UpdateOutcome {
        // ---
        let mut entries = self.lock();

        let partial = entries
            .entry(device.to_string())
            .or_insert_with(|| PartialRecord::new(observed_at));
        partial.values[topic.index()] = Some(value);
        partial.observed_at = observed_at;
        partial.last_touched = Instant::now();

        if !partial.is_complete() {
            return UpdateOutcome::Pending {
                filled: partial.filled(),
            };
        }

        let record = CompletedRecord::assemble(device, partial.observed_at, &partial.values);
        entries.remove(device);
        UpdateOutcome::Completed(record)
    }

    /// Resolve a wire topic and record the observation.
    ///
    /// Unknown topics fail with [`IngestError::UnexpectedTopic`] before the
    /// buffer is touched.
    pub fn observe(
        &self,
        device: &str,
        raw_topic: &str,
        value: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<UpdateOutcome, IngestError> {
        // ---
        let topic = Topic::from_wire(raw_topic, &self.topic_prefix)?;
        Ok(self.update(device, topic, value, observed_at))
    }

    /// Keep a completed record whose write failed so it can be retried.
    ///
    /// Held records live apart from the partial map: they never mix with a
    /// device's next reading and are written back unchanged by whoever calls
    /// [`ConsolidationBuffer::take_held`] for that device.
    pub fn hold(&self, record: CompletedRecord) {
        // ---
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(record.device.clone())
            .or_default()
            .push(record);
    }

    /// Remove and return the held records for `device`, oldest first.
    pub fn take_held(&self, device: &str) -> Vec<CompletedRecord> {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device)
            .unwrap_or_default()
    }

    /// Number of records waiting for a retried write.
    pub fn held_len(&self) -> usize {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Drop partial records that have not been updated for `max_age`.
    ///
    /// Returns the evicted device keys.
    pub fn evict_stale(&self, max_age: Duration) -> Vec<String> {
        self.evict_stale_at(Instant::now(), max_age)
    }

    fn evict_stale_at(&self, now: Instant, max_age: Duration) -> Vec<String> {
        // ---
        let mut evicted = Vec::new();

        self.lock().retain(|device, partial| {
            let keep = now.saturating_duration_since(partial.last_touched) < max_age;
            if !keep {
                evicted.push(device.clone());
            }
            keep
        });
        evicted
    }

    /// Devices with an in-flight partial record, sorted by key.
    pub fn pending_devices(&self) -> Vec<PendingDevice> {
        // ---
        let mut pending: Vec<PendingDevice> = self
            .lock()
            .iter()
            .map(|(device, partial)| PendingDevice {
                device: device.clone(),
                filled: partial.filled(),
                observed_at: partial.observed_at,
            })
            .collect();
        pending.sort_by(|a, b| a.device.cmp(&b.device));
        pending
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
