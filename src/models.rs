//! Data models for the telemetry consolidation pipeline.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::reading::RawPayload;

// ---

/// One of the six channels a Sonoff plug reports.
///
/// A device's reading is complete once every variant has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    // ---
    Power,
    Current,
    ApparentPower,
    Voltage,
    PowerFactor,
    Energy,
}

impl Topic {
    // ---
    pub const ALL: [Topic; 6] = [
        Topic::Power,
        Topic::Current,
        Topic::ApparentPower,
        Topic::Voltage,
        Topic::PowerFactor,
        Topic::Energy,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Channel name without the bridge prefix.
    pub fn name(self) -> &'static str {
        match self {
            Topic::Power => "power",
            Topic::Current => "current",
            Topic::ApparentPower => "apparent_power",
            Topic::Voltage => "voltage",
            Topic::PowerFactor => "power_factor",
            Topic::Energy => "energy",
        }
    }

    /// Slot of this topic in a `[_; Topic::COUNT]` array.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Resolve a wire topic such as `/sonoff/power` using the configured prefix.
    pub fn from_wire(raw: &str, prefix: &str) -> Result<Topic, IngestError> {
        // ---
        raw.strip_prefix(prefix)
            .and_then(|name| Topic::ALL.into_iter().find(|t| t.name() == name))
            .ok_or_else(|| IngestError::UnexpectedTopic(raw.to_string()))
    }
}

/// A fully consolidated reading, ready to be stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedRecord {
    // ---
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub power: f64,
    pub current: f64,
    pub apparent_power: f64,
    pub voltage: f64,
    pub power_factor: f64,
    pub energy: f64,
}

impl CompletedRecord {
    // ---
    /// Build a record from a fully populated set of topic slots.
    ///
    /// # Panics
    /// If any slot is empty. The buffer only calls this once all six topics
    /// are present, so an empty slot here is a bug in the caller.
    pub fn assemble(
        device: &str,
        timestamp: DateTime<Utc>,
        filled: &[Option<f64>; Topic::COUNT],
    ) -> CompletedRecord {
        // ---
        let [Some(power), Some(current), Some(apparent_power), Some(voltage), Some(power_factor), Some(energy)] =
            *filled
        else {
            panic!("assemble called for device {device} with missing topics: {filled:?}");
        };

        CompletedRecord {
            timestamp,
            device: device.to_string(),
            power,
            current,
            apparent_power,
            voltage,
            power_factor,
            energy,
        }
    }

    /// Value for a single topic.
    pub fn value(&self, topic: Topic) -> f64 {
        match topic {
            Topic::Power => self.power,
            Topic::Current => self.current,
            Topic::ApparentPower => self.apparent_power,
            Topic::Voltage => self.voltage,
            Topic::PowerFactor => self.power_factor,
            Topic::Energy => self.energy,
        }
    }
}

/// A persisted reading, as returned by `GET /getData`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StoredRow {
    // ---
    pub id: i32,
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub power_value: f64,
    pub current_value: f64,
    pub apparent_power_value: f64,
    pub voltage_value: f64,
    pub power_factor_value: f64,
    pub energy_value: f64,
}

impl StoredRow {
    // ---
    pub fn from_record(id: i32, record: &CompletedRecord) -> StoredRow {
        StoredRow {
            id,
            timestamp: record.timestamp,
            device: record.device.clone(),
            power_value: record.power,
            current_value: record.current,
            apparent_power_value: record.apparent_power,
            voltage_value: record.voltage,
            power_factor_value: record.power_factor,
            energy_value: record.energy,
        }
    }
}

/// Single-topic message forwarded by the MQTT bridge to `POST /testPost`.
#[derive(Debug, Deserialize)]
pub struct TopicMessage {
    // ---
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub topic: String,
    pub payload: RawPayload,
    pub clientid: Option<String>,
}

impl TopicMessage {
    // ---
    pub fn observed_at(&self) -> Result<DateTime<Utc>, IngestError> {
        DateTime::from_timestamp_millis(self.timestamp).ok_or_else(|| {
            IngestError::ClientInput(format!("timestamp {} is out of range", self.timestamp))
        })
    }
}

/// Measurement block inside a [`DeviceReport`]; only `value` is stored.
#[derive(Debug, Deserialize)]
pub struct Measurement {
    // ---
    pub value: f64,
    pub unit: Option<String>,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ReportData {
    // ---
    pub power: Measurement,
    pub current: Measurement,
    pub apparent_power: Measurement,
    pub voltage: Measurement,
    pub power_factor: Measurement,
    pub energy: Measurement,
}

/// Already-consolidated reading accepted by `POST /postData`.
#[derive(Debug, Deserialize)]
pub struct DeviceReport {
    // ---
    pub timestamp: String,
    pub device: String,
    pub data: ReportData,
}

impl DeviceReport {
    // ---
    pub fn into_record(self) -> Result<CompletedRecord, IngestError> {
        // ---
        let timestamp = parse_iso_timestamp(&self.timestamp)?;
        Ok(CompletedRecord {
            timestamp,
            device: self.device,
            power: self.data.power.value,
            current: self.data.current.value,
            apparent_power: self.data.apparent_power.value,
            voltage: self.data.voltage.value,
            power_factor: self.data.power_factor.value,
            energy: self.data.energy.value,
        })
    }
}

/// Parse an ISO-8601 timestamp; values without an offset are taken as UTC.
pub fn parse_iso_timestamp(raw: &str) -> Result<DateTime<Utc>, IngestError> {
    // ---
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| IngestError::Parse(format!("invalid timestamp {raw:?}: {e}")))
}
