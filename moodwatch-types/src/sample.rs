//! Samples - one accepted observation of the tracked metric.

use chrono::{DateTime, Utc};

use crate::{Status, SENTINEL_VALUE};

/// A persisted observation.
///
/// Samples are created by the ingestion loop and owned by the store from
/// then on. They are never updated or deleted.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    /// Store-assigned identity, never reused.
    pub id: i64,

    /// The observed value.
    pub value: f64,

    /// Direction relative to the previously accepted value.
    pub status: Status,

    /// When the store accepted the sample.
    #[cfg_attr(feature = "serde", serde(with = "crate::time::iso_millis"))]
    pub recorded_at: DateTime<Utc>,
}

impl Sample {
    /// Epoch milliseconds of `recorded_at`.
    pub fn timestamp_ms(&self) -> i64 {
        self.recorded_at.timestamp_millis()
    }

    /// The event form pushed to subscribers.
    pub fn event(&self) -> SampleEvent {
        SampleEvent::from(self)
    }
}

/// What a live subscriber receives: `{value, status, time}`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleEvent {
    pub value: f64,
    pub status: Status,
    #[cfg_attr(feature = "serde", serde(with = "crate::time::iso_millis"))]
    pub time: DateTime<Utc>,
}

impl SampleEvent {
    /// The placeholder sent when nothing has been stored yet.
    pub fn sentinel(now: DateTime<Utc>) -> Self {
        Self {
            value: SENTINEL_VALUE,
            status: Status::Same,
            time: now,
        }
    }
}

impl From<&Sample> for SampleEvent {
    fn from(sample: &Sample) -> Self {
        Self {
            value: sample.value,
            status: sample.status,
            time: sample.recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Sample {
        Sample {
            id: 7,
            value: 61.25,
            status: Status::Up,
            recorded_at: Utc.with_ymd_and_hms(2024, 3, 10, 4, 5, 6).unwrap(),
        }
    }

    #[test]
    fn test_event_from_sample() {
        let event = sample().event();
        assert_eq!(event.value, 61.25);
        assert_eq!(event.status, Status::Up);
        assert_eq!(event.time, sample().recorded_at);
    }

    #[test]
    fn test_timestamp_ms() {
        assert_eq!(sample().timestamp_ms(), 1_710_043_506_000);
    }

    #[test]
    fn test_sentinel() {
        let now = Utc::now();
        let event = SampleEvent::sentinel(now);
        assert_eq!(event.value, 50.0);
        assert_eq!(event.status, Status::Same);
        assert_eq!(event.time, now);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(sample().event()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "value": 61.25,
                "status": "up",
                "time": "2024-03-10T04:05:06.000Z"
            })
        );
    }
}
