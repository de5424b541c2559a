//! Reading value parser.
//!
//! Sonoff plugs publish each quantity as a bare string payload. A plug that
//! has not measured a quantity yet publishes `"na"`, which is recorded as
//! `0.0`; downstream there is no way to tell it apart from a real zero.

use serde::Deserialize;

use crate::error::IngestError;

/// Payload published by a plug when the quantity is not available.
pub const NOT_AVAILABLE: &str = "na";

/// Payload as it appears in the bridge's JSON: usually a string, sometimes a number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPayload {
    // ---
    Number(f64),
    Text(String),
}

/// Convert one topic/payload pair into a numeric observation.
///
/// Fails with [`IngestError::Parse`] if `topic` is empty or `payload` is
/// neither `"na"` nor a float.
pub fn parse_reading(topic: &str, payload: &str) -> Result<f64, IngestError> {
    // ---
    require_topic(topic)?;
    if payload == NOT_AVAILABLE {
        return Ok(0.0);
    }
    payload
        .trim()
        .parse::<f64>()
        .map_err(|e| {
            IngestError::Parse(format!(
                "{topic}: could not convert {payload:?} to float: {e}"
            ))
        })
}

impl RawPayload {
    // ---
    pub fn to_reading(&self, topic: &str) -> Result<f64, IngestError> {
        match self {
            RawPayload::Number(n) => require_topic(topic).map(|()| *n),
            RawPayload::Text(s) => parse_reading(topic, s),
        }
    }
}

fn require_topic(topic: &str) -> Result<(), IngestError> {
    if topic.is_empty() {
        return Err(IngestError::Parse("topic must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_not_available_is_zero() {
        // ---
        assert_eq!(parse_reading("/sonoff/power", "na").unwrap(), 0.0);
    }

    #[test]
    fn test_numeric_payloads() {
        // ---
        assert_eq!(parse_reading("/sonoff/power", "123.45").unwrap(), 123.45);
        assert_eq!(parse_reading("/sonoff/voltage", "230").unwrap(), 230.0);
        assert_eq!(parse_reading("/sonoff/energy", " 7.5\n").unwrap(), 7.5);
        assert_eq!(parse_reading("/sonoff/current", "-0.25").unwrap(), -0.25);
    }

    #[test]
    fn test_garbage_payload_fails() {
        // ---
        let err = parse_reading("/sonoff/power", "abc").unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
        assert!(err.to_string().contains("abc"));

        // Only the exact lowercase sentinel is accepted
        assert!(parse_reading("/sonoff/power", "NA").is_err());
        assert!(parse_reading("/sonoff/power", "").is_err());
    }

    #[test]
    fn test_empty_topic_fails() {
        // ---
        assert!(matches!(
            parse_reading("", "1.0"),
            Err(IngestError::Parse(_))
        ));
    }

    #[test]
    fn test_raw_payload_accepts_strings_and_numbers() {
        // ---
        let text: RawPayload = serde_json::from_str(r#""12.5""#).unwrap();
        let number: RawPayload = serde_json::from_str("12.5").unwrap();
        let na: RawPayload = serde_json::from_str(r#""na""#).unwrap();

        assert_eq!(text.to_reading("/sonoff/power").unwrap(), 12.5);
        assert_eq!(number.to_reading("/sonoff/power").unwrap(), 12.5);
        assert_eq!(na.to_reading("/sonoff/power").unwrap(), 0.0);
        assert!(number.to_reading("").is_err());
    }

    #[test]
    fn test_empty_topic_error_matches_for_every_payload_kind() {
        // ---
        let text = RawPayload::Text("1.0".to_string()).to_reading("").unwrap_err();
        let number = RawPayload::Number(1.0).to_reading("").unwrap_err();
        let na = RawPayload::Text("na".to_string()).to_reading("").unwrap_err();

        assert_eq!(text.to_string(), number.to_string());
        assert_eq!(na.to_string(), number.to_string());
        assert!(matches!(number, IngestError::Parse(_)));
    }
}
