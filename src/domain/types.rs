//! Shared types for gas sensor events and their window averages

use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize an identifier that may arrive as a JSON string or integer
fn deserialize_token<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TokenVisitor;

    impl<'de> Visitor<'de> for TokenVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer identifier")
        }

        fn visit_str<E>(self, value: &str) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_string<E>(self, value: String) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_u64<E>(self, value: u64) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(TokenVisitor)
}

/// Newtype wrapper for event IDs (opaque, unique per reading)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EventId(#[serde(deserialize_with = "deserialize_token")] pub String);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        EventId(s.to_string())
    }
}

/// Newtype wrapper for location IDs (keys into the location catalog)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct LocationId(#[serde(deserialize_with = "deserialize_token")] pub String);

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocationId {
    fn from(s: &str) -> Self {
        LocationId(s.to_string())
    }
}

/// A single sensor reading as delivered by the event source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(alias = "eventId")]
    pub event_id: EventId,
    #[serde(alias = "locationId")]
    pub location_id: LocationId,
    pub value: f64,
    pub timestamp: i64,
}

impl RawEvent {
    pub fn new(
        event_id: impl Into<EventId>,
        location_id: impl Into<LocationId>,
        value: f64,
        timestamp: i64,
    ) -> Self {
        Self { event_id: event_id.into(), location_id: location_id.into(), value, timestamp }
    }
}

/// A sensor location with its grid coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub x: f64,
    pub y: f64,
}

/// One location's mean reading over one window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AveragedEvent {
    pub location_id: LocationId,
    pub x: f64,
    pub y: f64,
    pub average_value: f64,
    pub average_timestamp: i64,
}

impl std::fmt::Display for AveragedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "location_id={}, value={}, timestamp={}",
            self.location_id, self.average_value, self.average_timestamp
        )
    }
}

/// Cross-location mean of one window's per-location averages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorsAverage {
    /// Window sequence number within the run (first window is 0)
    pub window: u64,
    /// Number of location averages this value was computed over
    pub locations: usize,
    pub average_value: f64,
    pub average_timestamp: i64,
}

/// An item of the aggregator's output sequence
///
/// Each closed window yields its `Averaged` items in first-seen location
/// order, followed by exactly one `Sensors` item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowOutput {
    Averaged(AveragedEvent),
    Sensors(SensorsAverage),
}

impl WindowOutput {
    pub fn as_averaged(&self) -> Option<&AveragedEvent> {
        match self {
            WindowOutput::Averaged(event) => Some(event),
            WindowOutput::Sensors(_) => None,
        }
    }

    pub fn as_sensors(&self) -> Option<&SensorsAverage> {
        match self {
            WindowOutput::Sensors(avg) => Some(avg),
            WindowOutput::Averaged(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowOutput::Averaged(_) => "averaged_event",
            WindowOutput::Sensors(_) => "sensors_average",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_from_snake_case_json() {
        let json = r#"{"event_id":"e-1","location_id":"loc-1","value":4.5,"timestamp":1700000000}"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, RawEvent::new("e-1", "loc-1", 4.5, 1_700_000_000));
    }

    #[test]
    fn test_raw_event_from_camel_case_json() {
        let json = r#"{"eventId":"e-2","locationId":"loc-2","value":1.0,"timestamp":12}"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_id, EventId::from("e-2"));
        assert_eq!(event.location_id, LocationId::from("loc-2"));
    }

    #[test]
    fn test_integer_ids_become_strings() {
        let json = r#"{"event_id":42,"location_id":7,"value":0.5,"timestamp":3}"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_id.0, "42");
        assert_eq!(event.location_id.0, "7");
    }

    #[test]
    fn test_window_output_serializes_with_kind_tag() {
        let output = WindowOutput::Sensors(SensorsAverage {
            window: 3,
            locations: 2,
            average_value: 10.0,
            average_timestamp: 150,
        });
        let json: serde_json::Value = serde_json::to_value(&output).unwrap();
        assert_eq!(json["kind"], "sensors");
        assert_eq!(json["window"], 3);
        assert_eq!(json["average_value"], 10.0);
        assert_eq!(output.as_str(), "sensors_average");
    }

    #[test]
    fn test_averaged_event_display() {
        let event = AveragedEvent {
            location_id: LocationId::from("loc-1"),
            x: 1.0,
            y: 2.0,
            average_value: 20.0,
            average_timestamp: 200,
        };
        assert_eq!(event.to_string(), "location_id=loc-1, value=20, timestamp=200");
    }
}
