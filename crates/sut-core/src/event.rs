//! Attribute-change event as observed by the harness

use crate::DeviceName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed attribute-change event
///
/// Events are recorded by the event tracer in arrival order. The `seq`
/// number is assigned by the tracer at recording time and is the authority
/// for "which event came first" decisions; timestamps are informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedEvent {
    /// Device the event originated from
    pub device: DeviceName,

    /// Name of the attribute that changed
    pub attribute: String,

    /// New value of the attribute
    pub value: serde_json::Value,

    /// Reception timestamp
    pub timestamp: DateTime<Utc>,

    /// Arrival-order sequence number, assigned by the tracer
    pub seq: u64,
}

impl ReceivedEvent {
    /// Create a new event timestamped now, with an unassigned sequence number
    pub fn new(
        device: DeviceName,
        attribute: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            device,
            attribute: attribute.into(),
            value,
            timestamp: Utc::now(),
            seq: 0,
        }
    }

    /// Check whether this event is for the given device and attribute
    pub fn is_for(&self, device: &DeviceName, attribute: &str) -> bool {
        self.device == *device && self.attribute == attribute
    }
}

impl std::fmt::Display for ReceivedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}={} at {}",
            self.device, self.attribute, self.value, self.timestamp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_test_device() -> DeviceName {
        DeviceName::new("tmc", "central_node", "0").unwrap()
    }

    #[test]
    fn test_is_for() {
        let event = ReceivedEvent::new(make_test_device(), "state", json!("RUNNING"));
        assert!(event.is_for(&make_test_device(), "state"));
        assert!(!event.is_for(&make_test_device(), "mode"));

        let other = DeviceName::new("sdp", "subarray", "1").unwrap();
        assert!(!event.is_for(&other, "state"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let event = ReceivedEvent::new(make_test_device(), "state", json!("ON"));
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ReceivedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
