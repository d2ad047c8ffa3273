//! Condition types: predicates over device state or accumulated events

use std::fmt;
use std::sync::Arc;
use sut_core::{attributes, DeviceName, ReceivedEvent, TargetError};
use thiserror::Error;

/// Error type for condition evaluation
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("condition '{condition}' not satisfied on {device}: observed {observed}")]
    NotSatisfied {
        condition: String,
        device: DeviceName,
        observed: serde_json::Value,
    },

    #[error("condition '{condition}' not satisfied in time{}", last_observed_suffix(.last_observed))]
    Timeout {
        condition: String,
        last_observed: Option<ReceivedEvent>,
    },

    #[error("sentinel '{sentinel}' fired ({event}) while waiting for '{unmet}'")]
    SentinelFired {
        sentinel: String,
        unmet: String,
        event: ReceivedEvent,
    },

    #[error(transparent)]
    Target(#[from] TargetError),
}

fn last_observed_suffix(last_observed: &Option<ReceivedEvent>) -> String {
    match last_observed {
        Some(event) => format!(" (last observed: {event})"),
        None => String::new(),
    }
}

/// How an expected value is compared against an observed one
#[derive(Clone)]
pub enum ValueMatch {
    /// Observed value must equal this value
    Equals(serde_json::Value),

    /// Observed value must equal one of these values
    OneOf(Vec<serde_json::Value>),

    /// Observed value must satisfy a custom predicate
    Predicate {
        label: String,
        check: Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>,
    },
}

impl ValueMatch {
    /// Build a predicate matcher with a label used in descriptions
    pub fn predicate(
        label: impl Into<String>,
        check: impl Fn(&serde_json::Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Predicate {
            label: label.into(),
            check: Arc::new(check),
        }
    }

    /// Check an observed value against the expectation
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            ValueMatch::Equals(expected) => value == expected,
            ValueMatch::OneOf(expected) => expected.contains(value),
            ValueMatch::Predicate { check, .. } => check(value),
        }
    }
}

impl fmt::Debug for ValueMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueMatch::Equals(value) => f.debug_tuple("Equals").field(value).finish(),
            ValueMatch::OneOf(values) => f.debug_tuple("OneOf").field(values).finish(),
            ValueMatch::Predicate { label, .. } => {
                f.debug_struct("Predicate").field("label", label).finish()
            }
        }
    }
}

impl fmt::Display for ValueMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueMatch::Equals(value) => write!(f, "is {value}"),
            ValueMatch::OneOf(values) => {
                let list = values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "is one of [{list}]")
            }
            ValueMatch::Predicate { label, .. } => write!(f, "{label}"),
        }
    }
}

/// What a condition asserts and when it can be checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    /// Immediate read of the current attribute value, no waiting
    StateCheck,

    /// An attribute-change event must be observed
    EventOccurred,

    /// A long running command completion event must be observed
    CompletionSignal,

    /// An event that signals definite failure; used for early stop
    ErrorSentinel,
}

/// A named predicate over device state or accumulated events
///
/// Conditions are stateless across evaluations: everything they know about
/// the SUT they read from the target (state checks) or from the tracer log
/// (event conditions). A condition never owns events.
#[derive(Debug, Clone)]
pub struct Condition {
    description: String,
    kind: ConditionKind,
    devices: Vec<DeviceName>,
    attribute: String,
    expected: ValueMatch,
    previous: Option<serde_json::Value>,
}

impl Condition {
    /// Immediate check: every device's attribute currently equals `value`
    pub fn state_is(
        devices: Vec<DeviceName>,
        attribute: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        let attribute = attribute.into();
        let description = format!(
            "{} {} is currently {}",
            device_list(&devices),
            attribute,
            value
        );
        Self {
            description,
            kind: ConditionKind::StateCheck,
            devices,
            attribute,
            expected: ValueMatch::Equals(value),
            previous: None,
        }
    }

    /// Immediate check with a custom predicate on the attribute value
    pub fn state_satisfies(
        devices: Vec<DeviceName>,
        attribute: impl Into<String>,
        expected: ValueMatch,
    ) -> Self {
        let attribute = attribute.into();
        let description = format!("{} {} {}", device_list(&devices), attribute, expected);
        Self {
            description,
            kind: ConditionKind::StateCheck,
            devices,
            attribute,
            expected,
            previous: None,
        }
    }

    /// Event condition: every device's attribute changes to `value`
    pub fn becomes(
        devices: Vec<DeviceName>,
        attribute: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        let attribute = attribute.into();
        let description = format!("{} {} becomes {}", device_list(&devices), attribute, value);
        Self {
            description,
            kind: ConditionKind::EventOccurred,
            devices,
            attribute,
            expected: ValueMatch::Equals(value),
            previous: None,
        }
    }

    /// Event condition asserting a specific transition `from` -> `to`
    pub fn transitions(
        devices: Vec<DeviceName>,
        attribute: impl Into<String>,
        from: serde_json::Value,
        to: serde_json::Value,
    ) -> Self {
        let attribute = attribute.into();
        let description = format!(
            "{} {} changes from {} to {}",
            device_list(&devices),
            attribute,
            from,
            to
        );
        Self {
            description,
            kind: ConditionKind::EventOccurred,
            devices,
            attribute,
            expected: ValueMatch::Equals(to),
            previous: Some(from),
        }
    }

    /// Event condition with a custom matcher
    pub fn event_matches(
        devices: Vec<DeviceName>,
        attribute: impl Into<String>,
        expected: ValueMatch,
    ) -> Self {
        let attribute = attribute.into();
        let description = format!("{} {} {}", device_list(&devices), attribute, expected);
        Self {
            description,
            kind: ConditionKind::EventOccurred,
            devices,
            attribute,
            expected,
            previous: None,
        }
    }

    /// Completion condition on the device's `command_result` attribute
    pub fn completion(device: DeviceName, expected: ValueMatch) -> Self {
        let description = format!("{} {}", device, expected);
        Self {
            description,
            kind: ConditionKind::CompletionSignal,
            devices: vec![device],
            attribute: attributes::COMMAND_RESULT.to_string(),
            expected,
            previous: None,
        }
    }

    /// Sentinel condition: matching event means definite failure
    pub fn sentinel(
        devices: Vec<DeviceName>,
        attribute: impl Into<String>,
        expected: ValueMatch,
    ) -> Self {
        let attribute = attribute.into();
        let description = format!("{} {} {}", device_list(&devices), attribute, expected);
        Self {
            description,
            kind: ConditionKind::ErrorSentinel,
            devices,
            attribute,
            expected,
            previous: None,
        }
    }

    /// Replace the auto-generated description
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Reinterpret this condition as an early-stop sentinel
    pub fn as_sentinel(mut self) -> Self {
        self.kind = ConditionKind::ErrorSentinel;
        self
    }

    /// Constrain the immediately preceding value (assert a transition)
    pub fn with_previous(mut self, previous: serde_json::Value) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Human-readable description used in failure messages
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> ConditionKind {
        self.kind
    }

    pub fn devices(&self) -> &[DeviceName] {
        &self.devices
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Whether the condition is evaluated without waiting
    pub fn is_immediate(&self) -> bool {
        self.kind == ConditionKind::StateCheck
    }

    /// Whether the condition is an early-stop sentinel
    pub fn is_sentinel(&self) -> bool {
        self.kind == ConditionKind::ErrorSentinel
    }

    /// Check an observed value against the expected matcher
    pub fn matches_value(&self, value: &serde_json::Value) -> bool {
        self.expected.matches(value)
    }

    /// Check whether an event satisfies this condition for its device
    ///
    /// `previous` is the value of the immediately preceding event for the
    /// same device and attribute, when one exists.
    pub fn matches_event(
        &self,
        event: &ReceivedEvent,
        previous: Option<&serde_json::Value>,
    ) -> bool {
        if event.attribute != self.attribute {
            return false;
        }
        if !self.devices.contains(&event.device) {
            return false;
        }
        if !self.expected.matches(&event.value) {
            return false;
        }
        match &self.previous {
            Some(expected_previous) => previous == Some(expected_previous),
            None => true,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

fn device_list(devices: &[DeviceName]) -> String {
    match devices {
        [single] => single.to_string(),
        _ => format!(
            "[{}]",
            devices
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}
