//! Failure types for action execution
//!
//! Every failure names the action that produced it and the phase it failed
//! in, so a report reads top-down: which step of which sequence, which
//! attempt of which retry, and the underlying condition or target error.

use crate::condition::ConditionError;
use sut_core::TargetError;

/// An action run that did not reach its final state
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Setup could not bring the harness into a runnable state
    #[error("setup of '{action}' failed: {reason}")]
    Setup { action: String, reason: String },

    /// A precondition did not hold at the moment it was checked
    #[error("precondition of '{action}' not met: {source}")]
    Precondition {
        action: String,
        #[source]
        source: ConditionError,
    },

    /// The procedure itself returned an error from the system under test
    #[error("procedure of '{action}' failed: {source}")]
    Procedure {
        action: String,
        #[source]
        source: TargetError,
    },

    /// A postcondition could not be verified within the budget
    #[error("postcondition of '{action}' not verified: {source}")]
    Postcondition {
        action: String,
        #[source]
        source: ConditionError,
    },

    /// An error sentinel fired while postconditions were being verified
    #[error("sentinel aborted '{action}': {source}")]
    Sentinel {
        action: String,
        #[source]
        source: ConditionError,
    },

    /// A step of a sequence failed, aborting the steps after it
    #[error("step {step}/{total} of sequence '{sequence}' failed: {source}")]
    SequenceStep {
        sequence: String,
        step: usize,
        total: usize,
        #[source]
        source: Box<ActionError>,
    },

    /// Every attempt of a retried action failed
    #[error("'{action}' failed after {attempts} attempts; last error: {}", last_error(.errors))]
    RetryExhausted {
        action: String,
        attempts: usize,
        errors: Vec<ActionError>,
    },
}

impl ActionError {
    /// The action (or sequence) name this error belongs to
    pub fn action(&self) -> &str {
        match self {
            Self::Setup { action, .. }
            | Self::Precondition { action, .. }
            | Self::Procedure { action, .. }
            | Self::Postcondition { action, .. }
            | Self::Sentinel { action, .. }
            | Self::RetryExhausted { action, .. } => action,
            Self::SequenceStep { sequence, .. } => sequence,
        }
    }
}

fn last_error(errors: &[ActionError]) -> String {
    match errors.last() {
        Some(err) => err.to_string(),
        None => "no attempts recorded".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message() {
        let err = ActionError::Setup {
            action: "AssignResources".into(),
            reason: "device tmc/subarray/1 is not registered".into(),
        };
        assert_eq!(
            err.to_string(),
            "setup of 'AssignResources' failed: device tmc/subarray/1 is not registered"
        );
        assert_eq!(err.action(), "AssignResources");
    }

    #[test]
    fn test_sequence_step_wraps_source() {
        let inner = ActionError::Setup {
            action: "Configure".into(),
            reason: "boom".into(),
        };
        let err = ActionError::SequenceStep {
            sequence: "Observation".into(),
            step: 2,
            total: 3,
            source: Box::new(inner),
        };
        let message = err.to_string();
        assert!(message.contains("step 2/3 of sequence 'Observation'"));
        assert_eq!(err.action(), "Observation");
    }

    #[test]
    fn test_retry_exhausted_reports_last_error() {
        let errors = vec![
            ActionError::Setup {
                action: "Scan".into(),
                reason: "first".into(),
            },
            ActionError::Setup {
                action: "Scan".into(),
                reason: "second".into(),
            },
        ];
        let err = ActionError::RetryExhausted {
            action: "Scan".into(),
            attempts: 2,
            errors,
        };
        let message = err.to_string();
        assert!(message.contains("after 2 attempts"));
        assert!(message.contains("second"));
        assert!(!message.contains("first"));
    }
}
