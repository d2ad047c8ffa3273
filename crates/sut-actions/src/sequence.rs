//! Sequences: actions executed in order against one verification budget

use crate::action::{Action, ActionReport};
use crate::error::ActionError;
use crate::timeout::SharedDeadline;
use std::time::Duration;
use tracing::{info, instrument};

/// Actions executed in order, sharing a single verification budget
///
/// The budget's clock starts when the first step begins verifying its
/// postconditions; every later step draws from the same deadline. A failed
/// step aborts the sequence, and the error names the step that broke.
pub struct ActionSequence {
    name: String,
    actions: Vec<Action>,
}

impl ActionSequence {
    /// Create an empty named sequence
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    /// Append an action to the end of the sequence
    pub fn add(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Insert an action ahead of the ones already present
    pub fn add_first(mut self, action: Action) -> Self {
        self.actions.insert(0, action);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// One-line description naming every step in order
    pub fn describe(&self) -> String {
        let steps = self
            .actions
            .iter()
            .map(Action::name)
            .collect::<Vec<_>>()
            .join(", ");
        format!("Sequence '{}': {steps}", self.name)
    }

    /// Execute every step in order under one shared budget
    ///
    /// Returns the per-step reports on success. On failure the remaining
    /// steps are not run.
    #[instrument(skip(self, timeout), fields(sequence = %self.name))]
    pub async fn execute(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<ActionReport>, ActionError> {
        let deadline = SharedDeadline::new(timeout);
        let total = self.actions.len();
        info!(steps = total, "Executing sequence");

        let mut reports = Vec::with_capacity(total);
        for (index, action) in self.actions.iter_mut().enumerate() {
            match action.execute_shared(&deadline).await {
                Ok(report) => reports.push(report),
                Err(source) => {
                    return Err(ActionError::SequenceStep {
                        sequence: self.name.clone(),
                        step: index + 1,
                        total,
                        source: Box::new(source),
                    });
                }
            }
        }
        info!(steps = total, "Sequence verified");
        Ok(reports)
    }
}
