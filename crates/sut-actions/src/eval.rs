//! Condition evaluation against targets and the tracer log

use crate::condition::{Condition, ConditionError};
use std::collections::{HashMap, HashSet};
use sut_core::{DeviceName, ReceivedEvent, SharedTarget, TargetError};
use sut_tracer::SharedTracer;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Outcome of one scan over the event log
enum ScanOutcome {
    Satisfied,
    SentinelFired {
        sentinel: String,
        event: ReceivedEvent,
    },
}

/// Evaluates conditions against registered targets and a tracer
///
/// Immediate conditions read the target's current attribute value. Event
/// conditions are resolved by scanning the tracer log in arrival order from
/// a marker, waiting for the log to advance when a deadline allows it.
pub struct ConditionEvaluator {
    tracer: SharedTracer,
    targets: HashMap<DeviceName, SharedTarget>,
}

impl ConditionEvaluator {
    /// Create an evaluator over a tracer with no registered targets
    pub fn new(tracer: SharedTracer) -> Self {
        Self {
            tracer,
            targets: HashMap::new(),
        }
    }

    /// Create an evaluator over a tracer and a set of targets
    pub fn with_targets(
        tracer: SharedTracer,
        targets: HashMap<DeviceName, SharedTarget>,
    ) -> Self {
        Self { tracer, targets }
    }

    /// Register a target for immediate state checks
    pub fn register_target(&mut self, target: SharedTarget) {
        self.targets.insert(target.name().clone(), target);
    }

    /// Evaluate a condition without consuming any timeout budget
    ///
    /// State checks read each device's current attribute value. Event
    /// conditions are checked once against the log as it stands; nothing
    /// is awaited.
    pub async fn check_now(
        &self,
        condition: &Condition,
        marker: u64,
    ) -> Result<(), ConditionError> {
        if condition.is_immediate() {
            self.check_state(condition).await
        } else {
            self.wait_until(condition, &[], marker, Instant::now()).await
        }
    }

    /// Wait for a condition to be satisfied, or fail early on a sentinel
    ///
    /// The log is scanned in arrival order starting at `marker`. A sentinel
    /// match on an earlier event beats a success match on a later one, so
    /// arrival order decides races regardless of when the evaluator looks.
    /// All of the condition's devices must be independently satisfied; per
    /// device, the first qualifying event after the marker counts.
    pub async fn wait_until(
        &self,
        condition: &Condition,
        sentinels: &[Condition],
        marker: u64,
        deadline: Instant,
    ) -> Result<(), ConditionError> {
        trace!(condition = %condition, "Waiting for condition");
        let outcome = self
            .tracer
            .wait_for(deadline, |events| {
                Self::scan(condition, sentinels, marker, events)
            })
            .await;

        match outcome {
            Some(ScanOutcome::Satisfied) => {
                debug!(condition = %condition, "Condition satisfied");
                Ok(())
            }
            Some(ScanOutcome::SentinelFired { sentinel, event }) => {
                Err(ConditionError::SentinelFired {
                    sentinel,
                    unmet: condition.description().to_string(),
                    event,
                })
            }
            None => Err(ConditionError::Timeout {
                condition: condition.description().to_string(),
                last_observed: self.last_observed(condition, marker).await,
            }),
        }
    }

    async fn check_state(&self, condition: &Condition) -> Result<(), ConditionError> {
        for device in condition.devices() {
            let target = self.target(device)?;
            let observed = target.read_attribute(condition.attribute()).await?;
            if !condition.matches_value(&observed) {
                return Err(ConditionError::NotSatisfied {
                    condition: condition.description().to_string(),
                    device: device.clone(),
                    observed,
                });
            }
        }
        debug!(condition = %condition, "State check passed");
        Ok(())
    }

    fn target(&self, device: &DeviceName) -> Result<&SharedTarget, ConditionError> {
        self.targets
            .get(device)
            .ok_or_else(|| {
                ConditionError::Target(TargetError::Unreachable {
                    device: device.clone(),
                    reason: "device is not registered with this action".to_string(),
                })
            })
    }

    /// One pass over the log in arrival order
    ///
    /// Sentinels are checked before the condition on every event, so the
    /// earliest sentinel event wins even when a later success event is
    /// already in the log. A sentinel arriving after the condition was
    /// fully satisfied does not retroactively fail it: the scan returns
    /// success at the satisfying event, before reaching the sentinel.
    fn scan(
        condition: &Condition,
        sentinels: &[Condition],
        marker: u64,
        events: &[ReceivedEvent],
    ) -> Option<ScanOutcome> {
        let mut satisfied: HashSet<&DeviceName> = HashSet::new();

        for (index, event) in events.iter().enumerate() {
            if event.seq < marker {
                continue;
            }

            for sentinel in sentinels {
                let previous = Self::previous_value(&events[..index], event);
                if sentinel.matches_event(event, previous) {
                    return Some(ScanOutcome::SentinelFired {
                        sentinel: sentinel.description().to_string(),
                        event: event.clone(),
                    });
                }
            }

            let previous = Self::previous_value(&events[..index], event);
            if condition.matches_event(event, previous) {
                satisfied.insert(&event.device);
                if condition
                    .devices()
                    .iter()
                    .all(|device| satisfied.contains(device))
                {
                    return Some(ScanOutcome::Satisfied);
                }
            }
        }

        None
    }

    /// Value of the latest earlier event for the same device and attribute
    ///
    /// Pre-marker events (subscription snapshots, earlier history) are valid
    /// reference points even though they can never satisfy a condition.
    fn previous_value<'a>(
        earlier: &'a [ReceivedEvent],
        event: &ReceivedEvent,
    ) -> Option<&'a serde_json::Value> {
        earlier
            .iter()
            .rev()
            .find(|candidate| candidate.is_for(&event.device, &event.attribute))
            .map(|candidate| &candidate.value)
    }

    async fn last_observed(&self, condition: &Condition, marker: u64) -> Option<ReceivedEvent> {
        self.tracer
            .events_since(marker)
            .await
            .into_iter()
            .rev()
            .find(|event| {
                event.attribute == condition.attribute()
                    && condition.devices().contains(&event.device)
            })
    }
}
