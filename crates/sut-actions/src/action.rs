//! The action state machine
//!
//! An [`Action`] runs a procedure against remote targets and verifies it
//! with conditions. Execution walks a fixed lifecycle: setup, precondition
//! checks, the procedure itself, postcondition verification. Any failure
//! moves the action to [`LifecycleState::Failed`] and surfaces an
//! [`ActionError`] naming the phase that broke.
//!
//! Actions are re-runnable. Setup tears down and rebuilds the tracer
//! subscriptions on every run, so a retried action starts from a clean log.

use crate::condition::{Condition, ConditionError};
use crate::error::ActionError;
use crate::eval::ConditionEvaluator;
use crate::timeout::SharedDeadline;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use sut_core::{DeviceName, SharedTarget, TargetError};
use sut_tracer::{EventTracer, SharedTracer};
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use ulid::Ulid;

/// Boxed future returned by setup and procedure hooks
pub type HookFuture = Pin<Box<dyn Future<Output = Result<(), TargetError>> + Send>>;

type Hook = Box<dyn Fn() -> HookFuture + Send + Sync>;

/// Where an action currently stands in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Created, nothing has run yet
    New,
    /// Subscriptions are in place and the event log is clean
    SetUp,
    /// Every precondition held
    PreconditionsVerified,
    /// The procedure ran to completion
    Executed,
    /// Every postcondition was verified
    PostconditionsVerified,
    /// A phase failed; see the returned error
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "NEW",
            Self::SetUp => "SET_UP",
            Self::PreconditionsVerified => "PRECONDITIONS_VERIFIED",
            Self::Executed => "EXECUTED",
            Self::PostconditionsVerified => "POSTCONDITIONS_VERIFIED",
            Self::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

/// Summary of one successful action run
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    /// Name of the action that ran
    pub action: String,
    /// Unique id of this particular run
    pub run_id: String,
    /// Wall-clock time the run started
    pub started_at: DateTime<Utc>,
    /// How long the run took, verification included
    pub elapsed: Duration,
}

/// A named procedure with conditions around it
///
/// Built with chainable setters, then driven by [`execute`]. The tracer is
/// managed internally unless [`with_tracer`] supplies a shared one; targets
/// named by any condition must be registered with [`with_target`] before
/// the action runs.
///
/// [`execute`]: Action::execute
/// [`with_tracer`]: Action::with_tracer
/// [`with_target`]: Action::with_target
pub struct Action {
    name: String,
    state: LifecycleState,
    tracer: SharedTracer,
    targets: HashMap<DeviceName, SharedTarget>,
    setup: Option<Hook>,
    procedure: Option<Hook>,
    preconditions: Vec<Condition>,
    postconditions: Vec<Condition>,
    sentinels: Vec<Condition>,
    marker: u64,
}

impl Action {
    /// Create a named action with its own tracer and no conditions
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: LifecycleState::New,
            tracer: Arc::new(EventTracer::new()),
            targets: HashMap::new(),
            setup: None,
            procedure: None,
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            sentinels: Vec::new(),
            marker: 0,
        }
    }

    /// Use a shared tracer instead of the managed one
    pub fn with_tracer(mut self, tracer: SharedTracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Register a target the action's conditions can refer to
    pub fn with_target(mut self, target: SharedTarget) -> Self {
        self.targets.insert(target.name().clone(), target);
        self
    }

    /// Set the hook that prepares the SUT before precondition checks
    pub fn with_setup<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TargetError>> + Send + 'static,
    {
        self.setup = Some(Box::new(move || Box::pin(hook())));
        self
    }

    /// Set the procedure that acts on the SUT
    pub fn with_procedure<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TargetError>> + Send + 'static,
    {
        self.procedure = Some(Box::new(move || Box::pin(hook())));
        self
    }

    /// Append preconditions, checked in order before the procedure
    pub fn with_preconditions(mut self, conditions: Vec<Condition>) -> Self {
        self.preconditions.extend(conditions);
        self
    }

    /// Insert preconditions ahead of the ones already present
    pub fn prepend_preconditions(mut self, conditions: Vec<Condition>) -> Self {
        self.preconditions.splice(0..0, conditions);
        self
    }

    /// Append postconditions, verified in order after the procedure
    pub fn with_postconditions(mut self, conditions: Vec<Condition>) -> Self {
        self.postconditions.extend(conditions);
        self
    }

    /// Insert postconditions ahead of the ones already present
    pub fn prepend_postconditions(mut self, conditions: Vec<Condition>) -> Self {
        self.postconditions.splice(0..0, conditions);
        self
    }

    /// Append sentinels that abort postcondition verification early
    pub fn with_sentinels(mut self, conditions: Vec<Condition>) -> Self {
        self.sentinels
            .extend(conditions.into_iter().map(Condition::as_sentinel));
        self
    }

    /// Insert sentinels ahead of the ones already present
    pub fn prepend_sentinels(mut self, conditions: Vec<Condition>) -> Self {
        self.sentinels
            .splice(0..0, conditions.into_iter().map(Condition::as_sentinel));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The tracer this action records events with
    pub fn tracer(&self) -> &SharedTracer {
        &self.tracer
    }

    /// Multi-line description of the action and its conditions
    pub fn describe(&self) -> String {
        let mut lines = vec![format!("Action '{}'", self.name)];
        for condition in &self.preconditions {
            lines.push(format!("  requires: {condition}"));
        }
        for condition in &self.postconditions {
            lines.push(format!("  verifies: {condition}"));
        }
        for condition in &self.sentinels {
            lines.push(format!("  aborts on: {condition}"));
        }
        lines.join("\n")
    }

    /// Run the action with a fresh verification budget
    pub async fn execute(&mut self, timeout: Duration) -> Result<ActionReport, ActionError> {
        self.execute_shared(&SharedDeadline::new(timeout)).await
    }

    /// Run the action, drawing verification time from a shared budget
    ///
    /// The budget's clock starts when the first postcondition wait begins,
    /// so setup, precondition checks and the procedure do not consume it.
    #[instrument(skip(self, deadline), fields(action = %self.name))]
    pub async fn execute_shared(
        &mut self,
        deadline: &SharedDeadline,
    ) -> Result<ActionReport, ActionError> {
        let run_id = Ulid::new().to_string();
        let started_at = Utc::now();
        let run_start = Instant::now();
        info!(run_id = %run_id, "Executing action");

        self.state = LifecycleState::New;
        self.run_setup().await?;
        self.state = LifecycleState::SetUp;

        let evaluator = ConditionEvaluator::with_targets(self.tracer.clone(), self.targets.clone());

        for condition in &self.preconditions {
            if let Err(source) = evaluator.check_now(condition, self.marker).await {
                self.state = LifecycleState::Failed;
                return Err(ActionError::Precondition {
                    action: self.name.clone(),
                    source,
                });
            }
        }
        self.state = LifecycleState::PreconditionsVerified;
        debug!(count = self.preconditions.len(), "Preconditions verified");

        if let Some(procedure) = &self.procedure {
            if let Err(source) = procedure().await {
                self.state = LifecycleState::Failed;
                return Err(ActionError::Procedure {
                    action: self.name.clone(),
                    source,
                });
            }
        }
        self.state = LifecycleState::Executed;
        debug!("Procedure executed");

        deadline.start();
        for condition in &self.postconditions {
            let result = if condition.is_immediate() {
                evaluator.check_now(condition, self.marker).await
            } else {
                evaluator
                    .wait_until(condition, &self.sentinels, self.marker, deadline.deadline())
                    .await
            };
            if let Err(source) = result {
                self.state = LifecycleState::Failed;
                return Err(match source {
                    ConditionError::SentinelFired { .. } => ActionError::Sentinel {
                        action: self.name.clone(),
                        source,
                    },
                    other => ActionError::Postcondition {
                        action: self.name.clone(),
                        source: other,
                    },
                });
            }
        }
        self.state = LifecycleState::PostconditionsVerified;

        let elapsed = run_start.elapsed();
        info!(run_id = %run_id, ?elapsed, "Action verified");
        Ok(ActionReport {
            action: self.name.clone(),
            run_id,
            started_at,
            elapsed,
        })
    }

    /// Reset the tracer and subscribe to everything the run will watch
    ///
    /// The marker is taken before subscribing, so the snapshot each
    /// subscription records is an eligible match for this run. A
    /// postcondition that already holds when the run starts is therefore
    /// satisfied by its snapshot, without waiting for a live change.
    async fn run_setup(&mut self) -> Result<(), ActionError> {
        self.tracer.unsubscribe_all().await;
        self.tracer.clear_events().await;

        if let Some(setup) = &self.setup {
            if let Err(err) = setup().await {
                self.state = LifecycleState::Failed;
                return Err(ActionError::Setup {
                    action: self.name.clone(),
                    reason: err.to_string(),
                });
            }
        }

        self.marker = self.tracer.marker();

        let watched = self
            .postconditions
            .iter()
            .filter(|condition| !condition.is_immediate())
            .chain(self.sentinels.iter());
        for condition in watched {
            for device in condition.devices() {
                let Some(target) = self.targets.get(device) else {
                    self.state = LifecycleState::Failed;
                    return Err(ActionError::Setup {
                        action: self.name.clone(),
                        reason: format!("device {device} is not registered with this action"),
                    });
                };
                if let Err(err) = self.tracer.subscribe(target, condition.attribute()).await {
                    self.state = LifecycleState::Failed;
                    return Err(ActionError::Setup {
                        action: self.name.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        debug!(marker = self.marker, "Setup complete");
        Ok(())
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("preconditions", &self.preconditions.len())
            .field("postconditions", &self.postconditions.len())
            .field("sentinels", &self.sentinels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use sut_core::RemoteTarget;
    use sut_devices::EmulatedDevice;

    fn make_test_device(member: &str) -> Arc<EmulatedDevice> {
        let device = EmulatedDevice::new(DeviceName::new("tmc", "subarray", member).unwrap());
        device.set_attribute("state", json!("IDLE"));
        device
    }

    #[tokio::test]
    async fn test_happy_path_walks_lifecycle() {
        let device = make_test_device("1");
        let name = device.name().clone();
        let hook_device = device.clone();

        let mut action = Action::new("StartScan")
            .with_target(device.clone())
            .with_preconditions(vec![Condition::state_is(
                vec![name.clone()],
                "state",
                json!("IDLE"),
            )])
            .with_procedure(move || {
                let device = hook_device.clone();
                async move {
                    device.set_attribute("state", json!("RUNNING"));
                    Ok(())
                }
            })
            .with_postconditions(vec![Condition::becomes(
                vec![name],
                "state",
                json!("RUNNING"),
            )]);

        assert_eq!(action.state(), LifecycleState::New);
        let report = action.execute(Duration::from_secs(5)).await.unwrap();
        assert_eq!(action.state(), LifecycleState::PostconditionsVerified);
        assert_eq!(report.action, "StartScan");
        assert!(!report.run_id.is_empty());
    }

    #[tokio::test]
    async fn test_precondition_failure_skips_procedure() {
        let device = make_test_device("1");
        let name = device.name().clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut action = Action::new("StartScan")
            .with_target(device)
            .with_preconditions(vec![Condition::state_is(
                vec![name],
                "state",
                json!("READY"),
            )])
            .with_procedure(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            });

        let err = action.execute(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ActionError::Precondition { .. }));
        assert_eq!(action.state(), LifecycleState::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_procedure_error_passes_through() {
        let device = make_test_device("1");
        let name = device.name().clone();

        let mut action = Action::new("StartScan")
            .with_target(device)
            .with_procedure(move || {
                let device = name.clone();
                async move {
                    Err(TargetError::CommandFailed {
                        device,
                        command: "Scan".to_string(),
                        reason: "not allowed".to_string(),
                    })
                }
            });

        let err = action.execute(Duration::from_secs(1)).await.unwrap_err();
        match err {
            ActionError::Procedure { source, .. } => {
                assert!(matches!(source, TargetError::CommandFailed { .. }));
            }
            other => panic!("expected procedure error, got {other}"),
        }
        assert_eq!(action.state(), LifecycleState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_postcondition_timeout() {
        let device = make_test_device("1");
        let name = device.name().clone();

        let mut action = Action::new("StartScan")
            .with_target(device)
            .with_procedure(|| async { Ok(()) })
            .with_postconditions(vec![Condition::becomes(
                vec![name],
                "state",
                json!("RUNNING"),
            )]);

        let err = action.execute(Duration::from_secs(1)).await.unwrap_err();
        match err {
            ActionError::Postcondition { source, .. } => {
                assert!(matches!(source, ConditionError::Timeout { .. }));
            }
            other => panic!("expected postcondition error, got {other}"),
        }
        assert_eq!(action.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn test_sentinel_aborts_verification() {
        let device = make_test_device("1");
        let name = device.name().clone();
        let hook_device = device.clone();

        let mut action = Action::new("StartScan")
            .with_target(device)
            .with_procedure(move || {
                let device = hook_device.clone();
                async move {
                    device.set_attribute("state", json!("FAULT"));
                    Ok(())
                }
            })
            .with_postconditions(vec![Condition::becomes(
                vec![name.clone()],
                "state",
                json!("RUNNING"),
            )])
            .with_sentinels(vec![Condition::becomes(vec![name], "state", json!("FAULT"))]);

        let err = action.execute(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ActionError::Sentinel { .. }));
        assert_eq!(action.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn test_snapshot_satisfies_already_true_postcondition() {
        let device = make_test_device("1");
        let name = device.name().clone();

        // The state is already IDLE; the subscription snapshot alone must
        // satisfy the postcondition without a live change.
        let mut action = Action::new("NoOp")
            .with_target(device)
            .with_procedure(|| async { Ok(()) })
            .with_postconditions(vec![Condition::becomes(vec![name], "state", json!("IDLE"))]);

        action.execute(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_device_is_setup_error() {
        let name = DeviceName::new("tmc", "subarray", "9").unwrap();
        let mut action = Action::new("StartScan")
            .with_procedure(|| async { Ok(()) })
            .with_postconditions(vec![Condition::becomes(vec![name], "state", json!("ON"))]);

        let err = action.execute(Duration::from_secs(1)).await.unwrap_err();
        match err {
            ActionError::Setup { reason, .. } => {
                assert!(reason.contains("tmc/subarray/9"));
            }
            other => panic!("expected setup error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_rerun_after_failure_starts_clean() {
        let device = make_test_device("1");
        let name = device.name().clone();
        let hook_device = device.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut action = Action::new("StartScan")
            .with_target(device.clone())
            .with_procedure(move || {
                let device = hook_device.clone();
                let calls = counter.clone();
                async move {
                    // First run leaves the state untouched so the
                    // postcondition times out; second run moves it.
                    if calls.fetch_add(1, Ordering::SeqCst) > 0 {
                        device.set_attribute("state", json!("RUNNING"));
                    }
                    Ok(())
                }
            })
            .with_postconditions(vec![Condition::transitions(
                vec![name],
                "state",
                json!("IDLE"),
                json!("RUNNING"),
            )]);

        assert!(action.execute(Duration::from_millis(50)).await.is_err());
        assert_eq!(action.state(), LifecycleState::Failed);

        action.execute(Duration::from_secs(5)).await.unwrap();
        assert_eq!(action.state(), LifecycleState::PostconditionsVerified);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_prepend_orders_conditions_first() {
        let name = DeviceName::new("tmc", "subarray", "1").unwrap();
        let action = Action::new("StartScan")
            .with_preconditions(vec![Condition::state_is(
                vec![name.clone()],
                "state",
                json!("IDLE"),
            )])
            .prepend_preconditions(vec![Condition::state_is(
                vec![name],
                "admin_mode",
                json!("ONLINE"),
            )]);

        let description = action.describe();
        let admin = description.find("admin_mode").unwrap();
        let state = description.find("state is currently").unwrap();
        assert!(admin < state);
    }

    #[test]
    fn test_describe_lists_conditions() {
        let name = DeviceName::new("tmc", "subarray", "1").unwrap();
        let action = Action::new("StartScan")
            .with_preconditions(vec![Condition::state_is(
                vec![name.clone()],
                "state",
                json!("IDLE"),
            )])
            .with_postconditions(vec![Condition::becomes(
                vec![name.clone()],
                "state",
                json!("RUNNING"),
            )])
            .with_sentinels(vec![Condition::becomes(vec![name], "state", json!("FAULT"))]);

        let description = action.describe();
        assert!(description.starts_with("Action 'StartScan'"));
        assert!(description.contains("requires:"));
        assert!(description.contains("verifies:"));
        assert!(description.contains("aborts on:"));
    }
}
