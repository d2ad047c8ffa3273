//! Command actions: invoking a remote command with verification around it
//!
//! A [`CommandAction`] is an [`Action`] whose procedure invokes one command
//! on one target. The immediate [`CommandResult`] is captured in a shared
//! slot, which long running command conditions read to correlate completion
//! events with the invocation that produced them.

use crate::action::{Action, ActionReport};
use crate::condition::{Condition, ValueMatch};
use crate::error::ActionError;
use crate::timeout::SharedDeadline;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sut_core::{CommandResult, DeviceName, ResultCode, SharedTarget};
use tracing::debug;

/// Shared slot holding the latest immediate result of a command
///
/// The slot is written by the command procedure and read synchronously by
/// condition predicates, so it uses a std mutex rather than an async one.
#[derive(Clone, Default)]
pub struct CommandResultSlot {
    inner: Arc<Mutex<Option<CommandResult>>>,
}

impl CommandResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the immediate result of an invocation
    pub fn set(&self, result: CommandResult) {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(result);
    }

    /// The stored result, if the command has been invoked
    pub fn get(&self) -> Option<CommandResult> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The id of the stored result, used to correlate completion events
    pub fn command_id(&self) -> Option<String> {
        self.get().map(|result| result.id)
    }
}

/// Condition that a long running command completes with an accepted code
///
/// Matches `command_result` events whose id equals the one captured in the
/// slot and whose code is in `accepted`. Events for other invocations are
/// ignored. Until the slot is filled, any id is accepted, which lets the
/// condition be built before the command runs.
pub fn lrc_completion(
    device: DeviceName,
    slot: &CommandResultSlot,
    accepted: Vec<ResultCode>,
) -> Condition {
    let codes = accepted
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let slot = slot.clone();
    let expected = ValueMatch::predicate(
        format!("long running command completes with code in [{codes}]"),
        move |value| {
            let Ok(result) = serde_json::from_value::<CommandResult>(value.clone()) else {
                return false;
            };
            if let Some(id) = slot.command_id() {
                if result.id != id {
                    return false;
                }
            }
            accepted.contains(&result.code)
        },
    );
    Condition::completion(device, expected)
}

/// Sentinel that fires when a long running command reports an error code
pub fn lrc_errors(device: DeviceName, slot: &CommandResultSlot) -> Condition {
    let slot = slot.clone();
    let expected = ValueMatch::predicate(
        "long running command reports an error code",
        move |value| {
            let Ok(result) = serde_json::from_value::<CommandResult>(value.clone()) else {
                return false;
            };
            if let Some(id) = slot.command_id() {
                if result.id != id {
                    return false;
                }
            }
            result.code.is_error()
        },
    );
    Condition::completion(device, expected).as_sentinel()
}

/// An action whose procedure invokes a single remote command
pub struct CommandAction {
    action: Action,
    device: DeviceName,
    result: CommandResultSlot,
}

impl CommandAction {
    /// Build an action that invokes `command` on `target`
    pub fn new(
        target: SharedTarget,
        command: impl Into<String>,
        arg: Option<serde_json::Value>,
    ) -> Self {
        let command = command.into();
        let device = target.name().clone();
        let result = CommandResultSlot::new();

        let slot = result.clone();
        let hook_target = target.clone();
        let hook_command = command.clone();
        let action = Action::new(format!("Command({device}, {command})"))
            .with_target(target)
            .with_procedure(move || {
                let target = hook_target.clone();
                let command = hook_command.clone();
                let arg = arg.clone();
                let slot = slot.clone();
                async move {
                    let result = target.invoke_command(&command, arg).await?;
                    debug!(command = %command, result = %result, "Command accepted");
                    slot.set(result);
                    Ok(())
                }
            });

        Self {
            action,
            device,
            result,
        }
    }

    /// Verify the command completes as a long running command
    ///
    /// Adds a completion postcondition on the target's `command_result`
    /// attribute. An empty `accepted` list defaults to [`ResultCode::Ok`].
    pub fn expect_completion(mut self, accepted: Vec<ResultCode>) -> Self {
        let accepted = if accepted.is_empty() {
            vec![ResultCode::Ok]
        } else {
            accepted
        };
        let condition = lrc_completion(self.device.clone(), &self.result, accepted);
        self.action = self.action.with_postconditions(vec![condition]);
        self
    }

    /// Abort verification as soon as the command reports an error code
    pub fn stop_on_lrc_errors(mut self) -> Self {
        let sentinel = lrc_errors(self.device.clone(), &self.result);
        self.action = self.action.with_sentinels(vec![sentinel]);
        self
    }

    pub fn with_preconditions(mut self, conditions: Vec<Condition>) -> Self {
        self.action = self.action.with_preconditions(conditions);
        self
    }

    pub fn with_postconditions(mut self, conditions: Vec<Condition>) -> Self {
        self.action = self.action.with_postconditions(conditions);
        self
    }

    pub fn with_sentinels(mut self, conditions: Vec<Condition>) -> Self {
        self.action = self.action.with_sentinels(conditions);
        self
    }

    /// Register an additional target for cross-device conditions
    pub fn with_target(mut self, target: SharedTarget) -> Self {
        self.action = self.action.with_target(target);
        self
    }

    /// Run the command action with a fresh verification budget
    pub async fn execute(&mut self, timeout: Duration) -> Result<ActionReport, ActionError> {
        self.action.execute(timeout).await
    }

    /// Run the command action against a shared verification budget
    pub async fn execute_shared(
        &mut self,
        deadline: &SharedDeadline,
    ) -> Result<ActionReport, ActionError> {
        self.action.execute_shared(deadline).await
    }

    /// The immediate result of the last invocation, if any
    pub fn last_result(&self) -> Option<CommandResult> {
        self.result.get()
    }

    /// The slot completion conditions read the invocation id from
    pub fn result_slot(&self) -> &CommandResultSlot {
        &self.result
    }

    /// Unwrap into the underlying action, for sequencing
    pub fn into_action(self) -> Action {
        self.action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sut_core::RemoteTarget;
    use sut_devices::EmulatedDevice;

    fn make_lrc_device(member: &str) -> Arc<EmulatedDevice> {
        let device = EmulatedDevice::new(DeviceName::new("tmc", "subarray", member).unwrap());
        device.set_attribute("state", json!("IDLE"));
        device.register_command("Scan", |device, _arg| {
            Box::pin(async move {
                let started = CommandResult::new(ResultCode::Started);
                let id = started.id.clone();
                let worker = device.clone();
                tokio::spawn(async move {
                    worker.set_attribute("state", json!("RUNNING"));
                    worker.complete_command(&id, ResultCode::Ok);
                });
                Ok(started)
            })
        });
        device
    }

    #[test]
    fn test_slot_roundtrip() {
        let slot = CommandResultSlot::new();
        assert!(slot.get().is_none());
        assert!(slot.command_id().is_none());

        let result = CommandResult::new(ResultCode::Started);
        let id = result.id.clone();
        slot.set(result);
        assert_eq!(slot.command_id(), Some(id));
    }

    #[test]
    fn test_lrc_completion_matches_only_own_invocation() {
        let device = DeviceName::new("tmc", "subarray", "1").unwrap();
        let slot = CommandResultSlot::new();
        let ours = CommandResult::new(ResultCode::Started);
        let our_id = ours.id.clone();
        slot.set(ours);

        let condition = lrc_completion(device, &slot, vec![ResultCode::Ok]);

        let own = serde_json::to_value(CommandResult::with_id(&our_id, ResultCode::Ok)).unwrap();
        assert!(condition.matches_value(&own));

        let foreign = serde_json::to_value(CommandResult::new(ResultCode::Ok)).unwrap();
        assert!(!condition.matches_value(&foreign));

        let failed = serde_json::to_value(CommandResult::with_id(&our_id, ResultCode::Failed))
            .unwrap();
        assert!(!condition.matches_value(&failed));
    }

    #[test]
    fn test_lrc_errors_matches_error_codes() {
        let device = DeviceName::new("tmc", "subarray", "1").unwrap();
        let slot = CommandResultSlot::new();
        let sentinel = lrc_errors(device, &slot);
        assert!(sentinel.is_sentinel());

        let failed = serde_json::to_value(CommandResult::new(ResultCode::Failed)).unwrap();
        assert!(sentinel.matches_value(&failed));

        let ok = serde_json::to_value(CommandResult::new(ResultCode::Ok)).unwrap();
        assert!(!sentinel.matches_value(&ok));
    }

    #[tokio::test]
    async fn test_command_action_waits_for_completion() {
        let device = make_lrc_device("1");
        let name = device.name().clone();

        let mut action = CommandAction::new(device, "Scan", None)
            .expect_completion(vec![ResultCode::Ok])
            .stop_on_lrc_errors()
            .with_postconditions(vec![Condition::becomes(
                vec![name],
                "state",
                json!("RUNNING"),
            )]);

        action.execute(Duration::from_secs(5)).await.unwrap();
        let result = action.last_result().unwrap();
        assert_eq!(result.code, ResultCode::Started);
    }

    #[tokio::test]
    async fn test_command_action_sentinel_on_failure() {
        let device = EmulatedDevice::new(DeviceName::new("tmc", "subarray", "1").unwrap());
        device.register_command("Scan", |device, _arg| {
            Box::pin(async move {
                let started = CommandResult::new(ResultCode::Started);
                let id = started.id.clone();
                let worker = device.clone();
                tokio::spawn(async move {
                    worker.complete_command(&id, ResultCode::Failed);
                });
                Ok(started)
            })
        });

        let mut action = CommandAction::new(device, "Scan", None)
            .expect_completion(vec![ResultCode::Ok])
            .stop_on_lrc_errors();

        let err = action.execute(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ActionError::Sentinel { .. }));
    }

    #[tokio::test]
    async fn test_unknown_command_is_procedure_error() {
        let device = EmulatedDevice::new(DeviceName::new("tmc", "subarray", "1").unwrap());
        let mut action = CommandAction::new(device, "NoSuchCommand", None);

        let err = action.execute(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ActionError::Procedure { .. }));
    }
}
