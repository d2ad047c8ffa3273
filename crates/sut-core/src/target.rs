//! Capability trait for addressing a remote device

use crate::{CommandResult, DeviceName, ReceivedEvent};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Error type for remote device interactions
#[derive(Debug, Clone, Error)]
pub enum TargetError {
    #[error("unknown attribute '{attribute}' on device {device}")]
    UnknownAttribute {
        device: DeviceName,
        attribute: String,
    },

    #[error("unknown command '{command}' on device {device}")]
    UnknownCommand {
        device: DeviceName,
        command: String,
    },

    #[error("command '{command}' on device {device} failed: {reason}")]
    CommandFailed {
        device: DeviceName,
        command: String,
        reason: String,
    },

    #[error("device {device} is unreachable: {reason}")]
    Unreachable { device: DeviceName, reason: String },
}

/// Capability interface over one remote device
///
/// Everything the harness needs from a device backend: read an attribute,
/// invoke a command, and subscribe to attribute-change events. Production
/// transports and in-process emulations implement the same trait and are
/// selected at construction time.
#[async_trait]
pub trait RemoteTarget: Send + Sync {
    /// The name of the device this target addresses
    fn name(&self) -> &DeviceName;

    /// Read the current value of an attribute
    async fn read_attribute(&self, attribute: &str) -> Result<serde_json::Value, TargetError>;

    /// Invoke a command, optionally with an argument
    ///
    /// For long running commands the returned result carries an in-progress
    /// code and an invocation id; completion is reported later via an event
    /// on the `command_result` attribute.
    async fn invoke_command(
        &self,
        command: &str,
        arg: Option<serde_json::Value>,
    ) -> Result<CommandResult, TargetError>;

    /// Subscribe to change events for an attribute
    ///
    /// Returns a receiver delivering every subsequent change of the
    /// attribute, in publication order.
    fn subscribe(&self, attribute: &str)
        -> Result<broadcast::Receiver<ReceivedEvent>, TargetError>;
}

/// Thread-safe handle to a remote target
pub type SharedTarget = Arc<dyn RemoteTarget>;
