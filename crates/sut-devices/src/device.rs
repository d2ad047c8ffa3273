//! Emulated device backed by an in-memory attribute store

use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use sut_core::{
    attributes, CommandResult, DeviceName, ReceivedEvent, RemoteTarget, ResultCode, TargetError,
};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default channel capacity for attribute subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Future returned by a command handler
pub type CommandFuture = Pin<Box<dyn Future<Output = Result<CommandResult, TargetError>> + Send>>;

/// Handler invoked when a command is sent to an emulated device
///
/// The handler receives a handle to the device itself so it can update
/// attributes (publishing change events) and, for long running behavior,
/// spawn work that reports completion later.
pub type CommandHandler =
    Box<dyn Fn(Arc<EmulatedDevice>, Option<serde_json::Value>) -> CommandFuture + Send + Sync>;

/// An in-process device implementing [`RemoteTarget`]
///
/// Attributes live in a concurrent map; writing an attribute publishes a
/// change event to every subscriber of that attribute. Command behavior is
/// scripted by registering handlers. Long running commands return an
/// in-progress [`ResultCode`] and later publish a [`CommandResult`] event on
/// the `command_result` attribute, either from a spawned task inside the
/// handler or via [`EmulatedDevice::complete_command`].
pub struct EmulatedDevice {
    name: DeviceName,
    attributes: DashMap<String, serde_json::Value>,
    senders: DashMap<String, broadcast::Sender<ReceivedEvent>>,
    handlers: DashMap<String, CommandHandler>,
    self_ref: Weak<EmulatedDevice>,
    capacity: usize,
}

impl EmulatedDevice {
    /// Create a new emulated device
    pub fn new(name: DeviceName) -> Arc<Self> {
        Self::with_capacity(name, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new emulated device with specified channel capacity
    pub fn with_capacity(name: DeviceName, capacity: usize) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            name,
            attributes: DashMap::new(),
            senders: DashMap::new(),
            handlers: DashMap::new(),
            self_ref: weak.clone(),
            capacity,
        })
    }

    /// Set an attribute value and publish a change event to subscribers
    pub fn set_attribute(&self, attribute: impl Into<String>, value: serde_json::Value) {
        let attribute = attribute.into();
        debug!(device = %self.name, attribute = %attribute, "Setting attribute");
        self.attributes.insert(attribute.clone(), value.clone());
        self.publish(&attribute, value);
    }

    /// Get the current value of an attribute
    pub fn attribute(&self, attribute: &str) -> Option<serde_json::Value> {
        self.attributes.get(attribute).map(|v| v.clone())
    }

    /// Register a handler for a command name
    pub fn register_command(
        &self,
        command: impl Into<String>,
        handler: impl Fn(Arc<EmulatedDevice>, Option<serde_json::Value>) -> CommandFuture
            + Send
            + Sync
            + 'static,
    ) {
        self.handlers.insert(command.into(), Box::new(handler));
    }

    /// Report completion of a long running command
    ///
    /// Publishes a [`CommandResult`] event on the `command_result` attribute
    /// pairing the invocation id with its terminal code.
    pub fn complete_command(&self, id: impl Into<String>, code: ResultCode) {
        let result = CommandResult::with_id(id, code);
        debug!(device = %self.name, result = %result, "Reporting command completion");
        let value = serde_json::to_value(&result).unwrap_or_default();
        self.attributes
            .insert(attributes::COMMAND_RESULT.to_string(), value.clone());
        self.publish(attributes::COMMAND_RESULT, value);
    }

    fn publish(&self, attribute: &str, value: serde_json::Value) {
        if let Some(sender) = self.senders.get(attribute) {
            let event = ReceivedEvent::new(self.name.clone(), attribute, value);
            trace!(device = %self.name, attribute = %attribute, "Publishing change event");
            // Ignore send errors - they just mean no active receivers
            let _ = sender.send(event);
        }
    }
}

#[async_trait]
impl RemoteTarget for EmulatedDevice {
    fn name(&self) -> &DeviceName {
        &self.name
    }

    async fn read_attribute(&self, attribute: &str) -> Result<serde_json::Value, TargetError> {
        self.attributes
            .get(attribute)
            .map(|v| v.clone())
            .ok_or_else(|| TargetError::UnknownAttribute {
                device: self.name.clone(),
                attribute: attribute.to_string(),
            })
    }

    async fn invoke_command(
        &self,
        command: &str,
        arg: Option<serde_json::Value>,
    ) -> Result<CommandResult, TargetError> {
        let device = self
            .self_ref
            .upgrade()
            .ok_or_else(|| TargetError::Unreachable {
                device: self.name.clone(),
                reason: "device has been dropped".to_string(),
            })?;

        let handler = self
            .handlers
            .get(command)
            .ok_or_else(|| TargetError::UnknownCommand {
                device: self.name.clone(),
                command: command.to_string(),
            })?;

        debug!(device = %self.name, command = %command, "Invoking command");
        let future = (handler.value())(device, arg);
        drop(handler);
        future.await
    }

    fn subscribe(
        &self,
        attribute: &str,
    ) -> Result<broadcast::Receiver<ReceivedEvent>, TargetError> {
        trace!(device = %self.name, attribute = %attribute, "Subscribing to attribute");
        Ok(self
            .senders
            .entry(attribute.to_string())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe())
    }
}
