//! Core types for the SUT harness
//!
//! This crate provides the fundamental types used throughout the harness:
//! DeviceName, ReceivedEvent, ResultCode, CommandResult, and the RemoteTarget
//! capability trait that concrete device backends implement.

mod command;
mod device;
mod event;
mod target;

pub use command::{CommandResult, ResultCode};
pub use device::{DeviceName, DeviceNameError};
pub use event::ReceivedEvent;
pub use target::{RemoteTarget, SharedTarget, TargetError};

/// Well-known attribute names used across the harness
pub mod attributes {
    /// Attribute carrying the operational state of a device
    pub const STATE: &str = "state";

    /// Attribute on which long running command completion is reported
    ///
    /// Each event on this attribute carries a serialized [`CommandResult`]
    /// pairing a command id with a terminal result code.
    ///
    /// [`CommandResult`]: crate::CommandResult
    pub const COMMAND_RESULT: &str = "command_result";
}
