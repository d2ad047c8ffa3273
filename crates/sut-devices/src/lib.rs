//! In-process device backends for the SUT harness
//!
//! This crate provides EmulatedDevice, a RemoteTarget implementation backed
//! by an in-memory attribute store, and HarnessContext, the explicit device
//! registry handed to whatever constructs actions.

mod context;
mod device;

pub use context::HarnessContext;
pub use device::{CommandFuture, CommandHandler, EmulatedDevice};
