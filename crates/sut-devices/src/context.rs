//! Explicit registry of the devices a harness instance drives

use dashmap::DashMap;
use sut_core::{DeviceName, SharedTarget};
use tracing::debug;

/// Registry mapping device names to target handles
///
/// A HarnessContext is constructed at the start of a test session, populated
/// with the targets the session drives, passed to whatever builds actions,
/// and torn down when the session ends. It replaces any notion of an ambient
/// global device registry; everything that needs a device handle receives it
/// from a context it was explicitly given.
pub struct HarnessContext {
    devices: DashMap<DeviceName, SharedTarget>,
}

impl HarnessContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
        }
    }

    /// Register a target, replacing any previous registration for its name
    pub fn register(&self, target: SharedTarget) {
        debug!(device = %target.name(), "Registering device");
        self.devices.insert(target.name().clone(), target);
    }

    /// Look up a target by device name
    pub fn device(&self, name: &DeviceName) -> Option<SharedTarget> {
        self.devices.get(name).map(|entry| entry.value().clone())
    }

    /// Names of all registered devices
    pub fn device_names(&self) -> Vec<DeviceName> {
        self.devices.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the context has no registered devices
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Release every registered target
    ///
    /// After teardown the context is empty and lookups fail; call sites
    /// holding cloned target handles keep them alive until dropped.
    pub fn teardown(&self) {
        debug!(count = self.devices.len(), "Tearing down harness context");
        self.devices.clear();
    }
}

impl Default for HarnessContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmulatedDevice;
    use sut_core::RemoteTarget;

    fn make_test_name(member: &str) -> DeviceName {
        DeviceName::new("tmc", "subarray", member).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let context = HarnessContext::new();
        let device = EmulatedDevice::new(make_test_name("1"));
        context.register(device.clone());

        assert_eq!(context.len(), 1);
        let found = context.device(&make_test_name("1")).unwrap();
        assert_eq!(found.name(), device.name());
    }

    #[test]
    fn test_unknown_lookup() {
        let context = HarnessContext::new();
        assert!(context.device(&make_test_name("9")).is_none());
    }

    #[test]
    fn test_teardown_empties_registry() {
        let context = HarnessContext::new();
        context.register(EmulatedDevice::new(make_test_name("1")));
        context.register(EmulatedDevice::new(make_test_name("2")));
        assert_eq!(context.len(), 2);

        context.teardown();
        assert!(context.is_empty());
        assert!(context.device(&make_test_name("1")).is_none());
    }
}
