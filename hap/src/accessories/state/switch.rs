use std::sync::atomic::AtomicBool;

use hs1xx_client_rs::DeviceSnapshot;

/// Value served to HomeKit reads. Follows optimistic writes and every state
/// the bridge pushes.
#[derive(Debug)]
pub(crate) struct SwitchState {
    pub(crate) on: AtomicBool,
}

impl From<&DeviceSnapshot> for SwitchState {
    fn from(snapshot: &DeviceSnapshot) -> Self {
        Self {
            on: AtomicBool::new(snapshot.relay_on),
        }
    }
}
