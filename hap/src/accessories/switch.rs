use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use futures::FutureExt;
use hap::HapType;
use hap::characteristic::{CharacteristicCallbacks, HapCharacteristic};
use hap::{
    accessory::{AccessoryInformation, switch::SwitchAccessory},
    characteristic::AsyncCharacteristicCallbacks,
    pointer::Accessory as AccessoryPointer,
    server::{IpServer, Server},
};
use hs1xx_client_rs::DeviceSnapshot;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::accessories::state::switch::SwitchState;
use crate::sync::{AccessoryPort, SyncBridgeHandle};

pub(crate) struct Hs1xxSwitchAccessory {
    id: String,
    state: Arc<SwitchState>,
    accessory: AccessoryPointer,
}

impl Hs1xxSwitchAccessory {
    /// Builds the switch, routes its remote writes to `bridge` and adds it to
    /// the server.
    pub(crate) async fn new(
        id: u64,
        snapshot: &DeviceSnapshot,
        name: Option<String>,
        bridge: SyncBridgeHandle,
        server: &IpServer,
    ) -> Result<Self> {
        let device_id = snapshot.device_id.clone();

        let mut switch_accessory = SwitchAccessory::new(
            id,
            AccessoryInformation {
                name: name.unwrap_or(snapshot.alias.clone()),
                manufacturer: "TP-Link".to_string(),
                model: snapshot.model.clone(),
                serial_number: device_id.clone(),
                firmware_revision: firmware_revision(snapshot),
                ..Default::default()
            },
        )
        .context("Cannot create switch accessory")?;

        let state = Arc::new(SwitchState::from(snapshot));
        debug!(?state, "Created switch state: {snapshot:#?}");
        switch_accessory
            .switch
            .power_state
            .set_value(Value::Bool(snapshot.relay_on))
            .await?;

        Self::setup_read(device_id.as_str(), state.clone(), &mut switch_accessory);
        Self::on_remote_toggle(
            device_id.as_str(),
            bridge,
            state.clone(),
            &mut switch_accessory,
        );

        let accessory = server.add_accessory(switch_accessory).await?;
        info!("Switch {device_id} added to the server");
        Ok(Self {
            id: device_id,
            state,
            accessory,
        })
    }

    /// Port the sync bridge pushes confirmed states through.
    pub(crate) fn port(&self) -> HapSwitchPort {
        HapSwitchPort::spawn(self.id.clone(), self.state.clone(), self.accessory.clone())
    }

    fn setup_read(id: &str, state: Arc<SwitchState>, switch_accessory: &mut SwitchAccessory) {
        let id = id.to_string();
        switch_accessory.switch.power_state.on_read(Some(move || {
            let value = state.on.load(Ordering::Acquire);
            debug!("Switch {} read: {}", id, value);
            Ok(Some(value))
        }));
    }

    fn on_remote_toggle(
        id: &str,
        bridge: SyncBridgeHandle,
        state: Arc<SwitchState>,
        switch_accessory: &mut SwitchAccessory,
    ) {
        let id = id.to_string();
        switch_accessory
            .switch
            .power_state
            .on_update_async(Some(move |current_val: bool, new_val: bool| {
                let bridge = bridge.clone();
                let state = state.clone();
                let id = id.clone();
                async move {
                    info!("Switch {id}: remote toggle {current_val} -> {new_val}");
                    // Optimistic until the bridge confirms or rolls back.
                    state.on.store(new_val, Ordering::Release);
                    match bridge.request_set(new_val).await {
                        Ok(ticket) => {
                            tokio::spawn(async move {
                                match ticket.outcome().await {
                                    Ok(outcome) => debug!(?outcome, "Switch {id}: toggle settled"),
                                    Err(e) => warn!("Switch {id}: {e}"),
                                }
                            });
                        }
                        Err(e) => error!("Switch {id}: cannot reach sync bridge: {e}"),
                    }
                    Ok(())
                }
                .boxed()
            }));
    }
}

/// Applies pushed states to the HAP characteristic in push order, off the
/// caller's task.
pub(crate) struct HapSwitchPort {
    state: Arc<SwitchState>,
    updates: mpsc::UnboundedSender<bool>,
}

impl HapSwitchPort {
    fn spawn(id: String, state: Arc<SwitchState>, accessory: AccessoryPointer) -> Self {
        let (updates, mut receiver) = mpsc::unbounded_channel::<bool>();
        tokio::spawn(async move {
            while let Some(on) = receiver.recv().await {
                match update_power_state(&accessory, on).await {
                    Ok(()) => info!(
                        "Updated power state for switch {id}: {}",
                        if on { "On" } else { "Off" }
                    ),
                    Err(e) => error!("Failed to update switch {id}: {e}"),
                }
            }
        });
        Self { state, updates }
    }
}

impl AccessoryPort for HapSwitchPort {
    fn push_state(&self, on: bool) {
        self.state.on.store(on, Ordering::Release);
        if self.updates.send(on).is_err() {
            warn!("Switch updater stopped, dropping state {on}");
        }
    }
}

async fn update_power_state(accessory: &AccessoryPointer, on: bool) -> Result<()> {
    let mut accessory = accessory.lock().await;
    let service = accessory
        .get_mut_service(HapType::Switch)
        .context("Switch service not found")?;
    service
        .get_mut_characteristic(HapType::PowerState)
        .context("PowerState characteristic not found")?
        .update_value(Value::from(on))
        .await?;
    Ok(())
}

/// HomeKit wants `x.y.z`; the plug reports e.g. `1.2.5 Build 171213 Rel.101523`.
fn firmware_revision(snapshot: &DeviceSnapshot) -> Option<String> {
    snapshot
        .software_version
        .as_deref()
        .and_then(|version| version.split_whitespace().next())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::snapshot;

    #[test]
    fn test_firmware_revision() {
        let mut snapshot = snapshot(true);
        assert_eq!(firmware_revision(&snapshot), None);

        snapshot.software_version = Some("1.2.5 Build 171213 Rel.101523".to_string());
        assert_eq!(firmware_revision(&snapshot).as_deref(), Some("1.2.5"));
    }

    #[test]
    fn test_switch_state_follows_snapshot() {
        let state = SwitchState::from(&snapshot(true));
        assert!(state.on.load(Ordering::Acquire));
    }
}
