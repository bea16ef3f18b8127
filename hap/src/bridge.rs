use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hap::{
    Config, MacAddress, Pin,
    accessory::AccessoryCategory,
    server::{IpServer, Server},
    storage::{FileStorage, Storage},
};
use hs1xx_client_rs::{DeviceSnapshot, Hs1xxClient, Hs1xxClientError, Hs1xxOptions};
use tokio::signal;
use tracing::{error, info, warn};

use crate::accessories::Hs1xxSwitchAccessory;
use crate::settings::Settings;
use crate::sync::{SyncBridge, SyncBridgeHandle, fetch_initial_snapshot};

const SWITCH_ACCESSORY_ID: u64 = 1;
const STARTUP_BACKOFF: Duration = Duration::from_secs(1);

fn generate_setup_uri(pincode: &str, category: u64, setup_id: &str) -> String {
    let value_low = pincode.replace('-', "").parse::<u64>().unwrap_or(0);

    let version = 0;
    let reserved = 0;
    let flag = 2; // IP transport
    let mut payload: u64 = 0;

    payload |= version & 0x7;
    payload <<= 4;
    payload |= reserved & 0xf;

    payload <<= 8;
    payload |= category & 0xff;

    payload <<= 4;
    payload |= flag & 0xf;
    payload <<= 27u64;
    payload |= value_low & 0x07ff_ffff;

    let encoded_payload = format!("{:0>9}", base36_encode(payload));
    format!("X-HM://{encoded_payload}{setup_id}")
}

fn base36_encode(mut num: u64) -> String {
    let mut chars = Vec::new();
    while num > 0 {
        let rem = (num % 36) as u8;
        chars.push(if rem < 10 {
            (b'0' + rem) as char
        } else {
            (b'A' + rem - 10) as char
        });
        num /= 36;
    }
    chars.reverse();
    if chars.is_empty() {
        chars.push('0');
    }
    chars.into_iter().collect()
}

/// `50:C7:BF:00:11:22` (or dash separated) into raw bytes.
fn parse_mac(mac: &str) -> Option<[u8; 6]> {
    let bytes = mac
        .split([':', '-'])
        .map(|part| u8::from_str_radix(part, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    bytes.try_into().ok()
}

async fn load_config(
    storage: &mut FileStorage,
    snapshot: &DeviceSnapshot,
    pin: Option<[u8; 8]>,
    settings: &Settings,
) -> Result<Config> {
    let config = match storage.load_config().await {
        Ok(mut config) => {
            info!("Loaded pairing config");
            config.redetermine_local_ip();
            if let Some(pin) = pin {
                config.pin = Pin::new(pin)?;
            }
            config
        }
        Err(_) => {
            info!("Creating new pairing config");
            let device_id = snapshot
                .mac
                .as_deref()
                .and_then(parse_mac)
                .unwrap_or_else(|| {
                    warn!("Device reported no usable MAC address, using a random HAP id");
                    rand::random::<[u8; 6]>()
                });
            Config {
                pin: Pin::new(pin.unwrap_or(settings.pairing_code))?,
                name: settings
                    .accessory_name
                    .clone()
                    .unwrap_or(snapshot.alias.clone()),
                device_id: MacAddress::from(device_id),
                category: AccessoryCategory::Switch,
                ..Default::default()
            }
        }
    };
    storage.save_config(&config).await?;
    Ok(config)
}

/// Resolves once SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

pub async fn start_bridge(
    host: &str,
    port: u16,
    pin: Option<[u8; 8]>,
    settings: Settings,
) -> Result<()> {
    let options = Hs1xxOptions::builder()
        .host(host)
        .port(port)
        .timeout(settings.command_timeout())
        .build()
        .map_err(|e| Hs1xxClientError::Generic(e.to_string()))?;
    let client = Arc::new(Hs1xxClient::new(options));

    info!("Querying plug at {}...", client.address());
    let initial = fetch_initial_snapshot(
        &*client,
        settings.startup_retries,
        STARTUP_BACKOFF,
        settings.command_timeout(),
    )
    .await
    .with_context(|| format!("Cannot read initial state from {}", client.address()))?;
    info!(
        "Found {} ({}), relay is {}",
        initial.alias,
        initial.model,
        if initial.relay_on { "on" } else { "off" }
    );

    let mut storage = FileStorage::current_dir().await?;
    let config = load_config(&mut storage, &initial, pin, &settings).await?;
    let pin = config.pin.to_string();
    let server = IpServer::new(config, storage).await?;

    let (bridge, inbox) = SyncBridgeHandle::channel();
    let switch = Hs1xxSwitchAccessory::new(
        SWITCH_ACCESSORY_ID,
        &initial,
        settings.accessory_name.clone(),
        bridge.clone(),
        &server,
    )
    .await
    .context("Failed to add switch accessory")?;

    let worker = SyncBridge::new(client, switch.port(), settings.sync_config()).start(&initial, inbox);

    info!("Starting HAP server...");
    let handle = server.run_handle();
    let setup_id = settings.setup_id.as_deref().unwrap_or_default();
    info!("PIN for the switch accessory is: {pin}, setup ID: {setup_id}");
    let uri = generate_setup_uri(pin.as_str(), AccessoryCategory::Switch as u64, setup_id);
    qr2term::print_qr(uri)?;

    let result = tokio::select! {
        res = handle => res.context("HAP server stopped"),
        _ = shutdown_signal() => {
            info!("signal received, starting graceful shutdown");
            Ok(())
        }
    };

    match bridge.state().await {
        Ok(state) => info!(?state, "Final bridge state"),
        Err(e) => warn!("Bridge already stopped: {e}"),
    }
    bridge.shutdown().await;
    if let Err(e) = worker.await {
        error!("Sync bridge task failed: {e}");
    }
    result
}
