use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hs1xx_client_rs::{DeviceClient, DeviceSnapshot, Hs1xxClientError};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::oneshot;

use crate::sync::AccessoryPort;

type Gate = oneshot::Sender<Result<Vec<u8>, Hs1xxClientError>>;

pub fn snapshot(relay_on: bool) -> DeviceSnapshot {
    DeviceSnapshot {
        alias: "Desk Lamp".to_string(),
        device_id: "8006ABCDEF0123456789".to_string(),
        model: "HS100(EU)".to_string(),
        relay_on,
        error_code: 0,
        software_version: None,
        hardware_version: None,
        mac: Some("50:C7:BF:00:11:22".to_string()),
        rssi: None,
        on_time: None,
    }
}

pub fn sysinfo_payload(relay_on: bool) -> Vec<u8> {
    json!({
        "system": {
            "get_sysinfo": {
                "alias": "Desk Lamp",
                "deviceId": "8006ABCDEF0123456789",
                "model": "HS100(EU)",
                "relay_state": relay_on as i64,
                "err_code": 0
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn ack_payload(err_code: i64) -> Vec<u8> {
    json!({"system": {"set_relay_state": {"err_code": err_code}}})
        .to_string()
        .into_bytes()
}

/// Waits until `condition` holds, failing the test after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[derive(Clone, Default)]
pub struct RecordingPort {
    pushes: Arc<RwLock<Vec<bool>>>,
}

impl RecordingPort {
    pub fn pushes(&self) -> Vec<bool> {
        self.pushes.read().clone()
    }
}

impl AccessoryPort for RecordingPort {
    fn push_state(&self, on: bool) {
        self.pushes.write().push(on);
    }
}

/// In-memory plug. Commands either answer at once or, when gated, wait until
/// the test releases them in issue order.
#[derive(Clone, Default)]
pub struct FakeDeviceClient {
    pub relay_on: Arc<AtomicBool>,
    pub queries: Arc<AtomicUsize>,
    commands: Arc<RwLock<Vec<bool>>>,
    should_fail: Arc<AtomicBool>,
    gated: Arc<AtomicBool>,
    gates: Arc<Mutex<VecDeque<Gate>>>,
}

impl FakeDeviceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            should_fail: Arc::new(AtomicBool::new(true)),
            ..Default::default()
        }
    }

    pub fn gated() -> Self {
        Self {
            gated: Arc::new(AtomicBool::new(true)),
            ..Default::default()
        }
    }

    pub fn commands(&self) -> Vec<bool> {
        self.commands.read().clone()
    }

    pub async fn wait_for_commands(&self, count: usize) {
        for _ in 0..200 {
            if self.commands.read().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} commands, got {:?}", self.commands());
    }

    /// Completes the oldest command still waiting.
    pub fn release(&self, reply: Result<Vec<u8>, Hs1xxClientError>) {
        let gate = self.gates.lock().pop_front().expect("no command waiting");
        let _ = gate.send(reply);
    }

    fn unreachable() -> Hs1xxClientError {
        Hs1xxClientError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "device unreachable",
        ))
    }
}

#[async_trait]
impl DeviceClient for FakeDeviceClient {
    async fn query(&self) -> Result<Vec<u8>, Hs1xxClientError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(Self::unreachable());
        }
        Ok(sysinfo_payload(self.relay_on.load(Ordering::SeqCst)))
    }

    async fn command(&self, on: bool) -> Result<Vec<u8>, Hs1xxClientError> {
        if self.gated.load(Ordering::SeqCst) {
            let (gate, receiver) = oneshot::channel();
            self.gates.lock().push_back(gate);
            self.commands.write().push(on);
            return receiver
                .await
                .unwrap_or_else(|_| Err(Hs1xxClientError::Generic("gate dropped".into())));
        }
        self.commands.write().push(on);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(Self::unreachable());
        }
        self.relay_on.store(on, Ordering::SeqCst);
        Ok(ack_payload(0))
    }
}
