use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::sync::SyncConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub pairing_code: [u8; 8],
    pub setup_id: Option<String>,
    /// HomeKit name; the plug's alias when unset.
    pub accessory_name: Option<String>,
    /// Seconds between status polls, 0 disables polling.
    pub poll_interval_secs: u64,
    pub command_timeout_secs: u64,
    /// Startup queries retried before giving up, 0 fails fast.
    pub startup_retries: u32,
    pub metrics_port: Option<u16>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            pairing_code: [1, 1, 1, 2, 2, 3, 3, 3],
            setup_id: Some(String::from("HSXX")),
            accessory_name: None,
            poll_interval_secs: 10,
            command_timeout_secs: 5,
            startup_retries: 0,
            metrics_port: None,
        }
    }
}

impl Settings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: (self.poll_interval_secs > 0)
                .then(|| Duration::from_secs(self.poll_interval_secs)),
            command_timeout: self.command_timeout(),
        }
    }
}

/// Parses a HomeKit setup code written as `12345678` or `123-45-678`.
pub fn parse_pin(pin: &str) -> Result<[u8; 8]> {
    let digits = pin
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_digit(10).map(|d| d as u8))
        .collect::<Option<Vec<u8>>>();
    match digits {
        Some(digits) if digits.len() == 8 => {
            let mut code = [0u8; 8];
            code.copy_from_slice(&digits);
            Ok(code)
        }
        _ => bail!("Invalid pairing code '{pin}', expected 8 digits"),
    }
}
