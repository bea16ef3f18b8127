//! Decoding of device replies into typed snapshots.
//!
//! The device answers every request with a JSON object nested under the
//! module and method names of the request, e.g.
//! `{"system":{"get_sysinfo":{...,"err_code":0}}}`. The error code is read
//! first so that error replies, which usually carry no other fields, are
//! reported as [`DecodeError::DeviceError`] rather than as malformed.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Device reported error code {code}")]
    DeviceError { code: i64 },
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::MalformedPayload(e.to_string())
    }
}

/// Immutable view of the device status at the time of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub alias: String,
    pub device_id: String,
    pub model: String,
    pub relay_on: bool,
    pub error_code: i64,
    pub software_version: Option<String>,
    pub hardware_version: Option<String>,
    pub mac: Option<String>,
    pub rssi: Option<i64>,
    pub on_time: Option<i64>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    system: T,
}

#[derive(Deserialize)]
struct SysinfoReply {
    get_sysinfo: Value,
}

#[derive(Deserialize)]
struct RelayReply {
    set_relay_state: Value,
}

#[derive(Deserialize)]
struct ErrorCode {
    #[serde(default)]
    err_code: Option<Number>,
}

#[derive(Deserialize)]
struct Sysinfo {
    alias: String,
    #[serde(rename = "deviceId")]
    device_id: String,
    model: String,
    relay_state: Number,
    #[serde(default)]
    sw_ver: Option<String>,
    #[serde(default)]
    hw_ver: Option<String>,
    #[serde(default)]
    mac: Option<String>,
    #[serde(default)]
    rssi: Option<i64>,
    #[serde(default)]
    on_time: Option<i64>,
}

/// Whether an integer field is non-zero. Floats are not integers.
fn is_nonzero(field: &str, value: &Number) -> Result<bool, DecodeError> {
    match (value.as_i64(), value.as_u64()) {
        (Some(n), _) => Ok(n != 0),
        (None, Some(_)) => Ok(true),
        (None, None) => Err(DecodeError::MalformedPayload(format!(
            "{field} must be an integer, got {value}"
        ))),
    }
}

fn check_error_code(body: &Value) -> Result<i64, DecodeError> {
    let ErrorCode { err_code } = ErrorCode::deserialize(body)?;
    match err_code {
        Some(code) if is_nonzero("err_code", &code)? => Err(DecodeError::DeviceError {
            // Codes past i64::MAX are clamped.
            code: code.as_i64().unwrap_or(i64::MAX),
        }),
        _ => Ok(0),
    }
}

/// Decodes a `get_sysinfo` reply.
pub fn decode(raw: &[u8]) -> Result<DeviceSnapshot, DecodeError> {
    let Envelope {
        system: SysinfoReply { get_sysinfo },
    } = serde_json::from_slice(raw)?;
    let error_code = check_error_code(&get_sysinfo)?;
    let info = Sysinfo::deserialize(&get_sysinfo)?;
    let relay_on = is_nonzero("relay_state", &info.relay_state)?;
    Ok(DeviceSnapshot {
        alias: info.alias,
        device_id: info.device_id,
        model: info.model,
        relay_on,
        error_code,
        software_version: info.sw_ver,
        hardware_version: info.hw_ver,
        mac: info.mac,
        rssi: info.rssi,
        on_time: info.on_time,
    })
}

/// Validates a `set_relay_state` reply.
pub fn decode_ack(raw: &[u8]) -> Result<(), DecodeError> {
    let Envelope {
        system: RelayReply { set_relay_state },
    } = serde_json::from_slice(raw)?;
    check_error_code(&set_relay_state)?;
    Ok(())
}
