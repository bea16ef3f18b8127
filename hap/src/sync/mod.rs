mod bridge;
mod error;
mod port;
#[cfg(test)]
pub(crate) mod testing;

pub(crate) use bridge::{SyncBridge, SyncBridgeHandle, SyncConfig, fetch_initial_snapshot};
pub(crate) use port::AccessoryPort;
