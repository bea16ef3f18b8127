mod protocol;

pub use protocol::cipher::{decrypt, encrypt};
pub use protocol::client::*;
pub use protocol::decoder::{DecodeError, DeviceSnapshot, decode, decode_ack};
