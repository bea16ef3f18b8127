mod device_info;
mod relay;
mod watch;

pub use device_info::{get_device_info, get_raw_info};
pub use relay::switch_relay;
pub use watch::watch;
