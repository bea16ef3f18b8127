use hs1xx_client_rs::{DeviceClient, Hs1xxClientError};

use crate::{Params, utils::create_client};

pub async fn get_device_info(params: Params) -> Result<(), Hs1xxClientError> {
    let client = create_client(&params)?;
    let snapshot = client.system_info().await?;
    let json = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| Hs1xxClientError::Generic(e.to_string()))?;
    println!("Device info: {json}");
    Ok(())
}

pub async fn get_raw_info(params: Params) -> Result<(), Hs1xxClientError> {
    let client = create_client(&params)?;
    let raw = client.query().await?;
    println!("{}", String::from_utf8_lossy(&raw));
    Ok(())
}
