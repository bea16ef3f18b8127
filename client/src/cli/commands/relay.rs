use hs1xx_client_rs::Hs1xxClientError;

use crate::{Params, utils::create_client};

pub async fn switch_relay(params: Params, on: bool) -> Result<(), Hs1xxClientError> {
    let client = create_client(&params)?;
    client.set_relay(on).await?;
    println!(
        "Device {} switched {}",
        client.address(),
        if on { "on" } else { "off" }
    );
    Ok(())
}
