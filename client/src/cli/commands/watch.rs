use std::time::Duration;

use hs1xx_client_rs::Hs1xxClientError;

use crate::{Params, utils::create_client};

pub async fn watch(params: Params, interval: u64) -> Result<(), Hs1xxClientError> {
    let client = create_client(&params)?;
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    let mut last: Option<bool> = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match client.system_info().await {
                    Ok(snapshot) if last != Some(snapshot.relay_on) => {
                        println!(
                            "'{}' ({}) is {}",
                            snapshot.alias,
                            snapshot.device_id,
                            if snapshot.relay_on { "on" } else { "off" }
                        );
                        last = Some(snapshot.relay_on);
                    }
                    Ok(_) => {}
                    Err(e) => println!("Query failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped watching {}", client.address());
                return Ok(());
            }
        }
    }
}
