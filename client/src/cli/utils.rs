use std::time::Duration;

use hs1xx_client_rs::{Hs1xxClient, Hs1xxClientError, Hs1xxOptions};

use crate::Params;

pub fn create_client(params: &Params) -> Result<Hs1xxClient, Hs1xxClientError> {
    let options = Hs1xxOptions::builder()
        .host(params.host.clone())
        .port(params.port)
        .timeout(Duration::from_secs(params.timeout))
        .build()
        .map_err(|e| Hs1xxClientError::Generic(e.to_string()))?;
    Ok(Hs1xxClient::new(options))
}
