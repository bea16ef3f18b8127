use std::time::Duration;

use async_trait::async_trait;
use derive_builder::Builder;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::protocol::cipher::{read_frame, write_frame};
use crate::protocol::decoder::{self, DecodeError, DeviceSnapshot};
use crate::protocol::messages::{Request, make_relay_message, make_sysinfo_message};

pub const DEFAULT_PORT: u16 = 9999;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum Hs1xxClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Client error: {0}")]
    Generic(String),
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct Hs1xxOptions {
    pub host: String,
    #[builder(default = "DEFAULT_PORT")]
    pub port: u16,
    #[builder(default = "DEFAULT_TIMEOUT")]
    pub timeout: Duration,
}

impl Hs1xxOptions {
    pub fn builder() -> Hs1xxOptionsBuilder {
        Hs1xxOptionsBuilder::default()
    }
}

/// Request/response access to one physical plug.
///
/// Both calls return the decrypted reply payload untouched; interpreting it
/// is left to the [`decoder`].
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn query(&self) -> Result<Vec<u8>, Hs1xxClientError>;

    async fn command(&self, on: bool) -> Result<Vec<u8>, Hs1xxClientError>;
}

/// TCP client for TP-Link HS1xx smart plugs.
#[derive(Clone, Debug)]
pub struct Hs1xxClient {
    options: Hs1xxOptions,
}

impl Hs1xxClient {
    pub fn new(options: Hs1xxOptions) -> Self {
        info!("Using HS1xx device at {}:{}", options.host, options.port);
        Self { options }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.options.host, self.options.port)
    }

    /// Queries and decodes the system information in one go.
    pub async fn system_info(&self) -> Result<DeviceSnapshot, Hs1xxClientError> {
        let raw = self.query().await?;
        Ok(decoder::decode(&raw)?)
    }

    /// Switches the relay and validates the acknowledgement.
    pub async fn set_relay(&self, on: bool) -> Result<(), Hs1xxClientError> {
        let raw = self.command(on).await?;
        Ok(decoder::decode_ack(&raw)?)
    }

    async fn send_request(&self, request: Request) -> Result<Vec<u8>, Hs1xxClientError> {
        let payload = request
            .to_bytes()
            .map_err(|e| Hs1xxClientError::Generic(format!("Serialization error: {e}")))?;
        let address = self.address();
        let limit = self.options.timeout;
        let exchange = async {
            let mut stream = TcpStream::connect(&address).await?;
            debug!("Sending request to {address}: {}", String::from_utf8_lossy(&payload));
            write_frame(&mut stream, &payload).await?;
            let reply = read_frame(&mut stream).await?;
            debug!("Received reply from {address}: {}", String::from_utf8_lossy(&reply));
            Ok::<_, Hs1xxClientError>(reply)
        };
        timeout(limit, exchange)
            .await
            .map_err(|_| Hs1xxClientError::Timeout(limit))?
    }
}

#[async_trait]
impl DeviceClient for Hs1xxClient {
    async fn query(&self) -> Result<Vec<u8>, Hs1xxClientError> {
        self.send_request(make_sysinfo_message()).await
    }

    async fn command(&self, on: bool) -> Result<Vec<u8>, Hs1xxClientError> {
        self.send_request(make_relay_message(on)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decoder::testing::sysinfo_payload;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serves a fixed number of connections the way a plug does.
    async fn fake_device(
        relay: Arc<AtomicBool>,
        connections: usize,
    ) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let mut seen = vec![];
            for _ in 0..connections {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_frame(&mut socket).await.unwrap();
                let request = String::from_utf8(request).unwrap();
                let reply = if request.contains("set_relay_state") {
                    relay.store(request.contains(r#""state":1"#), Ordering::SeqCst);
                    br#"{"system":{"set_relay_state":{"err_code":0}}}"#.to_vec()
                } else {
                    sysinfo_payload(relay.load(Ordering::SeqCst) as i64)
                };
                write_frame(&mut socket, &reply).await.unwrap();
                seen.push(request);
            }
            seen
        });
        (port, handle)
    }

    fn client_for(port: u16, timeout: Duration) -> Hs1xxClient {
        let options = Hs1xxOptions::builder()
            .host("127.0.0.1")
            .port(port)
            .timeout(timeout)
            .build()
            .unwrap();
        Hs1xxClient::new(options)
    }

    #[test]
    fn test_options_defaults() {
        let options = Hs1xxOptions::builder().host("10.0.0.2").build().unwrap();
        assert_eq!(options.port, DEFAULT_PORT);
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert!(Hs1xxOptions::builder().build().is_err());
    }

    #[tokio::test]
    async fn test_query_and_command_against_fake_device() {
        let relay = Arc::new(AtomicBool::new(false));
        let (port, device) = fake_device(relay.clone(), 3).await;
        let client = client_for(port, Duration::from_secs(2));

        assert!(!client.system_info().await.unwrap().relay_on);
        client.set_relay(true).await.unwrap();
        let snapshot = client.system_info().await.unwrap();
        assert!(snapshot.relay_on);
        assert_eq!(snapshot.alias, "Desk Lamp");

        let seen = device.await.unwrap();
        assert_eq!(
            seen,
            vec![
                r#"{"system":{"get_sysinfo":{}}}"#.to_string(),
                r#"{"system":{"set_relay_state":{"state":1}}}"#.to_string(),
                r#"{"system":{"get_sysinfo":{}}}"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_silent_device_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = client_for(port, Duration::from_millis(100));
        let err = client.query().await.unwrap_err();
        assert!(matches!(err, Hs1xxClientError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = client_for(port, Duration::from_secs(1));
        let err = client.command(true).await.unwrap_err();
        assert!(matches!(err, Hs1xxClientError::Io(_)));
    }
}
