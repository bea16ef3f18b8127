use hs1xx_client_rs::Hs1xxClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Command for generation {generation} failed: {source}")]
    CommandFailed {
        generation: u64,
        #[source]
        source: Hs1xxClientError,
    },
    #[error("Sync bridge is not running")]
    Closed,
}
