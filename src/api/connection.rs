use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;

use super::client::ApiClient;

/// Hard cap on how long a reachability probe may take.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("timed out waiting for the server")]
    Timeout,

    #[error("server unreachable: {0}")]
    Unreachable(String),
}

/// Tracks whether the completion server is reachable. Checks are user- or
/// lifecycle-triggered only; there is no automatic retry.
pub struct ConnectionMonitor {
    client: ApiClient,
    check_timeout: Duration,
    connected: bool,
}

impl ConnectionMonitor {
    pub fn new(client: ApiClient) -> Self {
        Self::with_timeout(client, CHECK_TIMEOUT)
    }

    pub fn with_timeout(client: ApiClient, check_timeout: Duration) -> Self {
        Self {
            client,
            check_timeout,
            connected: false,
        }
    }

    /// The flag every component consults before issuing network operations.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Probe `GET {base}/models`, aborting after the configured timeout.
    pub async fn check(&mut self) -> Result<(), ConnectionError> {
        match timeout(self.check_timeout, self.client.list_models()).await {
            Ok(Ok(_)) => {
                self.connected = true;
                Ok(())
            }
            Ok(Err(e)) => {
                self.connected = false;
                Err(ConnectionError::Unreachable(e.to_string()))
            }
            Err(_) => {
                self.connected = false;
                Err(ConnectionError::Timeout)
            }
        }
    }
}
