//! Connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one managed connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Flat delay before redialing after an abnormal close.
    pub reconnect_delay: Duration,
    /// Capacity of the outbound frame queue per physical link.
    pub send_queue: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            send_queue: 64,
        }
    }
}
