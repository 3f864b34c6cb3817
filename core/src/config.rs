//! Client configuration.
//!
//! Timeouts are fixed per client rather than per call. The pool fields size
//! the runtime a client starts for itself; they are ignored when the client
//! is handed an existing runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

/// Settings shared by every exchange a client issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Applied before caller headers; a caller header with the same name wins.
    pub default_headers: Vec<(String, String)>,
    pub worker_threads: usize,
    pub max_blocking_threads: usize,
    pub keep_alive_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            default_headers: vec![
                ("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string()),
                ("Connection".to_string(), "Keep-Alive".to_string()),
            ],
            worker_threads: cpus.saturating_sub(1).clamp(2, 4),
            max_blocking_threads: cpus * 2 + 1,
            keep_alive_secs: 30,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ClientError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}
