//! Keeper server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub storage_path: PathBuf,
    /// HMAC key for bearer tokens. When empty a random key is generated at
    /// startup and every token dies with the process.
    pub token_secret: String,
    pub token_ttl_secs: i64,
    /// Upper bound on a single broadcast write to one peer.
    pub broadcast_timeout_ms: u64,
    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,
    /// Send mutations back to the connection they came from.
    pub echo_to_origin: bool,
    pub max_payload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            storage_path: PathBuf::from("keeper-server.db"),
            token_secret: String::new(),
            token_ttl_secs: 86_400,
            broadcast_timeout_ms: 2_000,
            outbound_buffer: 64,
            echo_to_origin: false,
            max_payload_size: 16 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml_dep::from_str(&content)?;
        Ok(config)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    /// Token signing key, generating an ephemeral one when none is configured.
    pub fn token_key(&self) -> Vec<u8> {
        if self.token_secret.is_empty() {
            tracing::warn!("No token_secret configured, issuing tokens with an ephemeral key");
            rand::random::<[u8; 32]>().to_vec()
        } else {
            self.token_secret.as_bytes().to_vec()
        }
    }
}
