//! Client configuration and the cached login session.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Local SQLite vault.
    pub storage_path: PathBuf,
    /// Base URL of the auth API.
    pub server_url: String,
    /// WebSocket endpoint. Derived from `server_url` when empty.
    pub sync_url: String,
    pub request_timeout_secs: u64,
    pub app_id: i32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("keeper.db"),
            server_url: "http://127.0.0.1:8080".to_string(),
            sync_url: String::new(),
            request_timeout_secs: 30,
            app_id: 1,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml_dep::from_str(&content)?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn ws_url(&self) -> String {
        if self.sync_url.is_empty() {
            format!(
                "{}/ws",
                http_to_ws_scheme(self.server_url.trim_end_matches('/'))
            )
        } else {
            self.sync_url.clone()
        }
    }

    /// Where the login token is cached, next to the local vault.
    pub fn session_path(&self) -> PathBuf {
        self.storage_path.with_extension("session.json")
    }
}

/// Convert an HTTP(S) URL to the WS(S) scheme.
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://").replace("http://", "ws://")
    }
}

/// A successful login, cached between invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub login: String,
    pub server_url: String,
    pub token: String,
}

impl Session {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let session = serde_json::from_str(&content)
            .map_err(|e| ClientError::Session(format!("Corrupt session file: {}", e)))?;
        Ok(Some(session))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ClientError::Session(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn clear(path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_derivation() {
        let mut cfg = ClientConfig {
            server_url: "https://keeper.example.com/".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(cfg.ws_url(), "wss://keeper.example.com/ws");

        cfg.sync_url = "ws://10.0.0.1:9000/ws".to_string();
        assert_eq!(cfg.ws_url(), "ws://10.0.0.1:9000/ws");
    }

    #[test]
    fn http_to_ws_passes_ws_through() {
        assert_eq!(http_to_ws_scheme("http://localhost:8080"), "ws://localhost:8080");
        assert_eq!(http_to_ws_scheme("wss://host"), "wss://host");
    }

    #[test]
    fn session_path_sits_next_to_vault() {
        let cfg = ClientConfig {
            storage_path: PathBuf::from("/tmp/vaults/keeper.db"),
            ..ClientConfig::default()
        };
        assert_eq!(
            cfg.session_path(),
            PathBuf::from("/tmp/vaults/keeper.session.json")
        );
    }

    #[test]
    fn session_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.session.json");
        assert_eq!(Session::load(&path).unwrap(), None);

        let session = Session {
            login: "alice".into(),
            server_url: "http://127.0.0.1:8080".into(),
            token: "abc.def".into(),
        };
        session.save(&path).unwrap();
        assert_eq!(Session::load(&path).unwrap(), Some(session));

        Session::clear(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn config_file_overrides_defaults() {
        let cfg: ClientConfig = toml_dep::from_str("app_id = 7\nrequest_timeout_secs = 5\n").unwrap();
        assert_eq!(cfg.app_id, 7);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.storage_path, PathBuf::from("keeper.db"));
    }
}
