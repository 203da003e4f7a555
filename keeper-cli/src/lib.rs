//! Keeper client.
//!
//! A local-first vault of secrets that stays in step with the user's other
//! devices through the keeper server.

pub mod auth;
pub mod config;
pub mod error;
pub mod local;
pub mod sync;

pub use auth::AuthClient;
pub use config::{ClientConfig, Session};
pub use error::{ClientError, Result};
pub use local::{Applied, LocalVault};
pub use sync::{SyncClient, SyncEvent, SyncHandle, EVENT_BUFFER};
