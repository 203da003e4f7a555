//! Keeper sync server.
//!
//! Accounts are created and logged into over a small JSON API; devices then
//! hold a WebSocket open on `/ws` to receive their snapshot and every change
//! made by the user's other devices.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod keeper;
pub mod registry;
pub mod server;

pub use config::ServerConfig;
pub use server::{build_router, AppState};

use keeper_core::Database;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Serve on an already-bound listener until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    db: &Database,
    config: &ServerConfig,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let state = AppState::new(db, config, shutdown.clone());
    let app = build_router(state, config);

    let mut stop = shutdown;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*stop.borrow() {
                if stop.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}
