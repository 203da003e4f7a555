//! Axum router setup and shared state.

use crate::auth::Accounts;
use crate::config::ServerConfig;
use crate::handlers::{auth, sync};
use crate::keeper::{KeeperService, SyncService};
use crate::registry::ConnectionRegistry;
use axum::routing::{get, post};
use axum::Router;
use keeper_core::{Database, HmacTokens, TokenValidator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Knobs for live sync sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub broadcast_timeout: Duration,
    pub outbound_buffer: usize,
    pub echo_to_origin: bool,
    pub max_message_size: usize,
}

impl From<&ServerConfig> for SessionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            broadcast_timeout: config.broadcast_timeout(),
            outbound_buffer: config.outbound_buffer.max(1),
            echo_to_origin: config.echo_to_origin,
            max_message_size: config.max_payload_size,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub keeper: Arc<dyn SyncService>,
    pub tokens: Arc<dyn TokenValidator>,
    pub accounts: Arc<Accounts>,
    pub registry: Arc<ConnectionRegistry>,
    pub session: SessionSettings,
    /// Flips to `true` when the server is shutting down.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(db: &Database, config: &ServerConfig, shutdown: watch::Receiver<bool>) -> Self {
        let tokens = Arc::new(HmacTokens::new(&config.token_key(), config.token_ttl_secs));
        Self {
            keeper: Arc::new(KeeperService::new(db)),
            tokens: tokens.clone(),
            accounts: Arc::new(Accounts::new(db, tokens)),
            registry: Arc::new(ConnectionRegistry::new()),
            session: SessionSettings::from(config),
            shutdown,
        }
    }
}

pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/ws", get(sync::connect))
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_payload_size))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
