//! Register and login endpoints.

use crate::error::ServerError;
use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub login: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub status: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub app_id: i32,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ServerError> {
    let user_id = state.accounts.register(&req.login, &req.password)?;
    Ok(Json(RegisterResponse {
        user_id,
        status: "registered".to_string(),
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    let token = state.accounts.login(&req.login, &req.password, req.app_id)?;
    Ok(Json(LoginResponse { token }))
}
