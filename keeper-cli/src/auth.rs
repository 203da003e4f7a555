//! HTTP client for the server's account endpoints.

use crate::error::{ClientError, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct RegisterResponse {
    user_id: i64,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct AuthClient {
    client: reqwest::Client,
    server_url: String,
}

impl AuthClient {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create an account. Returns the new user id.
    pub async fn register(&self, login: &str, password: &str) -> Result<i64> {
        let body = serde_json::json!({
            "login": login,
            "password": password,
        });
        let resp: RegisterResponse = self.post("/api/v1/auth/register", &body).await?;
        tracing::info!("Registered {} as user {}", login, resp.user_id);
        Ok(resp.user_id)
    }

    /// Log in and return a bearer token for the sync connection.
    pub async fn login(&self, login: &str, password: &str, app_id: i32) -> Result<String> {
        let body = serde_json::json!({
            "login": login,
            "password": password,
            "app_id": app_id,
        });
        let resp: LoginResponse = self.post("/api/v1/auth/login", &body).await?;
        Ok(resp.token)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> Result<T> {
        let url = format!("{}{}", self.server_url, path);
        let resp = self.client.post(&url).json(body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<ErrorBody>()
                .await
                .map(|b| b.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(ClientError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }
}
