//! Account registration and login.
//!
//! Passwords are stored as Argon2id PHC strings. A successful login yields a
//! bearer token from the configured [`TokenIssuer`]; the sync handler later
//! resolves it with the matching validator.

use crate::error::ServerError;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use keeper_core::{Database, StoreError, TokenIssuer, UserId, UserStore};
use std::sync::Arc;

pub struct Accounts {
    users: UserStore,
    issuer: Arc<dyn TokenIssuer>,
}

impl Accounts {
    pub fn new(db: &Database, issuer: Arc<dyn TokenIssuer>) -> Self {
        Self {
            users: UserStore::new(db.clone()),
            issuer,
        }
    }

    /// Create an account. Logins are unique.
    pub fn register(&self, login: &str, password: &str) -> Result<UserId, ServerError> {
        let login = login.trim();
        if login.is_empty() {
            return Err(ServerError::BadRequest("login is required".to_string()));
        }
        if password.is_empty() {
            return Err(ServerError::BadRequest("password is required".to_string()));
        }

        let hash = hash_password(password)?;
        match self.users.create(login, &hash) {
            Ok(id) => {
                tracing::info!("Registered user {} ({})", id, login);
                Ok(id)
            }
            Err(StoreError::Duplicate(_)) => {
                Err(ServerError::Conflict("user already exists".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check credentials and issue a token.
    pub fn login(&self, login: &str, password: &str, app_id: i32) -> Result<String, ServerError> {
        let login = login.trim();
        if login.is_empty() {
            return Err(ServerError::BadRequest("login is required".to_string()));
        }
        if password.is_empty() {
            return Err(ServerError::BadRequest("password is required".to_string()));
        }
        if app_id == 0 {
            return Err(ServerError::BadRequest("app_id is required".to_string()));
        }

        let user = self
            .users
            .find(login)?
            .ok_or_else(|| ServerError::Auth("invalid login or password".to_string()))?;

        if !verify_password(password, &user.password_hash) {
            tracing::info!("Rejected login for {}", login);
            return Err(ServerError::Auth("invalid login or password".to_string()));
        }

        let token = self
            .issuer
            .issue(user.id)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        tracing::info!("User {} logged in (app {})", user.id, app_id);
        Ok(token)
    }
}

fn hash_password(password: &str) -> Result<String, ServerError> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| ServerError::Internal(format!("Salt encoding failed: {}", e)))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ServerError::Internal(format!("Password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::{HmacTokens, TokenValidator};

    fn accounts() -> (Accounts, Arc<HmacTokens>) {
        let db = Database::in_memory().unwrap();
        let tokens = Arc::new(HmacTokens::new(b"test-secret", 3600));
        (Accounts::new(&db, tokens.clone()), tokens)
    }

    #[test]
    fn register_then_login() {
        let (accounts, tokens) = accounts();
        let id = accounts.register("alice", "hunter2").unwrap();

        let token = accounts.login("alice", "hunter2", 1).unwrap();
        assert_eq!(tokens.validate(&token).unwrap(), id);
    }

    #[test]
    fn duplicate_register_conflicts() {
        let (accounts, _) = accounts();
        accounts.register("bob", "pw").unwrap();
        assert!(matches!(
            accounts.register("bob", "other"),
            Err(ServerError::Conflict(_))
        ));
    }

    #[test]
    fn wrong_password_and_unknown_user() {
        let (accounts, _) = accounts();
        accounts.register("carol", "right").unwrap();
        assert!(matches!(
            accounts.login("carol", "wrong", 1),
            Err(ServerError::Auth(_))
        ));
        assert!(matches!(
            accounts.login("nobody", "right", 1),
            Err(ServerError::Auth(_))
        ));
    }

    #[test]
    fn missing_fields_are_bad_requests() {
        let (accounts, _) = accounts();
        assert!(matches!(accounts.register(" ", "pw"), Err(ServerError::BadRequest(_))));
        assert!(matches!(accounts.register("dave", ""), Err(ServerError::BadRequest(_))));
        assert!(matches!(accounts.login("dave", "pw", 0), Err(ServerError::BadRequest(_))));
    }

    #[test]
    fn stored_hash_is_phc_string() {
        let hash = hash_password("pw").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("pw", &hash));
        assert!(!verify_password("pw", "not a hash"));
    }
}
