//! Account storage for the auth endpoints.

use super::Database;
use crate::error::StoreError;
use crate::token::UserId;
use rusqlite::{params, ErrorCode, OptionalExtension};

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub login: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a user and return its id. Fails with [`StoreError::Duplicate`] on a taken login.
    pub fn create(&self, login: &str, password_hash: &str) -> Result<UserId, StoreError> {
        let conn = self.db.conn()?;
        let now = chrono::Utc::now().timestamp();

        match conn.execute(
            "INSERT INTO users (login, password_hash, created_at) VALUES (?1, ?2, ?3)",
            params![login, password_hash, now],
        ) {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate(login.to_string()))
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    pub fn find(&self, login: &str) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.db.conn()?;
        let user = conn
            .query_row(
                "SELECT id, login, password_hash FROM users WHERE login = ?1",
                [login],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        login: row.get(1)?,
                        password_hash: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_find() {
        let users = UserStore::new(Database::in_memory().unwrap());
        let id = users.create("alice@example.com", "$argon2id$stub").unwrap();

        let found = users.find("alice@example.com").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.password_hash, "$argon2id$stub");
        assert!(users.find("bob@example.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_login_is_rejected() {
        let users = UserStore::new(Database::in_memory().unwrap());
        users.create("alice@example.com", "h1").unwrap();
        assert!(matches!(
            users.create("alice@example.com", "h2"),
            Err(StoreError::Duplicate(_))
        ));
    }
}
