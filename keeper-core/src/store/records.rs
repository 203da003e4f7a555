//! Per-category secret stores: `all / by_key / save / update / close`.

use super::Database;
use crate::error::StoreError;
use crate::models::{Binary, Card, Credentials, ItemKind, SecretItem, Text};
use crate::protocol::Snapshot;
use crate::token::UserId;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::marker::PhantomData;

/// A secret record type that maps onto one table.
pub trait Record: Sized + Clone {
    const KIND: ItemKind;
    const TABLE: &'static str;
    const KEY_COLUMN: &'static str;
    /// Selected columns, in the order [`Record::from_row`] reads them.
    const COLUMNS: &'static str;

    fn key(&self) -> &str;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
    fn insert(&self, conn: &Connection, owner: UserId) -> rusqlite::Result<usize>;
    fn update(&self, conn: &Connection, owner: UserId) -> rusqlite::Result<usize>;
}

/// How an upsert was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Updated,
}

/// Keyed storage for one record type.
pub struct Store<R> {
    db: Database,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for Store<R> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> std::fmt::Debug for Store<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("table", &R::TABLE).finish()
    }
}

impl<R: Record> Store<R> {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            _record: PhantomData,
        }
    }

    /// All records for an owner, in insertion order.
    pub fn all(&self, owner: UserId) -> Result<Vec<R>, StoreError> {
        let conn = self.db.conn()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE owner_id = ?1 ORDER BY id",
            R::COLUMNS,
            R::TABLE
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([owner], |row| R::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Look up one record by its natural key.
    pub fn by_key(&self, owner: UserId, key: &str) -> Result<Option<R>, StoreError> {
        let conn = self.db.conn()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE owner_id = ?1 AND {} = ?2",
            R::COLUMNS,
            R::TABLE,
            R::KEY_COLUMN
        );
        let record = conn
            .query_row(&sql, params![owner, key], |row| R::from_row(row))
            .optional()?;
        Ok(record)
    }

    /// Insert a new record. Fails with [`StoreError::Duplicate`] if the key exists.
    pub fn save(&self, owner: UserId, record: &R) -> Result<(), StoreError> {
        let conn = self.db.conn()?;
        record.insert(&conn, owner).map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::Duplicate(record.key().to_string())
            } else {
                StoreError::Sqlite(e)
            }
        })?;
        Ok(())
    }

    /// Overwrite an existing record. Fails with [`StoreError::NotFound`] if absent.
    pub fn update(&self, owner: UserId, record: &R) -> Result<(), StoreError> {
        let conn = self.db.conn()?;
        let changed = record.update(&conn, owner)?;
        if changed == 0 {
            return Err(StoreError::NotFound(record.key().to_string()));
        }
        Ok(())
    }

    /// Save, or update when the natural key is already present.
    ///
    /// Concurrent writers for the same key race; whichever write lands last wins.
    pub fn upsert(&self, owner: UserId, record: &R) -> Result<Upserted, StoreError> {
        if self.by_key(owner, record.key())?.is_some() {
            self.update(owner, record)?;
            return Ok(Upserted::Updated);
        }

        match self.save(owner, record) {
            Ok(()) => Ok(Upserted::Inserted),
            Err(StoreError::Duplicate(_)) => {
                tracing::debug!("Concurrent insert of {} '{}', updating", R::KIND, record.key());
                self.update(owner, record)?;
                Ok(Upserted::Updated)
            }
            Err(e) => Err(e),
        }
    }

    /// Release this store's handle on the database.
    pub fn close(self) -> Result<(), StoreError> {
        self.db.close()
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

impl Record for Credentials {
    const KIND: ItemKind = ItemKind::Credentials;
    const TABLE: &'static str = "credentials";
    const KEY_COLUMN: &'static str = "login";
    const COLUMNS: &'static str = "tag, login, password, comment, created_at";

    fn key(&self) -> &str {
        &self.login
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            tag: row.get(0)?,
            login: row.get(1)?,
            password: row.get(2)?,
            comment: row.get(3)?,
            created: row.get(4)?,
        })
    }

    fn insert(&self, conn: &Connection, owner: UserId) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO credentials (owner_id, tag, login, password, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![owner, self.tag, self.login, self.password, self.comment, self.created],
        )
    }

    fn update(&self, conn: &Connection, owner: UserId) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE credentials SET tag = ?1, password = ?2, comment = ?3, created_at = ?4
             WHERE owner_id = ?5 AND login = ?6",
            params![self.tag, self.password, self.comment, self.created, owner, self.login],
        )
    }
}

impl Record for Text {
    const KIND: ItemKind = ItemKind::Text;
    const TABLE: &'static str = "texts";
    const KEY_COLUMN: &'static str = "key";
    const COLUMNS: &'static str = "tag, key, value, comment, created_at";

    fn key(&self) -> &str {
        &self.key
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            tag: row.get(0)?,
            key: row.get(1)?,
            value: row.get(2)?,
            comment: row.get(3)?,
            created: row.get(4)?,
        })
    }

    fn insert(&self, conn: &Connection, owner: UserId) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO texts (owner_id, tag, key, value, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![owner, self.tag, self.key, self.value, self.comment, self.created],
        )
    }

    fn update(&self, conn: &Connection, owner: UserId) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE texts SET tag = ?1, value = ?2, comment = ?3, created_at = ?4
             WHERE owner_id = ?5 AND key = ?6",
            params![self.tag, self.value, self.comment, self.created, owner, self.key],
        )
    }
}

impl Record for Binary {
    const KIND: ItemKind = ItemKind::Binary;
    const TABLE: &'static str = "binaries";
    const KEY_COLUMN: &'static str = "key";
    const COLUMNS: &'static str = "tag, key, value, comment, created_at";

    fn key(&self) -> &str {
        &self.key
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            tag: row.get(0)?,
            key: row.get(1)?,
            value: row.get(2)?,
            comment: row.get(3)?,
            created: row.get(4)?,
        })
    }

    fn insert(&self, conn: &Connection, owner: UserId) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO binaries (owner_id, tag, key, value, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![owner, self.tag, self.key, self.value, self.comment, self.created],
        )
    }

    fn update(&self, conn: &Connection, owner: UserId) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE binaries SET tag = ?1, value = ?2, comment = ?3, created_at = ?4
             WHERE owner_id = ?5 AND key = ?6",
            params![self.tag, self.value, self.comment, self.created, owner, self.key],
        )
    }
}

impl Record for Card {
    const KIND: ItemKind = ItemKind::Card;
    const TABLE: &'static str = "cards";
    const KEY_COLUMN: &'static str = "number";
    const COLUMNS: &'static str = "tag, number, exp, cvv, comment, created_at";

    fn key(&self) -> &str {
        &self.number
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            tag: row.get(0)?,
            number: row.get(1)?,
            exp: row.get(2)?,
            cvv: row.get(3)?,
            comment: row.get(4)?,
            created: row.get(5)?,
        })
    }

    fn insert(&self, conn: &Connection, owner: UserId) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO cards (owner_id, tag, number, exp, cvv, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                owner,
                self.tag,
                self.number,
                self.exp,
                self.cvv,
                self.comment,
                self.created
            ],
        )
    }

    fn update(&self, conn: &Connection, owner: UserId) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE cards SET tag = ?1, exp = ?2, cvv = ?3, comment = ?4, created_at = ?5
             WHERE owner_id = ?6 AND number = ?7",
            params![
                self.tag,
                self.exp,
                self.cvv,
                self.comment,
                self.created,
                owner,
                self.number
            ],
        )
    }
}

/// The four category stores opened on one database.
#[derive(Debug, Clone)]
pub struct SecretStores {
    pub credentials: Store<Credentials>,
    pub texts: Store<Text>,
    pub binaries: Store<Binary>,
    pub cards: Store<Card>,
}

impl SecretStores {
    pub fn new(db: &Database) -> Self {
        Self {
            credentials: Store::new(db.clone()),
            texts: Store::new(db.clone()),
            binaries: Store::new(db.clone()),
            cards: Store::new(db.clone()),
        }
    }

    /// Route a record of any kind to its store's upsert.
    pub fn upsert(&self, owner: UserId, item: &SecretItem) -> Result<Upserted, StoreError> {
        match item {
            SecretItem::Credentials(c) => self.credentials.upsert(owner, c),
            SecretItem::Text(t) => self.texts.upsert(owner, t),
            SecretItem::Binary(b) => self.binaries.upsert(owner, b),
            SecretItem::Card(c) => self.cards.upsert(owner, c),
        }
    }

    /// Read every category, failing on the first error.
    pub fn snapshot(&self, owner: UserId) -> Result<Snapshot, StoreError> {
        Ok(Snapshot {
            credentials: self.credentials.all(owner)?,
            texts: self.texts.all(owner)?,
            binaries: self.binaries.all(owner)?,
            cards: self.cards.all(owner)?,
        })
    }

    /// Release all four handles.
    pub fn close(self) -> Result<(), StoreError> {
        self.credentials.close()?;
        self.texts.close()?;
        self.binaries.close()?;
        self.cards.close()
    }
}
