//! Local-first vault.
//!
//! Every record the device knows about lives here, whether it was typed on
//! this device or arrived over sync. Writes commit locally before anything is
//! sent to the server.

use crate::error::Result;
use keeper_core::{
    validate_item, Database, ItemKind, Payload, SecretItem, SecretStores, Snapshot, Upserted,
    LOCAL_OWNER,
};
use std::path::Path;

/// What applying a server payload did to the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A snapshot was merged; this many records were written.
    Merged(usize),
    /// One pushed record was stored.
    Stored(Upserted),
    /// The server reported an error; nothing was written.
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct LocalVault {
    db: Database,
    stores: SecretStores,
}

impl LocalVault {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::with_database(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::with_database(Database::in_memory()?))
    }

    fn with_database(db: Database) -> Self {
        let stores = SecretStores::new(&db);
        Self { db, stores }
    }

    /// Validate and store a record typed on this device. Returns the
    /// normalized record and whether it replaced an existing one.
    pub fn save_local(&self, item: &SecretItem) -> Result<(SecretItem, Upserted)> {
        let item = validate_item(item)?;
        let outcome = self.stores.upsert(LOCAL_OWNER, &item)?;
        Ok((item, outcome))
    }

    /// Apply a payload received from the server.
    ///
    /// Snapshots merge by natural key: records missing from the snapshot are
    /// kept, so offline writes survive a reconnect.
    pub fn apply(&self, payload: &Payload) -> Result<Applied> {
        match payload {
            Payload::Snapshot(snapshot) => {
                let mut written = 0;
                for item in snapshot.items() {
                    match self.stores.upsert(LOCAL_OWNER, &item) {
                        Ok(_) => written += 1,
                        Err(e) => tracing::warn!(
                            "Skipping {} '{}' from snapshot: {}",
                            item.kind(),
                            item.natural_key(),
                            e
                        ),
                    }
                }
                Ok(Applied::Merged(written))
            }
            Payload::New(item) | Payload::Update(item) => {
                Ok(Applied::Stored(self.stores.upsert(LOCAL_OWNER, item)?))
            }
            Payload::Error(reason) => Ok(Applied::Rejected(reason.clone())),
        }
    }

    /// Everything in the vault, grouped by category.
    pub fn all(&self) -> Result<Snapshot> {
        Ok(self.stores.snapshot(LOCAL_OWNER)?)
    }

    pub fn get(&self, kind: ItemKind, key: &str) -> Result<Option<SecretItem>> {
        let item = match kind {
            ItemKind::Credentials => self
                .stores
                .credentials
                .by_key(LOCAL_OWNER, key)?
                .map(SecretItem::from),
            ItemKind::Text => self.stores.texts.by_key(LOCAL_OWNER, key)?.map(SecretItem::from),
            ItemKind::Binary => self
                .stores
                .binaries
                .by_key(LOCAL_OWNER, key)?
                .map(SecretItem::from),
            ItemKind::Card => self.stores.cards.by_key(LOCAL_OWNER, key)?.map(SecretItem::from),
        };
        Ok(item)
    }

    pub fn close(self) -> Result<()> {
        self.stores.close()?;
        self.db.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use keeper_core::{Card, Credentials, Text, ValidationError};

    fn note(key: &str, value: &str) -> SecretItem {
        Text {
            tag: "t".into(),
            key: key.into(),
            value: value.into(),
            comment: String::new(),
            created: 1_700_000_000,
        }
        .into()
    }

    #[test]
    fn save_local_normalizes_and_upserts() {
        let vault = LocalVault::in_memory().unwrap();
        let card: SecretItem = Card {
            tag: " visa ".into(),
            number: "4111 1111 1111 1111".into(),
            exp: "12/30".into(),
            cvv: 123,
            comment: String::new(),
            created: 1,
        }
        .into();

        let (stored, outcome) = vault.save_local(&card).unwrap();
        assert_eq!(outcome, Upserted::Inserted);
        assert_eq!(stored.natural_key(), "4111111111111111");
        assert_eq!(stored.tag(), "visa");

        let (_, again) = vault.save_local(&card).unwrap();
        assert_eq!(again, Upserted::Updated);
        assert_eq!(vault.all().unwrap().cards.len(), 1);
    }

    #[test]
    fn save_local_rejects_invalid() {
        let vault = LocalVault::in_memory().unwrap();
        let bad: SecretItem = Credentials {
            tag: "x".into(),
            login: "".into(),
            password: "pw".into(),
            comment: String::new(),
            created: 1,
        }
        .into();
        assert!(matches!(
            vault.save_local(&bad),
            Err(ClientError::Validation(ValidationError::EmptyField("login")))
        ));
        assert!(vault.all().unwrap().is_empty());
    }

    #[test]
    fn snapshot_merges_without_dropping_local() {
        let vault = LocalVault::in_memory().unwrap();
        vault.save_local(&note("offline", "mine")).unwrap();
        vault.save_local(&note("shared", "old")).unwrap();

        let mut snapshot = Snapshot::default();
        snapshot.push(note("shared", "new"));
        snapshot.push(note("remote", "theirs"));

        assert_eq!(
            vault.apply(&Payload::Snapshot(snapshot)).unwrap(),
            Applied::Merged(2)
        );

        let all = vault.all().unwrap();
        assert_eq!(all.texts.len(), 3);
        assert_eq!(
            vault.get(ItemKind::Text, "shared").unwrap(),
            Some(note("shared", "new"))
        );
    }

    #[test]
    fn pushed_records_upsert_by_key() {
        let vault = LocalVault::in_memory().unwrap();
        assert_eq!(
            vault.apply(&Payload::New(note("k1", "v1"))).unwrap(),
            Applied::Stored(Upserted::Inserted)
        );
        assert_eq!(
            vault.apply(&Payload::New(note("k1", "v1"))).unwrap(),
            Applied::Stored(Upserted::Updated)
        );
        assert_eq!(
            vault.apply(&Payload::Update(note("k1", "v2"))).unwrap(),
            Applied::Stored(Upserted::Updated)
        );
        let all = vault.all().unwrap();
        assert_eq!(all.texts.len(), 1);
        assert_eq!(all.texts[0].value, "v2");
    }

    #[test]
    fn error_payload_writes_nothing() {
        let vault = LocalVault::in_memory().unwrap();
        assert_eq!(
            vault.apply(&Payload::Error("invalid token".into())).unwrap(),
            Applied::Rejected("invalid token".into())
        );
        assert!(vault.all().unwrap().is_empty());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.db");

        let vault = LocalVault::open(&path).unwrap();
        vault.save_local(&note("k", "v")).unwrap();
        vault.close().unwrap();

        let vault = LocalVault::open(&path).unwrap();
        assert_eq!(vault.get(ItemKind::Text, "k").unwrap(), Some(note("k", "v")));
        assert!(vault.get(ItemKind::Card, "k").unwrap().is_none());
    }
}
