//! Keeper service: the business rules behind a sync session.
//!
//! Decodes and validates incoming mutations, persists them with upsert
//! semantics and assembles per-user snapshots.

use crate::error::KeeperError;
use keeper_core::{
    validate_item, Database, Message, MessageType, Payload, ProtocolError, SecretItem,
    SecretStores, Snapshot, StoreError, Upserted, UserId,
};

/// A validated, normalized record change ready to persist and fan out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub msg_type: MessageType,
    pub item: SecretItem,
}

impl Mutation {
    /// Envelope for broadcasting to other devices. Carries no token.
    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        Message::mutation(self.msg_type, "", &self.item)
    }
}

/// Operations a sync session needs from the domain layer.
pub trait SyncService: Send + Sync {
    /// Full state for `user_id`. Categories that fail to load are logged and
    /// left empty; an error means nothing could be read.
    fn snapshot(&self, user_id: UserId) -> Result<Snapshot, KeeperError>;

    /// Check that an incoming envelope is a well-formed mutation.
    fn validate(&self, message: &Message) -> Result<Mutation, KeeperError>;

    /// Persist a mutation under `user_id`, inserting or replacing by natural key.
    fn save(&self, user_id: UserId, mutation: &Mutation) -> Result<Upserted, KeeperError>;
}

#[derive(Debug, Clone)]
pub struct KeeperService {
    stores: SecretStores,
}

impl KeeperService {
    pub fn new(db: &Database) -> Self {
        Self {
            stores: SecretStores::new(db),
        }
    }
}

fn collect<T>(
    user_id: UserId,
    category: &str,
    result: Result<Vec<T>, StoreError>,
    failures: &mut Vec<StoreError>,
) -> Vec<T> {
    match result {
        Ok(records) => records,
        Err(e) => {
            tracing::error!("Failed to load {} for user {}: {}", category, user_id, e);
            failures.push(e);
            Vec::new()
        }
    }
}

impl SyncService for KeeperService {
    fn snapshot(&self, user_id: UserId) -> Result<Snapshot, KeeperError> {
        let mut failures = Vec::new();
        let snapshot = Snapshot {
            credentials: collect(
                user_id,
                "credentials",
                self.stores.credentials.all(user_id),
                &mut failures,
            ),
            texts: collect(user_id, "texts", self.stores.texts.all(user_id), &mut failures),
            binaries: collect(
                user_id,
                "binaries",
                self.stores.binaries.all(user_id),
                &mut failures,
            ),
            cards: collect(user_id, "cards", self.stores.cards.all(user_id), &mut failures),
        };

        if failures.len() == 4 {
            if let Some(e) = failures.pop() {
                return Err(KeeperError::Persistence(e));
            }
        }
        Ok(snapshot)
    }

    fn validate(&self, message: &Message) -> Result<Mutation, KeeperError> {
        let item = match message.payload()? {
            Payload::New(item) | Payload::Update(item) => item,
            Payload::Snapshot(_) | Payload::Error(_) => {
                return Err(ProtocolError::UnexpectedType(message.msg_type.to_string()).into())
            }
        };
        Ok(Mutation {
            msg_type: message.msg_type,
            item: validate_item(&item)?,
        })
    }

    fn save(&self, user_id: UserId, mutation: &Mutation) -> Result<Upserted, KeeperError> {
        let outcome = self.stores.upsert(user_id, &mutation.item)?;
        tracing::debug!(
            "Saved {} '{}' for user {} ({:?})",
            mutation.item.kind(),
            mutation.item.natural_key(),
            user_id,
            outcome
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::{Binary, Card, Credentials, Text, ValidationError};

    fn service() -> (Database, KeeperService) {
        let db = Database::in_memory().unwrap();
        let svc = KeeperService::new(&db);
        (db, svc)
    }

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
    fn validate_accepts_new_and_update() {
        let (_db, svc) = service();
        for msg_type in [MessageType::New, MessageType::Update] {
            let msg = Message::mutation(msg_type, "tok", &note("k", "v")).unwrap();
            let m = svc.validate(&msg).unwrap();
            assert_eq!(m.msg_type, msg_type);
            assert_eq!(m.item.natural_key(), "k");
        }
    }

    #[test]
    fn validate_rejects_non_mutation_and_garbage() {
        let (_db, svc) = service();

        let snap = Message::snapshot(&Snapshot::default()).unwrap();
        assert!(matches!(
            svc.validate(&snap),
            Err(KeeperError::Decode(ProtocolError::UnexpectedType(_)))
        ));

        let garbage = Message {
            token: "tok".into(),
            msg_type: MessageType::New,
            value: b"not json".to_vec(),
        };
        assert!(matches!(svc.validate(&garbage), Err(KeeperError::Decode(_))));
    }

    #[test]
    fn validate_rejects_bad_card() {
        let (_db, svc) = service();
        let card: SecretItem = Card {
            tag: "visa".into(),
            number: "1234".into(),
            exp: "12/30".into(),
            cvv: 123,
            comment: String::new(),
            created: 1,
        }
        .into();
        let msg = Message::mutation(MessageType::New, "tok", &card).unwrap();
        assert!(matches!(
            svc.validate(&msg),
            Err(KeeperError::Validation(ValidationError::InvalidCardNumber))
        ));
    }

    #[test]
    fn save_upserts_by_natural_key() {
        let (_db, svc) = service();
        let first = Mutation {
            msg_type: MessageType::New,
            item: note("k1", "v1"),
        };
        assert_eq!(svc.save(1, &first).unwrap(), Upserted::Inserted);

        let again = Mutation {
            msg_type: MessageType::New,
            item: note("k1", "v2"),
        };
        assert_eq!(svc.save(1, &again).unwrap(), Upserted::Updated);

        let snap = svc.snapshot(1).unwrap();
        assert_eq!(snap.texts.len(), 1);
        assert_eq!(snap.texts[0].value, "v2");
        assert!(svc.snapshot(2).unwrap().is_empty());
    }

    #[test]
    fn snapshot_covers_all_categories() {
        let (_db, svc) = service();
        let cred: SecretItem = Credentials {
            tag: "mail".into(),
            login: "me@example.com".into(),
            password: "pw".into(),
            comment: String::new(),
            created: 1,
        }
        .into();
        let bin: SecretItem = Binary {
            tag: "keys".into(),
            key: "id_ed25519".into(),
            value: vec![0, 159, 146, 150, 255],
            comment: String::new(),
            created: 2,
        }
        .into();
        let card: SecretItem = Card {
            tag: "visa".into(),
            number: "4111111111111111".into(),
            exp: "09/27".into(),
            cvv: 123,
            comment: String::new(),
            created: 3,
        }
        .into();
        let save = |user: UserId, item: &SecretItem| {
            svc.save(
                user,
                &Mutation {
                    msg_type: MessageType::New,
                    item: item.clone(),
                },
            )
            .unwrap();
        };
        for item in [&cred, &note("k", "v"), &bin, &card] {
            save(3, item);
        }
        save(4, &note("other", "not yours"));
        save(4, &card);

        let snap = svc.snapshot(3).unwrap();
        assert_eq!(snap.len(), 4);
        assert_eq!(snap.items(), vec![cred, note("k", "v"), bin, card]);

        let theirs = svc.snapshot(4).unwrap();
        assert_eq!(theirs.len(), 2);
        assert_eq!(theirs.texts[0].key, "other");
    }

    #[test]
    fn snapshot_survives_one_failing_category() {
        let (db, svc) = service();
        svc.save(
            1,
            &Mutation {
                msg_type: MessageType::New,
                item: note("k", "v"),
            },
        )
        .unwrap();
        db.conn().unwrap().execute("DROP TABLE cards", []).unwrap();

        let snap = svc.snapshot(1).unwrap();
        assert_eq!(snap.texts.len(), 1);
        assert!(snap.cards.is_empty());
    }

    #[test]
    fn snapshot_errors_when_nothing_loads() {
        let (db, svc) = service();
        db.conn()
            .unwrap()
            .execute_batch(
                "DROP TABLE credentials; DROP TABLE texts; DROP TABLE binaries; DROP TABLE cards;",
            )
            .unwrap();
        assert!(matches!(
            svc.snapshot(1),
            Err(KeeperError::Persistence(_))
        ));
    }

    #[test]
    fn broadcast_message_has_no_token() {
        let m = Mutation {
            msg_type: MessageType::Update,
            item: note("k", "v"),
        };
        let msg = m.to_message().unwrap();
        assert!(msg.token.is_empty());
        assert_eq!(msg.payload().unwrap(), Payload::Update(note("k", "v")));
    }
}
