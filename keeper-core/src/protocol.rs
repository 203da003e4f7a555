//! Sync envelope protocol.
//!
//! Every frame on a sync connection is a JSON [`Message`]:
//!
//! ```text
//! {"token": "<bearer>", "type": "snapshot"|"new"|"update"|"error", "value": "<base64>"}
//! ```
//!
//! `value` is opaque at the envelope level. Its shape is chosen by `type`:
//! a [`Snapshot`] for `snapshot`, a [`SecretItem`] for `new`/`update`, and a
//! UTF-8 reason for `error`. [`Message::payload`] decodes it by looking at the
//! envelope type first, then the record's own `type` field.

use crate::error::ProtocolError;
use crate::models::{base64_bytes, Binary, Card, Credentials, SecretItem, Text};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Snapshot,
    New,
    Update,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::New => "new",
            Self::Update => "update",
            Self::Error => "error",
        }
    }

    /// Whether this type carries a single secret record.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::New | Self::Update)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit exchanged over a sync connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub token: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(with = "base64_bytes", default)]
    pub value: Vec<u8>,
}

/// Full state of one user's secrets, grouped by category.
///
/// Each record is written with its own `type` field, the same shape a
/// `new`/`update` value has. A record filed under the wrong group is an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, with = "tagged_records")]
    pub credentials: Vec<Credentials>,
    #[serde(default, with = "tagged_records")]
    pub texts: Vec<Text>,
    #[serde(default, with = "tagged_records")]
    pub binaries: Vec<Binary>,
    #[serde(default, with = "tagged_records")]
    pub cards: Vec<Card>,
}

mod tagged_records {
    use crate::models::SecretItem;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, R>(records: &[R], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        R: Clone + Into<SecretItem>,
    {
        serializer.collect_seq(records.iter().cloned().map(Into::<SecretItem>::into))
    }

    pub fn deserialize<'de, D, R>(deserializer: D) -> Result<Vec<R>, D::Error>
    where
        D: Deserializer<'de>,
        R: TryFrom<SecretItem, Error = SecretItem>,
    {
        Vec::<SecretItem>::deserialize(deserializer)?
            .into_iter()
            .map(|item| {
                R::try_from(item).map_err(|other| {
                    <D::Error as Error>::custom(format!(
                        "{} record in the wrong group",
                        other.kind()
                    ))
                })
            })
            .collect()
    }
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.credentials.len() + self.texts.len() + self.binaries.len() + self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into individual records, category by category.
    pub fn items(&self) -> Vec<SecretItem> {
        let mut items = Vec::with_capacity(self.len());
        items.extend(self.credentials.iter().cloned().map(SecretItem::from));
        items.extend(self.texts.iter().cloned().map(SecretItem::from));
        items.extend(self.binaries.iter().cloned().map(SecretItem::from));
        items.extend(self.cards.iter().cloned().map(SecretItem::from));
        items
    }

    /// Add a record to the matching category.
    pub fn push(&mut self, item: SecretItem) {
        match item {
            SecretItem::Credentials(c) => self.credentials.push(c),
            SecretItem::Text(t) => self.texts.push(t),
            SecretItem::Binary(b) => self.binaries.push(b),
            SecretItem::Card(c) => self.cards.push(c),
        }
    }
}

/// Decoded view of an envelope's `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Snapshot(Snapshot),
    New(SecretItem),
    Update(SecretItem),
    Error(String),
}

impl Message {
    /// A `snapshot` envelope. Server-originated, so it carries no token.
    pub fn snapshot(snapshot: &Snapshot) -> Result<Self, ProtocolError> {
        Ok(Self {
            token: String::new(),
            msg_type: MessageType::Snapshot,
            value: serde_json::to_vec(snapshot)?,
        })
    }

    /// A `new` or `update` envelope carrying one record.
    pub fn mutation(
        msg_type: MessageType,
        token: &str,
        item: &SecretItem,
    ) -> Result<Self, ProtocolError> {
        if !msg_type.is_mutation() {
            return Err(ProtocolError::UnexpectedType(msg_type.to_string()));
        }
        Ok(Self {
            token: token.to_string(),
            msg_type,
            value: serde_json::to_vec(item)?,
        })
    }

    /// An `error` envelope with a human-readable reason.
    pub fn error(reason: &str) -> Self {
        Self {
            token: String::new(),
            msg_type: MessageType::Error,
            value: reason.as_bytes().to_vec(),
        }
    }

    /// Parse a text frame into an envelope.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Serialize to the JSON text sent as one frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode `value` according to the envelope type.
    pub fn payload(&self) -> Result<Payload, ProtocolError> {
        match self.msg_type {
            MessageType::Snapshot => Ok(Payload::Snapshot(serde_json::from_slice(&self.value)?)),
            MessageType::New => Ok(Payload::New(serde_json::from_slice(&self.value)?)),
            MessageType::Update => Ok(Payload::Update(serde_json::from_slice(&self.value)?)),
            MessageType::Error => Ok(Payload::Error(
                String::from_utf8_lossy(&self.value).into_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(key: &str) -> SecretItem {
        SecretItem::from(Text {
            tag: "t".to_string(),
            key: key.to_string(),
            value: "v1".to_string(),
            comment: String::new(),
            created: 1_700_000_000,
        })
    }

    #[test]
    fn wire_shape_uses_exact_field_names() {
        let msg = Message::mutation(MessageType::New, "tok", &note("k1")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();

        assert_eq!(json["token"], "tok");
        assert_eq!(json["type"], "new");
        assert!(json["value"].is_string());
    }

    #[test]
    fn mutation_payload_decodes_to_item() {
        let msg = Message::mutation(MessageType::Update, "tok", &note("k1")).unwrap();
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.payload().unwrap(), Payload::Update(note("k1")));
    }

    #[test]
    fn snapshot_payload_groups_categories() {
        let mut snapshot = Snapshot::default();
        snapshot.push(note("a"));
        snapshot.push(SecretItem::from(Credentials {
            tag: "mail".to_string(),
            login: "me@example.com".to_string(),
            password: "hunter2".to_string(),
            comment: String::new(),
            created: 1,
        }));

        let msg = Message::snapshot(&snapshot).unwrap();
        match msg.payload().unwrap() {
            Payload::Snapshot(s) => {
                assert_eq!(s.len(), 2);
                assert_eq!(s.texts.len(), 1);
                assert_eq!(s.credentials.len(), 1);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn snapshot_records_carry_their_type() {
        let mut snapshot = Snapshot::default();
        snapshot.push(note("a"));
        snapshot.push(SecretItem::from(Card {
            tag: "visa".to_string(),
            number: "4111111111111111".to_string(),
            exp: "09/27".to_string(),
            cvv: 1,
            comment: String::new(),
            created: 1,
        }));

        let msg = Message::snapshot(&snapshot).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&msg.value).unwrap();
        assert_eq!(json["texts"][0]["type"], "text");
        assert_eq!(json["texts"][0]["key"], "a");
        assert_eq!(json["cards"][0]["type"], "card");
        assert_eq!(json["credentials"], serde_json::json!([]));

        let record: SecretItem = serde_json::from_value(json["texts"][0].clone()).unwrap();
        assert_eq!(record, note("a"));
    }

    #[test]
    fn snapshot_rejects_record_in_wrong_group() {
        let misfiled = serde_json::json!({
            "texts": [{"type": "card", "tag": "t", "number": "4111111111111111",
                       "exp": "09/27", "cvv": 1, "created": 1}]
        });
        let msg = Message {
            token: String::new(),
            msg_type: MessageType::Snapshot,
            value: serde_json::to_vec(&misfiled).unwrap(),
        };
        assert!(msg.payload().is_err());

        let sparse = Message {
            token: String::new(),
            msg_type: MessageType::Snapshot,
            value: br#"{"cards": []}"#.to_vec(),
        };
        assert_eq!(sparse.payload().unwrap(), Payload::Snapshot(Snapshot::default()));
    }

    #[test]
    fn error_payload_is_plain_text() {
        let msg = Message::error("invalid token");
        assert_eq!(
            msg.payload().unwrap(),
            Payload::Error("invalid token".to_string())
        );
    }

    #[test]
    fn mutation_rejects_non_mutation_types() {
        assert!(Message::mutation(MessageType::Snapshot, "tok", &note("k")).is_err());
    }

    #[test]
    fn malformed_frames_fail_to_decode() {
        assert!(Message::decode("not json").is_err());
        assert!(Message::decode(r#"{"token":"x","type":"delete","value":""}"#).is_err());
    }

    #[test]
    fn value_that_is_not_a_record_fails_payload_decode() {
        let msg = Message {
            token: "tok".to_string(),
            msg_type: MessageType::New,
            value: b"{\"type\":\"text\"}".to_vec(),
        };
        assert!(msg.payload().is_err());
    }
}
