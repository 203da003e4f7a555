//! Secret item data model.
//!
//! Four record kinds share `tag`, `comment` and `created`. On the wire each
//! record is a JSON object carrying its own `type` discriminant, so a
//! [`SecretItem`] can be decoded without knowing the kind up front.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Discriminant carried in every serialized record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    #[serde(rename = "cred")]
    Credentials,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "bin")]
    Binary,
    #[serde(rename = "card")]
    Card,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credentials => "cred",
            Self::Text => "text",
            Self::Binary => "bin",
            Self::Card => "card",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Login/password pair. Natural key: `login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub tag: String,
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub comment: String,
    pub created: i64,
}

/// Free-form text note. Natural key: `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    pub tag: String,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub comment: String,
    pub created: i64,
}

/// Raw binary blob. Natural key: `key`, derived from the source file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binary {
    pub tag: String,
    pub key: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    #[serde(default)]
    pub comment: String,
    pub created: i64,
}

impl Binary {
    /// Build a binary record from a file on disk, keyed by its file name.
    pub fn from_file(path: &Path, tag: &str, comment: &str) -> std::io::Result<Self> {
        let key = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{:?} has no usable file name", path),
                )
            })?
            .to_string();
        let value = std::fs::read(path)?;

        Ok(Self {
            tag: tag.to_string(),
            key,
            value,
            comment: comment.to_string(),
            created: now(),
        })
    }
}

/// Payment card. Natural key: `number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub tag: String,
    pub number: String,
    pub exp: String,
    pub cvv: u16,
    #[serde(default)]
    pub comment: String,
    pub created: i64,
}

/// Any secret record, tagged by its `type` field on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SecretItem {
    #[serde(rename = "cred")]
    Credentials(Credentials),
    #[serde(rename = "text")]
    Text(Text),
    #[serde(rename = "bin")]
    Binary(Binary),
    #[serde(rename = "card")]
    Card(Card),
}

impl SecretItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Credentials(_) => ItemKind::Credentials,
            Self::Text(_) => ItemKind::Text,
            Self::Binary(_) => ItemKind::Binary,
            Self::Card(_) => ItemKind::Card,
        }
    }

    /// The field that identifies this record within its category.
    pub fn natural_key(&self) -> &str {
        match self {
            Self::Credentials(c) => &c.login,
            Self::Text(t) => &t.key,
            Self::Binary(b) => &b.key,
            Self::Card(c) => &c.number,
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Credentials(c) => &c.tag,
            Self::Text(t) => &t.tag,
            Self::Binary(b) => &b.tag,
            Self::Card(c) => &c.tag,
        }
    }

    pub fn created(&self) -> i64 {
        match self {
            Self::Credentials(c) => c.created,
            Self::Text(t) => t.created,
            Self::Binary(b) => b.created,
            Self::Card(c) => c.created,
        }
    }
}

macro_rules! record_variant {
    ($($record:ident),* $(,)?) => {$(
        impl From<$record> for SecretItem {
            fn from(value: $record) -> Self {
                Self::$record(value)
            }
        }

        /// Narrow a tagged item back to its record; any other kind is handed back.
        impl TryFrom<SecretItem> for $record {
            type Error = SecretItem;

            fn try_from(item: SecretItem) -> Result<Self, SecretItem> {
                match item {
                    SecretItem::$record(value) => Ok(value),
                    other => Err(other),
                }
            }
        }
    )*};
}

record_variant!(Credentials, Text, Binary, Card);

/// Current time as seconds since the Unix epoch.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Custom base64 serialization for `Vec<u8>`.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_carries_type_discriminant() {
        let item = SecretItem::from(Text {
            tag: "t".to_string(),
            key: "k1".to_string(),
            value: "v1".to_string(),
            comment: String::new(),
            created: 1_700_000_000,
        });

        let json: serde_json::Value = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["key"], "k1");
    }

    #[test]
    fn decodes_by_discriminant() {
        let raw = r#"{"type":"card","tag":"visa","number":"4111111111111111","exp":"12/29","cvv":123,"comment":"","created":5}"#;
        let item: SecretItem = serde_json::from_str(raw).unwrap();

        assert_eq!(item.kind(), ItemKind::Card);
        assert_eq!(item.natural_key(), "4111111111111111");
    }

    #[test]
    fn binary_value_is_base64_on_the_wire() {
        let item = SecretItem::from(Binary {
            tag: "img".to_string(),
            key: "a.png".to_string(),
            value: vec![0, 159, 255],
            comment: String::new(),
            created: 0,
        });

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["value"], "AJ//");

        let back: SecretItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn unknown_discriminant_is_rejected() {
        let raw = r#"{"type":"ssh","tag":"x","created":0}"#;
        assert!(serde_json::from_str::<SecretItem>(raw).is_err());
    }

    #[test]
    fn binary_from_file_uses_file_name_as_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_rsa.pub");
        std::fs::write(&path, b"ssh-ed25519 AAAA").unwrap();

        let bin = Binary::from_file(&path, "keys", "laptop").unwrap();
        assert_eq!(bin.key, "id_rsa.pub");
        assert_eq!(bin.value, b"ssh-ed25519 AAAA");
        assert_eq!(bin.tag, "keys");
    }
}
