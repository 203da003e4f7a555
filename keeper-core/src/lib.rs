//! Secret Keeper Core Library
//!
//! Shared building blocks for the sync server and the client: the secret
//! data model, the envelope protocol spoken over sync connections, record
//! validation, bearer tokens, and SQLite-backed per-category stores.

pub mod error;
pub mod models;
pub mod protocol;
pub mod store;
pub mod token;
pub mod validate;

pub use error::{ProtocolError, StoreError, TokenError, ValidationError};
pub use models::{Binary, Card, Credentials, ItemKind, SecretItem, Text};
pub use protocol::{Message, MessageType, Payload, Snapshot};
pub use store::{Database, SecretStores, Store, Upserted, UserStore, LOCAL_OWNER};
pub use token::{HmacTokens, TokenIssuer, TokenValidator, UserId};
pub use validate::validate_item;
