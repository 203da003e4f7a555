//! Error types shared by the server and the client.

use thiserror::Error;

/// Storage errors for the SQLite-backed secret stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Item with key {0:?} already exists")]
    Duplicate(String),

    #[error("Item with key {0:?} not found")]
    NotFound(String),

    #[error("Lock poisoned: {0}")]
    Lock(String),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: i32, found: i32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire protocol errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unexpected message type {0:?} for this payload")]
    UnexpectedType(String),
}

/// A well-formed secret record that fails semantic checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Field {0:?} must not be empty")]
    EmptyField(&'static str),

    #[error("Card number must be 12 to 19 digits")]
    InvalidCardNumber,

    #[error("Card expiry must be MM/YY")]
    InvalidExpiry,

    #[error("CVV must be three digits")]
    InvalidCvv,

    #[error("Creation timestamp must not be negative")]
    InvalidTimestamp,
}

/// Bearer token errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Token signature mismatch")]
    BadSignature,

    #[error("Token expired")]
    Expired,

    #[error("Token subject does not match the connection")]
    WrongSubject,
}
