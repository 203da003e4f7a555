//! Semantic checks for secret records.
//!
//! [`validate_item`] never mutates its input: on success it returns a
//! normalized copy (trimmed labels, card number without separators).

use crate::error::ValidationError;
use crate::models::{Binary, Card, Credentials, SecretItem, Text};

/// Check a record against its declared kind and return the normalized form.
pub fn validate_item(item: &SecretItem) -> Result<SecretItem, ValidationError> {
    if item.created() < 0 {
        return Err(ValidationError::InvalidTimestamp);
    }

    match item {
        SecretItem::Credentials(c) => validate_credentials(c).map(SecretItem::Credentials),
        SecretItem::Text(t) => validate_text(t).map(SecretItem::Text),
        SecretItem::Binary(b) => validate_binary(b).map(SecretItem::Binary),
        SecretItem::Card(c) => validate_card(c).map(SecretItem::Card),
    }
}

fn validate_credentials(c: &Credentials) -> Result<Credentials, ValidationError> {
    let login = c.login.trim();
    if login.is_empty() {
        return Err(ValidationError::EmptyField("login"));
    }
    if c.password.is_empty() {
        return Err(ValidationError::EmptyField("password"));
    }

    Ok(Credentials {
        tag: c.tag.trim().to_string(),
        login: login.to_string(),
        password: c.password.clone(),
        comment: c.comment.trim().to_string(),
        created: c.created,
    })
}

fn validate_text(t: &Text) -> Result<Text, ValidationError> {
    let key = t.key.trim();
    if key.is_empty() {
        return Err(ValidationError::EmptyField("key"));
    }

    Ok(Text {
        tag: t.tag.trim().to_string(),
        key: key.to_string(),
        value: t.value.clone(),
        comment: t.comment.trim().to_string(),
        created: t.created,
    })
}

fn validate_binary(b: &Binary) -> Result<Binary, ValidationError> {
    let key = b.key.trim();
    if key.is_empty() {
        return Err(ValidationError::EmptyField("key"));
    }

    Ok(Binary {
        tag: b.tag.trim().to_string(),
        key: key.to_string(),
        value: b.value.clone(),
        comment: b.comment.trim().to_string(),
        created: b.created,
    })
}

fn validate_card(c: &Card) -> Result<Card, ValidationError> {
    let number: String = c
        .number
        .chars()
        .filter(|ch| !matches!(ch, ' ' | '-'))
        .collect();
    if number.is_empty() {
        return Err(ValidationError::EmptyField("number"));
    }
    if !(12..=19).contains(&number.len()) || !number.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ValidationError::InvalidCardNumber);
    }

    let exp = c.exp.trim();
    if !is_valid_expiry(exp) {
        return Err(ValidationError::InvalidExpiry);
    }

    if c.cvv > 999 {
        return Err(ValidationError::InvalidCvv);
    }

    Ok(Card {
        tag: c.tag.trim().to_string(),
        number,
        exp: exp.to_string(),
        cvv: c.cvv,
        comment: c.comment.trim().to_string(),
        created: c.created,
    })
}

/// `MM/YY` with a month in 01..=12.
fn is_valid_expiry(exp: &str) -> bool {
    let Some((month, year)) = exp.split_once('/') else {
        return false;
    };
    if month.len() != 2 || year.len() != 2 {
        return false;
    }
    let digits = |part: &str| part.chars().all(|ch| ch.is_ascii_digit());
    if !digits(month) || !digits(year) {
        return false;
    }
    matches!(month.parse::<u8>(), Ok(1..=12))
}
