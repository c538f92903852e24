//! Opaque resumption cursors.
//!
//! A cursor is base64 over a small JSON object. Tokens are produced with
//! the standard alphabet; decoding also accepts the URL-safe alphabet,
//! with or without padding, since clients round-trip them through query
//! strings.
//!
//! Decoding only checks shape. Whether the referenced entity belongs to
//! the queried scope is decided by the server.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Result type for cursor operations.
pub type CursorResult<T> = Result<T, CursorError>;

/// Errors produced while decoding a cursor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CursorError {
    /// The token was empty.
    #[error("cursor is empty")]
    Empty,

    /// The token is not base64.
    #[error("cursor is not valid base64")]
    Encoding,

    /// The decoded payload is not the expected JSON object.
    #[error("cursor payload is invalid: {0}")]
    Payload(String),
}

/// Serde adapter for `u64` versions carried as decimal strings.
///
/// Serializes as a string so JavaScript clients never lose precision;
/// deserializes from a string or a JSON number.
pub mod decimal {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    /// Serializes a version as a decimal string.
    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    /// Deserializes a version from a decimal string or a number.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("invalid version: {text:?}"))),
        }
    }
}

/// Resumption point of a dirty-sync feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    /// Effective version of the last row the client received.
    #[serde(with = "decimal")]
    pub version: u64,
    /// External id of that row.
    pub entity_id: Uuid,
    /// Oldest message the client holds (message feed only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_message_id: Option<Uuid>,
}

impl SyncCursor {
    /// Creates a cursor at `(version, entity_id)`.
    #[must_use]
    pub fn new(version: u64, entity_id: Uuid) -> Self {
        Self {
            version,
            entity_id,
            oldest_message_id: None,
        }
    }

    /// Sets the oldest message the client holds.
    #[must_use]
    pub fn with_oldest_message(mut self, message_id: Uuid) -> Self {
        self.oldest_message_id = Some(message_id);
        self
    }

    /// Encodes to an opaque token.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut payload = Map::new();
        payload.insert("version".into(), Value::String(self.version.to_string()));
        payload.insert("entityId".into(), Value::String(self.entity_id.to_string()));
        if let Some(oldest) = self.oldest_message_id {
            payload.insert("oldestMessageId".into(), Value::String(oldest.to_string()));
        }
        STANDARD.encode(Value::Object(payload).to_string())
    }

    /// Decodes an opaque token.
    pub fn decode(token: &str) -> CursorResult<Self> {
        decode_payload(token)
    }
}

/// Resumption point of the backward history pager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryCursor {
    /// Oldest message of the previous page.
    pub message_id: Uuid,
}

impl HistoryCursor {
    /// Creates a cursor pointing at a message.
    #[must_use]
    pub fn new(message_id: Uuid) -> Self {
        Self { message_id }
    }

    /// Encodes to an opaque token.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut payload = Map::new();
        payload.insert("messageId".into(), Value::String(self.message_id.to_string()));
        STANDARD.encode(Value::Object(payload).to_string())
    }

    /// Decodes an opaque token.
    pub fn decode(token: &str) -> CursorResult<Self> {
        decode_payload(token)
    }
}

fn decode_payload<T: DeserializeOwned>(token: &str) -> CursorResult<T> {
    let token = token.trim();
    if token.is_empty() {
        return Err(CursorError::Empty);
    }
    let bytes = [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(token).ok())
        .ok_or(CursorError::Encoding)?;
    serde_json::from_slice(&bytes).map_err(|e| CursorError::Payload(e.to_string()))
}
