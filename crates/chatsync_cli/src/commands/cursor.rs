//! Cursor command implementations.

use chatsync_protocol::{HistoryCursor, SyncCursor};
use serde::Serialize;
use uuid::Uuid;

/// A decoded feed cursor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedCursor {
    /// Kind of cursor.
    pub kind: &'static str,
    /// Version of the last row seen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Id of the last row seen.
    pub entity_id: Uuid,
    /// Oldest message the client holds, for message feeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_message_id: Option<Uuid>,
}

/// Encodes a feed cursor and prints the token.
pub fn encode(
    version: u64,
    entity_id: Uuid,
    oldest_message_id: Option<Uuid>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cursor = SyncCursor::new(version, entity_id);
    if let Some(oldest) = oldest_message_id {
        cursor = cursor.with_oldest_message(oldest);
    }
    println!("{}", cursor.encode());
    Ok(())
}

/// Encodes a history cursor and prints the token.
pub fn encode_history(message_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", HistoryCursor::new(message_id).encode());
    Ok(())
}

/// Decodes a feed or history token and prints its fields.
pub fn decode(token: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let decoded = inspect(token)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&decoded)?);
        }
        _ => {
            println!("Kind:            {}", decoded.kind);
            if let Some(version) = decoded.version {
                println!("Version:         {version}");
            }
            println!("Entity id:       {}", decoded.entity_id);
            if let Some(oldest) = decoded.oldest_message_id {
                println!("Oldest message:  {oldest}");
            }
        }
    }
    Ok(())
}

/// Decodes `token`, trying the feed format first.
pub fn inspect(token: &str) -> Result<DecodedCursor, Box<dyn std::error::Error>> {
    if let Ok(cursor) = SyncCursor::decode(token) {
        return Ok(DecodedCursor {
            kind: "sync",
            version: Some(cursor.version),
            entity_id: cursor.entity_id,
            oldest_message_id: cursor.oldest_message_id,
        });
    }
    let cursor = HistoryCursor::decode(token)?;
    Ok(DecodedCursor {
        kind: "history",
        version: None,
        entity_id: cursor.message_id,
        oldest_message_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspects_both_kinds() {
        let id = Uuid::new_v4();
        let sync = inspect(&SyncCursor::new(42, id).encode()).unwrap();
        assert_eq!(sync.kind, "sync");
        assert_eq!(sync.version, Some(42));
        assert_eq!(sync.entity_id, id);

        let history = inspect(&HistoryCursor::new(id).encode()).unwrap();
        assert_eq!(history.kind, "history");
        assert_eq!(history.version, None);
        assert_eq!(history.entity_id, id);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(inspect("not a cursor").is_err());
    }
}
