//! Row shapes shared by pull responses and push events.
//!
//! Every view carries the `version` it was produced at, serialized as a
//! decimal string.

use crate::cursor::decimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a member, as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Conversation owner.
    Owner,
    /// Conversation administrator.
    Admin,
    /// Regular member.
    Member,
}

/// A live user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    /// External id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Unique handle.
    pub username: String,
    /// Avatar location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// Version of the row (effective version in member feeds).
    #[serde(with = "decimal")]
    pub version: u64,
}

/// A user the client should drop from a conversation's member list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTombstone {
    /// External id.
    pub id: Uuid,
    /// When the user was deleted or left.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Effective version.
    #[serde(with = "decimal")]
    pub version: u64,
}

/// A user together with their role in one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    /// The member.
    #[serde(flatten)]
    pub user: UserView,
    /// Their role.
    pub role: MemberRole,
}

/// A live conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    /// External id.
    pub id: Uuid,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Thumbnail location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// Version of the row (effective version in the conversation feed).
    #[serde(with = "decimal")]
    pub version: u64,
}

/// A conversation that was deleted or that the client's user left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTombstone {
    /// External id.
    pub id: Uuid,
    /// When it was deleted or left.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Effective version.
    #[serde(with = "decimal")]
    pub version: u64,
}

/// A message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    /// External id.
    pub id: Uuid,
    /// Owning conversation.
    pub conversation_id: Uuid,
    /// Author.
    pub user_id: Uuid,
    /// Previous message in the conversation.
    #[serde(default)]
    pub previous_id: Option<Uuid>,
    /// Body, or the redaction marker for deleted messages.
    pub content: String,
    /// True if the recipient wrote the message.
    pub is_self: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// Deletion time, set only for deleted messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Version of the row.
    #[serde(with = "decimal")]
    pub version: u64,
}

/// Identity of a deleted message. Its content is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTombstone {
    /// External id.
    pub id: Uuid,
    /// Owning conversation.
    pub conversation_id: Uuid,
    /// Previous message in the conversation.
    #[serde(default)]
    pub previous_id: Option<Uuid>,
    /// Deletion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Version of the row.
    #[serde(with = "decimal")]
    pub version: u64,
}

/// Rows of one pull, split by liveness at query time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition<A, I> {
    /// Live rows.
    pub active: Vec<A>,
    /// Tombstoned rows.
    pub inactive: Vec<I>,
}

impl<A, I> Default for Partition<A, I> {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            inactive: Vec::new(),
        }
    }
}

impl<A, I> Partition<A, I> {
    /// Total number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len() + self.inactive.len()
    }

    /// Returns true if both buckets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A page of history, split into live and deleted messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryPartition {
    /// Live messages, newest first.
    pub active: Vec<MessageView>,
    /// Deleted messages with redacted content, newest first.
    pub deleted: Vec<MessageView>,
}

/// Rows a client needs to render the primary payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependencies {
    /// Authors of the returned messages.
    pub users: Vec<UserView>,
}
