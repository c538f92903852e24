//! Row types for the four versioned tables.

use super::{Record, Role};
use crate::types::{EntityKind, RowId, Version};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A user account.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Internal row id.
    pub id: RowId,
    /// External identifier.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Unique handle.
    pub username: String,
    /// Contact email, if any.
    pub email: Option<String>,
    /// Contact phone number, if any.
    pub phone_number: Option<String>,
    /// Avatar location in object storage, if any.
    pub avatar_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last committed write.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete time.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Version of the last committed write.
    pub version: Version,
}

/// A conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    /// Internal row id.
    pub id: RowId,
    /// External identifier.
    pub uuid: Uuid,
    /// Title shown to members.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Thumbnail location in object storage, if any.
    pub thumbnail_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last committed write.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete time.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Version of the last committed write.
    pub version: Version,
}

/// The edge between a user and a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    /// Internal row id.
    pub id: RowId,
    /// External identifier.
    pub uuid: Uuid,
    /// Member user.
    pub user_id: RowId,
    /// Conversation joined.
    pub conversation_id: RowId,
    /// Role held in the conversation.
    pub role: Role,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last committed write.
    pub updated_at: DateTime<Utc>,
    /// Time the member left or was removed.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Version of the last committed write.
    pub version: Version,
}

/// A message posted to a conversation.
///
/// `previous_id` points at the conversation's tip when the message was
/// written, forming an append-only chain clients use to detect gaps.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Internal row id.
    pub id: RowId,
    /// External identifier.
    pub uuid: Uuid,
    /// Owning conversation.
    pub conversation_id: RowId,
    /// Author.
    pub user_id: RowId,
    /// Previous message in the same conversation.
    pub previous_id: Option<RowId>,
    /// Message body. Empty once the message is deleted.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last committed write.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete time.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Version of the last committed write.
    pub version: Version,
}

/// Fields required to register a user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    /// Display name.
    pub name: String,
    /// Unique handle.
    pub username: String,
    /// Contact email.
    pub email: Option<String>,
    /// Contact phone number.
    pub phone_number: Option<String>,
    /// Avatar location.
    pub avatar_url: Option<String>,
}

/// Fields required to create a conversation.
#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    /// Title shown to members.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Thumbnail location.
    pub thumbnail_url: Option<String>,
}

macro_rules! impl_record {
    ($ty:ty, $kind:expr) => {
        impl Record for $ty {
            const KIND: EntityKind = $kind;

            fn row_id(&self) -> RowId {
                self.id
            }

            fn external_id(&self) -> Uuid {
                self.uuid
            }

            fn version(&self) -> Version {
                self.version
            }

            fn deleted_at(&self) -> Option<DateTime<Utc>> {
                self.deleted_at
            }
        }

        impl $ty {
            pub(crate) fn stamp(&mut self, version: Version, at: DateTime<Utc>) {
                self.version = version;
                self.updated_at = at;
            }
        }
    };
}

impl_record!(User, EntityKind::User);
impl_record!(Conversation, EntityKind::Conversation);
impl_record!(Membership, EntityKind::Membership);
impl_record!(Message, EntityKind::Message);

impl User {
    /// Normalized key used for username uniqueness.
    pub(crate) fn username_key(username: &str) -> String {
        username.to_lowercase()
    }
}

impl Membership {
    /// Returns true if the membership is current.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        let now = Utc::now();
        Message {
            id: RowId::new(3),
            uuid: Uuid::new_v4(),
            conversation_id: RowId::new(1),
            user_id: RowId::new(2),
            previous_id: None,
            content: "hi".into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: Version::new(5),
        }
    }

    #[test]
    fn record_accessors() {
        let m = message();
        assert_eq!(m.row_id(), RowId::new(3));
        assert_eq!(m.version(), Version::new(5));
        assert!(!m.is_deleted());
        assert_eq!(<Message as Record>::KIND, EntityKind::Message);
    }

    #[test]
    fn stamp_updates_version_and_time() {
        let mut m = message();
        let later = m.updated_at + chrono::Duration::seconds(5);
        m.stamp(Version::new(9), later);
        assert_eq!(m.version, Version::new(9));
        assert_eq!(m.updated_at, later);
    }

    #[test]
    fn username_key_is_case_insensitive() {
        assert_eq!(User::username_key("Alice"), User::username_key("alice"));
    }
}
