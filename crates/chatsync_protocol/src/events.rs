//! Push events delivered to connected clients.
//!
//! Events are advisory: a client that misses one catches up through the
//! dirty-sync feeds. Row payloads have the same shape as pull rows.

use crate::cursor::decimal;
use crate::views::{
    ConversationTombstone, ConversationView, MemberRole, MessageTombstone, MessageView, UserView,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of `message.created`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreated {
    /// The new message.
    pub message: MessageView,
    /// Client-side id supplied with the create request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic_id: Option<String>,
}

/// Payload of `message.updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdated {
    /// The edited message.
    pub message: MessageView,
}

/// Payload of `message.deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDeleted {
    /// The deleted message.
    pub message: MessageTombstone,
}

/// Payload of `conversation.created` and `conversation.updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationChanged {
    /// The conversation.
    pub conversation: ConversationView,
}

/// Payload of `conversation.deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDeleted {
    /// The deleted conversation.
    pub conversation: ConversationTombstone,
}

/// Payload of `members.changed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersChanged {
    /// Conversation whose membership changed.
    pub conversation_id: Uuid,
    /// Affected user.
    pub user: UserView,
    /// Role held, if still a member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MemberRole>,
    /// True if the user is a member after the change.
    pub active: bool,
    /// Version of the membership row.
    #[serde(with = "decimal")]
    pub version: u64,
}

/// An event pushed to connected participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PushEvent {
    /// A message was posted.
    #[serde(rename = "message.created")]
    MessageCreated(MessageCreated),
    /// A message was edited.
    #[serde(rename = "message.updated")]
    MessageUpdated(MessageUpdated),
    /// A message was deleted.
    #[serde(rename = "message.deleted")]
    MessageDeleted(MessageDeleted),
    /// A conversation was created.
    #[serde(rename = "conversation.created")]
    ConversationCreated(ConversationChanged),
    /// A conversation was edited.
    #[serde(rename = "conversation.updated")]
    ConversationUpdated(ConversationChanged),
    /// A conversation was deleted.
    #[serde(rename = "conversation.deleted")]
    ConversationDeleted(ConversationDeleted),
    /// A member joined, left, or was removed.
    #[serde(rename = "members.changed")]
    MembersChanged(MembersChanged),
}

impl PushEvent {
    /// Returns the wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::MessageCreated(_) => "message.created",
            PushEvent::MessageUpdated(_) => "message.updated",
            PushEvent::MessageDeleted(_) => "message.deleted",
            PushEvent::ConversationCreated(_) => "conversation.created",
            PushEvent::ConversationUpdated(_) => "conversation.updated",
            PushEvent::ConversationDeleted(_) => "conversation.deleted",
            PushEvent::MembersChanged(_) => "members.changed",
        }
    }

    /// Version of the row the event describes.
    #[must_use]
    pub fn version(&self) -> u64 {
        match self {
            PushEvent::MessageCreated(e) => e.message.version,
            PushEvent::MessageUpdated(e) => e.message.version,
            PushEvent::MessageDeleted(e) => e.message.version,
            PushEvent::ConversationCreated(e) | PushEvent::ConversationUpdated(e) => {
                e.conversation.version
            }
            PushEvent::ConversationDeleted(e) => e.conversation.version,
            PushEvent::MembersChanged(e) => e.version,
        }
    }

    /// Returns a copy personalized for one recipient.
    #[must_use]
    pub fn for_recipient(&self, recipient: Uuid) -> PushEvent {
        let mut event = self.clone();
        match &mut event {
            PushEvent::MessageCreated(e) => e.message.is_self = e.message.user_id == recipient,
            PushEvent::MessageUpdated(e) => e.message.is_self = e.message.user_id == recipient,
            _ => {}
        }
        event
    }

    /// Returns a copy whose conversation row carries the version the
    /// recipient's conversation feed reports: the greater of the row's
    /// own version and the recipient's membership version.
    ///
    /// Other events are returned unchanged.
    #[must_use]
    pub fn at_membership_version(mut self, membership_version: u64) -> PushEvent {
        match &mut self {
            PushEvent::ConversationCreated(e) | PushEvent::ConversationUpdated(e) => {
                e.conversation.version = e.conversation.version.max(membership_version);
            }
            PushEvent::ConversationDeleted(e) => {
                e.conversation.version = e.conversation.version.max(membership_version);
            }
            _ => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn message(author: Uuid) -> MessageView {
        let now = Utc::now();
        MessageView {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            user_id: author,
            previous_id: None,
            content: "hi".into(),
            is_self: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: 3,
        }
    }

    #[test]
    fn events_are_tagged() {
        let event = PushEvent::MessageCreated(MessageCreated {
            message: message(Uuid::new_v4()),
            optimistic_id: Some("tmp".into()),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], json!("message.created"));
        assert_eq!(value["data"]["optimisticId"], json!("tmp"));
        assert_eq!(value["data"]["message"]["version"], json!("3"));
        assert_eq!(event.name(), "message.created");
        assert_eq!(event.version(), 3);
    }

    #[test]
    fn is_self_is_personalized() {
        let author = Uuid::new_v4();
        let event = PushEvent::MessageUpdated(MessageUpdated {
            message: message(author),
        });

        match event.for_recipient(author) {
            PushEvent::MessageUpdated(e) => assert!(e.message.is_self),
            other => panic!("unexpected {other:?}"),
        }
        match event.for_recipient(Uuid::new_v4()) {
            PushEvent::MessageUpdated(e) => assert!(!e.message.is_self),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn conversation_version_follows_membership() {
        let now = Utc::now();
        let event = PushEvent::ConversationUpdated(ConversationChanged {
            conversation: ConversationView {
                id: Uuid::new_v4(),
                title: "general".into(),
                description: String::new(),
                thumbnail_url: None,
                created_at: now,
                updated_at: now,
                version: 7,
            },
        });
        assert_eq!(event.clone().at_membership_version(12).version(), 12);
        assert_eq!(event.clone().at_membership_version(3).version(), 7);

        let message = PushEvent::MessageCreated(MessageCreated {
            message: message(Uuid::new_v4()),
            optimistic_id: None,
        });
        assert_eq!(message.at_membership_version(40).version(), 3);
    }

    #[test]
    fn events_round_trip_through_json() {
        let event = PushEvent::MessageDeleted(MessageDeleted {
            message: MessageTombstone {
                id: Uuid::new_v4(),
                conversation_id: Uuid::new_v4(),
                previous_id: None,
                deleted_at: Some(Utc::now()),
                version: 9,
            },
        });
        let text = serde_json::to_string(&event).unwrap();
        let back: PushEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }
}
