//! Request and response bodies of the HTTP surface.

use crate::views::{
    ConversationTombstone, ConversationView, Dependencies, HistoryPartition, MemberRole,
    MemberView, MessageTombstone, MessageView, Partition, UserTombstone, UserView,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `GET /conversations/dirty` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationsDirtyResponse {
    /// Changed conversations.
    pub conversations: Partition<ConversationView, ConversationTombstone>,
    /// Cursor for the next pull; absent when the page was empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// True if more changes are waiting.
    pub has_more: bool,
}

/// `GET /conversations/{id}/messages/dirty` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesDirtyResponse {
    /// Changed messages.
    pub messages: Partition<MessageView, MessageTombstone>,
    /// Authors of the active messages.
    pub dependencies: Dependencies,
    /// Cursor for the next pull; absent when the page was empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// True if more changes are waiting.
    pub has_more: bool,
}

/// `GET /conversations/{id}/messages/older` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesOlderResponse {
    /// One page of history.
    pub messages: HistoryPartition,
    /// Authors of the returned messages.
    pub dependencies: Dependencies,
    /// Cursor for the next older page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// True if older messages exist.
    pub has_more: bool,
}

/// `GET /conversations/{id}/users/dirty` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersDirtyResponse {
    /// Changed members.
    pub users: Partition<MemberView, UserTombstone>,
    /// Cursor for the next pull; absent when the page was empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// True if more changes are waiting.
    pub has_more: bool,
}

/// A single conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationResponse {
    /// The conversation.
    pub conversation: ConversationView,
}

/// A deleted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDeletedResponse {
    /// Its tombstone.
    pub conversation: ConversationTombstone,
}

/// A created or edited message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    /// The message.
    pub message: MessageView,
    /// Echo of the client's optimistic id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic_id: Option<String>,
}

/// A deleted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDeletedResponse {
    /// Its tombstone.
    pub message: MessageTombstone,
}

/// A user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponse {
    /// The user.
    pub user: UserView,
}

/// A deleted user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDeletedResponse {
    /// Its tombstone.
    pub user: UserTombstone,
}

/// `POST /users` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserResponse {
    /// The new user.
    pub user: UserView,
    /// Bearer token for subsequent requests.
    pub access_token: String,
}

/// Result of a membership change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberResponse {
    /// Conversation whose membership changed.
    pub conversation_id: Uuid,
    /// Affected user.
    pub user: UserView,
    /// Role held, if still a member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MemberRole>,
    /// True if the user is now a member.
    pub active: bool,
    /// Version of the membership row.
    #[serde(with = "crate::cursor::decimal")]
    pub version: u64,
}

/// `POST /messages` body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    /// Target conversation.
    pub conversation_id: Uuid,
    /// Body.
    #[serde(default)]
    pub content: String,
    /// Client-side id echoed in the response and the created event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic_id: Option<String>,
}

/// `PATCH /messages/{id}` body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessageRequest {
    /// New body.
    #[serde(default)]
    pub content: String,
}

/// `POST /conversations` body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Thumbnail location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Users to add as members besides the creator.
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

/// `PATCH /conversations/{id}` body. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConversationRequest {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New thumbnail location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// `POST /conversations/{id}/members` body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    /// User to add.
    pub user_id: Uuid,
    /// Role to grant; defaults to member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MemberRole>,
}

/// `POST /users` body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserRequest {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Unique handle.
    #[serde(default)]
    pub username: String,
    /// Contact email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Contact phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Avatar location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// `PATCH /users/me` body. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// New email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// New phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// New avatar location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_page_omits_next_cursor() {
        let response = ConversationsDirtyResponse {
            conversations: Partition::default(),
            next_cursor: None,
            has_more: false,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"conversations": {"active": [], "inactive": []}, "hasMore": false})
        );
    }

    #[test]
    fn create_message_request_parses_camel_case() {
        let id = Uuid::new_v4();
        let body = json!({"conversationId": id, "content": "hi", "optimisticId": "tmp-1"});
        let request: CreateMessageRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.conversation_id, id);
        assert_eq!(request.optimistic_id.as_deref(), Some("tmp-1"));
    }

    #[test]
    fn add_member_role_is_optional() {
        let id = Uuid::new_v4();
        let request: AddMemberRequest =
            serde_json::from_value(json!({"userId": id})).unwrap();
        assert_eq!(request.role, None);

        let request: AddMemberRequest =
            serde_json::from_value(json!({"userId": id, "role": "admin"})).unwrap();
        assert_eq!(request.role, Some(MemberRole::Admin));
    }
}
