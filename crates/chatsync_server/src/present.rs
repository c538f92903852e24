//! Row to wire view mapping.
//!
//! Internal row ids never leave the server: every reference a view
//! carries is resolved to the external id of the row it points at.

use crate::error::{ServerError, ServerResult};
use chatsync_core::{
    Conversation, ConversationMember, MemberConversation, Message, ReadView, Role, RowId, User,
    Version,
};
use chatsync_protocol::{
    ConversationTombstone, ConversationView, MemberRole, MemberView, MessageTombstone,
    MessageView, UserTombstone, UserView,
};
use std::collections::HashMap;
use uuid::Uuid;

/// Wire role of a stored role.
pub fn member_role(role: Role) -> MemberRole {
    match role {
        Role::Owner => MemberRole::Owner,
        Role::Admin => MemberRole::Admin,
        Role::Member => MemberRole::Member,
    }
}

/// Stored role of a wire role.
pub fn stored_role(role: MemberRole) -> Role {
    match role {
        MemberRole::Owner => Role::Owner,
        MemberRole::Admin => Role::Admin,
        MemberRole::Member => Role::Member,
    }
}

/// A user's public profile.
pub fn user_view(user: &User) -> UserView {
    user_view_at(user, user.version)
}

fn user_view_at(user: &User, version: Version) -> UserView {
    UserView {
        id: user.uuid,
        name: user.name.clone(),
        username: user.username.clone(),
        avatar_url: user.avatar_url.clone(),
        created_at: user.created_at,
        updated_at: user.updated_at,
        version: version.as_u64(),
    }
}

/// A deleted user.
pub fn user_tombstone(user: &User) -> UserTombstone {
    UserTombstone {
        id: user.uuid,
        deleted_at: user.deleted_at,
        version: user.version.as_u64(),
    }
}

/// A live member row of the user feed, at its effective version.
pub fn member_view(row: &ConversationMember) -> MemberView {
    MemberView {
        user: user_view_at(&row.user, row.version),
        role: member_role(row.membership.role),
    }
}

/// A tombstoned member row of the user feed.
pub fn member_tombstone(row: &ConversationMember) -> UserTombstone {
    UserTombstone {
        id: row.user.uuid,
        deleted_at: row.user.deleted_at.or(row.membership.deleted_at),
        version: row.version.as_u64(),
    }
}

/// A conversation at its own version.
pub fn conversation_view(conversation: &Conversation) -> ConversationView {
    conversation_view_at(conversation, conversation.version)
}

fn conversation_view_at(conversation: &Conversation, version: Version) -> ConversationView {
    ConversationView {
        id: conversation.uuid,
        title: conversation.title.clone(),
        description: conversation.description.clone(),
        thumbnail_url: conversation.thumbnail_url.clone(),
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
        version: version.as_u64(),
    }
}

/// A deleted conversation.
pub fn conversation_tombstone(conversation: &Conversation) -> ConversationTombstone {
    ConversationTombstone {
        id: conversation.uuid,
        deleted_at: conversation.deleted_at,
        version: conversation.version.as_u64(),
    }
}

/// A live row of the conversation feed, at its effective version.
pub fn member_conversation_view(row: &MemberConversation) -> ConversationView {
    conversation_view_at(&row.conversation, row.version)
}

/// A tombstoned row of the conversation feed.
pub fn member_conversation_tombstone(row: &MemberConversation) -> ConversationTombstone {
    ConversationTombstone {
        id: row.conversation.uuid,
        deleted_at: row.conversation.deleted_at.or(row.membership.deleted_at),
        version: row.version.as_u64(),
    }
}

/// Renders messages of one conversation for one requester.
///
/// Author and previous-message ids are resolved through the view and
/// cached for the presenter's lifetime.
pub struct MessagePresenter<'v, V: ReadView + ?Sized> {
    view: &'v V,
    conversation: Uuid,
    requester: RowId,
    users: HashMap<RowId, Uuid>,
    messages: HashMap<RowId, Uuid>,
}

impl<'v, V: ReadView + ?Sized> MessagePresenter<'v, V> {
    /// Creates a presenter for messages of `conversation` seen by `requester`.
    pub fn new(view: &'v V, conversation: &Conversation, requester: RowId) -> Self {
        Self {
            view,
            conversation: conversation.uuid,
            requester,
            users: HashMap::new(),
            messages: HashMap::new(),
        }
    }

    /// A message with its content, or `redacted` in place of it if
    /// the message was deleted.
    pub fn view(&mut self, message: &Message, redacted: Option<&str>) -> ServerResult<MessageView> {
        let content = match (message.deleted_at, redacted) {
            (Some(_), Some(marker)) => marker.to_string(),
            _ => message.content.clone(),
        };
        Ok(MessageView {
            id: message.uuid,
            conversation_id: self.conversation,
            user_id: self.user_uuid(message.user_id)?,
            previous_id: self.previous_uuid(message)?,
            content,
            is_self: message.user_id == self.requester,
            created_at: message.created_at,
            updated_at: message.updated_at,
            deleted_at: message.deleted_at,
            version: message.version.as_u64(),
        })
    }

    /// A deleted message's identity.
    pub fn tombstone(&mut self, message: &Message) -> ServerResult<MessageTombstone> {
        Ok(MessageTombstone {
            id: message.uuid,
            conversation_id: self.conversation,
            previous_id: self.previous_uuid(message)?,
            deleted_at: message.deleted_at,
            version: message.version.as_u64(),
        })
    }

    fn user_uuid(&mut self, id: RowId) -> ServerResult<Uuid> {
        if let Some(uuid) = self.users.get(&id) {
            return Ok(*uuid);
        }
        let uuid = self
            .view
            .user(id)
            .map(|u| u.uuid)
            .ok_or_else(|| dangling("author", id))?;
        self.users.insert(id, uuid);
        Ok(uuid)
    }

    fn previous_uuid(&mut self, message: &Message) -> ServerResult<Option<Uuid>> {
        let Some(id) = message.previous_id else {
            return Ok(None);
        };
        if let Some(uuid) = self.messages.get(&id) {
            return Ok(Some(*uuid));
        }
        let uuid = self
            .view
            .message(id)
            .map(|m| m.uuid)
            .ok_or_else(|| dangling("previous message", id))?;
        self.messages.insert(id, uuid);
        Ok(Some(uuid))
    }
}

fn dangling(what: &str, id: RowId) -> ServerError {
    ServerError::Internal(format!("dangling {what} reference {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_core::{CoreResult, Database, NewConversation, NewUser};

    #[test]
    fn roles_round_trip() {
        for role in [Role::Owner, Role::Admin, Role::Member] {
            assert_eq!(stored_role(member_role(role)), role);
        }
    }

    #[test]
    fn message_views_resolve_references() {
        let db = Database::new();
        let (alice, bob, conversation, first, second) = db
            .write(|txn| -> CoreResult<_> {
                let alice = txn.insert_user(NewUser {
                    name: "alice".into(),
                    username: "alice".into(),
                    ..Default::default()
                })?;
                let bob = txn.insert_user(NewUser {
                    name: "bob".into(),
                    username: "bob".into(),
                    ..Default::default()
                })?;
                let conversation = txn.insert_conversation(NewConversation {
                    title: "general".into(),
                    ..Default::default()
                })?;
                let first = txn.insert_message(conversation.id, alice.id, "one".into())?;
                let second = txn.insert_message(conversation.id, bob.id, "two".into())?;
                Ok((alice, bob, conversation, first, second))
            })
            .unwrap()
            .value;
        db.write(|txn| txn.delete_message(second.id)).unwrap();

        let snap = db.snapshot();
        let second = snap.message(second.id).unwrap();
        let mut presenter = MessagePresenter::new(&snap, &conversation, alice.id);

        let view = presenter.view(&first, None).unwrap();
        assert_eq!(view.user_id, alice.uuid);
        assert_eq!(view.previous_id, None);
        assert!(view.is_self);

        let redacted = presenter.view(&second, Some("Deleted message")).unwrap();
        assert_eq!(redacted.user_id, bob.uuid);
        assert_eq!(redacted.previous_id, Some(first.uuid));
        assert_eq!(redacted.content, "Deleted message");
        assert!(!redacted.is_self);

        let tombstone = presenter.tombstone(&second).unwrap();
        assert_eq!(tombstone.conversation_id, conversation.uuid);
        assert!(tombstone.deleted_at.is_some());
    }
}
