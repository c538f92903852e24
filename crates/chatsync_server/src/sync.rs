//! Dirty-sync query engine.
//!
//! Each feed returns the rows of one scope whose feed position lies past
//! the client's cursor, in ascending `(version, row id)` order, split by
//! liveness at query time. Checks run in a fixed order: the cursor is
//! decoded first, then the requester is authorized, then the cursor is
//! checked against the scope.

use crate::error::ServerResult;
use crate::guard::{authorize, requester};
use crate::present::{
    member_conversation_tombstone, member_conversation_view, member_tombstone, member_view,
    user_view, MessagePresenter,
};
use crate::validation::PageParams;
use crate::validator::{conversation_cursor, message_cursor, user_cursor, MessageScope};
use chatsync_core::{Message, Record, Snapshot};
use chatsync_protocol::{
    ConversationsDirtyResponse, Dependencies, MessagesDirtyResponse, Partition, SyncCursor,
    UsersDirtyResponse,
};
use uuid::Uuid;

fn decode(page: &PageParams) -> ServerResult<Option<SyncCursor>> {
    Ok(page.cursor.as_deref().map(SyncCursor::decode).transpose()?)
}

/// Conversations the requester holds or held a membership in, changed
/// past the cursor.
///
/// A conversation the requester left is reported as a tombstone, so the
/// client learns to drop it.
pub fn conversations_dirty(
    snapshot: &Snapshot<'_>,
    requester_id: Uuid,
    page: &PageParams,
) -> ServerResult<ConversationsDirtyResponse> {
    let cursor = decode(page)?;
    let user = requester(snapshot, requester_id)?;
    let after = cursor
        .map(|c| conversation_cursor(snapshot, &user, &c))
        .transpose()?;

    let delta = snapshot.conversations_changed_since(user.id, after, page.limit);
    let mut conversations = Partition::default();
    for row in &delta.rows {
        if row.is_tombstoned() {
            conversations.inactive.push(member_conversation_tombstone(row));
        } else {
            conversations.active.push(member_conversation_view(row));
        }
    }
    let next_cursor = delta
        .last()
        .map(|row| SyncCursor::new(row.version.as_u64(), row.conversation.uuid).encode());

    tracing::trace!(
        user = %requester_id,
        rows = delta.rows.len(),
        has_more = delta.has_more,
        "conversation feed served"
    );
    Ok(ConversationsDirtyResponse {
        conversations,
        next_cursor,
        has_more: delta.has_more,
    })
}

/// Messages of a conversation changed past the cursor.
///
/// Deleted messages come back as tombstones. Authors whose accounts were
/// deleted are left out of the dependencies.
pub fn messages_dirty(
    snapshot: &Snapshot<'_>,
    requester_id: Uuid,
    conversation_id: Uuid,
    page: &PageParams,
) -> ServerResult<MessagesDirtyResponse> {
    let cursor = decode(page)?;
    let member = authorize(snapshot, requester_id, conversation_id).into_result()?;
    let scope = cursor
        .as_ref()
        .map(|c| message_cursor(snapshot, &member.conversation, c))
        .transpose()?;
    let (after, floor) = match scope {
        Some(MessageScope { after, floor }) => (Some(after), floor),
        None => (None, None),
    };

    let delta = snapshot.messages_changed_since(member.conversation.id, after, floor, page.limit);
    let mut presenter = MessagePresenter::new(snapshot, &member.conversation, member.user.id);
    let mut messages = Partition::default();
    for message in &delta.rows {
        if message.is_deleted() {
            messages.inactive.push(presenter.tombstone(message)?);
        } else {
            messages.active.push(presenter.view(message, None)?);
        }
    }
    let oldest = cursor.and_then(|c| c.oldest_message_id);
    let next_cursor = delta.last().map(|last| {
        let mut next = SyncCursor::new(last.version.as_u64(), last.uuid);
        next.oldest_message_id = oldest;
        next.encode()
    });

    tracing::trace!(
        conversation = %conversation_id,
        rows = delta.rows.len(),
        has_more = delta.has_more,
        "message feed served"
    );
    Ok(MessagesDirtyResponse {
        messages,
        dependencies: authors(snapshot, &delta.rows),
        next_cursor,
        has_more: delta.has_more,
    })
}

/// Members of a conversation, past and present, changed past the cursor.
pub fn users_dirty(
    snapshot: &Snapshot<'_>,
    requester_id: Uuid,
    conversation_id: Uuid,
    page: &PageParams,
) -> ServerResult<UsersDirtyResponse> {
    let cursor = decode(page)?;
    let member = authorize(snapshot, requester_id, conversation_id).into_result()?;
    let after = cursor
        .map(|c| user_cursor(snapshot, &member.conversation, &c))
        .transpose()?;

    let delta = snapshot.members_changed_since(member.conversation.id, after, page.limit);
    let mut users = Partition::default();
    for row in &delta.rows {
        if row.is_tombstoned() {
            users.inactive.push(member_tombstone(row));
        } else {
            users.active.push(member_view(row));
        }
    }
    let next_cursor = delta
        .last()
        .map(|row| SyncCursor::new(row.version.as_u64(), row.user.uuid).encode());

    tracing::trace!(
        conversation = %conversation_id,
        rows = delta.rows.len(),
        has_more = delta.has_more,
        "member feed served"
    );
    Ok(UsersDirtyResponse {
        users,
        next_cursor,
        has_more: delta.has_more,
    })
}

/// Live authors of `messages`, in first-seen order.
pub(crate) fn authors(snapshot: &Snapshot<'_>, messages: &[Message]) -> Dependencies {
    let users = snapshot
        .users_by_ids(messages.iter().map(|m| m.user_id))
        .iter()
        .filter(|u| !u.is_deleted())
        .map(user_view)
        .collect();
    Dependencies { users }
}
