//! Cursor scope validation.
//!
//! Decoding a cursor only proves it is well formed. Before a cursor is
//! used, the row it names must belong to the scope being queried. A
//! mismatch is reported exactly like a missing conversation, so a cursor
//! lifted from another conversation reveals nothing about it.

use crate::error::ServerError;
use chatsync_core::{Conversation, FeedPosition, ReadView, Record, RowId, User, Version};
use chatsync_protocol::{HistoryCursor, SyncCursor};
use std::fmt;

/// A cursor naming a row outside the queried scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeMismatch {
    reason: &'static str,
}

impl ScopeMismatch {
    fn new(reason: &'static str) -> Self {
        Self { reason }
    }

    /// Why the cursor was rejected.
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

impl fmt::Display for ScopeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cursor out of scope: {}", self.reason)
    }
}

impl From<ScopeMismatch> for ServerError {
    fn from(mismatch: ScopeMismatch) -> Self {
        tracing::debug!(reason = mismatch.reason, "cursor scope mismatch");
        ServerError::NotFound
    }
}

/// Where a message feed resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageScope {
    /// Exclusive lower bound of the feed.
    pub after: FeedPosition,
    /// Oldest message the client holds, if it said so.
    pub floor: Option<RowId>,
}

/// Validates a message feed cursor against a conversation.
pub fn message_cursor<V: ReadView + ?Sized>(
    view: &V,
    conversation: &Conversation,
    cursor: &SyncCursor,
) -> Result<MessageScope, ScopeMismatch> {
    let anchor = view
        .message_by_uuid(cursor.entity_id)
        .filter(|m| m.conversation_id == conversation.id)
        .ok_or(ScopeMismatch::new("message not in conversation"))?;
    let floor = match cursor.oldest_message_id {
        None => None,
        Some(oldest) => {
            let oldest = view
                .message_by_uuid(oldest)
                .filter(|m| m.conversation_id == conversation.id)
                .ok_or(ScopeMismatch::new("oldest message not in conversation"))?;
            Some(oldest.id)
        }
    };
    Ok(MessageScope {
        after: (Version::new(cursor.version), anchor.id),
        floor,
    })
}

/// Validates a conversation feed cursor against the requester.
///
/// The named conversation must be one the requester holds or held a
/// membership in; a conversation they left still anchors their feed.
pub fn conversation_cursor<V: ReadView + ?Sized>(
    view: &V,
    requester: &User,
    cursor: &SyncCursor,
) -> Result<FeedPosition, ScopeMismatch> {
    let conversation = view
        .conversation_by_uuid(cursor.entity_id)
        .ok_or(ScopeMismatch::new("unknown conversation"))?;
    view.membership(requester.id, conversation.id)
        .ok_or(ScopeMismatch::new("conversation never joined"))?;
    Ok((Version::new(cursor.version), conversation.row_id()))
}

/// Validates a member feed cursor against a conversation.
pub fn user_cursor<V: ReadView + ?Sized>(
    view: &V,
    conversation: &Conversation,
    cursor: &SyncCursor,
) -> Result<FeedPosition, ScopeMismatch> {
    let user = view
        .user_by_uuid(cursor.entity_id)
        .ok_or(ScopeMismatch::new("unknown user"))?;
    view.membership(user.id, conversation.id)
        .ok_or(ScopeMismatch::new("user never joined conversation"))?;
    Ok((Version::new(cursor.version), user.row_id()))
}

/// Validates a history cursor against a conversation.
pub fn history_cursor<V: ReadView + ?Sized>(
    view: &V,
    conversation: &Conversation,
    cursor: &HistoryCursor,
) -> Result<RowId, ScopeMismatch> {
    view.message_by_uuid(cursor.message_id)
        .filter(|m| m.conversation_id == conversation.id)
        .map(|m| m.id)
        .ok_or(ScopeMismatch::new("message not in conversation"))
}
