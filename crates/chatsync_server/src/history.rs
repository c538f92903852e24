//! Backward history pager.
//!
//! Pages through a conversation's messages by internal id, newest first,
//! independent of version. Deleted messages keep their place in the
//! history with their content replaced by a redaction marker.

use crate::error::ServerResult;
use crate::guard::authorize;
use crate::present::MessagePresenter;
use crate::sync::authors;
use crate::validation::PageParams;
use crate::validator::history_cursor;
use chatsync_core::{Record, Snapshot};
use chatsync_protocol::{HistoryCursor, HistoryPartition, MessagesOlderResponse};
use uuid::Uuid;

/// Messages older than the cursor, or the newest messages without one.
pub fn messages_older(
    snapshot: &Snapshot<'_>,
    requester_id: Uuid,
    conversation_id: Uuid,
    page: &PageParams,
    redaction_marker: &str,
) -> ServerResult<MessagesOlderResponse> {
    let cursor = page
        .cursor
        .as_deref()
        .map(HistoryCursor::decode)
        .transpose()?;
    let member = authorize(snapshot, requester_id, conversation_id).into_result()?;
    let before = cursor
        .map(|c| history_cursor(snapshot, &member.conversation, &c))
        .transpose()?;

    let older = snapshot.messages_before(member.conversation.id, before, page.limit);
    let mut presenter = MessagePresenter::new(snapshot, &member.conversation, member.user.id);
    let mut messages = HistoryPartition::default();
    for message in &older.rows {
        let view = presenter.view(message, Some(redaction_marker))?;
        if message.is_deleted() {
            messages.deleted.push(view);
        } else {
            messages.active.push(view);
        }
    }
    let next_cursor = older.last().map(|m| HistoryCursor::new(m.uuid).encode());

    tracing::trace!(
        conversation = %conversation_id,
        rows = older.rows.len(),
        has_more = older.has_more,
        "history page served"
    );
    Ok(MessagesOlderResponse {
        messages,
        dependencies: authors(snapshot, &older.rows),
        next_cursor,
        has_more: older.has_more,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use chatsync_core::{CoreResult, Database, Message, NewConversation, NewUser, Role};

    const MARKER: &str = "Deleted message";

    fn setup(count: usize) -> (Database, Uuid, Uuid, Vec<Message>) {
        let db = Database::new();
        let (user, conversation, messages) = db
            .write(|txn| -> CoreResult<_> {
                let user = txn.insert_user(NewUser {
                    name: "alice".into(),
                    username: "alice".into(),
                    ..Default::default()
                })?;
                let conversation = txn.insert_conversation(NewConversation {
                    title: "general".into(),
                    ..Default::default()
                })?;
                txn.add_member(user.id, conversation.id, Role::Owner)?;
                let messages = (0..count)
                    .map(|i| txn.insert_message(conversation.id, user.id, format!("m{i}")))
                    .collect::<CoreResult<Vec<_>>>()?;
                Ok((user, conversation, messages))
            })
            .unwrap()
            .value;
        (db, user.uuid, conversation.uuid, messages)
    }

    fn page(cursor: Option<String>, limit: usize) -> PageParams {
        PageParams { cursor, limit }
    }

    #[test]
    fn pages_newest_first() {
        let (db, user, conversation, messages) = setup(5);
        let first = messages_older(&db.snapshot(), user, conversation, &page(None, 2), MARKER)
            .unwrap();
        let ids: Vec<_> = first.messages.active.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![messages[4].uuid, messages[3].uuid]);
        assert!(first.has_more);

        let second = messages_older(
            &db.snapshot(),
            user,
            conversation,
            &page(first.next_cursor, 10),
            MARKER,
        )
        .unwrap();
        let ids: Vec<_> = second.messages.active.iter().map(|m| m.id).collect();
        assert_eq!(
            ids,
            vec![messages[2].uuid, messages[1].uuid, messages[0].uuid]
        );
        assert!(!second.has_more);
    }

    #[test]
    fn repeated_pages_are_identical() {
        let (db, user, conversation, messages) = setup(4);
        let cursor = Some(HistoryCursor::new(messages[3].uuid).encode());
        let a = messages_older(&db.snapshot(), user, conversation, &page(cursor.clone(), 2), MARKER)
            .unwrap();
        let b = messages_older(&db.snapshot(), user, conversation, &page(cursor, 2), MARKER)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn deleted_messages_are_redacted() {
        let (db, user, conversation, messages) = setup(2);
        db.write(|txn| txn.delete_message(messages[0].id)).unwrap();

        let older = messages_older(&db.snapshot(), user, conversation, &page(None, 10), MARKER)
            .unwrap();
        assert_eq!(older.messages.active.len(), 1);
        assert_eq!(older.messages.deleted.len(), 1);
        let deleted = &older.messages.deleted[0];
        assert_eq!(deleted.id, messages[0].uuid);
        assert_eq!(deleted.content, MARKER);
        assert!(deleted.deleted_at.is_some());
    }

    #[test]
    fn foreign_cursor_is_not_found() {
        let (db, user, conversation, _) = setup(1);
        let (other_db, _, _, other) = setup(1);
        drop(other_db);
        let cursor = Some(HistoryCursor::new(other[0].uuid).encode());
        let err = messages_older(&db.snapshot(), user, conversation, &page(cursor, 10), MARKER)
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound));
    }
}
