//! Authorization guard.
//!
//! Every conversation-scoped read and write passes through
//! [`authorize`] before touching scoped rows. Denials carry a reason for
//! the log, but callers turn every denial into the same
//! [`ServerError::NotFound`], so a requester cannot discover
//! conversations they do not belong to.

use crate::error::{ServerError, ServerResult};
use chatsync_core::{Conversation, Membership, ReadView, Record, Role, User};
use std::fmt;
use uuid::Uuid;

/// Why access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The requester does not exist or was deleted.
    UnknownRequester,
    /// No conversation has the requested id.
    UnknownConversation,
    /// The conversation was deleted.
    ConversationDeleted,
    /// The requester never joined the conversation.
    NotAMember,
    /// The requester left or was removed.
    MembershipLeft,
}

impl DenyReason {
    /// Short name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            DenyReason::UnknownRequester => "unknown requester",
            DenyReason::UnknownConversation => "unknown conversation",
            DenyReason::ConversationDeleted => "conversation deleted",
            DenyReason::NotAMember => "not a member",
            DenyReason::MembershipLeft => "membership left",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The rows that prove a requester's membership.
#[derive(Debug, Clone)]
pub struct MemberRecord {
    /// The requester.
    pub user: User,
    /// The conversation.
    pub conversation: Conversation,
    /// The requester's active membership.
    pub membership: Membership,
}

impl MemberRecord {
    /// The requester's role.
    pub fn role(&self) -> Role {
        self.membership.role
    }

    /// Fails with `Forbidden` unless the requester's role passes `allowed`.
    pub fn require(&self, allowed: impl FnOnce(Role) -> bool, action: &str) -> ServerResult<()> {
        if allowed(self.role()) {
            Ok(())
        } else {
            tracing::debug!(
                user = %self.user.uuid,
                conversation = %self.conversation.uuid,
                role = %self.role(),
                action,
                "role check failed"
            );
            Err(ServerError::Forbidden(format!("{action} requires a higher role")))
        }
    }
}

/// Outcome of an authorization check.
#[derive(Debug, Clone)]
pub enum Access {
    /// The requester is an active member of a live conversation.
    Granted(MemberRecord),
    /// The requester may not see the conversation.
    Denied(DenyReason),
}

impl Access {
    /// Converts a denial into `NotFound`, logging its reason.
    pub fn into_result(self) -> ServerResult<MemberRecord> {
        match self {
            Access::Granted(record) => Ok(record),
            Access::Denied(reason) => {
                tracing::debug!(%reason, "access denied");
                Err(ServerError::NotFound)
            }
        }
    }

    /// Returns true if access was granted.
    pub fn is_granted(&self) -> bool {
        matches!(self, Access::Granted(_))
    }
}

/// Checks that `user_id` is an active member of `conversation_id`.
pub fn authorize<V: ReadView + ?Sized>(view: &V, user_id: Uuid, conversation_id: Uuid) -> Access {
    let Some(user) = view.user_by_uuid(user_id).filter(|u| !u.is_deleted()) else {
        return Access::Denied(DenyReason::UnknownRequester);
    };
    let Some(conversation) = view.conversation_by_uuid(conversation_id) else {
        return Access::Denied(DenyReason::UnknownConversation);
    };
    if conversation.is_deleted() {
        return Access::Denied(DenyReason::ConversationDeleted);
    }
    let Some(membership) = view.membership(user.id, conversation.id) else {
        return Access::Denied(DenyReason::NotAMember);
    };
    if !membership.is_active() {
        return Access::Denied(DenyReason::MembershipLeft);
    }
    Access::Granted(MemberRecord {
        user,
        conversation,
        membership,
    })
}

/// Resolves the requester's own row.
///
/// A token naming a missing or deleted user is no longer a valid
/// identity.
pub fn requester<V: ReadView + ?Sized>(view: &V, user_id: Uuid) -> ServerResult<User> {
    view.user_by_uuid(user_id)
        .filter(|u| !u.is_deleted())
        .ok_or_else(|| ServerError::Unauthenticated("unknown user".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_core::{CoreResult, Database, NewConversation, NewUser};

    struct World {
        db: Database,
        alice: User,
        bob: User,
        carol: User,
        conversation: Conversation,
    }

    fn world() -> World {
        let db = Database::new();
        let (alice, bob, carol, conversation) = db
            .write(|txn| -> CoreResult<_> {
                let mut user = |name: &str| {
                    txn.insert_user(NewUser {
                        name: name.into(),
                        username: name.into(),
                        ..Default::default()
                    })
                };
                let (alice, bob, carol) = (user("alice")?, user("bob")?, user("carol")?);
                let conversation = txn.insert_conversation(NewConversation {
                    title: "general".into(),
                    ..Default::default()
                })?;
                txn.add_member(alice.id, conversation.id, Role::Owner)?;
                txn.add_member(bob.id, conversation.id, Role::Member)?;
                Ok((alice, bob, carol, conversation))
            })
            .unwrap()
            .value;
        World {
            db,
            alice,
            bob,
            carol,
            conversation,
        }
    }

    fn reason(access: Access) -> Option<DenyReason> {
        match access {
            Access::Granted(_) => None,
            Access::Denied(reason) => Some(reason),
        }
    }

    #[test]
    fn member_is_granted() {
        let w = world();
        let access = authorize(&w.db.snapshot(), w.bob.uuid, w.conversation.uuid);
        let record = access.into_result().unwrap();
        assert_eq!(record.role(), Role::Member);
        assert!(record.require(Role::can_moderate, "remove member").is_err());
    }

    #[test]
    fn denial_reasons() {
        let w = world();
        let snap = w.db.snapshot();
        assert_eq!(
            reason(authorize(&snap, w.carol.uuid, w.conversation.uuid)),
            Some(DenyReason::NotAMember)
        );
        assert_eq!(
            reason(authorize(&snap, w.alice.uuid, Uuid::new_v4())),
            Some(DenyReason::UnknownConversation)
        );
        assert_eq!(
            reason(authorize(&snap, Uuid::new_v4(), w.conversation.uuid)),
            Some(DenyReason::UnknownRequester)
        );
    }

    #[test]
    fn left_and_deleted_are_denied() {
        let w = world();
        let membership = w.db.snapshot().membership(w.bob.id, w.conversation.id).unwrap();
        w.db.write(|txn| txn.remove_member(membership.id)).unwrap();
        assert_eq!(
            reason(authorize(&w.db.snapshot(), w.bob.uuid, w.conversation.uuid)),
            Some(DenyReason::MembershipLeft)
        );

        w.db.write(|txn| txn.delete_conversation(w.conversation.id))
            .unwrap();
        assert_eq!(
            reason(authorize(&w.db.snapshot(), w.alice.uuid, w.conversation.uuid)),
            Some(DenyReason::ConversationDeleted)
        );
    }

    #[test]
    fn every_denial_is_the_same_error() {
        let w = world();
        let snap = w.db.snapshot();
        let hidden = authorize(&snap, w.carol.uuid, w.conversation.uuid)
            .into_result()
            .unwrap_err();
        let missing = authorize(&snap, w.carol.uuid, Uuid::new_v4())
            .into_result()
            .unwrap_err();
        assert_eq!(hidden.to_body(), missing.to_body());
    }

    #[test]
    fn guard_reads_through_transaction() {
        let w = world();
        let mut txn = w.db.begin_write();
        txn.add_member(w.carol.id, w.conversation.id, Role::Member)
            .unwrap();
        assert!(authorize(&txn, w.carol.uuid, w.conversation.uuid).is_granted());
        txn.abort();
        assert!(!authorize(&w.db.snapshot(), w.carol.uuid, w.conversation.uuid).is_granted());
    }
}
