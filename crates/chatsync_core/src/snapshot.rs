//! Point-in-time reads.
//!
//! A [`Snapshot`] holds the table read lock, so everything read through
//! it belongs to the same committed state. Keep snapshots short-lived:
//! a writer's commit waits for them to be dropped.

use crate::entity::{Conversation, Membership, Message, Record, User};
use crate::tables::Tables;
use crate::types::{EntityKind, RowId, Version};
use parking_lot::RwLockReadGuard;
use std::collections::{BTreeSet, HashSet};
use std::ops::Bound;
use uuid::Uuid;

/// Exclusive lower bound of a delta query: `(version, row id)`.
pub type FeedPosition = (Version, RowId);

/// Lookups shared by snapshots and write transactions.
pub trait ReadView {
    /// Looks up a user by row id.
    fn user(&self, id: RowId) -> Option<User>;

    /// Looks up a conversation by row id.
    fn conversation(&self, id: RowId) -> Option<Conversation>;

    /// Looks up a message by row id.
    fn message(&self, id: RowId) -> Option<Message>;

    /// Looks up the membership row of a user in a conversation, active or not.
    fn membership(&self, user_id: RowId, conversation_id: RowId) -> Option<Membership>;

    /// Looks up a user by external id.
    fn user_by_uuid(&self, uuid: Uuid) -> Option<User>;

    /// Looks up a conversation by external id.
    fn conversation_by_uuid(&self, uuid: Uuid) -> Option<Conversation>;

    /// Looks up a message by external id.
    fn message_by_uuid(&self, uuid: Uuid) -> Option<Message>;
}

/// One page of a delta or history query.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaPage<T> {
    /// Rows in query order.
    pub rows: Vec<T>,
    /// True if rows exist beyond this page.
    pub has_more: bool,
}

impl<T> DeltaPage<T> {
    fn from_overfetch(mut rows: Vec<T>, limit: usize) -> Self {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        Self { rows, has_more }
    }

    /// Returns the last row of the page.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.rows.last()
    }
}

/// A conversation as seen through one user's membership.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberConversation {
    /// The conversation row.
    pub conversation: Conversation,
    /// The requesting user's membership row.
    pub membership: Membership,
    /// Greater of the two row versions.
    pub version: Version,
}

impl MemberConversation {
    fn new(conversation: Conversation, membership: Membership) -> Self {
        let version = conversation.version.max(membership.version);
        Self {
            conversation,
            membership,
            version,
        }
    }

    /// True if the conversation was deleted or the user left it.
    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.conversation.is_deleted() || self.membership.is_deleted()
    }

    /// Feed position of this row.
    #[must_use]
    pub fn position(&self) -> FeedPosition {
        (self.version, self.conversation.id)
    }
}

/// A user as seen through their membership in one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMember {
    /// The user row.
    pub user: User,
    /// The user's membership row.
    pub membership: Membership,
    /// Greater of the two row versions.
    pub version: Version,
}

impl ConversationMember {
    fn new(user: User, membership: Membership) -> Self {
        let version = user.version.max(membership.version);
        Self {
            user,
            membership,
            version,
        }
    }

    /// True if the user was deleted or is no longer a member.
    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.user.is_deleted() || self.membership.is_deleted()
    }

    /// Feed position of this row.
    #[must_use]
    pub fn position(&self) -> FeedPosition {
        (self.version, self.user.id)
    }
}

/// A read-only view of committed state.
pub struct Snapshot<'a> {
    tables: RwLockReadGuard<'a, Tables>,
}

impl<'a> Snapshot<'a> {
    pub(crate) fn new(tables: RwLockReadGuard<'a, Tables>) -> Self {
        Self { tables }
    }

    /// Version of the latest commit visible to this snapshot.
    #[must_use]
    pub fn high_water(&self) -> Version {
        self.tables.high_water
    }

    /// Messages of a conversation whose `(version, id)` is past `after`,
    /// ascending. With `floor`, messages older than that row are skipped.
    #[must_use]
    pub fn messages_changed_since(
        &self,
        conversation_id: RowId,
        after: Option<FeedPosition>,
        floor: Option<RowId>,
        limit: usize,
    ) -> DeltaPage<Message> {
        let Some(versions) = self.tables.message_versions.get(&conversation_id) else {
            return DeltaPage::from_overfetch(Vec::new(), limit);
        };
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let rows = versions
            .range((lower, Bound::Unbounded))
            .filter(|(_, id)| floor.map_or(true, |floor| *id >= floor))
            .filter_map(|(_, id)| self.tables.rows.messages.get(id))
            .take(limit.saturating_add(1))
            .cloned()
            .collect();
        DeltaPage::from_overfetch(rows, limit)
    }

    /// Messages of a conversation strictly older than `before`, newest first.
    #[must_use]
    pub fn messages_before(
        &self,
        conversation_id: RowId,
        before: Option<RowId>,
        limit: usize,
    ) -> DeltaPage<Message> {
        let Some(ids) = self.tables.message_ids.get(&conversation_id) else {
            return DeltaPage::from_overfetch(Vec::new(), limit);
        };
        let upper = before.map_or(Bound::Unbounded, Bound::Excluded);
        let rows = ids
            .range((Bound::Unbounded, upper))
            .rev()
            .filter_map(|id| self.tables.rows.messages.get(id))
            .take(limit.saturating_add(1))
            .cloned()
            .collect();
        DeltaPage::from_overfetch(rows, limit)
    }

    /// Conversations of every membership a user holds or held, ordered by
    /// effective version.
    #[must_use]
    pub fn conversations_changed_since(
        &self,
        user_id: RowId,
        after: Option<FeedPosition>,
        limit: usize,
    ) -> DeltaPage<MemberConversation> {
        let mut rows: Vec<MemberConversation> = self
            .memberships(self.tables.memberships_by_user.get(&user_id))
            .filter_map(|m| {
                let conversation = self.tables.rows.conversations.get(&m.conversation_id)?;
                Some(MemberConversation::new(conversation.clone(), m.clone()))
            })
            .filter(|row| after.map_or(true, |after| row.position() > after))
            .collect();
        rows.sort_by_key(MemberConversation::position);
        rows.truncate(limit.saturating_add(1));
        DeltaPage::from_overfetch(rows, limit)
    }

    /// Users of every membership row of a conversation, ordered by
    /// effective version.
    #[must_use]
    pub fn members_changed_since(
        &self,
        conversation_id: RowId,
        after: Option<FeedPosition>,
        limit: usize,
    ) -> DeltaPage<ConversationMember> {
        let mut rows: Vec<ConversationMember> = self
            .memberships(self.tables.memberships_by_conversation.get(&conversation_id))
            .filter_map(|m| {
                let user = self.tables.rows.users.get(&m.user_id)?;
                Some(ConversationMember::new(user.clone(), m.clone()))
            })
            .filter(|row| after.map_or(true, |after| row.position() > after))
            .collect();
        rows.sort_by_key(ConversationMember::position);
        rows.truncate(limit.saturating_add(1));
        DeltaPage::from_overfetch(rows, limit)
    }

    /// Live users holding an active membership in a conversation.
    #[must_use]
    pub fn active_participants(&self, conversation_id: RowId) -> Vec<User> {
        self.memberships(self.tables.memberships_by_conversation.get(&conversation_id))
            .filter(|m| m.is_active())
            .filter_map(|m| self.tables.rows.users.get(&m.user_id))
            .filter(|u| !u.is_deleted())
            .cloned()
            .collect()
    }

    /// Users by row id, deduplicated, in first-seen order.
    #[must_use]
    pub fn users_by_ids(&self, ids: impl IntoIterator<Item = RowId>) -> Vec<User> {
        let mut seen = HashSet::new();
        ids.into_iter()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| self.tables.rows.users.get(&id).cloned())
            .collect()
    }

    /// Number of committed rows of a kind.
    #[must_use]
    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::User => self.tables.rows.users.len(),
            EntityKind::Conversation => self.tables.rows.conversations.len(),
            EntityKind::Membership => self.tables.rows.memberships.len(),
            EntityKind::Message => self.tables.rows.messages.len(),
        }
    }

    fn memberships<'s>(
        &'s self,
        ids: Option<&'s BTreeSet<RowId>>,
    ) -> impl Iterator<Item = &'s Membership> + 's {
        ids.into_iter()
            .flatten()
            .filter_map(move |id| self.tables.rows.memberships.get(id))
    }
}

impl ReadView for Snapshot<'_> {
    fn user(&self, id: RowId) -> Option<User> {
        self.tables.rows.users.get(&id).cloned()
    }

    fn conversation(&self, id: RowId) -> Option<Conversation> {
        self.tables.rows.conversations.get(&id).cloned()
    }

    fn message(&self, id: RowId) -> Option<Message> {
        self.tables.rows.messages.get(&id).cloned()
    }

    fn membership(&self, user_id: RowId, conversation_id: RowId) -> Option<Membership> {
        let id = self
            .tables
            .membership_pairs
            .get(&(user_id, conversation_id))?;
        self.tables.rows.memberships.get(id).cloned()
    }

    fn user_by_uuid(&self, uuid: Uuid) -> Option<User> {
        let id = self.tables.lookup_uuid(EntityKind::User, uuid)?;
        self.user(id)
    }

    fn conversation_by_uuid(&self, uuid: Uuid) -> Option<Conversation> {
        let id = self.tables.lookup_uuid(EntityKind::Conversation, uuid)?;
        self.conversation(id)
    }

    fn message_by_uuid(&self, uuid: Uuid) -> Option<Message> {
        let id = self.tables.lookup_uuid(EntityKind::Message, uuid)?;
        self.message(id)
    }
}

impl std::fmt::Debug for Snapshot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("high_water", &self.tables.high_water)
            .finish_non_exhaustive()
    }
}
