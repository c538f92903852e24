//! In-memory tables and their secondary indexes.
//!
//! `Tables` is only ever mutated by a committing write transaction while
//! it holds the table write lock, so every index is updated atomically
//! with the rows it describes.

use crate::entity::{Conversation, Membership, Message, Record, User};
use crate::types::{EntityKind, RowId, Version};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// One map per entity kind, keyed by row id.
///
/// Used both for committed rows and for rows staged by a transaction.
#[derive(Debug, Default, Clone)]
pub(crate) struct RowSet {
    pub(crate) users: BTreeMap<RowId, User>,
    pub(crate) conversations: BTreeMap<RowId, Conversation>,
    pub(crate) memberships: BTreeMap<RowId, Membership>,
    pub(crate) messages: BTreeMap<RowId, Message>,
}

impl RowSet {
    pub(crate) fn len(&self) -> usize {
        self.users.len() + self.conversations.len() + self.memberships.len() + self.messages.len()
    }
}

/// Committed state of the store.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) rows: RowSet,
    pub(crate) uuid_index: HashMap<(EntityKind, Uuid), RowId>,
    /// Lowercased username -> user row.
    pub(crate) usernames: HashMap<String, RowId>,
    /// (user, conversation) -> membership row.
    pub(crate) membership_pairs: HashMap<(RowId, RowId), RowId>,
    pub(crate) memberships_by_user: HashMap<RowId, BTreeSet<RowId>>,
    pub(crate) memberships_by_conversation: HashMap<RowId, BTreeSet<RowId>>,
    /// Conversation -> message rows in id order.
    pub(crate) message_ids: HashMap<RowId, BTreeSet<RowId>>,
    /// Conversation -> messages ordered by (version, id).
    pub(crate) message_versions: HashMap<RowId, BTreeSet<(Version, RowId)>>,
    pub(crate) high_water: Version,
}

impl Tables {
    pub(crate) fn lookup_uuid(&self, kind: EntityKind, uuid: Uuid) -> Option<RowId> {
        self.uuid_index.get(&(kind, uuid)).copied()
    }

    pub(crate) fn message_tip(&self, conversation: RowId) -> Option<RowId> {
        self.message_ids
            .get(&conversation)
            .and_then(|ids| ids.iter().next_back().copied())
    }
}

/// Table plumbing shared by the four record types.
pub(crate) trait Stored: Record + Sized {
    fn rows(set: &RowSet) -> &BTreeMap<RowId, Self>;

    fn rows_mut(set: &mut RowSet) -> &mut BTreeMap<RowId, Self>;

    fn set_version(&mut self, version: Version, at: DateTime<Utc>);

    fn mark_deleted(&mut self, at: DateTime<Utc>);

    /// Replaces the committed row and maintains the indexes.
    fn apply(self, tables: &mut Tables);
}

impl Stored for User {
    fn rows(set: &RowSet) -> &BTreeMap<RowId, Self> {
        &set.users
    }

    fn rows_mut(set: &mut RowSet) -> &mut BTreeMap<RowId, Self> {
        &mut set.users
    }

    fn set_version(&mut self, version: Version, at: DateTime<Utc>) {
        self.stamp(version, at);
    }

    fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
    }

    fn apply(self, tables: &mut Tables) {
        if let Some(previous) = tables.rows.users.get(&self.id) {
            let old_key = User::username_key(&previous.username);
            if tables.usernames.get(&old_key) == Some(&self.id) {
                tables.usernames.remove(&old_key);
            }
        }
        // A deleted account releases its handle.
        if !self.is_deleted() {
            tables
                .usernames
                .insert(User::username_key(&self.username), self.id);
        }
        tables
            .uuid_index
            .insert((EntityKind::User, self.uuid), self.id);
        tables.rows.users.insert(self.id, self);
    }
}

impl Stored for Conversation {
    fn rows(set: &RowSet) -> &BTreeMap<RowId, Self> {
        &set.conversations
    }

    fn rows_mut(set: &mut RowSet) -> &mut BTreeMap<RowId, Self> {
        &mut set.conversations
    }

    fn set_version(&mut self, version: Version, at: DateTime<Utc>) {
        self.stamp(version, at);
    }

    fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
    }

    fn apply(self, tables: &mut Tables) {
        tables
            .uuid_index
            .insert((EntityKind::Conversation, self.uuid), self.id);
        tables.rows.conversations.insert(self.id, self);
    }
}

impl Stored for Membership {
    fn rows(set: &RowSet) -> &BTreeMap<RowId, Self> {
        &set.memberships
    }

    fn rows_mut(set: &mut RowSet) -> &mut BTreeMap<RowId, Self> {
        &mut set.memberships
    }

    fn set_version(&mut self, version: Version, at: DateTime<Utc>) {
        self.stamp(version, at);
    }

    fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
    }

    fn apply(self, tables: &mut Tables) {
        tables
            .uuid_index
            .insert((EntityKind::Membership, self.uuid), self.id);
        tables
            .membership_pairs
            .insert((self.user_id, self.conversation_id), self.id);
        tables
            .memberships_by_user
            .entry(self.user_id)
            .or_default()
            .insert(self.id);
        tables
            .memberships_by_conversation
            .entry(self.conversation_id)
            .or_default()
            .insert(self.id);
        tables.rows.memberships.insert(self.id, self);
    }
}

impl Stored for Message {
    fn rows(set: &RowSet) -> &BTreeMap<RowId, Self> {
        &set.messages
    }

    fn rows_mut(set: &mut RowSet) -> &mut BTreeMap<RowId, Self> {
        &mut set.messages
    }

    fn set_version(&mut self, version: Version, at: DateTime<Utc>) {
        self.stamp(version, at);
    }

    // Deletion redacts the body; identity and chain position survive.
    fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
        self.content.clear();
    }

    fn apply(self, tables: &mut Tables) {
        let versions = tables
            .message_versions
            .entry(self.conversation_id)
            .or_default();
        if let Some(previous) = tables.rows.messages.get(&self.id) {
            versions.remove(&(previous.version, previous.id));
        }
        versions.insert((self.version, self.id));
        tables
            .message_ids
            .entry(self.conversation_id)
            .or_default()
            .insert(self.id);
        tables
            .uuid_index
            .insert((EntityKind::Message, self.uuid), self.id);
        tables.rows.messages.insert(self.id, self);
    }
}
