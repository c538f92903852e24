//! Write transactions.

use super::state::{ChangeRecord, CommitReceipt, TransactionState};
use crate::entity::{
    Conversation, Membership, Message, NewConversation, NewUser, Record, Role, User,
};
use crate::error::{CoreError, CoreResult};
use crate::snapshot::ReadView;
use crate::tables::{RowSet, Stored, Tables};
use crate::types::{EntityKind, RowId, Version};
use chrono::{DateTime, Utc};
use parking_lot::{MutexGuard, RwLock};
use std::collections::HashMap;
use uuid::Uuid;

/// Counters owned by the single writer.
///
/// Only updated when a transaction commits, so an aborted transaction
/// never consumes a version or a row id.
#[derive(Debug, Default)]
pub(crate) struct WriterState {
    pub(crate) last_version: Version,
    pub(crate) last_row_id: u64,
}

/// A write transaction holding the exclusive writer lock.
///
/// Rows are staged locally and become visible to snapshots only when
/// [`commit`](Self::commit) applies them under the table write lock.
/// Reads through the transaction see its own staged rows first.
///
/// Dropping an uncommitted transaction rolls it back.
pub struct WriteTransaction<'a> {
    tables: &'a RwLock<Tables>,
    writer: MutexGuard<'a, WriterState>,
    staged: RowSet,
    versions: HashMap<(EntityKind, RowId), Version>,
    last_version: Version,
    last_row_id: u64,
    now: DateTime<Utc>,
    state: TransactionState,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(tables: &'a RwLock<Tables>, writer: MutexGuard<'a, WriterState>) -> Self {
        let last_version = writer.last_version;
        let last_row_id = writer.last_row_id;
        Self {
            tables,
            writer,
            staged: RowSet::default(),
            versions: HashMap::new(),
            last_version,
            last_row_id,
            now: Utc::now(),
            state: TransactionState::Active,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns the timestamp applied to rows written by this transaction.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Returns the number of staged rows.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.staged.len()
    }

    // ---- users ----

    /// Registers a user.
    pub fn insert_user(&mut self, new: NewUser) -> CoreResult<User> {
        self.ensure_active()?;
        self.check_username(None, &new.username)?;
        let user = User {
            id: self.allocate_row(),
            uuid: Uuid::new_v4(),
            name: new.name,
            username: new.username,
            email: new.email,
            phone_number: new.phone_number,
            avatar_url: new.avatar_url,
            created_at: self.now,
            updated_at: self.now,
            deleted_at: None,
            version: Version::ZERO,
        };
        Ok(self.stage(user))
    }

    /// Applies `f` to a user and stages the result.
    pub fn update_user(&mut self, id: RowId, f: impl FnOnce(&mut User)) -> CoreResult<User> {
        self.ensure_active()?;
        let mut user: User = self.require(id)?;
        let before = User::username_key(&user.username);
        f(&mut user);
        if User::username_key(&user.username) != before {
            self.check_username(Some(id), &user.username)?;
        }
        Ok(self.stage(user))
    }

    /// Soft-deletes a user.
    pub fn delete_user(&mut self, id: RowId) -> CoreResult<User> {
        self.soft_delete(id)
    }

    // ---- conversations ----

    /// Creates a conversation.
    pub fn insert_conversation(&mut self, new: NewConversation) -> CoreResult<Conversation> {
        self.ensure_active()?;
        let conversation = Conversation {
            id: self.allocate_row(),
            uuid: Uuid::new_v4(),
            title: new.title,
            description: new.description,
            thumbnail_url: new.thumbnail_url,
            created_at: self.now,
            updated_at: self.now,
            deleted_at: None,
            version: Version::ZERO,
        };
        Ok(self.stage(conversation))
    }

    /// Applies `f` to a conversation and stages the result.
    pub fn update_conversation(
        &mut self,
        id: RowId,
        f: impl FnOnce(&mut Conversation),
    ) -> CoreResult<Conversation> {
        self.update(id, f)
    }

    /// Soft-deletes a conversation.
    pub fn delete_conversation(&mut self, id: RowId) -> CoreResult<Conversation> {
        self.soft_delete(id)
    }

    // ---- memberships ----

    /// Adds a user to a conversation.
    ///
    /// A previously removed membership is revived with a new version;
    /// an active one is a unique violation.
    pub fn add_member(
        &mut self,
        user_id: RowId,
        conversation_id: RowId,
        role: Role,
    ) -> CoreResult<Membership> {
        self.ensure_active()?;
        self.require::<User>(user_id)?;
        self.require::<Conversation>(conversation_id)?;

        if let Some(mut existing) = ReadView::membership(self, user_id, conversation_id) {
            if existing.is_active() {
                return Err(CoreError::unique_violation(
                    EntityKind::Membership,
                    "user_id",
                ));
            }
            existing.deleted_at = None;
            existing.role = role;
            return Ok(self.stage(existing));
        }

        let membership = Membership {
            id: self.allocate_row(),
            uuid: Uuid::new_v4(),
            user_id,
            conversation_id,
            role,
            created_at: self.now,
            updated_at: self.now,
            deleted_at: None,
            version: Version::ZERO,
        };
        Ok(self.stage(membership))
    }

    /// Soft-deletes a membership.
    pub fn remove_member(&mut self, id: RowId) -> CoreResult<Membership> {
        self.soft_delete(id)
    }

    // ---- messages ----

    /// Appends a message to a conversation, linking it to the current tip.
    pub fn insert_message(
        &mut self,
        conversation_id: RowId,
        user_id: RowId,
        content: String,
    ) -> CoreResult<Message> {
        self.ensure_active()?;
        self.require::<Conversation>(conversation_id)?;
        self.require::<User>(user_id)?;
        let previous_id = self.message_tip(conversation_id);
        let message = Message {
            id: self.allocate_row(),
            uuid: Uuid::new_v4(),
            conversation_id,
            user_id,
            previous_id,
            content,
            created_at: self.now,
            updated_at: self.now,
            deleted_at: None,
            version: Version::ZERO,
        };
        Ok(self.stage(message))
    }

    /// Replaces the content of a live message.
    pub fn update_message(&mut self, id: RowId, content: String) -> CoreResult<Message> {
        self.ensure_active()?;
        let mut message: Message = self.require(id)?;
        if message.is_deleted() {
            return Err(CoreError::invalid_operation("cannot edit a deleted message"));
        }
        message.content = content;
        Ok(self.stage(message))
    }

    /// Soft-deletes a message and redacts its content.
    pub fn delete_message(&mut self, id: RowId) -> CoreResult<Message> {
        self.soft_delete(id)
    }

    /// Returns the newest message of a conversation, staged rows included.
    #[must_use]
    pub fn message_tip(&self, conversation_id: RowId) -> Option<RowId> {
        let staged = self
            .staged
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.id)
            .max();
        let committed = self.tables.read().message_tip(conversation_id);
        staged.max(committed)
    }

    // ---- completion ----

    /// Commits the transaction, publishing every staged row at once.
    pub fn commit(mut self) -> CoreResult<CommitReceipt> {
        self.ensure_active()?;

        let mut changes: Vec<ChangeRecord> = self
            .versions
            .iter()
            .map(|(&(kind, row_id), &version)| ChangeRecord {
                kind,
                row_id,
                version,
            })
            .collect();
        changes.sort_by_key(|c| c.version);

        let staged = std::mem::take(&mut self.staged);
        let high_water = {
            let mut tables = self.tables.write();
            for row in staged.users.into_values() {
                row.apply(&mut tables);
            }
            for row in staged.conversations.into_values() {
                row.apply(&mut tables);
            }
            for row in staged.memberships.into_values() {
                row.apply(&mut tables);
            }
            for row in staged.messages.into_values() {
                row.apply(&mut tables);
            }
            tables.high_water = self.last_version;
            tables.high_water
        };

        self.writer.last_version = self.last_version;
        self.writer.last_row_id = self.last_row_id;
        self.state = TransactionState::Committed;
        tracing::trace!(rows = changes.len(), %high_water, "write transaction committed");

        Ok(CommitReceipt {
            changes,
            high_water,
        })
    }

    /// Aborts the transaction, discarding every staged row.
    pub fn abort(mut self) {
        self.rollback();
    }

    fn rollback(&mut self) {
        if self.state == TransactionState::Active {
            tracing::trace!(rows = self.staged.len(), "write transaction rolled back");
            self.staged = RowSet::default();
            self.versions.clear();
            self.state = TransactionState::Aborted;
        }
    }

    // ---- internals ----

    fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::Aborted => {
                Err(CoreError::invalid_operation("transaction already aborted"))
            }
        }
    }

    fn allocate_row(&mut self) -> RowId {
        self.last_row_id += 1;
        RowId::new(self.last_row_id)
    }

    /// A row keeps the first version it was given in this transaction.
    fn version_for(&mut self, kind: EntityKind, id: RowId) -> Version {
        if let Some(version) = self.versions.get(&(kind, id)) {
            return *version;
        }
        self.last_version = self.last_version.next();
        self.versions.insert((kind, id), self.last_version);
        self.last_version
    }

    fn stage<R: Stored>(&mut self, mut row: R) -> R {
        let version = self.version_for(R::KIND, row.row_id());
        row.set_version(version, self.now);
        R::rows_mut(&mut self.staged).insert(row.row_id(), row.clone());
        row
    }

    fn get<R: Stored>(&self, id: RowId) -> Option<R> {
        if let Some(row) = R::rows(&self.staged).get(&id) {
            return Some(row.clone());
        }
        R::rows(&self.tables.read().rows).get(&id).cloned()
    }

    fn require<R: Stored>(&self, id: RowId) -> CoreResult<R> {
        self.get(id)
            .ok_or_else(|| CoreError::row_not_found(R::KIND, id))
    }

    fn find_uuid<R: Stored>(&self, uuid: Uuid) -> Option<R> {
        if let Some(row) = R::rows(&self.staged)
            .values()
            .find(|r| r.external_id() == uuid)
        {
            return Some(row.clone());
        }
        let id = self.tables.read().lookup_uuid(R::KIND, uuid)?;
        self.get(id)
    }

    fn update<R: Stored>(&mut self, id: RowId, f: impl FnOnce(&mut R)) -> CoreResult<R> {
        self.ensure_active()?;
        let mut row: R = self.require(id)?;
        f(&mut row);
        Ok(self.stage(row))
    }

    /// Deleting an already deleted row is a no-op and keeps its version.
    fn soft_delete<R: Stored>(&mut self, id: RowId) -> CoreResult<R> {
        self.ensure_active()?;
        let mut row: R = self.require(id)?;
        if row.is_deleted() {
            return Ok(row);
        }
        row.mark_deleted(self.now);
        Ok(self.stage(row))
    }

    fn check_username(&self, owner: Option<RowId>, username: &str) -> CoreResult<()> {
        let key = User::username_key(username);
        let violation = || CoreError::unique_violation(EntityKind::User, "username");

        let staged_clash = self
            .staged
            .users
            .values()
            .any(|u| {
                Some(u.id) != owner && !u.is_deleted() && User::username_key(&u.username) == key
            });
        if staged_clash {
            return Err(violation());
        }

        let holder = self.tables.read().usernames.get(&key).copied();
        match holder {
            Some(id) if Some(id) != owner => match self.staged.users.get(&id) {
                // Renamed or deleted earlier in this transaction.
                Some(staged)
                    if staged.is_deleted() || User::username_key(&staged.username) != key =>
                {
                    Ok(())
                }
                _ => Err(violation()),
            },
            _ => Ok(()),
        }
    }
}

impl ReadView for WriteTransaction<'_> {
    fn user(&self, id: RowId) -> Option<User> {
        self.get(id)
    }

    fn conversation(&self, id: RowId) -> Option<Conversation> {
        self.get(id)
    }

    fn message(&self, id: RowId) -> Option<Message> {
        self.get(id)
    }

    fn membership(&self, user_id: RowId, conversation_id: RowId) -> Option<Membership> {
        if let Some(m) = self
            .staged
            .memberships
            .values()
            .find(|m| m.user_id == user_id && m.conversation_id == conversation_id)
        {
            return Some(m.clone());
        }
        let id = self
            .tables
            .read()
            .membership_pairs
            .get(&(user_id, conversation_id))
            .copied()?;
        self.get(id)
    }

    fn user_by_uuid(&self, uuid: Uuid) -> Option<User> {
        self.find_uuid(uuid)
    }

    fn conversation_by_uuid(&self, uuid: Uuid) -> Option<Conversation> {
        self.find_uuid(uuid)
    }

    fn message_by_uuid(&self, uuid: Uuid) -> Option<Message> {
        self.find_uuid(uuid)
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("state", &self.state)
            .field("staged", &self.staged.len())
            .field("last_version", &self.last_version)
            .finish_non_exhaustive()
    }
}
