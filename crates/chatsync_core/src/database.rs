//! Store facade.

use crate::error::CoreError;
use crate::snapshot::Snapshot;
use crate::tables::Tables;
use crate::transaction::{CommitReceipt, WriteTransaction, WriterState};
use crate::types::Version;
use parking_lot::{Mutex, RwLock};

/// The versioned entity store.
///
/// `Database` is the entry point for every read and write:
/// - [`begin_write`](Self::begin_write) / [`write`](Self::write) run a
///   single-writer transaction that stamps each touched row with a fresh
///   version at commit
/// - [`snapshot`](Self::snapshot) returns a point-in-time view for
///   lookups and delta queries
///
/// Lock order is writer lock, then table lock. Never begin a write while
/// holding a snapshot on the same thread.
///
/// # Example
///
/// ```rust,ignore
/// use chatsync_core::{Database, NewUser};
///
/// let db = Database::new();
/// let committed = db.write(|txn| {
///     txn.insert_user(NewUser { name: "Ada".into(), username: "ada".into(), ..Default::default() })
/// })?;
/// assert_eq!(committed.receipt.high_water, committed.value.version);
/// ```
pub struct Database {
    tables: RwLock<Tables>,
    writer: Mutex<WriterState>,
}

/// The value returned by a committed write and the commit's receipt.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    /// Value produced inside the transaction.
    pub value: T,
    /// Versions published by the commit.
    pub receipt: CommitReceipt,
}

impl Database {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            writer: Mutex::new(WriterState::default()),
        }
    }

    /// Begins a write transaction, blocking until the writer lock is free.
    ///
    /// The lock is released when the transaction is committed, aborted,
    /// or dropped.
    pub fn begin_write(&self) -> WriteTransaction<'_> {
        WriteTransaction::new(&self.tables, self.writer.lock())
    }

    /// Executes a function within a write transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is aborted and no version is
    /// consumed.
    pub fn write<F, T, E>(&self, f: F) -> Result<Committed<T>, E>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> Result<T, E>,
        E: From<CoreError>,
    {
        let mut txn = self.begin_write();
        match f(&mut txn) {
            Ok(value) => {
                let receipt = txn.commit()?;
                Ok(Committed { value, receipt })
            }
            Err(err) => {
                txn.abort();
                Err(err)
            }
        }
    }

    /// Returns a point-in-time view of committed state.
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot::new(self.tables.read())
    }

    /// Version of the latest commit.
    #[must_use]
    pub fn high_water(&self) -> Version {
        self.tables.read().high_water
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("high_water", &self.high_water())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{NewConversation, NewUser, Record, Role};
    use crate::error::CoreResult;
    use crate::snapshot::ReadView;
    use crate::transaction::TransactionState;
    use crate::types::{EntityKind, RowId};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            name: username.to_uppercase(),
            username: username.into(),
            ..Default::default()
        }
    }

    fn new_conversation(title: &str) -> NewConversation {
        NewConversation {
            title: title.into(),
            description: String::new(),
            thumbnail_url: None,
        }
    }

    /// Two users sharing one conversation, with `alice` as owner.
    fn seeded() -> (Database, RowId, RowId, RowId) {
        let db = Database::new();
        let ids = db
            .write(|txn| -> CoreResult<_> {
                let alice = txn.insert_user(new_user("alice"))?;
                let bob = txn.insert_user(new_user("bob"))?;
                let conv = txn.insert_conversation(new_conversation("general"))?;
                txn.add_member(alice.id, conv.id, Role::Owner)?;
                txn.add_member(bob.id, conv.id, Role::Member)?;
                Ok((alice.id, bob.id, conv.id))
            })
            .unwrap()
            .value;
        (db, ids.0, ids.1, ids.2)
    }

    fn post(db: &Database, conv: RowId, user: RowId, text: &str) -> crate::entity::Message {
        db.write(|txn| txn.insert_message(conv, user, text.to_string()))
            .map(|c: Committed<_>| c.value)
            .unwrap()
    }

    #[test]
    fn commit_publishes_versions() {
        let db = Database::new();
        let committed = db
            .write(|txn| txn.insert_user(new_user("ada")))
            .unwrap();

        assert_eq!(committed.value.version, Version::new(1));
        assert_eq!(committed.receipt.high_water, Version::new(1));
        assert_eq!(db.high_water(), Version::new(1));

        let snap = db.snapshot();
        let stored = snap.user_by_uuid(committed.value.uuid).unwrap();
        assert_eq!(stored, committed.value);
    }

    #[test]
    fn failed_write_burns_no_version() {
        let db = Database::new();
        db.write(|txn| txn.insert_user(new_user("ada"))).unwrap();

        let result: CoreResult<Committed<()>> = db.write(|txn| {
            txn.insert_user(new_user("bob"))?;
            Err(CoreError::transaction_aborted("test"))
        });
        assert!(result.is_err());
        assert_eq!(db.high_water(), Version::new(1));

        let next = db.write(|txn| txn.insert_user(new_user("carol"))).unwrap();
        assert_eq!(next.value.version, Version::new(2));
        assert_eq!(next.value.id, RowId::new(2));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let db = Database::new();
        {
            let mut txn = db.begin_write();
            txn.insert_user(new_user("ghost")).unwrap();
            assert_eq!(txn.state(), TransactionState::Active);
        }
        assert_eq!(db.snapshot().count(EntityKind::User), 0);
        assert_eq!(db.high_water(), Version::ZERO);
    }

    #[test]
    fn uncommitted_rows_invisible_to_snapshots() {
        let db = Database::new();
        let mut txn = db.begin_write();
        let user = txn.insert_user(new_user("ada")).unwrap();

        assert!(txn.user_by_uuid(user.uuid).is_some());
        assert!(db.snapshot().user_by_uuid(user.uuid).is_none());

        txn.commit().unwrap();
        assert!(db.snapshot().user_by_uuid(user.uuid).is_some());
    }

    #[test]
    fn row_written_twice_keeps_one_version() {
        let db = Database::new();
        let committed = db
            .write(|txn| -> CoreResult<_> {
                let user = txn.insert_user(new_user("ada"))?;
                txn.update_user(user.id, |u| u.name = "Ada L.".into())
            })
            .unwrap();

        assert_eq!(committed.receipt.changes.len(), 1);
        assert_eq!(committed.value.version, Version::new(1));
        assert_eq!(committed.value.name, "Ada L.");
    }

    #[test]
    fn username_uniqueness_is_case_insensitive() {
        let db = Database::new();
        db.write(|txn| txn.insert_user(new_user("alice"))).unwrap();

        let err = db
            .write(|txn| txn.insert_user(new_user("ALICE")))
            .unwrap_err();
        assert!(matches!(err, CoreError::UniqueViolation { field: "username", .. }));

        let err = db
            .write(|txn| -> CoreResult<_> {
                txn.insert_user(new_user("dup"))?;
                txn.insert_user(new_user("Dup"))
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::UniqueViolation { .. }));
    }

    #[test]
    fn deleted_user_releases_username() {
        let db = Database::new();
        let alice = db.write(|txn| txn.insert_user(new_user("alice"))).unwrap().value;
        db.write(|txn| txn.delete_user(alice.id)).unwrap();

        let again = db.write(|txn| txn.insert_user(new_user("Alice"))).unwrap().value;
        assert_ne!(again.id, alice.id);
        let snap = db.snapshot();
        assert!(snap.user(alice.id).unwrap().is_deleted());

        // Deleting and re-registering in one transaction also works.
        let bob = db.write(|txn| txn.insert_user(new_user("bob"))).unwrap().value;
        db.write(|txn| -> CoreResult<_> {
            txn.delete_user(bob.id)?;
            txn.insert_user(new_user("bob"))
        })
        .unwrap();
    }

    #[test]
    fn rename_then_reuse_in_one_transaction() {
        let db = Database::new();
        let alice = db.write(|txn| txn.insert_user(new_user("alice"))).unwrap().value;

        db.write(|txn| -> CoreResult<_> {
            txn.update_user(alice.id, |u| u.username = "alicia".into())?;
            txn.insert_user(new_user("alice"))
        })
        .unwrap();

        assert_eq!(db.snapshot().count(EntityKind::User), 2);
    }

    #[test]
    fn messages_chain_to_previous_tip() {
        let (db, alice, bob, conv) = seeded();
        let m1 = post(&db, conv, alice, "one");
        let m2 = post(&db, conv, bob, "two");

        let chained = db
            .write(|txn| -> CoreResult<_> {
                let a = txn.insert_message(conv, alice, "three".into())?;
                let b = txn.insert_message(conv, alice, "four".into())?;
                Ok((a, b))
            })
            .unwrap()
            .value;

        assert_eq!(m1.previous_id, None);
        assert_eq!(m2.previous_id, Some(m1.id));
        assert_eq!(chained.0.previous_id, Some(m2.id));
        assert_eq!(chained.1.previous_id, Some(chained.0.id));
    }

    #[test]
    fn delete_message_redacts_and_bumps_version() {
        let (db, alice, _, conv) = seeded();
        let message = post(&db, conv, alice, "secret");

        let deleted = db
            .write(|txn| txn.delete_message(message.id))
            .unwrap()
            .value;
        assert!(deleted.is_deleted());
        assert!(deleted.content.is_empty());
        assert!(deleted.version > message.version);

        let again = db.write(|txn| txn.delete_message(message.id)).unwrap();
        assert!(again.receipt.is_empty());
        assert_eq!(again.value.version, deleted.version);
    }

    #[test]
    fn editing_deleted_message_fails() {
        let (db, alice, _, conv) = seeded();
        let message = post(&db, conv, alice, "x");
        db.write(|txn| txn.delete_message(message.id)).unwrap();

        let err = db
            .write(|txn| txn.update_message(message.id, "y".into()))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn membership_revives_on_rejoin() {
        let (db, _, bob, conv) = seeded();
        let snap = db.snapshot();
        let original = snap.membership(bob, conv).unwrap();
        drop(snap);

        let err = db
            .write(|txn| txn.add_member(bob, conv, Role::Member))
            .unwrap_err();
        assert!(matches!(err, CoreError::UniqueViolation { .. }));

        let left = db.write(|txn| txn.remove_member(original.id)).unwrap().value;
        assert!(!left.is_active());

        let back = db
            .write(|txn| txn.add_member(bob, conv, Role::Admin))
            .unwrap()
            .value;
        assert_eq!(back.id, original.id);
        assert!(back.is_active());
        assert_eq!(back.role, Role::Admin);
        assert!(back.version > left.version);
    }

    #[test]
    fn message_delta_is_ordered_by_version() {
        let (db, alice, _, conv) = seeded();
        let m1 = post(&db, conv, alice, "one");
        let m2 = post(&db, conv, alice, "two");
        db.write(|txn| txn.update_message(m1.id, "one!".into()))
            .unwrap();

        let snap = db.snapshot();
        let page = snap.messages_changed_since(conv, None, None, 10);
        let ids: Vec<_> = page.rows.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![m2.id, m1.id]);
        assert!(!page.has_more);

        let after = (m2.version, m2.id);
        let page = snap.messages_changed_since(conv, Some(after), None, 10);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].content, "one!");
    }

    #[test]
    fn message_delta_respects_floor_and_limit() {
        let (db, alice, _, conv) = seeded();
        let messages: Vec<_> = (0..5).map(|i| post(&db, conv, alice, &i.to_string())).collect();

        let snap = db.snapshot();
        let page = snap.messages_changed_since(conv, None, Some(messages[2].id), 10);
        assert_eq!(page.rows.len(), 3);
        assert!(page.rows.iter().all(|m| m.id >= messages[2].id));

        let page = snap.messages_changed_since(conv, None, None, 2);
        assert_eq!(page.rows.len(), 2);
        assert!(page.has_more);
    }

    #[test]
    fn messages_before_pages_backwards() {
        let (db, alice, _, conv) = seeded();
        let messages: Vec<_> = (0..4).map(|i| post(&db, conv, alice, &i.to_string())).collect();

        let snap = db.snapshot();
        let first = snap.messages_before(conv, None, 3);
        assert_eq!(
            first.rows.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![messages[3].id, messages[2].id, messages[1].id]
        );
        assert!(first.has_more);

        let second = snap.messages_before(conv, first.last().map(|m| m.id), 3);
        assert_eq!(second.rows.len(), 1);
        assert!(!second.has_more);
    }

    #[test]
    fn conversation_feed_uses_effective_version() {
        let (db, _, bob, conv) = seeded();
        let snap = db.snapshot();
        let page = snap.conversations_changed_since(bob, None, 10);
        assert_eq!(page.rows.len(), 1);
        let before = page.rows[0].position();
        let membership = page.rows[0].membership.clone();
        drop(snap);

        db.write(|txn| txn.remove_member(membership.id)).unwrap();

        let snap = db.snapshot();
        let page = snap.conversations_changed_since(bob, Some(before), 10);
        assert_eq!(page.rows.len(), 1);
        assert!(page.rows[0].is_tombstoned());
        assert_eq!(page.rows[0].version, snap.high_water());
    }

    #[test]
    fn member_feed_tombstones_deleted_users() {
        let (db, _, bob, conv) = seeded();
        db.write(|txn| txn.delete_user(bob)).unwrap();

        let snap = db.snapshot();
        let page = snap.members_changed_since(conv, None, 10);
        assert_eq!(page.rows.len(), 2);
        let bob_row = page.rows.iter().find(|r| r.user.id == bob).unwrap();
        assert!(bob_row.is_tombstoned());
        assert_eq!(page.rows.last().unwrap().user.id, bob);

        let participants = snap.active_participants(conv);
        assert_eq!(participants.len(), 1);
    }

    #[test]
    fn users_by_ids_dedups() {
        let (db, alice, bob, _) = seeded();
        let snap = db.snapshot();
        let users = snap.users_by_ids([bob, alice, bob]);
        assert_eq!(
            users.iter().map(|u| u.id).collect::<Vec<_>>(),
            vec![bob, alice]
        );
    }

    #[test]
    fn concurrent_writers_get_distinct_versions() {
        let db = Arc::new(Database::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|j| {
                            db.write(|txn| txn.insert_user(new_user(&format!("u{i}-{j}"))))
                                .unwrap()
                                .value
                                .version
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut versions: Vec<Version> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        versions.sort();
        versions.dedup();
        assert_eq!(versions.len(), 200);
        assert_eq!(db.high_water(), Version::new(200));
    }

    proptest! {
        #[test]
        fn versions_increase_across_sequential_writes(edits in prop::collection::vec(0usize..4, 1..40)) {
            let (db, alice, _, conv) = seeded();
            let mut last = db.high_water();
            let mut posted = Vec::new();
            for edit in edits {
                let committed = match (edit, posted.last()) {
                    (1, Some(&id)) => db.write(|txn| txn.update_message(id, "edited".into())),
                    (2, Some(&id)) => db.write(|txn| txn.delete_message(id)),
                    _ => db.write(|txn| txn.insert_message(conv, alice, "new".into())),
                };
                let committed = match committed {
                    Ok(c) => c,
                    // Editing a message deleted earlier in the script.
                    Err(CoreError::InvalidOperation { .. }) => continue,
                    Err(e) => return Err(TestCaseError::fail(e.to_string())),
                };
                posted.push(committed.value.id);
                if !committed.receipt.is_empty() {
                    prop_assert!(committed.receipt.high_water > last);
                    last = committed.receipt.high_water;
                }
            }
        }
    }
}
