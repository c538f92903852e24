//! Mutation pipeline.
//!
//! Every mutation moves through the same stages:
//!
//! ```text
//! Validated -> Authorized -> Committed -> FannedOut
//!     |            |                   \-> CommittedNoFanout
//!     \------------+-> Rejected
//! ```
//!
//! Authorization, the write and the rendering of the response all happen
//! inside one write transaction, so a failure at any point rolls back
//! every staged row and burns no version. Fanout is only attempted after
//! the commit returns.

use crate::error::{ServerError, ServerResult};
use crate::fanout::{Fanout, FanoutJob};
use crate::guard::{authorize, requester, MemberRecord};
use crate::present::{
    conversation_tombstone, conversation_view, member_role, stored_role, user_tombstone,
    user_view, MessagePresenter,
};
use crate::validation::{
    Validator, CONTENT_LENGTH, DESCRIPTION_LENGTH, NAME_LENGTH, OPTIMISTIC_ID_LENGTH,
    TITLE_LENGTH,
};
use chatsync_core::{
    Database, Message, NewConversation, NewUser, ReadView, Record, Role, User, Version,
    WriteTransaction,
};
use chatsync_protocol::{
    AddMemberRequest, ConversationChanged, ConversationDeleted, ConversationDeletedResponse,
    ConversationResponse, CreateConversationRequest, CreateMessageRequest, MemberResponse,
    MembersChanged, MessageCreated, MessageDeleted, MessageDeletedResponse, MessageResponse,
    MessageUpdated, PushEvent, RegisterUserRequest, UpdateConversationRequest,
    UpdateMessageRequest, UpdateUserRequest, UserDeletedResponse, UserResponse, UserView,
};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Stage of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStage {
    /// Received, nothing checked yet.
    Received,
    /// Request fields passed validation.
    Validated,
    /// The requester may perform the mutation.
    Authorized,
    /// The transaction committed.
    Committed,
    /// The push event was handed to the fanout worker.
    FannedOut,
    /// Committed, but no push event was sent.
    CommittedNoFanout,
    /// Failed before commit; nothing was written.
    Rejected,
}

impl MutationStage {
    /// Name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            MutationStage::Received => "received",
            MutationStage::Validated => "validated",
            MutationStage::Authorized => "authorized",
            MutationStage::Committed => "committed",
            MutationStage::FannedOut => "fanned_out",
            MutationStage::CommittedNoFanout => "committed_no_fanout",
            MutationStage::Rejected => "rejected",
        }
    }
}

impl fmt::Display for MutationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one mutation through its stages.
#[derive(Debug)]
struct Progress {
    name: &'static str,
    stage: MutationStage,
}

impl Progress {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            stage: MutationStage::Received,
        }
    }

    fn advance(&mut self, next: MutationStage) {
        tracing::trace!(
            mutation = self.name,
            from = self.stage.as_str(),
            to = next.as_str(),
            "mutation advanced"
        );
        self.stage = next;
    }

    fn reject(&mut self, err: &ServerError) {
        tracing::debug!(
            mutation = self.name,
            stage = self.stage.as_str(),
            error = %err,
            "mutation rejected"
        );
        self.stage = MutationStage::Rejected;
    }
}

/// Executes mutations against the store and notifies participants.
#[derive(Debug, Clone, Copy)]
pub struct Mutator<'a> {
    db: &'a Database,
    fanout: &'a Fanout,
}

impl<'a> Mutator<'a> {
    /// Creates a mutator over a store and a fanout handle.
    pub fn new(db: &'a Database, fanout: &'a Fanout) -> Self {
        Self { db, fanout }
    }

    fn run<T>(
        &self,
        name: &'static str,
        f: impl FnOnce(&mut Progress) -> ServerResult<T>,
    ) -> ServerResult<T> {
        let mut progress = Progress::new(name);
        f(&mut progress).map_err(|err| {
            progress.reject(&err);
            err
        })
    }

    fn publish(&self, progress: &mut Progress, job: Option<FanoutJob>) {
        let sent = job.map_or(false, |job| self.fanout.notify(job));
        progress.advance(if sent {
            MutationStage::FannedOut
        } else {
            MutationStage::CommittedNoFanout
        });
    }

    // ---- messages ----

    /// Posts a message to a conversation the requester belongs to.
    pub fn create_message(
        &self,
        requester_id: Uuid,
        request: CreateMessageRequest,
    ) -> ServerResult<MessageResponse> {
        self.run("message.create", |progress| {
            let mut v = Validator::new();
            v.length("content", &request.content, CONTENT_LENGTH);
            if let Some(optimistic_id) = &request.optimistic_id {
                v.length("optimisticId", optimistic_id, OPTIMISTIC_ID_LENGTH);
            }
            v.finish()?;
            progress.advance(MutationStage::Validated);

            let committed = self.db.write(|txn| -> ServerResult<_> {
                let member =
                    authorize(&*txn, requester_id, request.conversation_id).into_result()?;
                progress.advance(MutationStage::Authorized);
                let message = txn.insert_message(
                    member.conversation.id,
                    member.user.id,
                    request.content.clone(),
                )?;
                let view = MessagePresenter::new(&*txn, &member.conversation, member.user.id)
                    .view(&message, None)?;
                Ok((member.conversation.id, view))
            })?;
            progress.advance(MutationStage::Committed);

            let (conversation, message) = committed.value;
            let event = PushEvent::MessageCreated(MessageCreated {
                message: message.clone(),
                optimistic_id: request.optimistic_id.clone(),
            });
            self.publish(progress, Some(FanoutJob::new(conversation, event)));
            Ok(MessageResponse {
                message,
                optimistic_id: request.optimistic_id,
            })
        })
    }

    /// Replaces the content of the requester's own message.
    pub fn update_message(
        &self,
        requester_id: Uuid,
        message_id: Uuid,
        request: UpdateMessageRequest,
    ) -> ServerResult<MessageResponse> {
        self.run("message.update", |progress| {
            let mut v = Validator::new();
            v.length("content", &request.content, CONTENT_LENGTH);
            v.finish()?;
            progress.advance(MutationStage::Validated);

            let committed = self.db.write(|txn| -> ServerResult<_> {
                let (message, member) = message_member(txn, requester_id, message_id)?;
                if message.user_id != member.user.id {
                    return Err(ServerError::Forbidden(
                        "only the author may edit a message".into(),
                    ));
                }
                progress.advance(MutationStage::Authorized);
                let message = txn.update_message(message.id, request.content.clone())?;
                let view = MessagePresenter::new(&*txn, &member.conversation, member.user.id)
                    .view(&message, None)?;
                Ok((member.conversation.id, view))
            })?;
            progress.advance(MutationStage::Committed);

            let (conversation, message) = committed.value;
            let event = PushEvent::MessageUpdated(MessageUpdated {
                message: message.clone(),
            });
            self.publish(progress, Some(FanoutJob::new(conversation, event)));
            Ok(MessageResponse {
                message,
                optimistic_id: None,
            })
        })
    }

    /// Soft-deletes a message. Authors may delete their own messages;
    /// owners and admins may delete any.
    pub fn delete_message(
        &self,
        requester_id: Uuid,
        message_id: Uuid,
    ) -> ServerResult<MessageDeletedResponse> {
        self.run("message.delete", |progress| {
            progress.advance(MutationStage::Validated);

            let committed = self.db.write(|txn| -> ServerResult<_> {
                let (message, member) = message_member(txn, requester_id, message_id)?;
                if message.user_id != member.user.id {
                    member.require(Role::can_moderate, "deleting another member's message")?;
                }
                progress.advance(MutationStage::Authorized);
                let message = txn.delete_message(message.id)?;
                let tombstone = MessagePresenter::new(&*txn, &member.conversation, member.user.id)
                    .tombstone(&message)?;
                Ok((member.conversation.id, tombstone))
            })?;
            progress.advance(MutationStage::Committed);

            let (conversation, message) = committed.value;
            let event = PushEvent::MessageDeleted(MessageDeleted {
                message: message.clone(),
            });
            self.publish(progress, Some(FanoutJob::new(conversation, event)));
            Ok(MessageDeletedResponse { message })
        })
    }

    // ---- conversations ----

    /// Creates a conversation owned by the requester.
    ///
    /// Every listed member must be a live user; the requester is skipped
    /// if listed.
    pub fn create_conversation(
        &self,
        requester_id: Uuid,
        request: CreateConversationRequest,
    ) -> ServerResult<ConversationResponse> {
        self.run("conversation.create", |progress| {
            let mut v = Validator::new();
            v.length("title", &request.title, TITLE_LENGTH)
                .length("description", &request.description, DESCRIPTION_LENGTH);
            v.finish()?;
            progress.advance(MutationStage::Validated);

            let committed = self.db.write(|txn| -> ServerResult<_> {
                let creator = requester(&*txn, requester_id)?;
                progress.advance(MutationStage::Authorized);

                let mut v = Validator::new();
                let mut seen = HashSet::from([creator.uuid]);
                let mut members = Vec::new();
                for id in &request.member_ids {
                    if !seen.insert(*id) {
                        continue;
                    }
                    match txn.user_by_uuid(*id).filter(|u| !u.is_deleted()) {
                        Some(user) => members.push(user),
                        None => {
                            v.check("memberIds", false, format!("unknown user {id}"));
                        }
                    }
                }
                v.finish()?;

                let conversation = txn.insert_conversation(NewConversation {
                    title: request.title.clone(),
                    description: request.description.clone(),
                    thumbnail_url: request.thumbnail_url.clone(),
                })?;
                txn.add_member(creator.id, conversation.id, Role::Owner)?;
                for user in &members {
                    txn.add_member(user.id, conversation.id, Role::Member)?;
                }
                Ok(conversation)
            })?;
            progress.advance(MutationStage::Committed);

            let conversation = committed.value;
            let view = conversation_view(&conversation);
            let event = PushEvent::ConversationCreated(ConversationChanged {
                conversation: view.clone(),
            });
            self.publish(progress, Some(FanoutJob::new(conversation.id, event)));
            Ok(ConversationResponse { conversation: view })
        })
    }

    /// Edits a conversation. Any member may do so.
    pub fn update_conversation(
        &self,
        requester_id: Uuid,
        conversation_id: Uuid,
        request: UpdateConversationRequest,
    ) -> ServerResult<ConversationResponse> {
        self.run("conversation.update", |progress| {
            let mut v = Validator::new();
            if let Some(title) = &request.title {
                v.length("title", title, TITLE_LENGTH);
            }
            if let Some(description) = &request.description {
                v.length("description", description, DESCRIPTION_LENGTH);
            }
            v.check(
                "body",
                request.title.is_some()
                    || request.description.is_some()
                    || request.thumbnail_url.is_some(),
                "at least one field must be given",
            );
            v.finish()?;
            progress.advance(MutationStage::Validated);

            let committed = self.db.write(|txn| -> ServerResult<_> {
                let member = authorize(&*txn, requester_id, conversation_id).into_result()?;
                progress.advance(MutationStage::Authorized);
                let conversation = txn.update_conversation(member.conversation.id, |c| {
                    if let Some(title) = &request.title {
                        c.title = title.clone();
                    }
                    if let Some(description) = &request.description {
                        c.description = description.clone();
                    }
                    if let Some(thumbnail) = &request.thumbnail_url {
                        c.thumbnail_url = Some(thumbnail.clone()).filter(|t| !t.is_empty());
                    }
                })?;
                Ok(conversation)
            })?;
            progress.advance(MutationStage::Committed);

            let conversation = committed.value;
            let view = conversation_view(&conversation);
            let event = PushEvent::ConversationUpdated(ConversationChanged {
                conversation: view.clone(),
            });
            self.publish(progress, Some(FanoutJob::new(conversation.id, event)));
            Ok(ConversationResponse { conversation: view })
        })
    }

    /// Soft-deletes a conversation. Only its owner may do so.
    pub fn delete_conversation(
        &self,
        requester_id: Uuid,
        conversation_id: Uuid,
    ) -> ServerResult<ConversationDeletedResponse> {
        self.run("conversation.delete", |progress| {
            progress.advance(MutationStage::Validated);

            let committed = self.db.write(|txn| -> ServerResult<_> {
                let member = authorize(&*txn, requester_id, conversation_id).into_result()?;
                member.require(|role| role == Role::Owner, "deleting a conversation")?;
                progress.advance(MutationStage::Authorized);
                Ok(txn.delete_conversation(member.conversation.id)?)
            })?;
            progress.advance(MutationStage::Committed);

            let conversation = committed.value;
            let tombstone = conversation_tombstone(&conversation);
            let event = PushEvent::ConversationDeleted(ConversationDeleted {
                conversation: tombstone.clone(),
            });
            self.publish(progress, Some(FanoutJob::new(conversation.id, event)));
            Ok(ConversationDeletedResponse {
                conversation: tombstone,
            })
        })
    }

    // ---- members ----

    /// Adds a user to a conversation. Owners and admins may add members;
    /// only owners may grant ownership.
    pub fn add_member(
        &self,
        requester_id: Uuid,
        conversation_id: Uuid,
        request: AddMemberRequest,
    ) -> ServerResult<MemberResponse> {
        self.run("member.add", |progress| {
            progress.advance(MutationStage::Validated);
            let role = request.role.map_or(Role::Member, stored_role);

            let committed = self.db.write(|txn| -> ServerResult<_> {
                let member = authorize(&*txn, requester_id, conversation_id).into_result()?;
                member.require(Role::can_moderate, "adding members")?;
                if role == Role::Owner {
                    member.require(|r| r == Role::Owner, "granting ownership")?;
                }
                progress.advance(MutationStage::Authorized);

                let user = txn
                    .user_by_uuid(request.user_id)
                    .filter(|u| !u.is_deleted())
                    .ok_or_else(|| ServerError::invalid_field("userId", "no such user"))?;
                let membership = txn.add_member(user.id, member.conversation.id, role)?;
                let version = user.version.max(membership.version);
                Ok((member, member_user_view(&user, version), membership.role, version))
            })?;
            progress.advance(MutationStage::Committed);

            let (member, user, role, version) = committed.value;
            let event = PushEvent::MembersChanged(MembersChanged {
                conversation_id: member.conversation.uuid,
                user: user.clone(),
                role: Some(member_role(role)),
                active: true,
                version: version.as_u64(),
            });
            self.publish(progress, Some(FanoutJob::new(member.conversation.id, event)));
            Ok(MemberResponse {
                conversation_id: member.conversation.uuid,
                user,
                role: Some(member_role(role)),
                active: true,
                version: version.as_u64(),
            })
        })
    }

    /// Removes a user from a conversation.
    ///
    /// Any member may remove themself. Removing someone else takes an
    /// owner or admin, and removing an owner takes an owner.
    pub fn remove_member(
        &self,
        requester_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> ServerResult<MemberResponse> {
        self.run("member.remove", |progress| {
            progress.advance(MutationStage::Validated);

            let committed = self.db.write(|txn| -> ServerResult<_> {
                let member = authorize(&*txn, requester_id, conversation_id).into_result()?;
                let leaving = member.user.uuid == user_id;
                if !leaving {
                    member.require(Role::can_moderate, "removing members")?;
                }
                let user = txn.user_by_uuid(user_id).ok_or(ServerError::NotFound)?;
                let membership = txn
                    .membership(user.id, member.conversation.id)
                    .filter(|m| m.is_active())
                    .ok_or(ServerError::NotFound)?;
                if !leaving && membership.role == Role::Owner {
                    member.require(|r| r == Role::Owner, "removing an owner")?;
                }
                progress.advance(MutationStage::Authorized);

                let membership = txn.remove_member(membership.id)?;
                let version = user.version.max(membership.version);
                Ok((member, member_user_view(&user, version), version))
            })?;
            progress.advance(MutationStage::Committed);

            let (member, user, version) = committed.value;
            let event = PushEvent::MembersChanged(MembersChanged {
                conversation_id: member.conversation.uuid,
                user: user.clone(),
                role: None,
                active: false,
                version: version.as_u64(),
            });
            let job = FanoutJob::new(member.conversation.id, event).also_notify(user.id);
            self.publish(progress, Some(job));
            Ok(MemberResponse {
                conversation_id: member.conversation.uuid,
                user,
                role: None,
                active: false,
                version: version.as_u64(),
            })
        })
    }

    // ---- users ----

    /// Registers a user. Needs no identity.
    pub fn register_user(&self, request: RegisterUserRequest) -> ServerResult<UserView> {
        self.run("user.register", |progress| {
            let mut v = Validator::new();
            v.length("name", &request.name, NAME_LENGTH)
                .username("username", &request.username);
            if let Some(email) = &request.email {
                v.email("email", email);
            }
            v.finish()?;
            progress.advance(MutationStage::Validated);

            let committed = self.db.write(|txn| -> ServerResult<_> {
                Ok(txn.insert_user(NewUser {
                    name: request.name.clone(),
                    username: request.username.clone(),
                    email: request.email.clone(),
                    phone_number: request.phone_number.clone(),
                    avatar_url: request.avatar_url.clone(),
                })?)
            })?;
            progress.advance(MutationStage::Committed);
            self.publish(progress, None);
            Ok(user_view(&committed.value))
        })
    }

    /// Edits the requester's profile.
    pub fn update_user(
        &self,
        requester_id: Uuid,
        request: UpdateUserRequest,
    ) -> ServerResult<UserResponse> {
        self.run("user.update", |progress| {
            let mut v = Validator::new();
            if let Some(name) = &request.name {
                v.length("name", name, NAME_LENGTH);
            }
            if let Some(username) = &request.username {
                v.username("username", username);
            }
            if let Some(email) = &request.email {
                v.email("email", email);
            }
            v.check(
                "body",
                request.name.is_some()
                    || request.username.is_some()
                    || request.email.is_some()
                    || request.phone_number.is_some()
                    || request.avatar_url.is_some(),
                "at least one field must be given",
            );
            v.finish()?;
            progress.advance(MutationStage::Validated);

            let committed = self.db.write(|txn| -> ServerResult<_> {
                let user = requester(&*txn, requester_id)?;
                progress.advance(MutationStage::Authorized);
                Ok(txn.update_user(user.id, |u| apply_profile(u, &request))?)
            })?;
            progress.advance(MutationStage::Committed);
            self.publish(progress, None);
            Ok(UserResponse {
                user: user_view(&committed.value),
            })
        })
    }

    /// Soft-deletes the requester's account.
    pub fn delete_user(&self, requester_id: Uuid) -> ServerResult<UserDeletedResponse> {
        self.run("user.delete", |progress| {
            progress.advance(MutationStage::Validated);
            let committed = self.db.write(|txn| -> ServerResult<_> {
                let user = requester(&*txn, requester_id)?;
                progress.advance(MutationStage::Authorized);
                Ok(txn.delete_user(user.id)?)
            })?;
            progress.advance(MutationStage::Committed);
            self.publish(progress, None);
            Ok(UserDeletedResponse {
                user: user_tombstone(&committed.value),
            })
        })
    }
}

/// Finds a live message and authorizes the requester in its conversation.
fn message_member(
    txn: &WriteTransaction<'_>,
    requester_id: Uuid,
    message_id: Uuid,
) -> ServerResult<(Message, MemberRecord)> {
    let message = txn
        .message_by_uuid(message_id)
        .filter(|m| !m.is_deleted())
        .ok_or(ServerError::NotFound)?;
    let conversation = txn
        .conversation(message.conversation_id)
        .ok_or(ServerError::NotFound)?;
    let member = authorize(txn, requester_id, conversation.uuid).into_result()?;
    Ok((message, member))
}

fn member_user_view(user: &User, version: Version) -> UserView {
    UserView {
        version: version.as_u64(),
        ..user_view(user)
    }
}

fn apply_profile(user: &mut User, request: &UpdateUserRequest) {
    if let Some(name) = &request.name {
        user.name = name.clone();
    }
    if let Some(username) = &request.username {
        user.username = username.clone();
    }
    if let Some(email) = &request.email {
        user.email = Some(email.clone());
    }
    if let Some(phone) = &request.phone_number {
        user.phone_number = Some(phone.clone()).filter(|p| !p.is_empty());
    }
    if let Some(avatar) = &request.avatar_url {
        user.avatar_url = Some(avatar.clone()).filter(|a| !a.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_core::EntityKind;
    use tokio::sync::mpsc;

    struct World {
        db: Database,
        fanout: Fanout,
        jobs: mpsc::Receiver<FanoutJob>,
        alice: Uuid,
        bob: Uuid,
        carol: Uuid,
        conversation: Uuid,
    }

    impl World {
        fn mutator(&self) -> Mutator<'_> {
            Mutator::new(&self.db, &self.fanout)
        }

        fn next_job(&mut self) -> FanoutJob {
            self.jobs.try_recv().unwrap()
        }
    }

    fn world() -> World {
        let db = Database::new();
        let (fanout, jobs) = Fanout::channel(16);
        let (alice, bob, carol) = {
            let m = Mutator::new(&db, &fanout);
            let register = |name: &str| {
                m.register_user(RegisterUserRequest {
                    name: name.into(),
                    username: name.into(),
                    ..Default::default()
                })
                .unwrap()
                .id
            };
            (register("alice"), register("bob"), register("carol"))
        };
        let conversation = Mutator::new(&db, &fanout)
            .create_conversation(
                alice,
                CreateConversationRequest {
                    title: "general".into(),
                    description: String::new(),
                    thumbnail_url: None,
                    member_ids: vec![bob, alice],
                },
            )
            .unwrap()
            .conversation
            .id;
        let mut world = World {
            db,
            fanout,
            jobs,
            alice,
            bob,
            carol,
            conversation,
        };
        world.next_job();
        world
    }

    fn post(w: &World, author: Uuid, content: &str) -> MessageResponse {
        w.mutator()
            .create_message(
                author,
                CreateMessageRequest {
                    conversation_id: w.conversation,
                    content: content.into(),
                    optimistic_id: Some("tmp-1".into()),
                },
            )
            .unwrap()
    }

    #[test]
    fn create_message_echoes_optimistic_id() {
        let mut w = world();
        let response = post(&w, w.alice, "hello");
        assert_eq!(response.optimistic_id.as_deref(), Some("tmp-1"));
        assert!(response.message.is_self);

        let job = w.next_job();
        match job.event {
            PushEvent::MessageCreated(created) => {
                assert_eq!(created.message.id, response.message.id);
                assert_eq!(created.optimistic_id.as_deref(), Some("tmp-1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn validation_collects_all_fields() {
        let w = world();
        let err = w
            .mutator()
            .create_conversation(
                w.alice,
                CreateConversationRequest {
                    title: "x".into(),
                    description: "d".repeat(10_001),
                    thumbnail_url: None,
                    member_ids: vec![],
                },
            )
            .unwrap_err();
        match err {
            ServerError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_member_cannot_post() {
        let w = world();
        let before = w.db.high_water();
        let err = w
            .mutator()
            .create_message(
                w.carol,
                CreateMessageRequest {
                    conversation_id: w.conversation,
                    content: "hi".into(),
                    optimistic_id: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound));
        assert_eq!(w.db.high_water(), before);
    }

    #[test]
    fn only_author_edits() {
        let w = world();
        let message = post(&w, w.alice, "hello").message;
        let err = w
            .mutator()
            .update_message(
                w.bob,
                message.id,
                UpdateMessageRequest {
                    content: "hijacked".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));

        let edited = w
            .mutator()
            .update_message(
                w.alice,
                message.id,
                UpdateMessageRequest {
                    content: "hello!".into(),
                },
            )
            .unwrap();
        assert_eq!(edited.message.content, "hello!");
        assert!(edited.message.version > message.version);
    }

    #[test]
    fn owner_moderates_deletes() {
        let w = world();
        let message = post(&w, w.bob, "oops").message;
        let deleted = w.mutator().delete_message(w.alice, message.id).unwrap();
        assert_eq!(deleted.message.id, message.id);
        assert!(deleted.message.deleted_at.is_some());

        let err = w.mutator().delete_message(w.alice, message.id).unwrap_err();
        assert!(matches!(err, ServerError::NotFound));
    }

    #[test]
    fn member_cannot_delete_others_message() {
        let w = world();
        let message = post(&w, w.alice, "mine").message;
        let err = w.mutator().delete_message(w.bob, message.id).unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }

    #[test]
    fn membership_changes() {
        let mut w = world();
        let err = w
            .mutator()
            .add_member(
                w.bob,
                w.conversation,
                AddMemberRequest {
                    user_id: w.carol,
                    role: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));

        let added = w
            .mutator()
            .add_member(
                w.alice,
                w.conversation,
                AddMemberRequest {
                    user_id: w.carol,
                    role: None,
                },
            )
            .unwrap();
        assert!(added.active);
        w.next_job();

        let err = w
            .mutator()
            .add_member(
                w.alice,
                w.conversation,
                AddMemberRequest {
                    user_id: w.carol,
                    role: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServerError::Conflict(_)));

        let left = w
            .mutator()
            .remove_member(w.carol, w.conversation, w.carol)
            .unwrap();
        assert!(!left.active);
        assert!(left.version > added.version);
        let job = w.next_job();
        assert_eq!(job.also, vec![w.carol]);
    }

    #[test]
    fn duplicate_username_conflicts() {
        let w = world();
        let err = w
            .mutator()
            .register_user(RegisterUserRequest {
                name: "Alice Again".into(),
                username: "ALICE".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ServerError::Conflict(_)));
    }

    #[test]
    fn deleted_user_loses_identity() {
        let w = world();
        let deleted = w.mutator().delete_user(w.bob).unwrap();
        assert!(deleted.user.deleted_at.is_some());
        let err = w
            .mutator()
            .update_user(
                w.bob,
                UpdateUserRequest {
                    name: Some("Robert".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServerError::Unauthenticated(_)));
    }

    #[test]
    fn commit_survives_closed_fanout() {
        let w = world();
        let World { db, fanout, jobs, alice, conversation, .. } = w;
        drop(jobs);
        let response = Mutator::new(&db, &fanout)
            .create_message(
                alice,
                CreateMessageRequest {
                    conversation_id: conversation,
                    content: "still saved".into(),
                    optimistic_id: None,
                },
            )
            .unwrap();
        assert_eq!(db.snapshot().count(EntityKind::Message), 1);
        assert_eq!(db.high_water().as_u64(), response.message.version);
    }
}
