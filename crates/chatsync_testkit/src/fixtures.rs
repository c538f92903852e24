//! Test fixtures and server helpers.
//!
//! [`TestWorld`] wraps an in-process [`ChatServer`] and drives it through
//! the same request surface a transport would use, so tests exercise
//! routing, validation and authorization along with the feeds.

use crate::generators::{ChatAction, MembershipAction};
use chatsync_protocol::{
    AddMemberRequest, ConversationResponse, CreateConversationRequest, CreateMessageRequest,
    MessageResponse, MessageView, RegisterUserRequest, RegisterUserResponse,
    UpdateConversationRequest, UpdateMessageRequest, UpdateUserRequest,
};
use chatsync_server::{ApiRequest, ChatServer, Connection, HttpResponse, ServerConfig};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use uuid::Uuid;

/// Upper bound on pages fetched while draining one feed.
pub const MAX_DRAIN_PAGES: usize = 10_000;

/// Runs a future to completion on a fresh single-threaded runtime.
///
/// For property tests, whose bodies are synchronous.
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
        .block_on(future)
}

/// A registered user and the token it authenticates with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestUser {
    /// External id.
    pub id: Uuid,
    /// Bearer token.
    pub token: String,
}

/// An in-process server with helpers for common setup.
pub struct TestWorld {
    /// The server.
    pub server: ChatServer,
}

impl TestWorld {
    /// Creates a world with the default configuration.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Creates a world with a custom configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            server: ChatServer::new(config).expect("Failed to start server"),
        }
    }

    /// Sends `request` as `user`.
    pub async fn call(&self, user: &TestUser, request: ApiRequest) -> HttpResponse {
        self.server.dispatch(request.with_token(user.token.clone())).await
    }

    /// Sends `request` as `user`, asserting the status and decoding the body.
    pub async fn expect<T: DeserializeOwned>(
        &self,
        user: &TestUser,
        request: ApiRequest,
        status: u16,
    ) -> T {
        let response = self.call(user, request).await;
        assert_eq!(
            response.status, status,
            "unexpected status, body: {}",
            response.body
        );
        response.json().expect("Failed to decode response body")
    }

    /// Registers a user named after `username`.
    pub async fn register(&self, username: &str) -> TestUser {
        let request = ApiRequest::post("/users").with_json(&RegisterUserRequest {
            name: format!("{username} test"),
            username: username.to_string(),
            ..Default::default()
        });
        let response = self.server.dispatch(request).await;
        assert_eq!(response.status, 201, "registration failed: {}", response.body);
        let registered: RegisterUserResponse =
            response.json().expect("Failed to decode registration");
        TestUser {
            id: registered.user.id,
            token: registered.access_token,
        }
    }

    /// Creates a conversation owned by `owner` with `members` as members.
    pub async fn create_conversation(
        &self,
        owner: &TestUser,
        title: &str,
        members: &[&TestUser],
    ) -> Uuid {
        let request = ApiRequest::post("/conversations").with_json(&CreateConversationRequest {
            title: title.to_string(),
            member_ids: members.iter().map(|m| m.id).collect(),
            ..Default::default()
        });
        let created: ConversationResponse = self.expect(owner, request, 201).await;
        created.conversation.id
    }

    /// Posts a message as `author`.
    pub async fn send(&self, author: &TestUser, conversation: Uuid, content: &str) -> MessageView {
        let request = ApiRequest::post("/messages").with_json(&CreateMessageRequest {
            conversation_id: conversation,
            content: content.to_string(),
            optimistic_id: None,
        });
        let created: MessageResponse = self.expect(author, request, 201).await;
        created.message
    }

    /// Deletes a message as `user`, returning the response.
    pub async fn delete_message(&self, user: &TestUser, message: Uuid) -> HttpResponse {
        self.call(user, ApiRequest::delete(format!("/messages/{message}")))
            .await
    }

    /// Applies `script` to `conversation`, recording the outcome in `log`.
    ///
    /// Every user in `users` must be a member. Edits and deletes are sent
    /// by the target's author; actions on already-deleted messages are
    /// skipped. Returns the ids of the messages the script touched.
    pub async fn apply_script(
        &self,
        users: &[TestUser],
        conversation: Uuid,
        script: &[ChatAction],
        log: &mut ScriptLog,
    ) -> HashSet<Uuid> {
        let mut touched = HashSet::new();
        for action in script {
            match action {
                ChatAction::Send { author, content } => {
                    let author = author % users.len();
                    let message = self.send(&users[author], conversation, content).await;
                    touched.insert(message.id);
                    log.messages.push(LoggedMessage {
                        id: message.id,
                        author,
                        content: content.clone(),
                        deleted: false,
                    });
                }
                ChatAction::Edit { target, content } => {
                    let Some(entry) = log.live_mut(*target) else {
                        continue;
                    };
                    let request = ApiRequest::patch(format!("/messages/{}", entry.id))
                        .with_json(&UpdateMessageRequest {
                            content: content.clone(),
                        });
                    let _: MessageResponse =
                        self.expect(&users[entry.author], request, 200).await;
                    entry.content = content.clone();
                    touched.insert(entry.id);
                }
                ChatAction::Delete { target } => {
                    let Some(entry) = log.live_mut(*target) else {
                        continue;
                    };
                    let response = self.delete_message(&users[entry.author], entry.id).await;
                    assert_eq!(response.status, 200, "delete failed: {}", response.body);
                    entry.deleted = true;
                    touched.insert(entry.id);
                }
            }
        }
        touched
    }

    /// Applies a membership script, recording the outcome in `log`.
    ///
    /// `users[0]` owns every conversation; the rest are guests. Steps
    /// that do not apply to the current state are skipped. Returns the
    /// rows each dirty feed must report as changed.
    pub async fn apply_membership_script(
        &self,
        users: &[TestUser],
        script: &[MembershipAction],
        log: &mut MembershipLog,
    ) -> FeedChanges {
        assert!(users.len() >= 2, "a membership script needs a guest");
        let owner = &users[0];
        let guest = |index: usize| 1 + index % (users.len() - 1);
        let mut changes = FeedChanges::default();

        for action in script {
            match *action {
                MembershipAction::Open { guests } => {
                    let invited: Vec<usize> = (1..users.len())
                        .filter(|&u| u <= 8 && guests & (1 << (u - 1)) != 0)
                        .collect();
                    let refs: Vec<&TestUser> = invited.iter().map(|&u| &users[u]).collect();
                    let title = format!("room {}", log.conversations.len());
                    let id = self.create_conversation(owner, &title, &refs).await;
                    let mut members = HashMap::from([(0, true)]);
                    members.extend(invited.iter().map(|&u| (u, true)));
                    for &u in members.keys() {
                        changes.touch(users[u].id, id);
                    }
                    log.conversations.push(LoggedConversation {
                        id,
                        closed: false,
                        members,
                    });
                }
                MembershipAction::Join {
                    conversation,
                    guest: g,
                } => {
                    let u = guest(g);
                    let Some(entry) = log.open_mut(conversation) else {
                        continue;
                    };
                    if entry.members.get(&u) == Some(&true) {
                        continue;
                    }
                    let request = ApiRequest::post(format!("/conversations/{}/members", entry.id))
                        .with_json(&AddMemberRequest {
                            user_id: users[u].id,
                            role: None,
                        });
                    let response = self.call(owner, request).await;
                    assert_eq!(response.status, 201, "join failed: {}", response.body);
                    entry.members.insert(u, true);
                    changes.touch(users[u].id, entry.id);
                }
                MembershipAction::Leave {
                    conversation,
                    guest: g,
                } => {
                    let u = guest(g);
                    let Some(entry) = log.open_mut(conversation) else {
                        continue;
                    };
                    if entry.members.get(&u) != Some(&true) {
                        continue;
                    }
                    let path = format!("/conversations/{}/members/{}", entry.id, users[u].id);
                    let response = self.call(&users[u], ApiRequest::delete(path)).await;
                    assert_eq!(response.status, 200, "leave failed: {}", response.body);
                    entry.members.insert(u, false);
                    changes.touch(users[u].id, entry.id);
                }
                MembershipAction::Rename { conversation } => {
                    log.renames += 1;
                    let title = format!("room {conversation} v{}", log.renames);
                    let Some(entry) = log.open_mut(conversation) else {
                        continue;
                    };
                    let request = ApiRequest::patch(format!("/conversations/{}", entry.id))
                        .with_json(&UpdateConversationRequest {
                            title: Some(title),
                            ..Default::default()
                        });
                    let response = self.call(owner, request).await;
                    assert_eq!(response.status, 200, "rename failed: {}", response.body);
                    for &u in entry.members.keys() {
                        changes.conversations.entry(users[u].id).or_default().insert(entry.id);
                    }
                }
                MembershipAction::Close { conversation } => {
                    let Some(entry) = log.open_mut(conversation) else {
                        continue;
                    };
                    let path = format!("/conversations/{}", entry.id);
                    let response = self.call(owner, ApiRequest::delete(path)).await;
                    assert_eq!(response.status, 200, "close failed: {}", response.body);
                    entry.closed = true;
                    for &u in entry.members.keys() {
                        changes.conversations.entry(users[u].id).or_default().insert(entry.id);
                    }
                }
                MembershipAction::Profile { user } => {
                    let u = user % users.len();
                    log.renames += 1;
                    let request = ApiRequest::patch("/users/me").with_json(&UpdateUserRequest {
                        name: Some(format!("user {u} v{}", log.renames)),
                        ..Default::default()
                    });
                    let response = self.call(&users[u], request).await;
                    assert_eq!(response.status, 200, "profile failed: {}", response.body);
                    for entry in log.conversations.iter().filter(|c| c.members.contains_key(&u)) {
                        changes.users.entry(entry.id).or_default().insert(users[u].id);
                    }
                }
            }
        }
        changes
    }

    /// Opens a realtime connection for `user`.
    pub fn connect(&self, user: &TestUser) -> Connection {
        self.server
            .connect(&user.token)
            .expect("Failed to open connection")
    }

    /// Pulls `path` page by page until `hasMore` is false.
    ///
    /// `path` is any paged endpoint, e.g.
    /// `/conversations/{id}/messages/dirty`.
    pub async fn drain<T: FeedPage>(
        &self,
        user: &TestUser,
        path: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> Drained<T> {
        let mut drained = Drained {
            pages: Vec::new(),
            cursor,
        };
        for _ in 0..MAX_DRAIN_PAGES {
            let mut request = ApiRequest::get(path).with_query("limit", limit.to_string());
            if let Some(cursor) = &drained.cursor {
                request = request.with_query("cursor", cursor.clone());
            }
            let page: T = self.expect(user, request, 200).await;
            if let Some(next) = page.next_cursor() {
                drained.cursor = Some(next.to_string());
            }
            let more = page.has_more();
            drained.pages.push(page);
            if !more {
                return drained;
            }
        }
        panic!("feed {path} did not drain within {MAX_DRAIN_PAGES} pages");
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// A paged response.
pub trait FeedPage: DeserializeOwned {
    /// Cursor for the next page.
    fn next_cursor(&self) -> Option<&str>;
    /// True if another page is waiting.
    fn has_more(&self) -> bool;
}

macro_rules! impl_feed_page {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FeedPage for $ty {
                fn next_cursor(&self) -> Option<&str> {
                    self.next_cursor.as_deref()
                }

                fn has_more(&self) -> bool {
                    self.has_more
                }
            }
        )*
    };
}

impl_feed_page!(
    chatsync_protocol::ConversationsDirtyResponse,
    chatsync_protocol::MessagesDirtyResponse,
    chatsync_protocol::MessagesOlderResponse,
    chatsync_protocol::UsersDirtyResponse,
);

/// Pages fetched by [`TestWorld::drain`].
#[derive(Debug, Clone)]
pub struct Drained<T> {
    /// Every page, in fetch order.
    pub pages: Vec<T>,
    /// Cursor to resume from; the input cursor if no page carried one.
    pub cursor: Option<String>,
}

/// A dirty-sync page split into live rows and tombstones.
pub trait PartitionedPage: FeedPage {
    /// Ids and versions of live rows.
    fn active_rows(&self) -> Vec<(Uuid, u64)>;
    /// Ids and versions of tombstones.
    fn inactive_rows(&self) -> Vec<(Uuid, u64)>;
}

macro_rules! impl_partitioned_page {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl PartitionedPage for $ty {
                fn active_rows(&self) -> Vec<(Uuid, u64)> {
                    self.$field.active.iter().map(|r| (r.id, r.version)).collect()
                }

                fn inactive_rows(&self) -> Vec<(Uuid, u64)> {
                    self.$field.inactive.iter().map(|r| (r.id, r.version)).collect()
                }
            }
        )*
    };
}

impl_partitioned_page!(
    chatsync_protocol::ConversationsDirtyResponse => conversations,
    chatsync_protocol::MessagesDirtyResponse => messages,
);

impl PartitionedPage for chatsync_protocol::UsersDirtyResponse {
    fn active_rows(&self) -> Vec<(Uuid, u64)> {
        self.users
            .active
            .iter()
            .map(|m| (m.user.id, m.user.version))
            .collect()
    }

    fn inactive_rows(&self) -> Vec<(Uuid, u64)> {
        self.users.inactive.iter().map(|u| (u.id, u.version)).collect()
    }
}

impl<T: PartitionedPage> Drained<T> {
    /// Ids of live rows across all pages, in feed order.
    pub fn active_ids(&self) -> Vec<Uuid> {
        self.pages
            .iter()
            .flat_map(|p| p.active_rows().into_iter().map(|(id, _)| id))
            .collect()
    }

    /// Ids of tombstones across all pages, in feed order.
    pub fn tombstone_ids(&self) -> Vec<Uuid> {
        self.pages
            .iter()
            .flat_map(|p| p.inactive_rows().into_iter().map(|(id, _)| id))
            .collect()
    }

    /// Every row of every page, live rows first within a page.
    pub fn rows_by_page(&self) -> Vec<Vec<(Uuid, u64)>> {
        self.pages
            .iter()
            .map(|p| {
                let mut rows = p.active_rows();
                rows.extend(p.inactive_rows());
                rows
            })
            .collect()
    }

    /// Ids of every row, live rows first within a page.
    pub fn ids(&self) -> Vec<Uuid> {
        self.rows_by_page()
            .into_iter()
            .flatten()
            .map(|(id, _)| id)
            .collect()
    }

    /// Versions of every row, live rows first within a page.
    pub fn versions(&self) -> Vec<u64> {
        self.rows_by_page()
            .into_iter()
            .flatten()
            .map(|(_, version)| version)
            .collect()
    }
}

/// A message sent while applying a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedMessage {
    /// External id.
    pub id: Uuid,
    /// Index of the author in the script's user list.
    pub author: usize,
    /// Latest content.
    pub content: String,
    /// True once deleted.
    pub deleted: bool,
}

/// Messages produced by [`TestWorld::apply_script`].
#[derive(Debug, Clone, Default)]
pub struct ScriptLog {
    /// Every message sent, in send order.
    pub messages: Vec<LoggedMessage>,
}

impl ScriptLog {
    /// The message at `index` modulo the log length, if not deleted.
    fn live_mut(&mut self, index: usize) -> Option<&mut LoggedMessage> {
        if self.messages.is_empty() {
            return None;
        }
        let len = self.messages.len();
        Some(&mut self.messages[index % len]).filter(|m| !m.deleted)
    }

    /// Ids of every message sent.
    pub fn ids(&self) -> HashSet<Uuid> {
        self.messages.iter().map(|m| m.id).collect()
    }

    /// Ids of deleted messages.
    pub fn deleted_ids(&self) -> HashSet<Uuid> {
        self.messages
            .iter()
            .filter(|m| m.deleted)
            .map(|m| m.id)
            .collect()
    }
}

/// A conversation opened while applying a membership script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedConversation {
    /// External id.
    pub id: Uuid,
    /// True once the owner deleted it.
    pub closed: bool,
    /// Every user index that ever held a membership, and whether it is active.
    pub members: HashMap<usize, bool>,
}

/// Outcome of [`TestWorld::apply_membership_script`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipLog {
    /// Every conversation opened, in order.
    pub conversations: Vec<LoggedConversation>,
    renames: usize,
}

impl MembershipLog {
    /// The conversation at `index` modulo the log length, if not closed.
    fn open_mut(&mut self, index: usize) -> Option<&mut LoggedConversation> {
        if self.conversations.is_empty() {
            return None;
        }
        let len = self.conversations.len();
        Some(&mut self.conversations[index % len]).filter(|c| !c.closed)
    }

    /// Conversations `user` ever belonged to, split into (active, tombstoned)
    /// as that user's conversation feed reports them.
    pub fn conversation_feed(&self, user: usize) -> (HashSet<Uuid>, HashSet<Uuid>) {
        let mut active = HashSet::new();
        let mut tombstoned = HashSet::new();
        for entry in &self.conversations {
            match entry.members.get(&user) {
                Some(true) if !entry.closed => active.insert(entry.id),
                Some(_) => tombstoned.insert(entry.id),
                None => continue,
            };
        }
        (active, tombstoned)
    }

    /// Users who ever belonged to `conversation`, split into (active,
    /// tombstoned) as its users feed reports them.
    pub fn users_feed(
        &self,
        conversation: &LoggedConversation,
        users: &[TestUser],
    ) -> (HashSet<Uuid>, HashSet<Uuid>) {
        let mut active = HashSet::new();
        let mut tombstoned = HashSet::new();
        for (&u, &is_active) in &conversation.members {
            if is_active {
                active.insert(users[u].id);
            } else {
                tombstoned.insert(users[u].id);
            }
        }
        (active, tombstoned)
    }
}

/// Rows a membership script changed, per feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedChanges {
    /// Conversation ids changed in each user's conversation feed.
    pub conversations: HashMap<Uuid, HashSet<Uuid>>,
    /// User ids changed in each conversation's users feed.
    pub users: HashMap<Uuid, HashSet<Uuid>>,
}

impl FeedChanges {
    /// Records a membership change of `user` in `conversation`.
    fn touch(&mut self, user: Uuid, conversation: Uuid) {
        self.conversations.entry(user).or_default().insert(conversation);
        self.users.entry(conversation).or_default().insert(user);
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A conversation with an owner and one member.
    pub struct Pair {
        /// The world.
        pub world: TestWorld,
        /// Conversation owner.
        pub owner: TestUser,
        /// Regular member.
        pub member: TestUser,
        /// The conversation.
        pub conversation: Uuid,
    }

    /// Sets up a conversation between `alice` (owner) and `bob`.
    pub async fn pair() -> Pair {
        let world = TestWorld::new();
        let owner = world.register("alice").await;
        let member = world.register("bob").await;
        let conversation = world
            .create_conversation(&owner, "general", &[&member])
            .await;
        Pair {
            world,
            owner,
            member,
            conversation,
        }
    }

    /// Path of a conversation's message feed.
    pub fn messages_path(conversation: Uuid) -> String {
        format!("/conversations/{conversation}/messages/dirty")
    }

    /// Path of a conversation's history pager.
    pub fn history_path(conversation: Uuid) -> String {
        format!("/conversations/{conversation}/messages/older")
    }

    /// Path of a conversation's member feed.
    pub fn users_path(conversation: Uuid) -> String {
        format!("/conversations/{conversation}/users/dirty")
    }
}
