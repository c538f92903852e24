//! End-to-end sync scenarios against an in-process server.

use chatsync_protocol::{MessagesDirtyResponse, MessagesOlderResponse, SyncCursor};
use chatsync_server::{ApiRequest, ServerConfig};
use chatsync_testkit::scenarios::{history_path, messages_path, pair};
use chatsync_testkit::{Drained, TestWorld};
use std::sync::Arc;

#[tokio::test]
async fn member_pulls_first_message() {
    let pair = pair().await;
    let m1 = pair.world.send(&pair.owner, pair.conversation, "hello").await;

    let page: MessagesDirtyResponse = pair
        .world
        .expect(&pair.member, ApiRequest::get(messages_path(pair.conversation)), 200)
        .await;
    assert_eq!(page.messages.active.len(), 1);
    assert_eq!(page.messages.active[0].id, m1.id);
    assert_eq!(page.messages.active[0].content, "hello");
    assert!(!page.messages.active[0].is_self);
    assert!(page.messages.inactive.is_empty());
    assert!(!page.has_more);

    let authors: Vec<_> = page.dependencies.users.iter().map(|u| u.id).collect();
    assert_eq!(authors, vec![pair.owner.id]);

    let cursor = SyncCursor::decode(page.next_cursor.as_deref().unwrap()).unwrap();
    assert_eq!(cursor.version, m1.version);
    assert_eq!(cursor.entity_id, m1.id);
}

#[tokio::test]
async fn cursor_resumes_after_last_seen() {
    let pair = pair().await;
    let m1 = pair.world.send(&pair.owner, pair.conversation, "one").await;
    let path = messages_path(pair.conversation);

    let first: Drained<MessagesDirtyResponse> =
        pair.world.drain(&pair.member, &path, None, 50).await;
    assert_eq!(first.active_ids(), vec![m1.id]);

    let m2 = pair.world.send(&pair.owner, pair.conversation, "two").await;
    let second: Drained<MessagesDirtyResponse> = pair
        .world
        .drain(&pair.member, &path, first.cursor.clone(), 50)
        .await;
    assert_eq!(second.active_ids(), vec![m2.id]);
    assert!(m2.version > m1.version);

    let empty: Drained<MessagesDirtyResponse> = pair
        .world
        .drain(&pair.member, &path, second.cursor.clone(), 50)
        .await;
    assert!(empty.active_ids().is_empty());
    assert_eq!(empty.cursor, second.cursor);
}

#[tokio::test]
async fn deletion_reaches_feed_and_history() {
    let pair = pair().await;
    let m1 = pair.world.send(&pair.member, pair.conversation, "secret").await;
    let path = messages_path(pair.conversation);
    let seen: Drained<MessagesDirtyResponse> =
        pair.world.drain(&pair.member, &path, None, 50).await;

    // The owner moderates a member's message.
    let response = pair.world.delete_message(&pair.owner, m1.id).await;
    assert_eq!(response.status, 200);

    let after: Drained<MessagesDirtyResponse> =
        pair.world.drain(&pair.member, &path, seen.cursor, 50).await;
    assert!(after.active_ids().is_empty());
    assert_eq!(after.tombstone_ids(), vec![m1.id]);
    assert!(after.versions()[0] > m1.version);

    let history: MessagesOlderResponse = pair
        .world
        .expect(&pair.member, ApiRequest::get(history_path(pair.conversation)), 200)
        .await;
    assert!(history.messages.active.is_empty());
    assert_eq!(history.messages.deleted.len(), 1);
    let redacted = &history.messages.deleted[0];
    assert_eq!(redacted.id, m1.id);
    assert_eq!(redacted.content, ServerConfig::default().redaction_marker);
    assert!(redacted.deleted_at.is_some());
}

#[tokio::test]
async fn foreign_cursor_is_not_found() {
    let world = TestWorld::new();
    let alice = world.register("alice").await;
    let bob = world.register("bob").await;
    let c = world.create_conversation(&alice, "conversation c", &[&bob]).await;
    let d = world.create_conversation(&alice, "conversation d", &[&bob]).await;
    world.send(&alice, c, "in c").await;
    world.send(&alice, d, "in d").await;

    let from_d: Drained<MessagesDirtyResponse> =
        world.drain(&bob, &messages_path(d), None, 50).await;
    let request = ApiRequest::get(messages_path(c)).with_query("cursor", from_d.cursor.unwrap());
    let response = world.call(&bob, request).await;
    assert_eq!(response.status, 404);
    assert_eq!(response.body["errorCode"], "NOT_FOUND");
}

#[tokio::test]
async fn malformed_cursor_is_bad_request() {
    let pair = pair().await;
    let request = ApiRequest::get(messages_path(pair.conversation)).with_query("cursor", "%%%");
    let response = pair.world.call(&pair.member, request).await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body["errorCode"], "MALFORMED_CURSOR");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_follow_commit_order() {
    let world = Arc::new(TestWorld::new());
    let alice = world.register("alice").await;
    let bob = world.register("bob").await;
    let conversation = world.create_conversation(&alice, "busy", &[&bob]).await;

    let mut tasks = Vec::new();
    for (i, author) in [alice.clone(), bob.clone()].into_iter().enumerate() {
        let world = Arc::clone(&world);
        tasks.push(tokio::spawn(async move {
            let mut sent = Vec::new();
            for n in 0..10 {
                sent.push(world.send(&author, conversation, &format!("{i}-{n}")).await);
            }
            sent
        }));
    }
    let mut sent = Vec::new();
    for task in tasks {
        sent.extend(task.await.unwrap());
    }

    let mut versions: Vec<u64> = sent.iter().map(|m| m.version).collect();
    versions.sort_unstable();
    versions.dedup();
    assert_eq!(versions.len(), sent.len(), "versions must be distinct");

    sent.sort_by_key(|m| m.version);
    let feed: Drained<MessagesDirtyResponse> =
        world.drain(&bob, &messages_path(conversation), None, 7).await;
    let expected: Vec<_> = sent.iter().map(|m| m.id).collect();
    assert_eq!(feed.active_ids(), expected);
}

#[tokio::test]
async fn previous_id_links_the_chain() {
    let pair = pair().await;
    let m1 = pair.world.send(&pair.owner, pair.conversation, "first").await;
    let m2 = pair.world.send(&pair.member, pair.conversation, "second").await;
    assert_eq!(m1.previous_id, None);
    assert_eq!(m2.previous_id, Some(m1.id));
    assert!(m2.is_self);
}
