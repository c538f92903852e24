//! Simulate command implementation.
//!
//! Runs an in-process server, plays a conversation against it and
//! drains the message feed the way a client would.

use chatsync_protocol::{
    ConversationResponse, CreateConversationRequest, CreateMessageRequest, MessageResponse,
    MessagesDirtyResponse, MessagesOlderResponse, RegisterUserRequest, RegisterUserResponse,
    SyncCursor,
};
use chatsync_server::{ApiRequest, ChatServer, HttpResponse, ServerConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Simulation parameters.
#[derive(Debug, Clone, Copy)]
pub struct SimulateOptions {
    /// Number of conversation members.
    pub members: usize,
    /// Number of messages to post.
    pub messages: usize,
    /// Page size used while draining.
    pub page_size: usize,
    /// Delete every n-th message, if set.
    pub delete_every: Option<usize>,
}

/// Simulation outcome.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    /// Members in the conversation.
    pub members: usize,
    /// Messages posted.
    pub messages_sent: usize,
    /// Messages deleted.
    pub messages_deleted: usize,
    /// Pages fetched while draining the feed.
    pub feed_pages: usize,
    /// Active rows received.
    pub active_rows: usize,
    /// Tombstones received.
    pub tombstones: usize,
    /// Rows received more than once.
    pub duplicates: usize,
    /// Version named by the final cursor.
    pub final_version: u64,
    /// Pages fetched while paging back through history.
    pub history_pages: usize,
    /// Push events that reached the observing member.
    pub events_received: usize,
    /// Wall-clock time of the whole run.
    pub elapsed_ms: u128,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Runs the simulate command.
pub fn run(options: SimulateOptions) -> CliResult<()> {
    if options.members < 2 {
        return Err("a simulation needs at least 2 members".into());
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let summary = runtime.block_on(simulate(options))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Plays the simulation and returns its summary.
pub async fn simulate(options: SimulateOptions) -> CliResult<SimulationSummary> {
    let started = Instant::now();
    let config = ServerConfig::default();
    if !(1..=config.max_page_limit).contains(&options.page_size) {
        return Err(format!("page size must be between 1 and {}", config.max_page_limit).into());
    }
    let server = ChatServer::new(config)?;

    let mut tokens = Vec::with_capacity(options.members);
    let mut ids = Vec::with_capacity(options.members);
    for i in 0..options.members {
        let request = ApiRequest::post("/users").with_json(&RegisterUserRequest {
            name: format!("Member {i}"),
            username: format!("member_{i}"),
            ..Default::default()
        });
        let registered: RegisterUserResponse = call(&server, request, 201).await?;
        ids.push(registered.user.id);
        tokens.push(registered.access_token);
    }

    let request = ApiRequest::post("/conversations")
        .with_token(tokens[0].clone())
        .with_json(&CreateConversationRequest {
            title: "simulation".into(),
            member_ids: ids[1..].to_vec(),
            ..Default::default()
        });
    let conversation: ConversationResponse = call(&server, request, 201).await?;
    let conversation = conversation.conversation.id;

    let observer = options.members - 1;
    let mut connection = server.connect(&tokens[observer])?;
    let mut expected_events = 0;
    let mut deleted = 0;
    for n in 0..options.messages {
        let author = n % options.members;
        let request = ApiRequest::post("/messages")
            .with_token(tokens[author].clone())
            .with_json(&CreateMessageRequest {
                conversation_id: conversation,
                content: format!("message {n}"),
                optimistic_id: Some(format!("sim-{n}")),
            });
        let created: MessageResponse = call(&server, request, 201).await?;
        expected_events += 1;

        if options.delete_every.is_some_and(|k| k > 0 && (n + 1) % k == 0) {
            let request = ApiRequest::delete(format!("/messages/{}", created.message.id))
                .with_token(tokens[author].clone());
            let response = server.dispatch(request).await;
            check(&response, 200)?;
            deleted += 1;
            expected_events += 1;
        }
        // Lets the fanout worker keep up on a single-threaded runtime.
        tokio::task::yield_now().await;
    }

    let mut events_received = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while events_received < expected_events {
        match tokio::time::timeout_at(deadline, connection.recv()).await {
            Ok(Some(_)) => events_received += 1,
            _ => break,
        }
    }

    let token = &tokens[observer];
    let path = format!("/conversations/{conversation}/messages/dirty");
    let mut seen = HashSet::new();
    let (mut feed_pages, mut active_rows, mut tombstones, mut duplicates) = (0, 0, 0, 0);
    let mut cursor: Option<String> = None;
    loop {
        let request = page_request(&path, token, cursor.as_deref(), options.page_size);
        let page: MessagesDirtyResponse = call(&server, request, 200).await?;
        feed_pages += 1;
        active_rows += page.messages.active.len();
        tombstones += page.messages.inactive.len();
        let rows = page
            .messages
            .active
            .iter()
            .map(|m| m.id)
            .chain(page.messages.inactive.iter().map(|m| m.id));
        for id in rows {
            if !seen.insert(id) {
                duplicates += 1;
            }
        }
        if page.next_cursor.is_some() {
            cursor = page.next_cursor;
        }
        if !page.has_more {
            break;
        }
    }
    let final_version = cursor
        .as_deref()
        .map(SyncCursor::decode)
        .transpose()?
        .map_or(0, |c| c.version);

    let path = format!("/conversations/{conversation}/messages/older");
    let mut history_pages = 0;
    let mut cursor: Option<String> = None;
    loop {
        let request = page_request(&path, token, cursor.as_deref(), options.page_size);
        let page: MessagesOlderResponse = call(&server, request, 200).await?;
        history_pages += 1;
        if !page.has_more || page.next_cursor.is_none() {
            break;
        }
        cursor = page.next_cursor;
    }

    tracing::debug!(high_water = %server.database().high_water(), "simulation finished");
    Ok(SimulationSummary {
        members: options.members,
        messages_sent: options.messages,
        messages_deleted: deleted,
        feed_pages,
        active_rows,
        tombstones,
        duplicates,
        final_version,
        history_pages,
        events_received,
        elapsed_ms: started.elapsed().as_millis(),
    })
}

fn page_request(path: &str, token: &str, cursor: Option<&str>, limit: usize) -> ApiRequest {
    let mut request = ApiRequest::get(path)
        .with_token(token)
        .with_query("limit", limit.to_string());
    if let Some(cursor) = cursor {
        request = request.with_query("cursor", cursor);
    }
    request
}

async fn call<T: DeserializeOwned>(
    server: &ChatServer,
    request: ApiRequest,
    status: u16,
) -> CliResult<T> {
    let response = server.dispatch(request).await;
    check(&response, status)?;
    Ok(response.json()?)
}

fn check(response: &HttpResponse, status: u16) -> CliResult<()> {
    if response.status != status {
        return Err(format!(
            "expected status {status}, got {}: {}",
            response.status, response.body
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_every_message_once() {
        let summary = simulate(SimulateOptions {
            members: 3,
            messages: 25,
            page_size: 4,
            delete_every: Some(5),
        })
        .await
        .unwrap();
        assert_eq!(summary.messages_deleted, 5);
        assert_eq!(summary.active_rows, 20);
        assert_eq!(summary.tombstones, 5);
        assert_eq!(summary.duplicates, 0);
        assert_eq!(summary.feed_pages, 7);
        assert_eq!(summary.history_pages, 7);
        assert_eq!(summary.events_received, 30);
    }

    #[tokio::test]
    async fn rejects_bad_page_size() {
        let options = SimulateOptions {
            members: 2,
            messages: 1,
            page_size: 0,
            delete_every: None,
        };
        assert!(simulate(options).await.is_err());
    }
}
