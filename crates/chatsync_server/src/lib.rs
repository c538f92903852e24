//! # chatsync server
//!
//! Dirty-sync chat server over the chatsync store.
//!
//! This crate provides:
//! - Pull endpoints: per-scope delta feeds and the backward history pager
//! - Mutation endpoints for messages, conversations, members and users
//! - An authorization guard scoping every query to conversation membership
//! - Cursor scope validation
//! - Realtime fanout of committed changes to connected participants
//! - Identity resolution (HMAC-SHA256 tokens or a trusted pass-through)
//!
//! # Architecture
//!
//! The server is transport-agnostic. A transport turns each HTTP request
//! into an [`ApiRequest`], awaits [`ChatServer::dispatch`] and writes the
//! [`HttpResponse`] back. Realtime connections are opened with
//! [`ChatServer::connect`].
//!
//! ```rust,ignore
//! use chatsync_server::{ApiRequest, ChatServer, ServerConfig};
//!
//! let server = ChatServer::new(ServerConfig::from_env()?)?;
//! let response = server
//!     .dispatch(ApiRequest::get("/conversations/dirty").with_token(token))
//!     .await;
//! ```
//!
//! # Protocol
//!
//! Clients keep one cursor per feed:
//! 1. Pull `GET /conversations/dirty` until `hasMore` is false
//! 2. For each conversation, pull its message and member feeds the same way
//! 3. On a push event, pull the affected feed again from the stored cursor
//! 4. Load older history with `GET /conversations/{id}/messages/older`
//!
//! Push events are hints. A client that misses one loses nothing, since
//! the next pull returns every change past its cursor.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code must not panic on bad input; errors are returned.
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod fanout;
mod guard;
mod handler;
mod history;
mod mutation;
mod present;
mod router;
mod server;
mod sync;
mod validation;
mod validator;

pub use auth::{AuthConfig, IdentityResolver, TokenValidator, TrustedIdentity};
pub use config::{ServerConfig, DEFAULT_REDACTION_MARKER};
pub use error::{FieldError, ServerError, ServerResult};
pub use fanout::{deliver_job, Connection, ConnectionRegistry, Fanout, FanoutJob};
pub use guard::{authorize, requester, Access, DenyReason, MemberRecord};
pub use handler::{HandlerContext, RequestHandler};
pub use history::messages_older;
pub use mutation::{MutationStage, Mutator};
pub use router::{ApiRequest, HttpResponse, Method, Route};
pub use server::ChatServer;
pub use sync::{conversations_dirty, messages_dirty, users_dirty};
pub use validation::{
    PageParams, Validator, CONTENT_LENGTH, DESCRIPTION_LENGTH, NAME_LENGTH, OPTIMISTIC_ID_LENGTH,
    TITLE_LENGTH, USERNAME_LENGTH,
};
pub use validator::{
    conversation_cursor, history_cursor, message_cursor, user_cursor, MessageScope, ScopeMismatch,
};
