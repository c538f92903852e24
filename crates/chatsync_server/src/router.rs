//! Framework-free request routing.
//!
//! The transport layer (out of this crate) turns an HTTP request into an
//! [`ApiRequest`] and writes the returned [`HttpResponse`] back. Path
//! segments stay raw strings here; they are validated by the handler
//! together with the rest of the request.

use crate::error::{ServerError, ServerResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Upper-case method name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request as handed over by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Method.
    pub method: Method,
    /// Path without query string.
    pub path: String,
    /// Decoded query parameters.
    pub query: HashMap<String, String>,
    /// Raw JSON body.
    pub body: Option<String>,
    /// Bearer token, if presented.
    pub token: Option<String>,
}

impl ApiRequest {
    /// Creates a request with no query, body or token.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: HashMap::new(),
            body: None,
            token: None,
        }
    }

    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Creates a POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Creates a PATCH request.
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    /// Creates a DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Sets the raw body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the JSON body.
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Self {
        self.body = serde_json::to_string(value).ok();
        self
    }

    /// Sets the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Status and JSON body of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: Value,
}

impl HttpResponse {
    /// A 200 response.
    pub fn ok<T: Serialize>(body: &T) -> ServerResult<Self> {
        Self::with_status(200, body)
    }

    /// A 201 response.
    pub fn created<T: Serialize>(body: &T) -> ServerResult<Self> {
        Self::with_status(201, body)
    }

    fn with_status<T: Serialize>(status: u16, body: &T) -> ServerResult<Self> {
        let body = serde_json::to_value(body)
            .map_err(|e| ServerError::Internal(format!("response serialization failed: {e}")))?;
        Ok(Self { status, body })
    }

    /// The response describing `err`.
    pub fn from_error(err: &ServerError) -> Self {
        Self {
            status: err.status_code(),
            body: err.to_body(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserializes the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }
}

/// An endpoint, with its raw path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `GET /conversations/dirty`
    ConversationsDirty,
    /// `POST /conversations`
    CreateConversation,
    /// `GET /conversations/{id}`
    GetConversation(String),
    /// `PATCH /conversations/{id}`
    UpdateConversation(String),
    /// `DELETE /conversations/{id}`
    DeleteConversation(String),
    /// `GET /conversations/{id}/messages/dirty`
    MessagesDirty(String),
    /// `GET /conversations/{id}/messages/older`
    MessagesOlder(String),
    /// `GET /conversations/{id}/users/dirty`
    UsersDirty(String),
    /// `POST /conversations/{id}/members`
    AddMember(String),
    /// `DELETE /conversations/{id}/members/{userId}`
    RemoveMember(String, String),
    /// `POST /messages`
    CreateMessage,
    /// `PATCH /messages/{id}`
    UpdateMessage(String),
    /// `DELETE /messages/{id}`
    DeleteMessage(String),
    /// `POST /users`
    RegisterUser,
    /// `PATCH /users/me`
    UpdateMe,
    /// `DELETE /users/me`
    DeleteMe,
}

impl Route {
    /// Matches a method and path.
    pub fn parse(method: Method, path: &str) -> Option<Route> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let route = match (method, segments.as_slice()) {
            (Method::Get, ["conversations", "dirty"]) => Route::ConversationsDirty,
            (Method::Post, ["conversations"]) => Route::CreateConversation,
            (Method::Get, ["conversations", id]) => Route::GetConversation(id.to_string()),
            (Method::Patch, ["conversations", id]) => Route::UpdateConversation(id.to_string()),
            (Method::Delete, ["conversations", id]) => Route::DeleteConversation(id.to_string()),
            (Method::Get, ["conversations", id, "messages", "dirty"]) => {
                Route::MessagesDirty(id.to_string())
            }
            (Method::Get, ["conversations", id, "messages", "older"]) => {
                Route::MessagesOlder(id.to_string())
            }
            (Method::Get, ["conversations", id, "users", "dirty"]) => {
                Route::UsersDirty(id.to_string())
            }
            (Method::Post, ["conversations", id, "members"]) => Route::AddMember(id.to_string()),
            (Method::Delete, ["conversations", id, "members", user]) => {
                Route::RemoveMember(id.to_string(), user.to_string())
            }
            (Method::Post, ["messages"]) => Route::CreateMessage,
            (Method::Patch, ["messages", id]) => Route::UpdateMessage(id.to_string()),
            (Method::Delete, ["messages", id]) => Route::DeleteMessage(id.to_string()),
            (Method::Post, ["users"]) => Route::RegisterUser,
            (Method::Patch, ["users", "me"]) => Route::UpdateMe,
            (Method::Delete, ["users", "me"]) => Route::DeleteMe,
            _ => return None,
        };
        Some(route)
    }

    /// Returns true if the route needs no identity.
    pub fn is_public(&self) -> bool {
        matches!(self, Route::RegisterUser)
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Route::ConversationsDirty => "conversations.dirty",
            Route::CreateConversation => "conversation.create",
            Route::GetConversation(_) => "conversation.get",
            Route::UpdateConversation(_) => "conversation.update",
            Route::DeleteConversation(_) => "conversation.delete",
            Route::MessagesDirty(_) => "messages.dirty",
            Route::MessagesOlder(_) => "messages.older",
            Route::UsersDirty(_) => "users.dirty",
            Route::AddMember(_) => "member.add",
            Route::RemoveMember(_, _) => "member.remove",
            Route::CreateMessage => "message.create",
            Route::UpdateMessage(_) => "message.update",
            Route::DeleteMessage(_) => "message.delete",
            Route::RegisterUser => "user.register",
            Route::UpdateMe => "user.update",
            Route::DeleteMe => "user.delete",
        }
    }
}
