//! Request handlers for the chat endpoints.
//!
//! Each handler first checks the shape of the request (path ids, paging
//! parameters, body syntax) and reports every problem at once. Field
//! rules of mutation bodies are checked by the [`Mutator`].

use crate::auth::IdentityResolver;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::fanout::{ConnectionRegistry, Fanout};
use crate::guard::authorize;
use crate::history::messages_older;
use crate::mutation::Mutator;
use crate::present::conversation_view;
use crate::router::{ApiRequest, HttpResponse, Route};
use crate::sync::{conversations_dirty, messages_dirty, users_dirty};
use crate::validation::{PageParams, Validator};
use chatsync_core::Database;
use chatsync_protocol::{
    AddMemberRequest, ConversationDeletedResponse, ConversationResponse,
    ConversationsDirtyResponse, CreateConversationRequest, CreateMessageRequest, MemberResponse,
    MessageDeletedResponse, MessageResponse, MessagesDirtyResponse, MessagesOlderResponse,
    RegisterUserRequest, RegisterUserResponse, UpdateConversationRequest, UpdateMessageRequest,
    UpdateUserRequest, UserDeletedResponse, UserResponse, UsersDirtyResponse,
};
use std::sync::Arc;
use uuid::Uuid;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The store (shared across all handlers).
    pub db: Arc<Database>,
    /// Live client connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Post-commit event queue.
    pub fanout: Fanout,
    /// Token resolution and issuance.
    pub identity: Arc<dyn IdentityResolver>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(
        config: ServerConfig,
        db: Arc<Database>,
        registry: Arc<ConnectionRegistry>,
        fanout: Fanout,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            config,
            db,
            registry,
            fanout,
            identity,
        }
    }

    /// A mutator over this context's store and fanout queue.
    pub fn mutator(&self) -> Mutator<'_> {
        Mutator::new(&self.db, &self.fanout)
    }
}

/// Handler for chat requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Runs `route` for `requester`.
    ///
    /// `requester` may only be `None` for public routes.
    pub fn handle(
        &self,
        route: &Route,
        requester: Option<Uuid>,
        request: &ApiRequest,
    ) -> ServerResult<HttpResponse> {
        if *route == Route::RegisterUser {
            return HttpResponse::created(&self.handle_register_user(request)?);
        }
        let requester =
            requester.ok_or_else(|| ServerError::Unauthenticated("missing bearer token".into()))?;

        match route {
            Route::ConversationsDirty => {
                HttpResponse::ok(&self.handle_conversations_dirty(requester, request)?)
            }
            Route::GetConversation(id) => {
                HttpResponse::ok(&self.handle_get_conversation(requester, id)?)
            }
            Route::MessagesDirty(id) => {
                HttpResponse::ok(&self.handle_messages_dirty(requester, id, request)?)
            }
            Route::MessagesOlder(id) => {
                HttpResponse::ok(&self.handle_messages_older(requester, id, request)?)
            }
            Route::UsersDirty(id) => {
                HttpResponse::ok(&self.handle_users_dirty(requester, id, request)?)
            }
            Route::CreateConversation => {
                HttpResponse::created(&self.handle_create_conversation(requester, request)?)
            }
            Route::UpdateConversation(id) => {
                HttpResponse::ok(&self.handle_update_conversation(requester, id, request)?)
            }
            Route::DeleteConversation(id) => {
                HttpResponse::ok(&self.handle_delete_conversation(requester, id)?)
            }
            Route::AddMember(id) => {
                HttpResponse::created(&self.handle_add_member(requester, id, request)?)
            }
            Route::RemoveMember(id, user) => {
                HttpResponse::ok(&self.handle_remove_member(requester, id, user)?)
            }
            Route::CreateMessage => {
                HttpResponse::created(&self.handle_create_message(requester, request)?)
            }
            Route::UpdateMessage(id) => {
                HttpResponse::ok(&self.handle_update_message(requester, id, request)?)
            }
            Route::DeleteMessage(id) => {
                HttpResponse::ok(&self.handle_delete_message(requester, id)?)
            }
            Route::UpdateMe => HttpResponse::ok(&self.handle_update_me(requester, request)?),
            Route::DeleteMe => HttpResponse::ok(&self.handle_delete_me(requester)?),
            Route::RegisterUser => HttpResponse::created(&self.handle_register_user(request)?),
        }
    }

    fn page(&self, request: &ApiRequest, v: &mut Validator) -> PageParams {
        PageParams::parse(&request.query, &self.context.config, v)
    }

    // ---- pulls ----

    /// Handles `GET /conversations/dirty`.
    pub fn handle_conversations_dirty(
        &self,
        requester: Uuid,
        request: &ApiRequest,
    ) -> ServerResult<ConversationsDirtyResponse> {
        let mut v = Validator::new();
        let page = self.page(request, &mut v);
        v.finish()?;
        conversations_dirty(&self.context.db.snapshot(), requester, &page)
    }

    /// Handles `GET /conversations/{id}`.
    pub fn handle_get_conversation(
        &self,
        requester: Uuid,
        conversation_id: &str,
    ) -> ServerResult<ConversationResponse> {
        let mut v = Validator::new();
        let conversation_id = v.uuid("conversationId", conversation_id);
        v.finish()?;
        let snapshot = self.context.db.snapshot();
        let member = authorize(&snapshot, requester, conversation_id).into_result()?;
        Ok(ConversationResponse {
            conversation: conversation_view(&member.conversation),
        })
    }

    /// Handles `GET /conversations/{id}/messages/dirty`.
    pub fn handle_messages_dirty(
        &self,
        requester: Uuid,
        conversation_id: &str,
        request: &ApiRequest,
    ) -> ServerResult<MessagesDirtyResponse> {
        let mut v = Validator::new();
        let conversation_id = v.uuid("conversationId", conversation_id);
        let page = self.page(request, &mut v);
        v.finish()?;
        messages_dirty(&self.context.db.snapshot(), requester, conversation_id, &page)
    }

    /// Handles `GET /conversations/{id}/messages/older`.
    pub fn handle_messages_older(
        &self,
        requester: Uuid,
        conversation_id: &str,
        request: &ApiRequest,
    ) -> ServerResult<MessagesOlderResponse> {
        let mut v = Validator::new();
        let conversation_id = v.uuid("conversationId", conversation_id);
        let page = self.page(request, &mut v);
        v.finish()?;
        messages_older(
            &self.context.db.snapshot(),
            requester,
            conversation_id,
            &page,
            &self.context.config.redaction_marker,
        )
    }

    /// Handles `GET /conversations/{id}/users/dirty`.
    pub fn handle_users_dirty(
        &self,
        requester: Uuid,
        conversation_id: &str,
        request: &ApiRequest,
    ) -> ServerResult<UsersDirtyResponse> {
        let mut v = Validator::new();
        let conversation_id = v.uuid("conversationId", conversation_id);
        let page = self.page(request, &mut v);
        v.finish()?;
        users_dirty(&self.context.db.snapshot(), requester, conversation_id, &page)
    }

    // ---- conversations ----

    /// Handles `POST /conversations`.
    pub fn handle_create_conversation(
        &self,
        requester: Uuid,
        request: &ApiRequest,
    ) -> ServerResult<ConversationResponse> {
        let mut v = Validator::new();
        let body: CreateConversationRequest = v.json(request.body.as_deref());
        v.finish()?;
        self.context.mutator().create_conversation(requester, body)
    }

    /// Handles `PATCH /conversations/{id}`.
    pub fn handle_update_conversation(
        &self,
        requester: Uuid,
        conversation_id: &str,
        request: &ApiRequest,
    ) -> ServerResult<ConversationResponse> {
        let mut v = Validator::new();
        let conversation_id = v.uuid("conversationId", conversation_id);
        let body: UpdateConversationRequest = v.json(request.body.as_deref());
        v.finish()?;
        self.context
            .mutator()
            .update_conversation(requester, conversation_id, body)
    }

    /// Handles `DELETE /conversations/{id}`.
    pub fn handle_delete_conversation(
        &self,
        requester: Uuid,
        conversation_id: &str,
    ) -> ServerResult<ConversationDeletedResponse> {
        let mut v = Validator::new();
        let conversation_id = v.uuid("conversationId", conversation_id);
        v.finish()?;
        self.context
            .mutator()
            .delete_conversation(requester, conversation_id)
    }

    /// Handles `POST /conversations/{id}/members`.
    pub fn handle_add_member(
        &self,
        requester: Uuid,
        conversation_id: &str,
        request: &ApiRequest,
    ) -> ServerResult<MemberResponse> {
        let mut v = Validator::new();
        let conversation_id = v.uuid("conversationId", conversation_id);
        let body: AddMemberRequest = v.json(request.body.as_deref());
        v.finish()?;
        self.context
            .mutator()
            .add_member(requester, conversation_id, body)
    }

    /// Handles `DELETE /conversations/{id}/members/{userId}`.
    pub fn handle_remove_member(
        &self,
        requester: Uuid,
        conversation_id: &str,
        user_id: &str,
    ) -> ServerResult<MemberResponse> {
        let mut v = Validator::new();
        let conversation_id = v.uuid("conversationId", conversation_id);
        let user_id = v.uuid("userId", user_id);
        v.finish()?;
        self.context
            .mutator()
            .remove_member(requester, conversation_id, user_id)
    }

    // ---- messages ----

    /// Handles `POST /messages`.
    pub fn handle_create_message(
        &self,
        requester: Uuid,
        request: &ApiRequest,
    ) -> ServerResult<MessageResponse> {
        let mut v = Validator::new();
        let body: CreateMessageRequest = v.json(request.body.as_deref());
        v.finish()?;
        self.context.mutator().create_message(requester, body)
    }

    /// Handles `PATCH /messages/{id}`.
    pub fn handle_update_message(
        &self,
        requester: Uuid,
        message_id: &str,
        request: &ApiRequest,
    ) -> ServerResult<MessageResponse> {
        let mut v = Validator::new();
        let message_id = v.uuid("messageId", message_id);
        let body: UpdateMessageRequest = v.json(request.body.as_deref());
        v.finish()?;
        self.context
            .mutator()
            .update_message(requester, message_id, body)
    }

    /// Handles `DELETE /messages/{id}`.
    pub fn handle_delete_message(
        &self,
        requester: Uuid,
        message_id: &str,
    ) -> ServerResult<MessageDeletedResponse> {
        let mut v = Validator::new();
        let message_id = v.uuid("messageId", message_id);
        v.finish()?;
        self.context.mutator().delete_message(requester, message_id)
    }

    // ---- users ----

    /// Handles `POST /users`. Issues a token for the new user.
    pub fn handle_register_user(&self, request: &ApiRequest) -> ServerResult<RegisterUserResponse> {
        let mut v = Validator::new();
        let body: RegisterUserRequest = v.json(request.body.as_deref());
        v.finish()?;
        let user = self.context.mutator().register_user(body)?;
        let access_token = self.context.identity.issue(user.id)?;
        Ok(RegisterUserResponse { user, access_token })
    }

    /// Handles `PATCH /users/me`.
    pub fn handle_update_me(
        &self,
        requester: Uuid,
        request: &ApiRequest,
    ) -> ServerResult<UserResponse> {
        let mut v = Validator::new();
        let body: UpdateUserRequest = v.json(request.body.as_deref());
        v.finish()?;
        self.context.mutator().update_user(requester, body)
    }

    /// Handles `DELETE /users/me`.
    pub fn handle_delete_me(&self, requester: Uuid) -> ServerResult<UserDeletedResponse> {
        self.context.mutator().delete_user(requester)
    }
}
