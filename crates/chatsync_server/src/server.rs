//! Main chat server.

use crate::auth::{IdentityResolver, TokenValidator, TrustedIdentity};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::fanout::{Connection, ConnectionRegistry, Fanout};
use crate::guard::requester;
use crate::handler::{HandlerContext, RequestHandler};
use crate::router::{ApiRequest, HttpResponse, Route};
use chatsync_core::Database;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The chat server.
///
/// Owns the store, the connection registry and the fanout worker, and
/// executes requests handed over by a transport through
/// [`dispatch`](Self::dispatch). At most `max_connections` requests run
/// at once; a request that cannot get a slot within `request_timeout`
/// fails with 503.
///
/// Must be created inside a tokio runtime, which hosts the fanout
/// worker.
///
/// # Example
///
/// ```
/// use chatsync_server::{ApiRequest, ChatServer, ServerConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let server = ChatServer::new(ServerConfig::default()).unwrap();
/// let response = server.dispatch(ApiRequest::get("/conversations/dirty")).await;
/// assert_eq!(response.status, 401);
/// # }
/// ```
pub struct ChatServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    permits: Semaphore,
    worker: JoinHandle<()>,
}

impl ChatServer {
    /// Creates a server with an empty store.
    ///
    /// Tokens are HMAC-verified when `config.auth` is set; otherwise the
    /// presented token is taken as the user id.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let identity: Arc<dyn IdentityResolver> = match &config.auth {
            Some(auth) => Arc::new(TokenValidator::new(auth.clone())),
            None => Arc::new(TrustedIdentity),
        };
        Self::with_parts(config, Arc::new(Database::new()), identity)
    }

    /// Creates a server over an existing store and identity resolver.
    pub fn with_parts(
        config: ServerConfig,
        db: Arc<Database>,
        identity: Arc<dyn IdentityResolver>,
    ) -> ServerResult<Self> {
        config.validate()?;
        let registry = Arc::new(ConnectionRegistry::new());
        let (fanout, worker) =
            Fanout::spawn(Arc::clone(&db), Arc::clone(&registry), config.fanout_queue);
        let permits = Semaphore::new(config.max_connections.min(Semaphore::MAX_PERMITS));
        tracing::info!(
            bind_addr = %config.bind_addr,
            max_connections = config.max_connections,
            authenticated = config.auth.is_some(),
            "chat server started"
        );

        let context = Arc::new(HandlerContext::new(config, db, registry, fanout, identity));
        let handler = RequestHandler::new(Arc::clone(&context));
        Ok(Self {
            handler,
            context,
            permits,
            worker,
        })
    }

    /// Executes one request.
    ///
    /// Never fails: errors are turned into their JSON error response.
    pub async fn dispatch(&self, request: ApiRequest) -> HttpResponse {
        let started = Instant::now();
        let Some(route) = Route::parse(request.method, &request.path) else {
            tracing::debug!(method = %request.method, path = %request.path, "no such route");
            return HttpResponse::from_error(&ServerError::NotFound);
        };

        match self.execute(&route, &request).await {
            Ok(response) => {
                tracing::debug!(
                    route = route.name(),
                    status = response.status,
                    elapsed_us = micros(started.elapsed()),
                    "request served"
                );
                response
            }
            Err(err) => {
                if err.is_server_error() {
                    tracing::error!(route = route.name(), error = %err, "request failed");
                } else {
                    tracing::debug!(
                        route = route.name(),
                        code = err.error_code(),
                        "request rejected"
                    );
                }
                HttpResponse::from_error(&err)
            }
        }
    }

    async fn execute(&self, route: &Route, request: &ApiRequest) -> ServerResult<HttpResponse> {
        let timeout = self.context.config.request_timeout;
        let _permit = tokio::time::timeout(timeout, self.permits.acquire())
            .await
            .map_err(|_| ServerError::Unavailable("no request slot became free".into()))?
            .map_err(|_| ServerError::Unavailable("server is shutting down".into()))?;

        let requester = if route.is_public() {
            None
        } else {
            Some(self.authenticate(request.token.as_deref())?)
        };
        self.handler.handle(route, requester, request)
    }

    fn authenticate(&self, token: Option<&str>) -> ServerResult<Uuid> {
        let token = token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ServerError::Unauthenticated("missing bearer token".into()))?;
        self.context.identity.resolve(token)
    }

    /// Opens a realtime connection for the holder of `token`.
    ///
    /// Events are delivered until the returned [`Connection`] is dropped.
    pub fn connect(&self, token: &str) -> ServerResult<Connection> {
        let user = self.authenticate(Some(token))?;
        requester(&self.context.db.snapshot(), user)?;
        Ok(self.context.registry.register(user))
    }

    /// Issues a token for `user_id`.
    pub fn issue_token(&self, user_id: Uuid) -> ServerResult<String> {
        self.context.identity.issue(user_id)
    }

    /// The store.
    pub fn database(&self) -> &Arc<Database> {
        &self.context.db
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.context.registry
    }

    /// The configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}
