//! Server configuration.

use crate::auth::AuthConfig;
use crate::error::{ServerError, ServerResult};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Placeholder shown instead of the content of deleted messages.
pub const DEFAULT_REDACTION_MARKER: &str = "Deleted message";

/// Configuration for the chat server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the transport layer should bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrently executing requests.
    pub max_connections: usize,
    /// How long a request may wait for an execution slot.
    pub request_timeout: Duration,
    /// Page size when a request gives no limit.
    pub default_page_limit: usize,
    /// Largest accepted page size.
    pub max_page_limit: usize,
    /// Capacity of the fanout job queue.
    pub fanout_queue: usize,
    /// Content shown for deleted messages in history pages.
    pub redaction_marker: String,
    /// Token authentication; `None` trusts the presented user id.
    pub auth: Option<AuthConfig>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 1000,
            request_timeout: Duration::from_secs(30),
            default_page_limit: 50,
            max_page_limit: 100,
            fanout_queue: 1024,
            redaction_marker: DEFAULT_REDACTION_MARKER.to_string(),
            auth: None,
        }
    }

    /// Reads overrides from `CHATSYNC_*` environment variables.
    pub fn from_env() -> ServerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ServerResult<Self> {
        let mut config = Self::default();
        if let Some(addr) = parse_key(&lookup, "CHATSYNC_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(max) = parse_key(&lookup, "CHATSYNC_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(ms) = parse_key::<u64, _>(&lookup, "CHATSYNC_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_key(&lookup, "CHATSYNC_DEFAULT_PAGE_LIMIT")? {
            config.default_page_limit = limit;
        }
        if let Some(limit) = parse_key(&lookup, "CHATSYNC_MAX_PAGE_LIMIT")? {
            config.max_page_limit = limit;
        }
        if let Some(capacity) = parse_key(&lookup, "CHATSYNC_FANOUT_QUEUE")? {
            config.fanout_queue = capacity;
        }
        if let Some(secret) = lookup("CHATSYNC_AUTH_SECRET").filter(|s| !s.is_empty()) {
            config.auth = Some(AuthConfig::new(secret.into_bytes()));
        }
        config.validate()?;
        Ok(config)
    }

    /// Sets the maximum concurrently executing requests.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the default and maximum page sizes.
    pub fn with_page_limits(mut self, default: usize, max: usize) -> Self {
        self.default_page_limit = default;
        self.max_page_limit = max;
        self
    }

    /// Sets the fanout queue capacity.
    pub fn with_fanout_queue(mut self, capacity: usize) -> Self {
        self.fanout_queue = capacity;
        self
    }

    /// Sets the placeholder shown for deleted messages.
    pub fn with_redaction_marker(mut self, marker: impl Into<String>) -> Self {
        self.redaction_marker = marker.into();
        self
    }

    /// Enables token authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.auth = Some(AuthConfig::new(secret));
        self
    }

    /// Checks that the settings are usable together.
    pub fn validate(&self) -> ServerResult<()> {
        let invalid = |key: &str, message: &str| ServerError::InvalidConfig {
            key: key.to_string(),
            message: message.to_string(),
        };
        if self.max_connections == 0 {
            return Err(invalid("max_connections", "must be at least 1"));
        }
        if self.fanout_queue == 0 {
            return Err(invalid("fanout_queue", "must be at least 1"));
        }
        if self.max_page_limit == 0 {
            return Err(invalid("max_page_limit", "must be at least 1"));
        }
        if self.default_page_limit == 0 || self.default_page_limit > self.max_page_limit {
            return Err(invalid(
                "default_page_limit",
                "must be between 1 and max_page_limit",
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}

fn parse_key<T, F>(lookup: &F, key: &str) -> ServerResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse().map_err(|e: T::Err| ServerError::InvalidConfig {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.default_page_limit, 50);
        assert_eq!(config.max_page_limit, 100);
        assert_eq!(config.redaction_marker, "Deleted message");
        assert!(config.auth.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_max_connections(500)
            .with_page_limits(20, 40)
            .with_auth(vec![1, 2, 3, 4]);

        assert_eq!(config.max_connections, 500);
        assert_eq!(config.default_page_limit, 20);
        assert_eq!(config.auth.as_ref().map(|a| a.secret.to_vec()), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("CHATSYNC_BIND_ADDR", "0.0.0.0:7000"),
            ("CHATSYNC_MAX_CONNECTIONS", "8"),
            ("CHATSYNC_REQUEST_TIMEOUT_MS", "250"),
            ("CHATSYNC_FANOUT_QUEUE", "16"),
            ("CHATSYNC_AUTH_SECRET", "s3cret"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 7000);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.fanout_queue, 16);
        assert!(config.auth.is_some());
    }

    #[test]
    fn env_rejects_bad_values() {
        let err = ServerConfig::from_lookup(lookup(&[("CHATSYNC_MAX_CONNECTIONS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidConfig { ref key, .. } if key == "CHATSYNC_MAX_CONNECTIONS"));

        let err = ServerConfig::from_lookup(lookup(&[
            ("CHATSYNC_DEFAULT_PAGE_LIMIT", "500"),
            ("CHATSYNC_MAX_PAGE_LIMIT", "100"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ServerError::InvalidConfig { .. }));
    }
}
