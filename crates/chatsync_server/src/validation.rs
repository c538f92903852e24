//! Request validation.
//!
//! Field checks collect every failure before reporting, so a client
//! fixes a bad request in one round trip. Authorization and cursor
//! scope checks, by contrast, stop at the first failure.

use crate::config::ServerConfig;
use crate::error::{FieldError, ServerError, ServerResult};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use uuid::Uuid;

/// Message body length in characters.
pub const CONTENT_LENGTH: RangeInclusive<usize> = 1..=10_000;
/// Conversation title length in characters.
pub const TITLE_LENGTH: RangeInclusive<usize> = 3..=50;
/// Conversation description length in characters.
pub const DESCRIPTION_LENGTH: RangeInclusive<usize> = 0..=10_000;
/// Display name length in characters.
pub const NAME_LENGTH: RangeInclusive<usize> = 3..=100;
/// Username length in characters.
pub const USERNAME_LENGTH: RangeInclusive<usize> = 3..=50;
/// Client optimistic id length in characters.
pub const OPTIMISTIC_ID_LENGTH: RangeInclusive<usize> = 1..=128;

/// Accumulates field errors.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    /// Creates an empty validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `message` against `field` unless `ok`.
    pub fn check(&mut self, field: &str, ok: bool, message: impl Into<String>) -> &mut Self {
        if !ok {
            self.errors.push(FieldError::new(field, message));
        }
        self
    }

    /// Checks a string's length in characters.
    pub fn length(&mut self, field: &str, value: &str, range: RangeInclusive<usize>) -> &mut Self {
        let len = value.chars().count();
        if !range.contains(&len) {
            let message = if *range.start() == 0 {
                format!("must be at most {} characters", range.end())
            } else {
                format!(
                    "must be between {} and {} characters",
                    range.start(),
                    range.end()
                )
            };
            self.errors.push(FieldError::new(field, message));
        }
        self
    }

    /// Checks a username's length and alphabet.
    pub fn username(&mut self, field: &str, value: &str) -> &mut Self {
        self.length(field, value, USERNAME_LENGTH);
        self.check(
            field,
            value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
            "may only contain letters, numbers and underscores",
        )
    }

    /// Loosely checks an email address.
    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        let ok = value
            .split_once('@')
            .map_or(false, |(local, domain)| !local.is_empty() && domain.contains('.'));
        self.check(field, ok, "must be an email address")
    }

    /// Parses a UUID, recording a failure.
    ///
    /// A failed parse yields the nil UUID, which names no row; the
    /// failure is reported by [`finish`](Self::finish).
    pub fn uuid(&mut self, field: &str, raw: &str) -> Uuid {
        Uuid::parse_str(raw).unwrap_or_else(|_| {
            self.errors.push(FieldError::new(field, "must be a UUID"));
            Uuid::nil()
        })
    }

    /// Parses a JSON request body, recording a failure.
    pub fn json<T: DeserializeOwned + Default>(&mut self, body: Option<&str>) -> T {
        let Some(body) = body.filter(|b| !b.trim().is_empty()) else {
            self.errors.push(FieldError::new("body", "a JSON body is required"));
            return T::default();
        };
        serde_json::from_str(body).unwrap_or_else(|e| {
            self.errors.push(FieldError::new("body", e.to_string()));
            T::default()
        })
    }

    /// Returns the collected errors, if any.
    pub fn finish(self) -> ServerResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ServerError::Validation(self.errors))
        }
    }
}

/// Validated paging parameters. The cursor is still undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageParams {
    /// Raw cursor token.
    pub cursor: Option<String>,
    /// Page size.
    pub limit: usize,
}

impl PageParams {
    /// Reads `cursor` and `limit` from query parameters.
    ///
    /// An empty `cursor` is treated as absent.
    pub fn parse(
        query: &HashMap<String, String>,
        config: &ServerConfig,
        validator: &mut Validator,
    ) -> Self {
        let cursor = query
            .get("cursor")
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let limit = match query.get("limit") {
            None => config.default_page_limit,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(limit) if (1..=config.max_page_limit).contains(&limit) => limit,
                _ => {
                    validator.check(
                        "limit",
                        false,
                        format!("must be an integer between 1 and {}", config.max_page_limit),
                    );
                    config.default_page_limit
                }
            },
        };
        Self { cursor, limit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn collects_every_error() {
        let mut v = Validator::new();
        v.length("title", "ab", TITLE_LENGTH)
            .length("description", &"x".repeat(10_001), DESCRIPTION_LENGTH)
            .username("username", "no spaces!");
        let err = v.finish().unwrap_err();
        match err {
            ServerError::Validation(errors) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["title", "description", "username"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn length_counts_characters() {
        let mut v = Validator::new();
        v.length("content", "日本語", 1..=3);
        assert!(v.finish().is_ok());
    }

    #[test]
    fn email_shape() {
        let mut v = Validator::new();
        v.email("email", "ada@example.com");
        assert!(v.finish().is_ok());

        let mut v = Validator::new();
        v.email("email", "ada.example.com");
        assert!(v.finish().is_err());
    }

    #[test]
    fn path_and_body_errors_collect() {
        let mut v = Validator::new();
        let id = v.uuid("id", "not-a-uuid");
        let body: HashMap<String, String> = v.json(Some("{ nope"));
        assert!(id.is_nil());
        assert!(body.is_empty());
        match v.finish().unwrap_err() {
            ServerError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_body_is_reported() {
        let mut v = Validator::new();
        let _: HashMap<String, String> = v.json(None);
        assert!(v.finish().is_err());
    }

    #[test]
    fn page_defaults() {
        let config = ServerConfig::default();
        let mut v = Validator::new();
        let page = PageParams::parse(&query(&[("cursor", "")]), &config, &mut v);
        assert!(v.finish().is_ok());
        assert_eq!(page, PageParams { cursor: None, limit: 50 });
    }

    #[test]
    fn page_limit_bounds() {
        let config = ServerConfig::default();
        for bad in ["0", "101", "-1", "ten"] {
            let mut v = Validator::new();
            PageParams::parse(&query(&[("limit", bad)]), &config, &mut v);
            assert!(v.finish().is_err(), "limit {bad} should be rejected");
        }
        let mut v = Validator::new();
        let page = PageParams::parse(&query(&[("limit", "100")]), &config, &mut v);
        assert!(v.finish().is_ok());
        assert_eq!(page.limit, 100);
    }
}
