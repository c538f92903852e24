//! # chatsync testkit
//!
//! Test utilities for chatsync.
//!
//! This crate provides:
//! - An in-process server world with registration and messaging helpers
//! - Feed draining helpers that follow cursors until `hasMore` is false
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chatsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn member_sees_message() {
//!     let pair = scenarios::pair().await;
//!     pair.world.send(&pair.owner, pair.conversation, "hi").await;
//!     // ... drain the member's feed
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
