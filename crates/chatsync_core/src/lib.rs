//! # chatsync core
//!
//! Versioned entity store for the chatsync backend.
//!
//! This crate provides:
//! - Entity records (users, conversations, memberships, messages)
//! - Single-writer transactions stamping every write with a version
//!   from one global commit sequence
//! - Point-in-time snapshots with the delta and history queries used by
//!   the sync engine

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod database;
mod entity;
mod error;
mod snapshot;
mod tables;
mod transaction;
mod types;

pub use database::{Committed, Database};
pub use entity::{
    Conversation, Membership, Message, NewConversation, NewUser, Record, Role, User,
};
pub use error::{CoreError, CoreResult};
pub use snapshot::{
    ConversationMember, DeltaPage, FeedPosition, MemberConversation, ReadView, Snapshot,
};
pub use transaction::{ChangeRecord, CommitReceipt, TransactionState, WriteTransaction};
pub use types::{EntityKind, RowId, Version};
