//! # chatsync protocol
//!
//! Wire types for the chatsync backend.
//!
//! This crate provides:
//! - `SyncCursor` / `HistoryCursor` and their opaque base64 codec
//! - Row views shared by pull responses and push events
//! - Request and response bodies of every endpoint
//! - `PushEvent`, the tagged realtime event envelope
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cursor;
mod events;
mod messages;
mod views;

pub use cursor::{CursorError, CursorResult, HistoryCursor, SyncCursor};
pub use events::{
    ConversationChanged, ConversationDeleted, MembersChanged, MessageCreated, MessageDeleted,
    MessageUpdated, PushEvent,
};
pub use messages::{
    AddMemberRequest, ConversationDeletedResponse, ConversationResponse,
    ConversationsDirtyResponse, CreateConversationRequest, CreateMessageRequest, MemberResponse,
    MessageDeletedResponse, MessageResponse, MessagesDirtyResponse, MessagesOlderResponse,
    RegisterUserRequest, RegisterUserResponse, UpdateConversationRequest, UpdateMessageRequest,
    UpdateUserRequest, UserDeletedResponse, UserResponse, UsersDirtyResponse,
};
pub use views::{
    ConversationTombstone, ConversationView, Dependencies, HistoryPartition, MemberRole,
    MemberView, MessageTombstone, MessageView, Partition, UserTombstone, UserView,
};
