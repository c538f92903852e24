//! Entity records held by the store.
//!
//! Every record carries an internal [`RowId`], an external UUID, a
//! [`Version`] stamped at commit, and a soft-delete marker. Records are
//! plain values: relations such as a message's author or its previous
//! message are stored as row ids and resolved by lookup.

mod records;

pub use records::{Conversation, Membership, Message, NewConversation, NewUser, User};

use crate::types::{EntityKind, RowId, Version};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Common read access to versioned records.
pub trait Record: Clone + Send + Sync + 'static {
    /// The kind of entity this record type stores.
    const KIND: EntityKind;

    /// Returns the internal row id.
    fn row_id(&self) -> RowId;

    /// Returns the external identifier.
    fn external_id(&self) -> Uuid;

    /// Returns the version stamped by the last committed write.
    fn version(&self) -> Version;

    /// Returns the soft-delete timestamp, if deleted.
    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    /// Returns true if the record is soft-deleted.
    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}

/// Role of a user within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Created the conversation.
    Owner,
    /// May manage members and moderate messages.
    Admin,
    /// Regular participant.
    Member,
}

impl Role {
    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    /// Returns true if the role may moderate other members' content.
    #[must_use]
    pub const fn can_moderate(self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(format!("unknown role: {other}")),
        }
    }
}
