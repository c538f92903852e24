//! Transaction state and commit receipts.

use crate::types::{EntityKind, RowId, Version};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// A row written by a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Kind of the row.
    pub kind: EntityKind,
    /// Row that changed.
    pub row_id: RowId,
    /// Version stamped on the row.
    pub version: Version,
}

/// What a commit published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Changed rows in version order.
    pub changes: Vec<ChangeRecord>,
    /// Store high-water mark after the commit.
    pub high_water: Version,
}

impl CommitReceipt {
    /// Returns true if the transaction wrote nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the version stamped on a row by this commit.
    #[must_use]
    pub fn version_of(&self, kind: EntityKind, row_id: RowId) -> Option<Version> {
        self.changes
            .iter()
            .find(|c| c.kind == kind && c.row_id == row_id)
            .map(|c| c.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_lookup() {
        let receipt = CommitReceipt {
            changes: vec![
                ChangeRecord {
                    kind: EntityKind::Conversation,
                    row_id: RowId::new(1),
                    version: Version::new(4),
                },
                ChangeRecord {
                    kind: EntityKind::Membership,
                    row_id: RowId::new(2),
                    version: Version::new(5),
                },
            ],
            high_water: Version::new(5),
        };
        assert!(!receipt.is_empty());
        assert_eq!(
            receipt.version_of(EntityKind::Membership, RowId::new(2)),
            Some(Version::new(5))
        );
        assert_eq!(receipt.version_of(EntityKind::User, RowId::new(2)), None);
    }
}
