//! Single-writer transactions.
//!
//! One write transaction exists at a time. Versions and row ids are
//! allocated while the writer lock is held and only published at
//! commit, so concurrent writers serialize into a total version order
//! and a failed write never consumes a version.

mod state;
mod write;

pub use state::{ChangeRecord, CommitReceipt, TransactionState};
pub use write::WriteTransaction;

pub(crate) use write::WriterState;
