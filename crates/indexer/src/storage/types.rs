//! Database types for the indexer storage layer.

use agentindex_core::CompositeId;
use thiserror::Error;

/// Result of an agent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed for the composite id.
    Created,

    /// An existing record was overwritten with different content.
    Updated,

    /// The stored record already had identical content; nothing was written.
    Unchanged,
}

impl UpsertOutcome {
    /// True if the row was written (created or updated).
    pub fn changed(&self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

/// Per-chain cursor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainCursor {
    /// Chain ID
    pub chain_id: u64,

    /// Highest block fully processed
    pub last_block: u64,

    /// Unix timestamp of last update
    pub updated_at: i64,
}

/// Store invariant violations.
///
/// These are programming errors, not transient failures: retrying the same
/// call will fail again.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StorageError {
    /// A cursor update tried to move a chain's checkpoint backwards.
    #[error("Cursor regression on chain {chain_id}: current {current}, attempted {attempted}")]
    CursorRegression {
        /// Chain whose cursor was targeted
        chain_id: u64,
        /// Stored value
        current: u64,
        /// Rejected value
        attempted: u64,
    },

    /// A stored row could not be decoded into a domain record.
    #[error("Corrupt agent row {id}: {reason}")]
    CorruptRow {
        /// Row id as stored
        id: String,
        /// What failed to decode
        reason: String,
    },

    /// An update targeted an agent that is not in the store.
    #[error("Agent not found: {0}")]
    AgentNotFound(CompositeId),
}
