//! # agentindex core
//!
//! Domain types shared by the agent registry indexer and its query surface.
//!
//! ## Features
//!
//! - **Identity**: `CompositeId` (`chainId:tokenId`), the primary key of every agent
//! - **Records**: `AgentRecord`, the persisted projection of an on-chain registration
//! - **Enrichment**: `AgentMetadata` (off-chain document) and `ReputationSummary`
//! - **Aggregates**: `AgentStats` for administrative queries
//! - **Constants**: tunable defaults used across the workspace

#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod types;

pub use constants::*;
pub use error::{CoreError, Result};
pub use types::*;

// Re-export Alloy primitives for convenience
pub use alloy_primitives::{Address, B256, U256};
