//! Multi-chain ERC-8004 agent registry indexer.
//!
//! This crate provides:
//! - Per-chain listeners for Identity Registry events (`Registered`,
//!   `Transfer`, `URIUpdated`) with checkpointed historical catch-up
//! - The agent store: one record per `chainId:tokenId`, overwrite-by-key
//! - Registration file resolution (IPFS, HTTP(S), `data:` URIs)
//! - Out-of-band reputation enrichment from the Reputation Registry
//! - An in-memory full-text index, ranked filtering and a TTL result cache
//!
//! # Architecture
//!
//! ```text
//!  chain A RPC        chain B RPC
//!      │                  │
//! ┌────▼──────────┐ ┌─────▼─────────┐
//! │ ChainListener │ │ ChainListener │   one tokio task per chain
//! │  catch-up →   │ │  catch-up →   │
//! │  polling      │ │  polling      │
//! └──┬─────────┬──┘ └──┬─────────┬──┘
//!    │         │       │         │
//!    │   ┌─────▼───────▼─────┐   │
//!    │   │   Agent Store     │ ← SQLite (agents + cursors)
//!    │   └─────────┬─────────┘   │
//!    │             │             │
//!    │   ┌─────────▼─────────┐   │
//!    └──►│   Search Index    │◄──┘
//!        └─────────┬─────────┘
//!                  │          ┌────────────────────┐
//!                  │          │ ReputationUpdater  │ ← Reputation Registry
//!                  │◄─────────┤ (new agents only)  │
//!                  │          └────────────────────┘
//!        ┌─────────▼─────────┐
//!        │  RankingEngine    │
//!        │  + ResultCache    │ → RegistryService (query, get, stats)
//!        └───────────────────┘
//! ```
//!
//! The store is the source of truth. The index is derived from it and is
//! rebuilt at startup; the cache is optional and bounded by TTL.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod listener;
pub mod metadata;
pub mod reputation;
pub mod runtime;
pub mod search;
pub mod service;
pub mod storage;

// Re-export common types
pub use agentindex_core::*;
