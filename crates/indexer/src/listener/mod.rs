//! Chain listeners for ERC-8004 Identity Registry events.
//!
//! This module provides:
//! - Event type definitions and parsing
//! - The chain RPC boundary ([`ChainSource`]) and its alloy-backed provider
//! - The per-chain listener (historical catch-up and live polling)

pub mod events;
pub mod provider;
pub mod sync;

pub use events::{RegistrationEvent, RegistryEvent, TransferEvent, UriUpdateEvent};
pub use provider::{ChainSource, RpcProvider};
pub use sync::{ChainListener, ListenerSettings, ListenerState, TickReport};
