//! Event type definitions for the ERC-8004 Identity Registry.
//!
//! Logs are decoded here into fixed, validated shapes; nothing loosely typed
//! goes past this module.

use agentindex_core::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};

// Identity Registry events (ERC-721 based agent handles).
sol! {
    /// Emitted when a new agent handle is minted.
    #[derive(Debug, PartialEq, Eq)]
    event Registered(uint256 indexed agentId, string agentURI, address indexed owner);

    /// ERC-721 ownership transfer (also emitted on mint and burn).
    #[derive(Debug, PartialEq, Eq)]
    event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

    /// Emitted when an agent's registration file URI changes.
    #[derive(Debug, PartialEq, Eq)]
    event URIUpdated(uint256 indexed agentId, string newURI, address indexed updatedBy);
}

/// Block coordinates of a log, used to order events within a range.
fn log_position(log: &Log) -> Result<(u64, u64)> {
    let block_number = log.block_number.context("Log missing block_number")?;
    let log_index = log.log_index.context("Log missing log_index")?;
    Ok((block_number, log_index))
}

/// A new agent registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationEvent {
    /// Registry token id
    pub token_id: U256,

    /// Registration file URI
    pub metadata_uri: String,

    /// Initial owner
    pub owner: Address,

    /// Transaction hash
    pub tx_hash: B256,

    /// Block number where the event occurred
    pub block_number: u64,

    /// Log index within the block
    pub log_index: u64,
}

impl RegistrationEvent {
    /// Parse a Registered event from an Alloy log.
    pub fn from_log(log: &Log) -> Result<Self> {
        let event = Registered::decode_log(log.as_ref(), true)
            .context("Failed to decode Registered event")?;
        let (block_number, log_index) = log_position(log)?;
        let tx_hash = log
            .transaction_hash
            .context("Log missing transaction_hash")?;

        Ok(Self {
            token_id: event.agentId,
            metadata_uri: event.agentURI.clone(),
            owner: event.owner,
            tx_hash,
            block_number,
            log_index,
        })
    }
}

/// An ownership transfer of a registry token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    /// Registry token id
    pub token_id: U256,

    /// Previous owner (zero on mint)
    pub from: Address,

    /// New owner (zero on burn)
    pub new_owner: Address,

    /// Block number where the event occurred
    pub block_number: u64,

    /// Log index within the block
    pub log_index: u64,
}

impl TransferEvent {
    /// Parse a Transfer event from an Alloy log.
    pub fn from_log(log: &Log) -> Result<Self> {
        let event = Transfer::decode_log(log.as_ref(), true)
            .context("Failed to decode Transfer event")?;
        let (block_number, log_index) = log_position(log)?;

        Ok(Self {
            token_id: event.tokenId,
            from: event.from,
            new_owner: event.to,
            block_number,
            log_index,
        })
    }

    /// Mint transfers duplicate the owner carried by the registration itself.
    pub fn is_mint(&self) -> bool {
        self.from.is_zero()
    }

    /// Burns tombstone the agent.
    pub fn is_burn(&self) -> bool {
        self.new_owner.is_zero()
    }
}

/// A registration file URI change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriUpdateEvent {
    /// Registry token id
    pub token_id: U256,

    /// New registration file URI
    pub metadata_uri: String,

    /// Block number where the event occurred
    pub block_number: u64,

    /// Log index within the block
    pub log_index: u64,
}

impl UriUpdateEvent {
    /// Parse a URIUpdated event from an Alloy log.
    pub fn from_log(log: &Log) -> Result<Self> {
        let event = URIUpdated::decode_log(log.as_ref(), true)
            .context("Failed to decode URIUpdated event")?;
        let (block_number, log_index) = log_position(log)?;

        Ok(Self {
            token_id: event.agentId,
            metadata_uri: event.newURI.clone(),
            block_number,
            log_index,
        })
    }
}

/// Any registry event the listener acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// New agent
    Registration(RegistrationEvent),
    /// Owner change
    Transfer(TransferEvent),
    /// Metadata URI change
    UriUpdate(UriUpdateEvent),
}

impl RegistryEvent {
    /// Token the event refers to.
    pub fn token_id(&self) -> U256 {
        match self {
            RegistryEvent::Registration(e) => e.token_id,
            RegistryEvent::Transfer(e) => e.token_id,
            RegistryEvent::UriUpdate(e) => e.token_id,
        }
    }

    /// `(block_number, log_index)` of the event.
    pub fn position(&self) -> (u64, u64) {
        match self {
            RegistryEvent::Registration(e) => (e.block_number, e.log_index),
            RegistryEvent::Transfer(e) => (e.block_number, e.log_index),
            RegistryEvent::UriUpdate(e) => (e.block_number, e.log_index),
        }
    }
}

/// Merge the per-kind event lists into one list in chain order.
///
/// The sort is stable, so events sharing a position keep registration,
/// transfer, URI-update order.
pub fn merge_events(
    registrations: Vec<RegistrationEvent>,
    transfers: Vec<TransferEvent>,
    uri_updates: Vec<UriUpdateEvent>,
) -> Vec<RegistryEvent> {
    let mut events: Vec<RegistryEvent> = registrations
        .into_iter()
        .map(RegistryEvent::Registration)
        .chain(transfers.into_iter().map(RegistryEvent::Transfer))
        .chain(uri_updates.into_iter().map(RegistryEvent::UriUpdate))
        .collect();

    events.sort_by_key(RegistryEvent::position);
    events
}
