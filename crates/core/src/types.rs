//! Core types for the agent registry.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Primary key of an agent: the registering chain plus the registry token id.
///
/// Ordering is numeric on `(chain_id, token_id)`, which gives the final
/// tie-break of every ranking a stable, human-predictable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeId {
    chain_id: u64,
    token_id: U256,
}

impl CompositeId {
    /// Create a composite id.
    pub const fn new(chain_id: u64, token_id: U256) -> Self {
        Self { chain_id, token_id }
    }

    /// Chain the agent was registered on.
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Token id minted by the identity registry.
    pub const fn token_id(&self) -> U256 {
        self.token_id
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.token_id)
    }
}

impl FromStr for CompositeId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chain, token) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidCompositeId(s.to_string()))?;

        let chain_id = chain
            .trim()
            .parse::<u64>()
            .map_err(|_| CoreError::InvalidChainId(chain.to_string()))?;
        if chain_id == 0 {
            return Err(CoreError::InvalidChainId(chain.to_string()));
        }

        let token_id = U256::from_str_radix(token.trim(), 10)
            .map_err(|_| CoreError::InvalidTokenId(token.to_string()))?;

        Ok(Self::new(chain_id, token_id))
    }
}

impl Serialize for CompositeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CompositeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Normalized off-chain registration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// Display name.
    pub name: String,

    /// Free-form description.
    pub description: String,

    /// Service tags, in document order, de-duplicated.
    pub services: Vec<String>,

    /// Image reference (URL or URI).
    pub image: Option<String>,

    /// Explicit `active` flag from the document, when present.
    pub active: Option<bool>,
}

/// Reputation signal from the external reputation source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReputationSummary {
    /// Aggregated score.
    pub score: f64,

    /// Number of feedback samples behind the score.
    pub count: u64,
}

/// An agent as stored in the registry projection.
///
/// One record exists per [`CompositeId`]. Records are never deleted;
/// deregistration and burns flip `active` to `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// `chainId:tokenId`
    pub id: CompositeId,

    /// Current owner of the registry token.
    pub owner: Address,

    /// Display name (empty until metadata resolves).
    pub name: String,

    /// Description (empty until metadata resolves).
    pub description: String,

    /// Canonical metadata URI from the registry.
    pub metadata_uri: String,

    /// Ordered service tags; may be empty.
    pub services: Vec<String>,

    /// Optional image reference.
    pub image: Option<String>,

    /// False for tombstoned agents.
    pub active: bool,

    /// Reputation score. Written only by the reputation updater.
    pub reputation_score: f64,

    /// Reputation sample count. Written only by the reputation updater.
    pub reputation_count: u64,

    /// Transaction that emitted the registration.
    pub tx_hash: B256,

    /// Block that contained the registration.
    pub block_number: u64,

    /// First time the indexer saw this agent (unix seconds).
    pub registered_at: i64,

    /// Last time any field changed (unix seconds).
    pub updated_at: i64,
}

impl AgentRecord {
    /// Create a freshly registered agent with empty display fields and zero reputation.
    pub fn new(
        id: CompositeId,
        owner: Address,
        metadata_uri: impl Into<String>,
        tx_hash: B256,
        block_number: u64,
        now: i64,
    ) -> Self {
        Self {
            id,
            owner,
            name: String::new(),
            description: String::new(),
            metadata_uri: metadata_uri.into(),
            services: Vec::new(),
            image: None,
            active: true,
            reputation_score: 0.0,
            reputation_count: 0,
            tx_hash,
            block_number,
            registered_at: now,
            updated_at: now,
        }
    }

    /// Chain the agent lives on.
    pub fn chain_id(&self) -> u64 {
        self.id.chain_id()
    }

    /// Registry token id.
    pub fn token_id(&self) -> U256 {
        self.id.token_id()
    }

    /// Overwrite display fields from a resolved document.
    pub fn apply_metadata(&mut self, metadata: AgentMetadata) {
        self.name = metadata.name;
        self.description = metadata.description;
        self.services = metadata.services;
        self.image = metadata.image;
        if let Some(active) = metadata.active {
            self.active = active;
        }
    }

    /// True when every field except the two timestamps matches `other`.
    pub fn same_content(&self, other: &AgentRecord) -> bool {
        self.id == other.id
            && self.owner == other.owner
            && self.name == other.name
            && self.description == other.description
            && self.metadata_uri == other.metadata_uri
            && self.services == other.services
            && self.image == other.image
            && self.active == other.active
            && self.reputation_score.to_bits() == other.reputation_score.to_bits()
            && self.reputation_count == other.reputation_count
            && self.tx_hash == other.tx_hash
            && self.block_number == other.block_number
    }
}

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    /// Total number of agent records (active and inactive).
    pub total: u64,

    /// Record count per chain id.
    pub by_chain: BTreeMap<u64, u64>,

    /// Record count per service tag.
    pub by_service_tag: BTreeMap<String, u64>,
}
