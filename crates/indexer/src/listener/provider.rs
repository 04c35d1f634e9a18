//! RPC provider wrapper for Identity Registry log access.

use agentindex_core::Address;
use alloy::primitives::B256;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use super::events::{
    Registered, RegistrationEvent, Transfer, TransferEvent, URIUpdated, UriUpdateEvent,
};

/// Read access to one chain's Identity Registry.
///
/// Ranges are inclusive on both ends. Each method returns its events in
/// ascending `(block_number, log_index)` order.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Latest block height of the chain.
    async fn current_height(&self) -> Result<u64>;

    /// `Registered` events in `[from_block, to_block]`.
    async fn registration_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RegistrationEvent>>;

    /// `Transfer` events in `[from_block, to_block]`.
    async fn transfer_events(&self, from_block: u64, to_block: u64) -> Result<Vec<TransferEvent>>;

    /// `URIUpdated` events in `[from_block, to_block]`.
    async fn uri_update_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<UriUpdateEvent>>;
}

/// HTTP RPC provider for querying an Identity Registry.
#[derive(Clone)]
pub struct RpcProvider {
    provider: RootProvider<Http<Client>>,
    identity_registry: Address,
}

impl RpcProvider {
    /// Create a new RPC provider.
    pub fn new(rpc_url: &str, identity_registry: Address) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self {
            provider,
            identity_registry,
        })
    }

    /// Registry contract this provider reads.
    pub fn identity_registry(&self) -> Address {
        self.identity_registry
    }

    async fn fetch_logs(&self, signature: B256, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(self.identity_registry)
            .event_signature(signature)
            .from_block(from_block)
            .to_block(to_block);

        self.provider
            .get_logs(&filter)
            .await
            .with_context(|| {
                format!(
                    "Failed to fetch logs from RPC for blocks {}-{}",
                    from_block, to_block
                )
            })
    }
}

/// Decode every log, skipping (and logging) malformed ones, then sort.
fn decode_sorted<T>(
    logs: &[Log],
    name: &str,
    decode: impl Fn(&Log) -> Result<T>,
    position: impl Fn(&T) -> (u64, u64),
) -> Vec<T> {
    let mut events = Vec::with_capacity(logs.len());
    for log in logs {
        match decode(log) {
            Ok(event) => events.push(event),
            Err(e) => warn!("Failed to parse {} event: {:#}", name, e),
        }
    }
    events.sort_by_key(|event| position(event));
    events
}

#[async_trait]
impl ChainSource for RpcProvider {
    async fn current_height(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("Failed to get block number")
    }

    async fn registration_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RegistrationEvent>> {
        let logs = self
            .fetch_logs(Registered::SIGNATURE_HASH, from_block, to_block)
            .await?;
        Ok(decode_sorted(
            &logs,
            "Registered",
            RegistrationEvent::from_log,
            |e| (e.block_number, e.log_index),
        ))
    }

    async fn transfer_events(&self, from_block: u64, to_block: u64) -> Result<Vec<TransferEvent>> {
        let logs = self
            .fetch_logs(Transfer::SIGNATURE_HASH, from_block, to_block)
            .await?;
        Ok(decode_sorted(
            &logs,
            "Transfer",
            TransferEvent::from_log,
            |e| (e.block_number, e.log_index),
        ))
    }

    async fn uri_update_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<UriUpdateEvent>> {
        let logs = self
            .fetch_logs(URIUpdated::SIGNATURE_HASH, from_block, to_block)
            .await?;
        Ok(decode_sorted(
            &logs,
            "URIUpdated",
            UriUpdateEvent::from_log,
            |e| (e.block_number, e.log_index),
        ))
    }
}
