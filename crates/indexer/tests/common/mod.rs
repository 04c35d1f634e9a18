//! Scripted chain, resolver and reputation doubles shared by integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentindex_indexer::listener::{
    ChainListener, ChainSource, ListenerSettings, RegistrationEvent, TransferEvent, UriUpdateEvent,
};
use agentindex_indexer::metadata::MetadataResolver;
use agentindex_indexer::reputation::ReputationSource;
use agentindex_indexer::search::SearchIndex;
use agentindex_indexer::storage::Storage;
use agentindex_indexer::{Address, AgentMetadata, ReputationSummary, B256, U256};
use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::NamedTempFile;

/// In-memory chain: events are served by block range.
#[derive(Default)]
pub struct ScriptedChain {
    height: AtomicU64,
    failing: AtomicBool,
    registrations: Mutex<Vec<RegistrationEvent>>,
    transfers: Mutex<Vec<TransferEvent>>,
    uri_updates: Mutex<Vec<UriUpdateEvent>>,
    ranges: Mutex<Vec<(u64, u64)>>,
}

impl ScriptedChain {
    pub fn new(height: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.height.store(height, Ordering::SeqCst);
        Arc::new(chain)
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn register(&self, token: u64, owner: Address, uri: &str, block: u64, log_index: u64) {
        self.registrations.lock().unwrap().push(RegistrationEvent {
            token_id: U256::from(token),
            metadata_uri: uri.to_string(),
            owner,
            tx_hash: B256::with_last_byte(token as u8),
            block_number: block,
            log_index,
        });
    }

    pub fn transfer(&self, token: u64, from: Address, to: Address, block: u64, log_index: u64) {
        self.transfers.lock().unwrap().push(TransferEvent {
            token_id: U256::from(token),
            from,
            new_owner: to,
            block_number: block,
            log_index,
        });
    }

    pub fn update_uri(&self, token: u64, uri: &str, block: u64, log_index: u64) {
        self.uri_updates.lock().unwrap().push(UriUpdateEvent {
            token_id: U256::from(token),
            metadata_uri: uri.to_string(),
            block_number: block,
            log_index,
        });
    }

    /// Registration ranges requested so far.
    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("rpc unavailable");
        }
        Ok(())
    }
}

fn in_range<T: Clone>(events: &Mutex<Vec<T>>, from: u64, to: u64, block: fn(&T) -> u64) -> Vec<T> {
    let mut found: Vec<T> = events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| (from..=to).contains(&block(event)))
        .cloned()
        .collect();
    found.sort_by_key(|event| block(event));
    found
}

#[async_trait]
impl ChainSource for ScriptedChain {
    async fn current_height(&self) -> Result<u64> {
        self.check()?;
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn registration_events(&self, from: u64, to: u64) -> Result<Vec<RegistrationEvent>> {
        self.check()?;
        self.ranges.lock().unwrap().push((from, to));
        Ok(in_range(&self.registrations, from, to, |e| e.block_number))
    }

    async fn transfer_events(&self, from: u64, to: u64) -> Result<Vec<TransferEvent>> {
        self.check()?;
        Ok(in_range(&self.transfers, from, to, |e| e.block_number))
    }

    async fn uri_update_events(&self, from: u64, to: u64) -> Result<Vec<UriUpdateEvent>> {
        self.check()?;
        Ok(in_range(&self.uri_updates, from, to, |e| e.block_number))
    }
}

/// Resolver backed by a fixed map; unknown URIs fail.
#[derive(Default)]
pub struct MapResolver {
    documents: Mutex<HashMap<String, AgentMetadata>>,
}

impl MapResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, uri: &str, name: &str, description: &str, services: &[&str]) {
        self.documents.lock().unwrap().insert(
            uri.to_string(),
            AgentMetadata {
                name: name.to_string(),
                description: description.to_string(),
                services: services.iter().map(|s| s.to_string()).collect(),
                image: None,
                active: None,
            },
        );
    }
}

#[async_trait]
impl MetadataResolver for MapResolver {
    async fn resolve(&self, uri: &str) -> Result<AgentMetadata> {
        match self.documents.lock().unwrap().get(uri) {
            Some(metadata) => Ok(metadata.clone()),
            None => bail!("document not found: {}", uri),
        }
    }
}

/// Reputation source returning one fixed summary for every agent.
pub struct FixedReputation(pub ReputationSummary);

#[async_trait]
impl ReputationSource for FixedReputation {
    async fn fetch_reputation(&self, _chain_id: u64, _token_id: U256) -> Result<ReputationSummary> {
        Ok(self.0)
    }
}

/// Reputation source that answers after a fixed delay.
pub struct SlowReputation {
    pub summary: ReputationSummary,
    pub delay: Duration,
}

#[async_trait]
impl ReputationSource for SlowReputation {
    async fn fetch_reputation(&self, _chain_id: u64, _token_id: U256) -> Result<ReputationSummary> {
        tokio::time::sleep(self.delay).await;
        Ok(self.summary)
    }
}

pub async fn storage() -> (Storage, NamedTempFile) {
    let temp_db = NamedTempFile::new().unwrap();
    let storage = Storage::new_with_path(temp_db.path(), None, None)
        .await
        .unwrap();
    storage.run_migrations().await.unwrap();
    (storage, temp_db)
}

pub fn settings(chain_id: u64) -> ListenerSettings {
    ListenerSettings {
        chain_id,
        name: format!("chain-{}", chain_id),
        poll_interval: Duration::from_millis(20),
        batch_size: 1_000,
        lookback_blocks: 50,
        confirmations: 0,
        start_block: None,
        metadata_timeout: Duration::from_secs(1),
    }
}

pub fn listener(
    settings: ListenerSettings,
    chain: Arc<ScriptedChain>,
    resolver: Arc<MapResolver>,
    storage: &Storage,
    index: &Arc<SearchIndex>,
) -> ChainListener {
    ChainListener::new(settings, chain, resolver, storage.clone(), Arc::clone(index))
}

pub fn owner(byte: u8) -> Address {
    Address::repeat_byte(byte)
}
