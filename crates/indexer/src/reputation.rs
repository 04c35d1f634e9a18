//! Reputation enrichment for newly discovered agents.
//!
//! The updater runs out-of-band from indexing: listeners hand it the ids
//! they just created and move on. Each id is processed independently and a
//! failure for one never affects the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agentindex_core::{Address, CompositeId, ReputationSummary, U256};
use alloy::providers::{ProviderBuilder, RootProvider};
use alloy::sol;
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::search::SearchIndex;
use crate::storage::{Storage, UpsertOutcome};

// ERC-8004 Reputation Registry read surface
sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract ReputationRegistry {
        function getClients(uint256 agentId) external view returns (address[] memory);
        function getSummary(
            uint256 agentId,
            address[] calldata clientAddresses,
            string tag1,
            string tag2
        ) external view returns (uint64 count, int128 summaryValue, uint8 summaryValueDecimals);
    }
}

/// External reputation signal for agents.
#[async_trait]
pub trait ReputationSource: Send + Sync {
    /// Current score and sample count for one agent.
    async fn fetch_reputation(&self, chain_id: u64, token_id: U256) -> Result<ReputationSummary>;
}

/// Reads `getSummary` from an ERC-8004 Reputation Registry.
pub struct Erc8004ReputationSource {
    contract: ReputationRegistry::ReputationRegistryInstance<Http<Client>, RootProvider<Http<Client>>>,
}

impl Erc8004ReputationSource {
    /// Create a source for the registry at `registry` behind `rpc_url`.
    pub fn new(rpc_url: &str, registry: Address) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;
        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self {
            contract: ReputationRegistry::new(registry, provider),
        })
    }
}

/// Scale a fixed-point summary value to a float score.
pub fn scale_summary(value: i128, decimals: u8) -> f64 {
    value as f64 / 10f64.powi(i32::from(decimals))
}

#[async_trait]
impl ReputationSource for Erc8004ReputationSource {
    async fn fetch_reputation(&self, chain_id: u64, token_id: U256) -> Result<ReputationSummary> {
        let clients = self
            .contract
            .getClients(token_id)
            .call()
            .await
            .with_context(|| format!("Failed to query clients for {}:{}", chain_id, token_id))?
            ._0;

        // No feedback yet
        if clients.is_empty() {
            return Ok(ReputationSummary::default());
        }

        let summary = self
            .contract
            .getSummary(token_id, clients, String::new(), String::new())
            .call()
            .await
            .with_context(|| format!("Failed to query summary for {}:{}", chain_id, token_id))?;

        Ok(ReputationSummary {
            score: scale_summary(summary.summaryValue, summary.summaryValueDecimals),
            count: summary.count,
        })
    }
}

/// Counts from one updater pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Records whose reputation changed
    pub updated: usize,
    /// Records that already held the fetched values
    pub unchanged: usize,
    /// Ids that failed (fetch, timeout or store error)
    pub failed: usize,
    /// Ids skipped because no source is configured for the chain
    pub skipped: usize,
}

/// Fetches reputation for agents and writes it back to store and index.
///
/// This is the only writer of reputation fields after creation.
pub struct ReputationUpdater {
    storage: Storage,
    index: Arc<SearchIndex>,
    sources: HashMap<u64, Arc<dyn ReputationSource>>,
    timeout: Duration,
    tasks: TaskTracker,
}

impl ReputationUpdater {
    /// Create an updater with no sources.
    pub fn new(storage: Storage, index: Arc<SearchIndex>, timeout: Duration) -> Self {
        Self {
            storage,
            index,
            sources: HashMap::new(),
            timeout,
            tasks: TaskTracker::new(),
        }
    }

    /// Register the reputation source for a chain.
    pub fn with_source(mut self, chain_id: u64, source: Arc<dyn ReputationSource>) -> Self {
        self.sources.insert(chain_id, source);
        self
    }

    /// True if a source is registered for `chain_id`.
    pub fn has_source(&self, chain_id: u64) -> bool {
        self.sources.contains_key(&chain_id)
    }

    /// Refresh reputation for `ids` on `chain_id`.
    ///
    /// Best-effort and idempotent: values are overwritten, never summed, so
    /// running it twice for the same id leaves the same record.
    pub async fn update(&self, chain_id: u64, ids: &[CompositeId]) -> UpdateReport {
        let mut report = UpdateReport::default();

        let Some(source) = self.sources.get(&chain_id) else {
            debug!(chain_id, "No reputation source configured, skipping {} ids", ids.len());
            report.skipped = ids.len();
            return report;
        };

        for id in ids {
            match self.update_one(source.as_ref(), id).await {
                Ok(UpsertOutcome::Unchanged) => report.unchanged += 1,
                Ok(_) => report.updated += 1,
                Err(e) => {
                    warn!(chain_id, agent = %id, "Reputation update failed: {:#}", e);
                    report.failed += 1;
                }
            }
        }

        if report.updated > 0 || report.failed > 0 {
            info!(
                chain_id,
                updated = report.updated,
                unchanged = report.unchanged,
                failed = report.failed,
                "Reputation pass complete"
            );
        }

        report
    }

    async fn update_one(&self, source: &dyn ReputationSource, id: &CompositeId) -> Result<UpsertOutcome> {
        let summary = tokio::time::timeout(
            self.timeout,
            source.fetch_reputation(id.chain_id(), id.token_id()),
        )
        .await
        .with_context(|| format!("Reputation lookup timed out after {:?}", self.timeout))??;

        let now = chrono::Utc::now().timestamp();
        let outcome = self.storage.update_reputation(id, &summary, now).await?;

        // Patch only the reputation fields so a concurrent listener refresh
        // cannot be overwritten with an older copy of the record.
        if outcome.changed() && !self.index.set_reputation(id, &summary).await {
            if let Some(record) = self.storage.get_agent_by_id(id).await? {
                self.index.refresh_many([record]).await;
            }
        }

        Ok(outcome)
    }

    /// Run [`ReputationUpdater::update`] in the background.
    ///
    /// Returns `None` when there is nothing to do.
    pub fn spawn_update(
        self: &Arc<Self>,
        chain_id: u64,
        ids: Vec<CompositeId>,
    ) -> Option<JoinHandle<UpdateReport>> {
        if ids.is_empty() {
            return None;
        }

        let updater = Arc::clone(self);
        Some(self.tasks.spawn(async move {
            updater.update(chain_id, &ids).await
        }))
    }

    /// Number of background passes still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every background pass to finish.
    ///
    /// Call after the listeners have stopped and before the store is closed.
    /// Passes spawned after this returns are still tracked.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
        debug!("Reputation passes drained");
    }
}
