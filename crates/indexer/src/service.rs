//! Read-side query surface consumed by an API layer.
//!
//! [`RegistryService`] fronts the ranking engine and the store with the
//! result cache. The cache is optional; every answer is identical with it
//! disabled.

use std::sync::Arc;

use agentindex_core::{Address, AgentRecord, AgentStats, U256};
use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::search::cache::{query_key, STATS_KEY};
use crate::search::{CachedValue, QueryPage, QueryRequest, RankingEngine, ResultCache, SearchIndex};
use crate::storage::Storage;

/// Agent lookups, ranked search and stats.
#[derive(Debug, Clone)]
pub struct RegistryService {
    storage: Storage,
    index: Arc<SearchIndex>,
    ranking: RankingEngine,
    cache: Option<ResultCache>,
    query_ttl_ms: u64,
    stats_ttl_ms: u64,
}

impl RegistryService {
    /// Create a service over `storage` and `index`.
    pub fn new(storage: Storage, index: Arc<SearchIndex>, config: &SearchConfig) -> Self {
        let ranking = RankingEngine::new(
            Arc::clone(&index),
            config.max_page_size,
            config.max_candidates,
        );
        let cache = config
            .cache_enabled
            .then(|| ResultCache::new(config.cache_capacity));

        Self {
            storage,
            index,
            ranking,
            cache,
            query_ttl_ms: config.query_cache_ttl_ms,
            stats_ttl_ms: config.stats_cache_ttl_ms,
        }
    }

    /// Reload the search index from the store. Returns the number of records.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let records = self
            .storage
            .all_agents()
            .await
            .context("Failed to load agents for index rebuild")?;
        let count = records.len();

        self.index.rebuild(records).await;
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }

        info!("Search index rebuilt with {} agents", count);
        Ok(count)
    }

    /// Ranked, filtered, paginated search.
    pub async fn query(&self, request: &QueryRequest) -> QueryPage {
        let Some(cache) = &self.cache else {
            return self.ranking.query(request).await;
        };

        let key = query_key(request, self.ranking.clamp_limit(request.limit));
        if let Some(page) = cache.get_query(&key) {
            debug!("Query cache hit");
            return page.as_ref().clone();
        }

        let page = self.ranking.query(request).await;
        cache.set(
            key,
            CachedValue::Query(Arc::new(page.clone())),
            self.query_ttl_ms,
        );
        page
    }

    /// One agent by chain and token id.
    pub async fn get(&self, chain_id: u64, token_id: U256) -> Result<Option<AgentRecord>> {
        self.storage.get_agent(chain_id, token_id).await
    }

    /// Every agent an address owns, on any chain.
    pub async fn get_by_owner(&self, owner: &Address) -> Result<Vec<AgentRecord>> {
        self.storage.get_agents_by_owner(owner).await
    }

    /// Aggregate counts.
    pub async fn stats(&self) -> Result<AgentStats> {
        if let Some(stats) = self.cache.as_ref().and_then(ResultCache::get_stats) {
            return Ok(stats.as_ref().clone());
        }

        let stats = self.storage.stats().await?;
        if let Some(cache) = &self.cache {
            cache.set(
                STATS_KEY,
                CachedValue::Stats(Arc::new(stats.clone())),
                self.stats_ttl_ms,
            );
        }
        Ok(stats)
    }

    /// The index this service reads.
    pub fn index(&self) -> &Arc<SearchIndex> {
        &self.index
    }
}
