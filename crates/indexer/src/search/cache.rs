//! Short-TTL result cache for queries and stats.
//!
//! Purely a latency layer: every entry can be dropped at any time without
//! affecting correctness.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agentindex_core::AgentStats;
use moka::sync::Cache;
use moka::Expiry;
use serde::Serialize;

use super::ranking::{QueryPage, QueryRequest};

/// Key under which aggregate stats are cached.
pub const STATS_KEY: &str = "stats";

/// A cached response.
#[derive(Debug, Clone)]
pub enum CachedValue {
    /// Ranked query page
    Query(Arc<QueryPage>),
    /// Aggregate stats
    Stats(Arc<AgentStats>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    ttl: Duration,
}

/// Each entry expires `ttl` after it was last written.
struct EntryTtl;

impl Expiry<String, CacheEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

#[derive(Serialize)]
struct QueryKey<'a> {
    text: &'a str,
    chain_id: Option<u64>,
    service: Option<&'a str>,
    /// Bit pattern, so non-finite thresholds stay distinct from `None`
    min_reputation: Option<u64>,
    owner: Option<String>,
    limit: usize,
    offset: usize,
}

/// Build the cache key for a query.
///
/// Every parameter that changes the result is part of the key. `limit` must
/// be the clamped page size so equivalent requests share an entry.
pub fn query_key(request: &QueryRequest, limit: usize) -> String {
    let key = QueryKey {
        text: &request.text,
        chain_id: request.filters.chain_id,
        service: request.filters.service.as_deref(),
        min_reputation: request.filters.min_reputation.map(f64::to_bits),
        owner: request
            .filters
            .owner
            .as_ref()
            .map(|owner| owner.trim().to_lowercase()),
        limit,
        offset: request.offset,
    };

    // Serializing plain strings and numbers cannot fail; fall back to Debug
    // so a key is always produced.
    serde_json::to_string(&key)
        .map(|json| format!("query:{}", json))
        .unwrap_or_else(|_| format!("query:{:?}", request))
}

/// TTL cache in front of the ranking engine and stats.
#[derive(Clone)]
pub struct ResultCache {
    entries: Cache<String, CacheEntry>,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

impl ResultCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .expire_after(EntryTtl)
            .build();
        Self { entries }
    }

    /// Live value for `key`, if present and not expired.
    pub fn get(&self, key: &str) -> Option<CachedValue> {
        self.entries.get(key).map(|entry| entry.value)
    }

    /// Store `value` under `key` for `ttl_ms` milliseconds. A zero TTL stores
    /// nothing.
    pub fn set(&self, key: impl Into<String>, value: CachedValue, ttl_ms: u64) {
        if ttl_ms == 0 {
            return;
        }
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                ttl: Duration::from_millis(ttl_ms),
            },
        );
    }

    /// Cached query page.
    pub fn get_query(&self, key: &str) -> Option<Arc<QueryPage>> {
        match self.get(key)? {
            CachedValue::Query(page) => Some(page),
            CachedValue::Stats(_) => None,
        }
    }

    /// Cached stats.
    pub fn get_stats(&self) -> Option<Arc<AgentStats>> {
        match self.get(STATS_KEY)? {
            CachedValue::Stats(stats) => Some(stats),
            CachedValue::Query(_) => None,
        }
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }
}
