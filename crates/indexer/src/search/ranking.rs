//! Structural filtering, ordering and pagination of search candidates.

use std::sync::Arc;

use agentindex_core::AgentRecord;
use serde::{Deserialize, Serialize};

use super::index::{compare_ranked, SearchHit, SearchIndex};

/// Optional structural filters. `None` means "don't filter".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentFilters {
    /// Exact chain id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,

    /// Service tag the agent must carry (case-insensitive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Inclusive reputation floor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_reputation: Option<f64>,

    /// Owner address (case-insensitive hex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl AgentFilters {
    /// True if `record` passes every supplied filter.
    ///
    /// Predicates are checked in a fixed order: chain, service tag, minimum
    /// reputation, owner.
    pub fn matches(&self, record: &AgentRecord) -> bool {
        if let Some(chain_id) = self.chain_id {
            if record.chain_id() != chain_id {
                return false;
            }
        }

        if let Some(service) = &self.service {
            if !record
                .services
                .iter()
                .any(|tag| tag.eq_ignore_ascii_case(service))
            {
                return false;
            }
        }

        if let Some(min_reputation) = self.min_reputation {
            if record.reputation_score < min_reputation {
                return false;
            }
        }

        if let Some(owner) = &self.owner {
            if !record.owner.to_string().eq_ignore_ascii_case(owner.trim()) {
                return false;
            }
        }

        true
    }
}

/// A paginated search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Free text; empty matches everything
    #[serde(default)]
    pub text: String,

    /// Structural filters
    #[serde(default)]
    pub filters: AgentFilters,

    /// Page size (clamped to the engine maximum)
    pub limit: usize,

    /// Number of results to skip
    #[serde(default)]
    pub offset: usize,
}

/// One page of ranked results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPage {
    /// The requested slice
    pub results: Vec<SearchHit>,

    /// Number of results after filtering, before slicing
    pub total: usize,
}

/// Turns a query into a ranked, filtered page over the search index.
#[derive(Debug, Clone)]
pub struct RankingEngine {
    index: Arc<SearchIndex>,
    max_page_size: usize,
    max_candidates: usize,
}

impl RankingEngine {
    /// Create an engine over `index`.
    pub fn new(index: Arc<SearchIndex>, max_page_size: usize, max_candidates: usize) -> Self {
        Self {
            index,
            max_page_size,
            max_candidates,
        }
    }

    /// Page size actually served for a requested `limit`.
    pub fn clamp_limit(&self, limit: usize) -> usize {
        limit.min(self.max_page_size)
    }

    /// Run a query. Never fails: no matches is an empty page.
    pub async fn query(&self, request: &QueryRequest) -> QueryPage {
        let candidates = self
            .index
            .search(&request.text, self.max_candidates)
            .await;

        let mut filtered: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|hit| request.filters.matches(&hit.record))
            .collect();

        filtered.sort_by(|a, b| compare_ranked(a.score, &a.record, b.score, &b.record));

        let total = filtered.len();
        let limit = self.clamp_limit(request.limit);
        let results = filtered
            .into_iter()
            .skip(request.offset)
            .take(limit)
            .collect();

        QueryPage { results, total }
    }
}
