//! In-memory text index over agent records.
//!
//! The index is a derived view: it can be dropped and rebuilt from the
//! store at any time. Each record's postings are replaced wholesale on
//! upsert, so repeated updates never accumulate stale tokens.
//!
//! Reputation fields are owned by the reputation updater. Listener refreshes
//! go through [`SearchIndex::refresh_many`], which keeps the indexed
//! reputation of a record it already holds, so a copy read from the store
//! before an update landed cannot roll the score back.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use agentindex_core::{AgentRecord, CompositeId, ReputationSummary};
use serde::Serialize;
use tokio::sync::RwLock;

use super::tokenize::token_set;

/// Weight of a query token found in the agent name.
pub const NAME_WEIGHT: u32 = 8;

/// Weight of a query token found in the description.
pub const DESCRIPTION_WEIGHT: u32 = 4;

/// Weight of a query token found in a service tag.
pub const SERVICE_WEIGHT: u32 = 2;

/// Weight of the token id, so records without resolved metadata stay
/// searchable.
pub const TOKEN_ID_WEIGHT: u32 = 1;

/// A scored search candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Relevance score (0 for an empty query)
    pub score: u32,

    /// Indexed record
    pub record: AgentRecord,
}

/// Total order for ranked results: score desc, reputation desc, id asc.
pub fn compare_ranked(
    a_score: u32,
    a: &AgentRecord,
    b_score: u32,
    b: &AgentRecord,
) -> Ordering {
    b_score
        .cmp(&a_score)
        .then_with(|| b.reputation_score.total_cmp(&a.reputation_score))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Default)]
struct IndexInner {
    records: HashMap<CompositeId, AgentRecord>,
    /// token -> (id -> field weight)
    postings: HashMap<String, HashMap<CompositeId, u32>>,
    /// id -> tokens it is posted under, for removal
    terms: HashMap<CompositeId, Vec<String>>,
}

impl IndexInner {
    fn upsert(&mut self, record: AgentRecord) {
        let id = record.id;
        self.remove_postings(&id);

        let weights = field_weights(&record);
        let mut terms = Vec::with_capacity(weights.len());
        for (token, weight) in weights {
            self.postings
                .entry(token.clone())
                .or_default()
                .insert(id, weight);
            terms.push(token);
        }

        self.terms.insert(id, terms);
        self.records.insert(id, record);
    }

    fn refresh(&mut self, mut record: AgentRecord) {
        if let Some(indexed) = self.records.get(&record.id) {
            record.reputation_score = indexed.reputation_score;
            record.reputation_count = indexed.reputation_count;
        }
        self.upsert(record);
    }

    fn remove(&mut self, id: &CompositeId) -> Option<AgentRecord> {
        self.remove_postings(id);
        self.records.remove(id)
    }

    fn remove_postings(&mut self, id: &CompositeId) {
        let Some(terms) = self.terms.remove(id) else {
            return;
        };
        for token in terms {
            if let Some(posting) = self.postings.get_mut(&token) {
                posting.remove(id);
                if posting.is_empty() {
                    self.postings.remove(&token);
                }
            }
        }
    }

    fn search(&self, query: &str, max_candidates: usize) -> Vec<SearchHit> {
        let query_tokens = token_set(query);

        let mut scored: Vec<(u32, &AgentRecord)> = if query_tokens.is_empty() {
            self.records.values().map(|record| (0, record)).collect()
        } else {
            let mut scores: HashMap<CompositeId, u32> = HashMap::new();
            for token in &query_tokens {
                if let Some(posting) = self.postings.get(token) {
                    for (id, weight) in posting {
                        *scores.entry(*id).or_insert(0) += weight;
                    }
                }
            }
            scores
                .into_iter()
                .filter_map(|(id, score)| self.records.get(&id).map(|record| (score, record)))
                .collect()
        };

        scored.sort_by(|(a_score, a), (b_score, b)| compare_ranked(*a_score, a, *b_score, b));
        scored.truncate(max_candidates);

        scored
            .into_iter()
            .map(|(score, record)| SearchHit {
                score,
                record: record.clone(),
            })
            .collect()
    }
}

/// Per-token weight of a record: the sum of the weights of every field the
/// token occurs in.
fn field_weights(record: &AgentRecord) -> HashMap<String, u32> {
    let mut weights = HashMap::new();

    let services: BTreeSet<String> = record
        .services
        .iter()
        .flat_map(|tag| token_set(tag))
        .collect();

    let fields = [
        (token_set(&record.name), NAME_WEIGHT),
        (token_set(&record.description), DESCRIPTION_WEIGHT),
        (services, SERVICE_WEIGHT),
        (token_set(&record.token_id().to_string()), TOKEN_ID_WEIGHT),
    ];

    for (tokens, weight) in fields {
        for token in tokens {
            *weights.entry(token).or_insert(0) += weight;
        }
    }

    weights
}

/// Concurrent search index shared by listeners, the reputation updater and
/// the query path.
#[derive(Debug, Default)]
pub struct SearchIndex {
    inner: RwLock<IndexInner>,
}

impl SearchIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record and its postings.
    pub async fn upsert(&self, record: AgentRecord) {
        self.inner.write().await.upsert(record);
    }

    /// Insert or replace several records under one write lock.
    pub async fn upsert_many(&self, records: impl IntoIterator<Item = AgentRecord>) {
        let mut inner = self.inner.write().await;
        for record in records {
            inner.upsert(record);
        }
    }

    /// Insert or replace several records, keeping the indexed reputation of
    /// any record already present.
    pub async fn refresh_many(&self, records: impl IntoIterator<Item = AgentRecord>) {
        let mut inner = self.inner.write().await;
        for record in records {
            inner.refresh(record);
        }
    }

    /// Overwrite the reputation of an indexed record. Returns false if the
    /// record is not indexed.
    pub async fn set_reputation(&self, id: &CompositeId, summary: &ReputationSummary) -> bool {
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(id) {
            Some(record) => {
                record.reputation_score = summary.score;
                record.reputation_count = summary.count;
                true
            }
            None => false,
        }
    }

    /// Drop a record from the index.
    pub async fn remove(&self, id: &CompositeId) -> Option<AgentRecord> {
        self.inner.write().await.remove(id)
    }

    /// Indexed copy of a record.
    pub async fn get(&self, id: &CompositeId) -> Option<AgentRecord> {
        self.inner.read().await.records.get(id).cloned()
    }

    /// Score records against `query` and return the best `max_candidates`.
    ///
    /// An empty (or punctuation-only) query matches every record with score
    /// 0, ordered by reputation then id.
    pub async fn search(&self, query: &str, max_candidates: usize) -> Vec<SearchHit> {
        self.inner.read().await.search(query, max_candidates)
    }

    /// Replace the whole index contents.
    pub async fn rebuild(&self, records: impl IntoIterator<Item = AgentRecord>) {
        let mut fresh = IndexInner::default();
        for record in records {
            fresh.upsert(record);
        }
        *self.inner.write().await = fresh;
    }

    /// Drop everything.
    pub async fn clear(&self) {
        *self.inner.write().await = IndexInner::default();
    }

    /// Number of indexed records.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// True if nothing is indexed.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }

    #[cfg(test)]
    async fn posting_count(&self) -> usize {
        self.inner.read().await.postings.values().map(HashMap::len).sum()
    }
}
