//! Search over indexed agents.
//!
//! This module provides:
//! - Tokenization shared by indexing and querying
//! - The in-memory [`SearchIndex`]
//! - The [`RankingEngine`] (filters, ordering, pagination)
//! - The [`ResultCache`] in front of queries and stats

pub mod cache;
pub mod index;
pub mod ranking;
pub mod tokenize;

pub use cache::{CachedValue, ResultCache};
pub use index::{SearchHit, SearchIndex};
pub use ranking::{AgentFilters, QueryPage, QueryRequest, RankingEngine};
