//! Defaults shared by the indexer, the search engine and configuration.

/// Polling interval for a chain listener once caught up (seconds).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Blocks per `eth_getLogs` request during catch-up.
///
/// Large enough to amortize round trips, small enough for the common
/// provider limits on log queries.
pub const DEFAULT_BATCH_SIZE: u64 = 2_000;

/// How far below the chain head a listener starts when no cursor exists.
pub const DEFAULT_LOOKBACK_BLOCKS: u64 = 10_000;

/// Upper bound on the page size a caller may request.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 100;

/// Candidate ceiling passed from the ranking engine to the search index.
pub const DEFAULT_MAX_CANDIDATES: usize = 10_000;

/// TTL for cached query pages (milliseconds).
pub const DEFAULT_QUERY_CACHE_TTL_MS: u64 = 30_000;

/// TTL for cached aggregate stats (milliseconds).
pub const DEFAULT_STATS_CACHE_TTL_MS: u64 = 60_000;

/// Timeout for off-chain metadata fetches (seconds).
pub const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 10;

/// Timeout for reputation lookups (seconds).
pub const DEFAULT_REPUTATION_TIMEOUT_SECS: u64 = 10;

/// Public gateway used to resolve `ipfs://` metadata URIs.
pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";
