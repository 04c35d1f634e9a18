//! Configuration management for the agent registry indexer.
//!
//! This module handles loading configuration from:
//! - TOML files
//! - Environment variables (`${VAR}` placeholders expanded before parsing)
//! - Default values (fallbacks)

use agentindex_core::{
    DEFAULT_BATCH_SIZE, DEFAULT_IPFS_GATEWAY, DEFAULT_LOOKBACK_BLOCKS, DEFAULT_MAX_CANDIDATES,
    DEFAULT_MAX_PAGE_SIZE, DEFAULT_METADATA_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_QUERY_CACHE_TTL_MS, DEFAULT_REPUTATION_TIMEOUT_SECS, DEFAULT_STATS_CACHE_TTL_MS,
};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// One entry per indexed chain
    pub chains: Vec<ChainConfig>,

    /// Registration file resolution
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Reputation enrichment
    #[serde(default)]
    pub reputation: ReputationConfig,

    /// Query path settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://agentindex.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Per-chain listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Human-readable name used in logs
    pub name: String,

    /// Chain ID (e.g., 8453 for Base)
    pub chain_id: u64,

    /// JSON-RPC endpoint
    pub rpc_url: String,

    /// ERC-8004 Identity Registry address
    pub identity_registry: Address,

    /// ERC-8004 Reputation Registry address (reputation lookups are skipped
    /// on this chain when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reputation_registry: Option<Address>,

    /// Polling interval in seconds for new blocks
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Blocks per log query
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Depth below the chain head to start from when no cursor exists
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,

    /// Blocks to stay behind the head
    #[serde(default)]
    pub confirmations: u64,

    /// First block to scan when no cursor exists (overrides lookback)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_block: Option<u64>,
}

/// Registration file resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Per-document fetch timeout
    #[serde(default = "default_metadata_timeout_secs")]
    pub timeout_secs: u64,

    /// Gateway prefix for `ipfs://` URIs
    #[serde(default = "default_ipfs_gateway")]
    pub ipfs_gateway: String,

    /// Documents larger than this are rejected
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_metadata_timeout_secs(),
            ipfs_gateway: default_ipfs_gateway(),
            max_document_bytes: default_max_document_bytes(),
        }
    }
}

/// Reputation enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Fetch reputation for newly discovered agents
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-agent lookup timeout
    #[serde(default = "default_reputation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_reputation_timeout_secs(),
        }
    }
}

/// Query path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Server-side page size ceiling
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Candidates pulled from the text index before filtering
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Serve repeated queries from the result cache
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Query result TTL
    #[serde(default = "default_query_cache_ttl_ms")]
    pub query_cache_ttl_ms: u64,

    /// Stats TTL
    #[serde(default = "default_stats_cache_ttl_ms")]
    pub stats_cache_ttl_ms: u64,

    /// Maximum cached entries
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_page_size: default_max_page_size(),
            max_candidates: default_max_candidates(),
            cache_enabled: true,
            query_cache_ttl_ms: default_query_cache_ttl_ms(),
            stats_cache_ttl_ms: default_stats_cache_ttl_ms(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_batch_size() -> u64 {
    DEFAULT_BATCH_SIZE
}

fn default_lookback_blocks() -> u64 {
    DEFAULT_LOOKBACK_BLOCKS
}

fn default_metadata_timeout_secs() -> u64 {
    DEFAULT_METADATA_TIMEOUT_SECS
}

fn default_ipfs_gateway() -> String {
    DEFAULT_IPFS_GATEWAY.to_string()
}

fn default_max_document_bytes() -> usize {
    1_048_576 // 1 MiB
}

fn default_reputation_timeout_secs() -> u64 {
    DEFAULT_REPUTATION_TIMEOUT_SECS
}

fn default_max_page_size() -> usize {
    DEFAULT_MAX_PAGE_SIZE
}

fn default_max_candidates() -> usize {
    DEFAULT_MAX_CANDIDATES
}

fn default_query_cache_ttl_ms() -> u64 {
    DEFAULT_QUERY_CACHE_TTL_MS
}

fn default_stats_cache_ttl_ms() -> u64 {
    DEFAULT_STATS_CACHE_TTL_MS
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables can be referenced using `${VAR_NAME}` syntax.
    /// For example: `rpc_url = "${BASE_RPC_URL}"`
    ///
    /// # Example
    /// ```no_run
    /// # use agentindex_indexer::config::Config;
    /// let config = Config::from_file("indexer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        // Expand environment variables before parsing
        let expanded = Self::expand_env_vars(&contents)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// A chainless configuration for offline commands against `database_url`.
    ///
    /// Not valid for running listeners.
    pub fn with_database(database_url: &str) -> Self {
        Self {
            database: DatabaseConfig {
                url: database_url.to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
            },
            chains: Vec::new(),
            metadata: MetadataConfig::default(),
            reputation: ReputationConfig::default(),
            search: SearchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Look up a chain by id.
    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|chain| chain.chain_id == chain_id)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        // Validate database URL
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        // Validate connection pool settings
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.chains.is_empty() {
            anyhow::bail!("At least one [[chains]] entry is required");
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            chain
                .validate()
                .with_context(|| format!("Invalid chain config '{}'", chain.name))?;
            if !seen.insert(chain.chain_id) {
                anyhow::bail!("Duplicate chain_id {} in [[chains]]", chain.chain_id);
            }
        }

        if self.metadata.timeout_secs == 0 {
            anyhow::bail!("Metadata timeout_secs must be > 0");
        }
        if self.metadata.max_document_bytes == 0 {
            anyhow::bail!("Metadata max_document_bytes must be > 0");
        }
        let gateway = self.metadata.ipfs_gateway.trim();
        if !(gateway.starts_with("https://") || gateway.starts_with("http://")) {
            anyhow::bail!(
                "Metadata ipfs_gateway must be an http(s) URL (got '{}')",
                self.metadata.ipfs_gateway
            );
        }

        if self.reputation.timeout_secs == 0 {
            anyhow::bail!("Reputation timeout_secs must be > 0");
        }

        if self.search.max_page_size == 0 {
            anyhow::bail!("Search max_page_size must be > 0");
        }
        if self.search.max_candidates < self.search.max_page_size {
            anyhow::bail!(
                "Search max_candidates ({}) cannot be smaller than max_page_size ({})",
                self.search.max_candidates,
                self.search.max_page_size
            );
        }
        if self.search.cache_enabled && self.search.cache_capacity == 0 {
            anyhow::bail!("Search cache_capacity must be > 0 when the cache is enabled");
        }

        // Validate logging level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        // Validate logging format
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }

    /// Expand environment variables in the format `${VAR_NAME}`.
    ///
    /// Placeholders inside TOML comments (after a `#` outside any string) are
    /// left untouched; placeholders inside any string form are expanded.
    ///
    /// # Errors
    /// Returns an error if a referenced environment variable is not set, or a
    /// placeholder is empty or unclosed.
    fn expand_env_vars(input: &str) -> Result<String> {
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut in_double_quote = false;
        let mut in_single_quote = false;
        let mut in_multiline_double = false;
        let mut in_multiline_single = false;
        let mut in_comment = false;
        let mut escape_next = false;
        let mut pos = 0;

        while let Some(ch) = chars.next() {
            pos += 1;

            if escape_next {
                escape_next = false;
                result.push(ch);
                continue;
            }

            // Escapes only exist in basic (double-quoted) strings
            if ch == '\\' && (in_double_quote || in_multiline_double) {
                escape_next = true;
                result.push(ch);
                continue;
            }

            let in_any_string =
                in_double_quote || in_single_quote || in_multiline_double || in_multiline_single;

            if ch == '"' && !in_single_quote && !in_multiline_single && !in_comment {
                if Self::take_triple_quote(&mut chars, '"', &mut result) {
                    in_multiline_double = !in_multiline_double;
                    pos += 2;
                } else if !in_multiline_double {
                    in_double_quote = !in_double_quote;
                }
            } else if ch == '\'' && !in_double_quote && !in_multiline_double && !in_comment {
                if Self::take_triple_quote(&mut chars, '\'', &mut result) {
                    in_multiline_single = !in_multiline_single;
                    pos += 2;
                } else if !in_multiline_single {
                    in_single_quote = !in_single_quote;
                }
            } else if ch == '#' && !in_any_string && !in_comment {
                in_comment = true;
                result.push(ch);
            } else if ch == '\n' {
                // End of line resets comment state (but not string state)
                in_comment = false;
                result.push(ch);
            } else if ch == '$' && !in_comment && chars.peek() == Some(&'{') {
                chars.next(); // consume '{'
                pos += 1;

                let mut var_name = String::new();
                let mut found_close = false;
                for c in chars.by_ref() {
                    pos += 1;
                    if c == '}' {
                        found_close = true;
                        break;
                    }
                    var_name.push(c);
                }

                if !found_close {
                    anyhow::bail!(
                        "Unclosed environment variable placeholder at position {}",
                        pos
                    );
                }

                if var_name.is_empty() {
                    anyhow::bail!("Empty environment variable name at position {}", pos);
                }

                match std::env::var(&var_name) {
                    Ok(value) => result.push_str(&value),
                    Err(_) => {
                        anyhow::bail!(
                            "Environment variable '{}' is not set (referenced at position {})",
                            var_name,
                            pos
                        );
                    }
                }
            } else {
                result.push(ch);
            }
        }

        Ok(result)
    }

    /// Push `quote` to `out`, consuming two more quotes from `chars` if they
    /// form a triple quote. Returns true for a triple quote.
    fn take_triple_quote(
        chars: &mut std::iter::Peekable<std::str::Chars>,
        quote: char,
        out: &mut String,
    ) -> bool {
        out.push(quote);

        let mut lookahead = chars.clone();
        if lookahead.next() != Some(quote) || lookahead.next() != Some(quote) {
            return false;
        }

        chars.next();
        chars.next();
        out.push(quote);
        out.push(quote);
        true
    }
}

impl ChainConfig {
    /// Validate one chain entry.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Chain name cannot be empty");
        }
        if self.chain_id == 0 {
            anyhow::bail!("Chain ID must be non-zero");
        }
        if self.rpc_url.is_empty() {
            anyhow::bail!("RPC URL cannot be empty");
        }
        if self.identity_registry.is_zero() {
            anyhow::bail!("identity_registry must be a non-zero address");
        }
        if let Some(reputation) = self.reputation_registry {
            if reputation.is_zero() {
                anyhow::bail!("reputation_registry must be a non-zero address when provided");
            }
        }
        // Zero would panic in tokio::time::interval
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be > 0");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be > 0");
        }

        Ok(())
    }
}
