//! agentindex - multi-chain ERC-8004 agent registry indexer
//!
//! This binary provides:
//! - Event listening on every configured chain
//! - Agent storage with overwrite-by-key semantics
//! - Reputation enrichment for new agents
//! - One-shot search and lookup commands against the local index

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use agentindex_indexer::config::{Config, LoggingConfig};
use agentindex_indexer::runtime::Indexer;
use agentindex_indexer::search::{AgentFilters, QueryRequest, SearchIndex};
use agentindex_indexer::service::RegistryService;
use agentindex_indexer::storage::Storage;
use agentindex_indexer::U256;

const DEFAULT_DATABASE_URL: &str = "sqlite://agentindex.db";

#[derive(Parser)]
#[command(name = "agentindex")]
#[command(version, about = "Multi-chain ERC-8004 agent registry indexer", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "indexer.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the indexer service (all configured chains)
    Run,

    /// Show per-chain sync progress and agent counts
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = DEFAULT_DATABASE_URL)]
        database_url: String,
    },

    /// Search indexed agents and print the page as JSON
    Search {
        /// Free-text query (empty lists every agent)
        #[arg(default_value = "")]
        text: String,

        /// Only agents on this chain
        #[arg(long)]
        chain: Option<u64>,

        /// Only agents advertising this service tag
        #[arg(long)]
        service: Option<String>,

        /// Minimum reputation score
        #[arg(long)]
        min_reputation: Option<f64>,

        /// Only agents owned by this address
        #[arg(long)]
        owner: Option<String>,

        /// Page size
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Results to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Print one agent as JSON
    Show {
        /// Chain ID
        chain: u64,

        /// Token ID (decimal or 0x-prefixed hex)
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it parses
    let logging = Config::from_file(&cli.config)
        .map(|config| config.logging)
        .unwrap_or_default();
    init_logging(cli.debug, &logging)?;

    info!("agentindex starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_indexer(&cli.config).await?,
        Commands::Status => show_status(&cli.config).await?,
        Commands::InitDb { database_url } => init_database(&database_url).await?,
        Commands::Search {
            text,
            chain,
            service,
            min_reputation,
            owner,
            limit,
            offset,
        } => {
            let request = QueryRequest {
                text,
                filters: AgentFilters {
                    chain_id: chain,
                    service,
                    min_reputation,
                    owner,
                },
                limit,
                offset,
            };
            search(&cli.config, &request).await?
        }
        Commands::Show { chain, token } => {
            let token_id: U256 = token
                .parse()
                .with_context(|| format!("Invalid token ID: {}", token))?;
            show_agent(&cli.config, chain, token_id).await?
        }
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("agentindex_indexer=debug,agentindex=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "agentindex_indexer={level},agentindex={level}",
                level = logging.level
            ))
        })
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_line_number(true))
            .try_init()
            .context("Failed to initialize logging")?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()
            .context("Failed to initialize logging")?;
    }

    Ok(())
}

/// Main indexer service - one listener per configured chain
async fn run_indexer(config_path: &str) -> Result<()> {
    info!("Starting indexer service with config: {}", config_path);

    let config = Config::from_file(config_path).context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Database: {}", config.database.url);
    for chain in &config.chains {
        info!(
            "  Chain '{}' (id {}): registry {} via {}",
            chain.name, chain.chain_id, chain.identity_registry, chain.rpc_url
        );
    }

    let indexer = Indexer::from_config(&config)
        .await
        .context("Failed to start indexer")?;

    indexer.run().await
}

/// Open the configured database, or the default one if no config file exists.
async fn open_storage(config_path: &str) -> Result<(Storage, Config)> {
    let config = match Config::from_file(config_path) {
        Ok(config) => {
            info!("Using database from config: {}", config.database.url);
            config
        }
        Err(e) => {
            // Config::from_file wraps errors with context, so walk the chain
            let is_not_found = e.chain().any(|cause| {
                if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                    io_err.kind() == std::io::ErrorKind::NotFound
                } else {
                    false
                }
            });

            if is_not_found {
                info!(
                    "Config file not found, using default database: {}",
                    DEFAULT_DATABASE_URL
                );
                Config::with_database(DEFAULT_DATABASE_URL)
            } else {
                return Err(e).context("Failed to load config file");
            }
        }
    };

    let storage = Storage::new(
        &config.database.url,
        Some(config.database.max_connections),
        Some(config.database.min_connections),
    )
    .await
    .context("Failed to connect to database")?;

    // Handles a fresh database
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok((storage, config))
}

/// Show per-chain sync progress
async fn show_status(config_path: &str) -> Result<()> {
    info!("Checking indexer status");

    let (storage, config) = open_storage(config_path).await?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let cursors = storage.list_cursors().await?;
    let stats = storage.stats().await?;

    println!("\n=== agentindex Status ===\n");
    println!("Sync Progress:");
    if cursors.is_empty() {
        println!("  No chains synced yet.");
    }
    for cursor in &cursors {
        let name = config
            .chain(cursor.chain_id)
            .map(|chain| chain.name.as_str())
            .unwrap_or("unconfigured");
        println!("  Chain {} ({}):", cursor.chain_id, name);
        println!("    Last Block: {}", cursor.last_block);
        println!(
            "    Last Updated: {}",
            chrono::DateTime::from_timestamp(cursor.updated_at, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string())
        );
    }

    println!("\nAgents:");
    println!("  Total: {}", stats.total);
    for (chain_id, count) in &stats.by_chain {
        println!("  Chain {}: {}", chain_id, count);
    }

    if !stats.by_service_tag.is_empty() {
        println!("\nService Tags:");
        for (tag, count) in &stats.by_service_tag {
            println!("  {}: {}", tag, count);
        }
    }

    println!();

    storage.close().await;

    Ok(())
}

/// Run one query against an index loaded from the database
async fn search(config_path: &str, request: &QueryRequest) -> Result<()> {
    let (storage, config) = open_storage(config_path).await?;

    let service = RegistryService::new(
        storage.clone(),
        std::sync::Arc::new(SearchIndex::new()),
        &config.search,
    );
    service.rebuild_index().await?;

    let page = service.query(request).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&page).context("Failed to serialize results")?
    );

    storage.close().await;

    Ok(())
}

/// Print one agent
async fn show_agent(config_path: &str, chain_id: u64, token_id: U256) -> Result<()> {
    let (storage, _) = open_storage(config_path).await?;

    match storage.get_agent(chain_id, token_id).await? {
        Some(record) => println!(
            "{}",
            serde_json::to_string_pretty(&record).context("Failed to serialize agent")?
        ),
        None => println!("Agent {}:{} not found", chain_id, token_id),
    }

    storage.close().await;

    Ok(())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    let cursors = storage.list_cursors().await?;
    info!("Database initialized successfully!");
    info!("  Agents: {}", stats.total);
    info!("  Chains with cursors: {}", cursors.len());

    storage.close().await;

    Ok(())
}
