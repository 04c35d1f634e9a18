//! Process wiring: one listener task per chain over a shared store and index.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::listener::{ChainListener, ChainSource, ListenerSettings, RpcProvider};
use crate::metadata::{HttpMetadataResolver, MetadataResolver};
use crate::reputation::{Erc8004ReputationSource, ReputationUpdater};
use crate::search::SearchIndex;
use crate::service::RegistryService;
use crate::storage::Storage;

/// A fully wired indexer, ready to run.
pub struct Indexer {
    storage: Storage,
    service: RegistryService,
    listeners: Vec<Arc<ChainListener>>,
    reputation: Option<Arc<ReputationUpdater>>,
    cancel: CancellationToken,
}

impl Indexer {
    /// Connect to the configured database and RPC endpoints.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let storage = Storage::new(
            &config.database.url,
            Some(config.database.max_connections),
            Some(config.database.min_connections),
        )
        .await
        .context("Failed to connect to database")?;

        storage
            .run_migrations()
            .await
            .context("Failed to run migrations")?;

        let resolver: Arc<dyn MetadataResolver> = Arc::new(
            HttpMetadataResolver::from_config(&config.metadata)
                .context("Failed to create metadata resolver")?,
        );

        let mut sources: Vec<(ListenerSettings, Arc<dyn ChainSource>)> = Vec::new();
        for chain in &config.chains {
            let provider = RpcProvider::new(&chain.rpc_url, chain.identity_registry)
                .with_context(|| format!("Failed to create RPC provider for '{}'", chain.name))?;
            sources.push((
                ListenerSettings::from_config(chain, &config.metadata),
                Arc::new(provider),
            ));
        }

        let index = Arc::new(SearchIndex::new());
        let mut updater = ReputationUpdater::new(
            storage.clone(),
            Arc::clone(&index),
            Duration::from_secs(config.reputation.timeout_secs),
        );
        if config.reputation.enabled {
            for chain in &config.chains {
                let Some(registry) = chain.reputation_registry else {
                    continue;
                };
                let source = Erc8004ReputationSource::new(&chain.rpc_url, registry)
                    .with_context(|| {
                        format!("Failed to create reputation source for '{}'", chain.name)
                    })?;
                updater = updater.with_source(chain.chain_id, Arc::new(source));
            }
        }

        let service = RegistryService::new(storage.clone(), index, &config.search);
        Self::assemble(storage, service, sources, resolver, Some(Arc::new(updater))).await
    }

    /// Wire pre-built components. The index is loaded from `storage`.
    pub async fn assemble(
        storage: Storage,
        service: RegistryService,
        sources: Vec<(ListenerSettings, Arc<dyn ChainSource>)>,
        resolver: Arc<dyn MetadataResolver>,
        updater: Option<Arc<ReputationUpdater>>,
    ) -> Result<Self> {
        service
            .rebuild_index()
            .await
            .context("Failed to load search index")?;

        let listeners = sources
            .into_iter()
            .map(|(settings, source)| {
                let listener = ChainListener::new(
                    settings,
                    source,
                    Arc::clone(&resolver),
                    storage.clone(),
                    Arc::clone(service.index()),
                );
                let listener = match &updater {
                    Some(updater) => listener.with_reputation(Arc::clone(updater)),
                    None => listener,
                };
                Arc::new(listener)
            })
            .collect();

        Ok(Self {
            storage,
            service,
            listeners,
            reputation: updater,
            cancel: CancellationToken::new(),
        })
    }

    /// Query surface over the shared store and index.
    pub fn service(&self) -> &RegistryService {
        &self.service
    }

    /// Listeners in configuration order.
    pub fn listeners(&self) -> &[Arc<ChainListener>] {
        &self.listeners
    }

    /// Token that stops every listener when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves or the token is cancelled.
    ///
    /// Listeners finish their in-flight batch before exiting, so every
    /// cursor on disk is a completed checkpoint when this returns. Pending
    /// reputation passes are awaited before the store is closed.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut tasks = JoinSet::new();
        for listener in &self.listeners {
            let listener = Arc::clone(listener);
            let cancel = self.cancel.child_token();
            tasks.spawn(async move {
                listener.run(cancel).await;
                listener.chain_id()
            });
        }

        info!(
            "Indexer is running with {} chain listener(s). Press Ctrl+C to stop.",
            self.listeners.len()
        );

        tokio::select! {
            _ = shutdown => {
                info!("Received shutdown signal, gracefully shutting down...");
            }
            _ = self.cancel.cancelled() => {}
        }
        self.cancel.cancel();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(chain_id) => info!(chain_id, "Listener exited"),
                Err(e) => error!("Listener task panicked: {}", e),
            }
        }

        if let Some(updater) = &self.reputation {
            let pending = updater.in_flight();
            if pending > 0 {
                info!(pending, "Waiting for reputation passes to finish");
            }
            updater.drain().await;
        }

        self.storage.close().await;
        info!("Shutdown complete");
        Ok(())
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
