//! Per-chain listener: historical catch-up, then live polling.
//!
//! One listener runs per configured chain. Ticks of a listener are strictly
//! sequential; the chain cursor is only advanced once every event in a
//! batch has been durably upserted, so a crash at any point is recovered by
//! reprocessing from the last checkpoint.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use agentindex_core::{AgentMetadata, AgentRecord, CompositeId, U256};
use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{merge_events, RegistrationEvent, RegistryEvent, TransferEvent, UriUpdateEvent};
use super::provider::ChainSource;
use crate::config::{ChainConfig, MetadataConfig};
use crate::metadata::MetadataResolver;
use crate::reputation::ReputationUpdater;
use crate::search::SearchIndex;
use crate::storage::{Storage, UpsertOutcome};

/// Lifecycle of a chain listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Constructed, not yet running
    Starting,
    /// Scanning from the cursor up to the chain head
    HistoricalCatchUp,
    /// Following the head on a fixed interval
    Polling,
    /// Shut down
    Stopped,
}

/// Tunables for one listener.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Chain ID
    pub chain_id: u64,
    /// Name used in logs
    pub name: String,
    /// Delay between polling ticks
    pub poll_interval: Duration,
    /// Blocks per log query
    pub batch_size: u64,
    /// Depth below the head to start from when no cursor exists
    pub lookback_blocks: u64,
    /// Blocks to stay behind the head
    pub confirmations: u64,
    /// First block when no cursor exists (overrides lookback)
    pub start_block: Option<u64>,
    /// Per-document metadata timeout
    pub metadata_timeout: Duration,
}

impl ListenerSettings {
    /// Build settings from config sections.
    pub fn from_config(chain: &ChainConfig, metadata: &MetadataConfig) -> Self {
        Self {
            chain_id: chain.chain_id,
            name: chain.name.clone(),
            poll_interval: Duration::from_secs(chain.poll_interval_secs),
            batch_size: chain.batch_size,
            lookback_blocks: chain.lookback_blocks,
            confirmations: chain.confirmations,
            start_block: chain.start_block,
            metadata_timeout: Duration::from_secs(metadata.timeout_secs),
        }
    }

    /// First block to scan when the chain has no cursor yet.
    pub fn default_start(&self, target: u64) -> u64 {
        self.start_block
            .unwrap_or_else(|| target.saturating_sub(self.lookback_blocks))
    }
}

/// What one tick (or catch-up pass) did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Batches fully processed and checkpointed
    pub batches: usize,
    /// Events seen
    pub events: usize,
    /// Records created, in processing order
    pub created: Vec<CompositeId>,
    /// Records updated in place
    pub updated: usize,
    /// Transfers / URI updates dropped for lack of a registration
    pub dropped: usize,
    /// Cursor after the tick, if one is stored
    pub cursor: Option<u64>,
}

impl TickReport {
    fn absorb(&mut self, batch: TickReport) {
        self.batches += batch.batches;
        self.events += batch.events;
        self.created.extend(batch.created);
        self.updated += batch.updated;
        self.dropped += batch.dropped;
        self.cursor = batch.cursor.or(self.cursor);
    }
}

/// Keeps the agent store's view of one chain's registry current.
pub struct ChainListener {
    settings: ListenerSettings,
    source: Arc<dyn ChainSource>,
    resolver: Arc<dyn MetadataResolver>,
    storage: Storage,
    index: Arc<SearchIndex>,
    reputation: Option<Arc<ReputationUpdater>>,
    state: watch::Sender<ListenerState>,
}

impl ChainListener {
    /// Create a listener in the `Starting` state.
    pub fn new(
        settings: ListenerSettings,
        source: Arc<dyn ChainSource>,
        resolver: Arc<dyn MetadataResolver>,
        storage: Storage,
        index: Arc<SearchIndex>,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Starting);
        Self {
            settings,
            source,
            resolver,
            storage,
            index,
            reputation: None,
            state,
        }
    }

    /// Hand newly created agents to `updater` after every batch.
    pub fn with_reputation(mut self, updater: Arc<ReputationUpdater>) -> Self {
        self.reputation = Some(updater);
        self
    }

    /// Chain this listener follows.
    pub fn chain_id(&self) -> u64 {
        self.settings.chain_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ListenerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(chain_id = self.settings.chain_id, "Listener {:?} -> {:?}", previous, next);
        }
    }

    /// Run until `cancel` fires.
    ///
    /// Cancellation is only observed between ticks and between batches; a
    /// batch that has started always runs to its checkpoint.
    pub async fn run(&self, cancel: CancellationToken) {
        let chain_id = self.settings.chain_id;
        info!(
            chain_id,
            "Listener '{}' starting (poll every {:?}, batch size {})",
            self.settings.name,
            self.settings.poll_interval,
            self.settings.batch_size
        );

        self.set_state(ListenerState::HistoricalCatchUp);
        match self.sync(Some(&cancel)).await {
            Ok(report) => info!(
                chain_id,
                batches = report.batches,
                events = report.events,
                created = report.created.len(),
                "Historical catch-up complete"
            ),
            Err(e) => warn!(
                chain_id,
                "Historical catch-up aborted, resuming from checkpoint while polling: {:#}", e
            ),
        }

        self.set_state(ListenerState::Polling);

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; catch-up just ran
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.sync(Some(&cancel)).await {
                Ok(report) if report.events > 0 => info!(
                    chain_id,
                    events = report.events,
                    created = report.created.len(),
                    updated = report.updated,
                    cursor = report.cursor,
                    "Poll tick processed events"
                ),
                Ok(_) => {}
                Err(e) => warn!(chain_id, "Poll tick failed, will retry: {:#}", e),
            }
        }

        self.set_state(ListenerState::Stopped);
        info!(chain_id, "Listener '{}' stopped", self.settings.name);
    }

    /// One historical catch-up pass from the cursor to the safe head.
    pub async fn catch_up(&self) -> Result<TickReport> {
        self.set_state(ListenerState::HistoricalCatchUp);
        self.sync(None).await
    }

    /// One polling tick.
    pub async fn poll_tick(&self) -> Result<TickReport> {
        self.set_state(ListenerState::Polling);
        self.sync(None).await
    }

    /// Process `[cursor + 1, head - confirmations]` in checkpointed batches.
    async fn sync(&self, cancel: Option<&CancellationToken>) -> Result<TickReport> {
        let chain_id = self.settings.chain_id;

        let height = self
            .source
            .current_height()
            .await
            .with_context(|| format!("Failed to read chain height for chain {}", chain_id))?;
        let target = height.saturating_sub(self.settings.confirmations);

        let stored = self.storage.get_cursor(chain_id).await?;
        let next_block = match stored {
            Some(cursor) => cursor.last_block.saturating_add(1),
            None => self.settings.default_start(target),
        };

        let mut report = TickReport {
            cursor: stored.map(|cursor| cursor.last_block),
            ..Default::default()
        };

        if next_block > target {
            debug!(chain_id, height, target, "Caught up");
            return Ok(report);
        }

        debug!(
            chain_id,
            height,
            target,
            confirmations = self.settings.confirmations,
            "Syncing blocks {} to {}",
            next_block,
            target
        );

        let batch_size = self.settings.batch_size.max(1);
        let mut from = next_block;
        while from <= target {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                debug!(chain_id, "Cancelled between batches at block {}", from);
                break;
            }

            let to = from.saturating_add(batch_size - 1).min(target);
            let batch = self.process_batch(from, to).await?;
            report.absorb(batch);

            if to == u64::MAX {
                break;
            }
            from = to + 1;
        }

        Ok(report)
    }

    /// Fetch, apply and checkpoint one block range.
    async fn process_batch(&self, from: u64, to: u64) -> Result<TickReport> {
        let chain_id = self.settings.chain_id;

        let registrations = self
            .source
            .registration_events(from, to)
            .await
            .with_context(|| format!("Failed to fetch registrations for blocks {} to {}", from, to))?;
        let transfers = self
            .source
            .transfer_events(from, to)
            .await
            .with_context(|| format!("Failed to fetch transfers for blocks {} to {}", from, to))?;
        let uri_updates = self
            .source
            .uri_update_events(from, to)
            .await
            .with_context(|| format!("Failed to fetch URI updates for blocks {} to {}", from, to))?;

        let events = merge_events(registrations, transfers, uri_updates);
        let mut report = TickReport {
            batches: 1,
            events: events.len(),
            ..Default::default()
        };

        let mut changed: Vec<CompositeId> = Vec::new();
        let mut pending: HashMap<U256, Vec<RegistryEvent>> = HashMap::new();

        for event in events {
            let token_id = event.token_id();
            let applied = self.apply_event(&event, &mut report, &mut changed).await?;

            if !applied {
                pending.entry(token_id).or_default().push(event);
                continue;
            }

            // A registration may unblock transfers seen earlier in this batch
            if matches!(event, RegistryEvent::Registration(_)) {
                if let Some(queued) = pending.remove(&token_id) {
                    for queued_event in queued {
                        self.apply_event(&queued_event, &mut report, &mut changed)
                            .await?;
                    }
                }
            }
        }

        for (token_id, dropped) in pending {
            for event in dropped {
                let (block_number, log_index) = event.position();
                warn!(
                    chain_id,
                    token_id = %token_id,
                    block_number,
                    log_index,
                    "Dropping event for unregistered agent"
                );
                report.dropped += 1;
            }
        }

        self.refresh_index(&changed).await?;

        self.storage.set_cursor(chain_id, to).await?;
        report.cursor = Some(to);

        if !report.created.is_empty() {
            info!(
                chain_id,
                created = report.created.len(),
                "Blocks {} to {}: discovered new agents",
                from,
                to
            );
            if let Some(updater) = &self.reputation {
                updater.spawn_update(chain_id, report.created.clone());
            }
        }

        Ok(report)
    }

    /// Apply one event. Returns false if the event targets an agent that is
    /// not (yet) in the store.
    async fn apply_event(
        &self,
        event: &RegistryEvent,
        report: &mut TickReport,
        changed: &mut Vec<CompositeId>,
    ) -> Result<bool> {
        let outcome = match event {
            RegistryEvent::Registration(e) => Some(self.apply_registration(e).await?),
            RegistryEvent::Transfer(e) => self.apply_transfer(e).await?,
            RegistryEvent::UriUpdate(e) => self.apply_uri_update(e).await?,
        };

        let Some((id, outcome)) = outcome else {
            return Ok(false);
        };

        match outcome {
            UpsertOutcome::Created => {
                report.created.push(id);
                changed.push(id);
            }
            UpsertOutcome::Updated => {
                report.updated += 1;
                changed.push(id);
            }
            UpsertOutcome::Unchanged => {}
        }

        Ok(true)
    }

    async fn apply_registration(
        &self,
        event: &RegistrationEvent,
    ) -> Result<(CompositeId, UpsertOutcome)> {
        let id = CompositeId::new(self.settings.chain_id, event.token_id);
        let existing = self.storage.get_agent_by_id(&id).await?;
        let now = chrono::Utc::now().timestamp();

        let mut record = AgentRecord::new(
            id,
            event.owner,
            event.metadata_uri.clone(),
            event.tx_hash,
            event.block_number,
            now,
        );

        // Keep prior display fields unless the document resolves
        if let Some(prior) = &existing {
            carry_display_fields(&mut record, prior);
        }
        if let Some(metadata) = self.resolve_metadata(&id, &event.metadata_uri).await {
            record.apply_metadata(metadata);
        }

        let outcome = self.storage.upsert_agent(&record).await?;
        Ok((id, outcome))
    }

    async fn apply_transfer(
        &self,
        event: &TransferEvent,
    ) -> Result<Option<(CompositeId, UpsertOutcome)>> {
        let id = CompositeId::new(self.settings.chain_id, event.token_id);

        // The registration event carries the initial owner
        if event.is_mint() {
            return Ok(Some((id, UpsertOutcome::Unchanged)));
        }

        let Some(mut record) = self.storage.get_agent_by_id(&id).await? else {
            return Ok(None);
        };

        if event.is_burn() {
            record.active = false;
        } else {
            record.owner = event.new_owner;
        }
        record.updated_at = chrono::Utc::now().timestamp();

        let outcome = self.storage.upsert_agent(&record).await?;
        Ok(Some((id, outcome)))
    }

    async fn apply_uri_update(
        &self,
        event: &UriUpdateEvent,
    ) -> Result<Option<(CompositeId, UpsertOutcome)>> {
        let id = CompositeId::new(self.settings.chain_id, event.token_id);

        let Some(mut record) = self.storage.get_agent_by_id(&id).await? else {
            return Ok(None);
        };

        record.metadata_uri = event.metadata_uri.clone();
        if let Some(metadata) = self.resolve_metadata(&id, &event.metadata_uri).await {
            record.apply_metadata(metadata);
        }
        record.updated_at = chrono::Utc::now().timestamp();

        let outcome = self.storage.upsert_agent(&record).await?;
        Ok(Some((id, outcome)))
    }

    /// Resolve a registration file; any failure yields `None`.
    async fn resolve_metadata(&self, id: &CompositeId, uri: &str) -> Option<AgentMetadata> {
        let timeout = self.settings.metadata_timeout;
        match tokio::time::timeout(timeout, self.resolver.resolve(uri)).await {
            Ok(Ok(metadata)) => Some(metadata),
            Ok(Err(e)) => {
                warn!(agent = %id, uri, "Metadata resolution failed: {:#}", e);
                None
            }
            Err(_) => {
                warn!(agent = %id, uri, "Metadata resolution timed out after {:?}", timeout);
                None
            }
        }
    }

    /// Push the stored state of changed records into the search index.
    ///
    /// Indexed reputation is kept: the updater may have written a newer
    /// score since these rows were read.
    async fn refresh_index(&self, changed: &[CompositeId]) -> Result<()> {
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(changed.len());
        for id in changed {
            if !seen.insert(*id) {
                continue;
            }
            if let Some(record) = self.storage.get_agent_by_id(id).await? {
                records.push(record);
            }
        }

        self.index.refresh_many(records).await;
        Ok(())
    }
}

fn carry_display_fields(record: &mut AgentRecord, prior: &AgentRecord) {
    record.name = prior.name.clone();
    record.description = prior.description.clone();
    record.services = prior.services.clone();
    record.image = prior.image.clone();
    record.active = prior.active;
}
