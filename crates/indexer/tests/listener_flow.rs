//! End-to-end listener behavior against a scripted chain.

mod common;

use std::sync::Arc;
use std::time::Duration;

use agentindex_indexer::config::SearchConfig;
use agentindex_indexer::listener::{ChainSource, ListenerState};
use agentindex_indexer::reputation::ReputationUpdater;
use agentindex_indexer::runtime::Indexer;
use agentindex_indexer::search::SearchIndex;
use agentindex_indexer::service::RegistryService;
use agentindex_indexer::storage::Storage;
use agentindex_indexer::{Address, CompositeId, ReputationSummary, U256};
use common::{
    listener, owner, settings, storage, FixedReputation, MapResolver, ScriptedChain,
    SlowReputation,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_catch_up_from_lookback() {
    let (storage, _temp_db) = storage().await;
    let index = Arc::new(SearchIndex::new());
    let chain = ScriptedChain::new(150);
    chain.register(1, owner(0xa1), "ipfs://one", 100, 0);
    chain.register(2, owner(0xa2), "ipfs://two", 101, 0);
    // Below the lookback window
    chain.register(3, owner(0xa3), "ipfs://three", 40, 0);

    let resolver = MapResolver::new();
    resolver.insert("ipfs://one", "Price Oracle", "Feeds", &["MCP"]);
    resolver.insert("ipfs://two", "Translator", "Languages", &["A2A"]);

    let listener = listener(settings(1), chain.clone(), resolver, &storage, &index);
    let report = listener.catch_up().await.unwrap();

    assert_eq!(report.created.len(), 2);
    assert_eq!(report.cursor, Some(150));
    assert_eq!(chain.ranges(), vec![(100, 150)]);

    let first = storage.get_agent(1, U256::from(1u64)).await.unwrap().unwrap();
    assert_eq!(first.block_number, 100);
    assert_eq!(first.name, "Price Oracle");
    let second = storage.get_agent(1, U256::from(2u64)).await.unwrap().unwrap();
    assert_eq!(second.block_number, 101);
    assert!(storage.get_agent(1, U256::from(3u64)).await.unwrap().is_none());

    assert_eq!(storage.get_cursor(1).await.unwrap().unwrap().last_block, 150);
    assert_eq!(index.len().await, 2);

    storage.close().await;
}

#[tokio::test]
async fn test_batches_are_checkpointed() {
    let (storage, _temp_db) = storage().await;
    let index = Arc::new(SearchIndex::new());
    let chain = ScriptedChain::new(150);

    let mut config = settings(1);
    config.start_block = Some(100);
    config.batch_size = 20;

    let listener = listener(config, chain.clone(), MapResolver::new(), &storage, &index);
    let report = listener.catch_up().await.unwrap();

    assert_eq!(report.batches, 3);
    assert_eq!(chain.ranges(), vec![(100, 119), (120, 139), (140, 150)]);
    assert_eq!(storage.get_cursor(1).await.unwrap().unwrap().last_block, 150);

    // Nothing new to scan
    let again = listener.poll_tick().await.unwrap();
    assert_eq!(again.batches, 0);
    assert_eq!(chain.ranges().len(), 3);

    storage.close().await;
}

#[tokio::test]
async fn test_confirmations_hold_back_the_head() {
    let (storage, _temp_db) = storage().await;
    let index = Arc::new(SearchIndex::new());
    let chain = ScriptedChain::new(150);
    chain.register(1, owner(0xa1), "ipfs://one", 148, 0);

    let mut config = settings(1);
    config.confirmations = 5;

    let listener = listener(config, chain.clone(), MapResolver::new(), &storage, &index);
    listener.catch_up().await.unwrap();
    assert_eq!(storage.get_cursor(1).await.unwrap().unwrap().last_block, 145);
    assert!(storage.get_agent(1, U256::from(1u64)).await.unwrap().is_none());

    chain.set_height(153);
    listener.poll_tick().await.unwrap();
    assert!(storage.get_agent(1, U256::from(1u64)).await.unwrap().is_some());

    storage.close().await;
}

#[tokio::test]
async fn test_transfer_after_registration_in_same_batch() {
    let (storage, _temp_db) = storage().await;
    let index = Arc::new(SearchIndex::new());
    let chain = ScriptedChain::new(150);
    chain.register(1, owner(0xa1), "ipfs://one", 100, 0);
    chain.transfer(1, Address::ZERO, owner(0xa1), 100, 1);
    chain.transfer(1, owner(0xa1), owner(0xb2), 120, 3);

    let listener = listener(settings(1), chain, MapResolver::new(), &storage, &index);
    listener.catch_up().await.unwrap();

    let record = storage.get_agent(1, U256::from(1u64)).await.unwrap().unwrap();
    assert_eq!(record.owner, owner(0xb2));
    assert_eq!(index.get(&record.id).await.unwrap().owner, owner(0xb2));

    assert_eq!(storage.get_agents_by_owner(&owner(0xa1)).await.unwrap().len(), 0);
    assert_eq!(storage.get_agents_by_owner(&owner(0xb2)).await.unwrap().len(), 1);

    storage.close().await;
}

#[tokio::test]
async fn test_out_of_order_and_orphan_events() {
    let (storage, _temp_db) = storage().await;
    let index = Arc::new(SearchIndex::new());
    let chain = ScriptedChain::new(150);
    // Transfer logged ahead of the registration it depends on
    chain.transfer(1, owner(0xa1), owner(0xb2), 100, 0);
    chain.register(1, owner(0xa1), "ipfs://one", 100, 1);
    // Token 9 is never registered
    chain.transfer(9, owner(0xa1), owner(0xb2), 110, 0);
    chain.update_uri(9, "ipfs://nine", 111, 0);

    let listener = listener(settings(1), chain, MapResolver::new(), &storage, &index);
    let report = listener.catch_up().await.unwrap();

    assert_eq!(report.dropped, 2);
    assert_eq!(report.created.len(), 1);
    let record = storage.get_agent(1, U256::from(1u64)).await.unwrap().unwrap();
    assert_eq!(record.owner, owner(0xb2));
    assert!(storage.get_agent(1, U256::from(9u64)).await.unwrap().is_none());
    // Dropped events do not hold back the cursor
    assert_eq!(report.cursor, Some(150));

    storage.close().await;
}

#[tokio::test]
async fn test_burn_deactivates_and_uri_update_reresolves() {
    let (storage, _temp_db) = storage().await;
    let index = Arc::new(SearchIndex::new());
    let chain = ScriptedChain::new(150);
    let resolver = MapResolver::new();
    resolver.insert("ipfs://v1", "Old Name", "", &[]);
    resolver.insert("ipfs://v2", "Weather Oracle", "Forecasts", &["MCP"]);

    chain.register(1, owner(0xa1), "ipfs://v1", 100, 0);
    chain.update_uri(1, "ipfs://v2", 105, 0);
    chain.register(2, owner(0xa2), "ipfs://v1", 106, 0);
    chain.transfer(2, owner(0xa2), Address::ZERO, 107, 0);

    let listener = listener(settings(1), chain, resolver, &storage, &index);
    listener.catch_up().await.unwrap();

    let updated = storage.get_agent(1, U256::from(1u64)).await.unwrap().unwrap();
    assert_eq!(updated.metadata_uri, "ipfs://v2");
    assert_eq!(updated.name, "Weather Oracle");
    assert_eq!(updated.services, vec!["MCP".to_string()]);

    let burned = storage.get_agent(1, U256::from(2u64)).await.unwrap().unwrap();
    assert!(!burned.active);
    assert_eq!(burned.owner, owner(0xa2));

    let hits = index.search("weather", 10).await;
    assert_eq!(hits.len(), 1);
    assert!(index.search("old", 10).await.iter().all(|hit| hit.record.id != updated.id));

    storage.close().await;
}

#[tokio::test]
async fn test_metadata_failure_still_indexes_record() {
    let (storage, _temp_db) = storage().await;
    let index = Arc::new(SearchIndex::new());
    let chain = ScriptedChain::new(150);
    chain.register(7, owner(0xa1), "ipfs://missing", 120, 0);

    let listener = listener(settings(1), chain, MapResolver::new(), &storage, &index);
    let report = listener.catch_up().await.unwrap();
    assert_eq!(report.created.len(), 1);

    let record = storage.get_agent(1, U256::from(7u64)).await.unwrap().unwrap();
    assert!(record.name.is_empty());
    assert!(record.description.is_empty());
    assert_eq!(record.metadata_uri, "ipfs://missing");

    // Reachable through listing and its token id, not through the URI
    let all = index.search("", 10).await;
    assert_eq!(all.len(), 1);
    let by_token = index.search("7", 10).await;
    assert_eq!(by_token.len(), 1);
    assert_eq!(by_token[0].record.id, record.id);
    assert!(index.search("missing", 10).await.is_empty());

    storage.close().await;
}

#[tokio::test]
async fn test_rpc_failure_leaves_cursor_in_place() {
    let (storage, _temp_db) = storage().await;
    let index = Arc::new(SearchIndex::new());
    let chain = ScriptedChain::new(150);

    let listener = listener(settings(1), chain.clone(), MapResolver::new(), &storage, &index);
    listener.catch_up().await.unwrap();

    chain.register(5, owner(0xa5), "ipfs://five", 160, 0);
    chain.set_height(170);
    chain.set_failing(true);

    assert!(listener.poll_tick().await.is_err());
    assert_eq!(storage.get_cursor(1).await.unwrap().unwrap().last_block, 150);
    assert!(storage.get_agent(1, U256::from(5u64)).await.unwrap().is_none());

    chain.set_failing(false);
    let report = listener.poll_tick().await.unwrap();
    assert_eq!(report.created.len(), 1);
    assert_eq!(storage.get_cursor(1).await.unwrap().unwrap().last_block, 170);

    storage.close().await;
}

#[tokio::test]
async fn test_reprocessing_a_batch_is_idempotent() {
    let (storage, temp_db) = storage().await;
    let index = Arc::new(SearchIndex::new());
    let chain = ScriptedChain::new(150);
    let resolver = MapResolver::new();
    resolver.insert("ipfs://one", "Price Oracle", "Feeds", &["MCP"]);
    chain.register(1, owner(0xa1), "ipfs://one", 100, 0);
    chain.transfer(1, owner(0xa1), owner(0xb2), 101, 0);
    chain.register(2, owner(0xa2), "ipfs://two", 102, 0);

    let listener = listener(settings(1), chain, resolver, &storage, &index);
    listener.catch_up().await.unwrap();
    let before = storage.all_agents().await.unwrap();

    // Simulate a crash after the upserts but before the checkpoint
    let raw = sqlx::SqlitePool::connect(&format!("sqlite://{}", temp_db.path().display()))
        .await
        .unwrap();
    sqlx::query("DELETE FROM chain_cursors")
        .execute(&raw)
        .await
        .unwrap();
    raw.close().await;

    let replay = listener.catch_up().await.unwrap();
    assert!(replay.created.is_empty());

    // The replayed transfer lands on top of the replayed registration again
    let after = storage.all_agents().await.unwrap();
    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        assert!(old.same_content(new), "{} changed on replay", old.id);
        assert_eq!(old.registered_at, new.registered_at);
    }
    assert_eq!(after[0].owner, owner(0xb2));
    assert_eq!(storage.get_cursor(1).await.unwrap().unwrap().last_block, 150);

    storage.close().await;
}

#[tokio::test]
async fn test_chains_are_isolated() {
    let (storage, _temp_db) = storage().await;
    let index = Arc::new(SearchIndex::new());
    let mainnet = ScriptedChain::new(150);
    let base = ScriptedChain::new(1_000);
    mainnet.register(1, owner(0xa1), "ipfs://one", 120, 0);
    base.register(1, owner(0xb1), "ipfs://one-base", 990, 0);

    let resolver = MapResolver::new();
    let a = listener(settings(1), mainnet, resolver.clone(), &storage, &index);
    let b = listener(settings(8453), base, resolver, &storage, &index);

    let (ra, rb) = tokio::join!(a.catch_up(), b.catch_up());
    ra.unwrap();
    rb.unwrap();

    let on_a = storage.get_agent(1, U256::from(1u64)).await.unwrap().unwrap();
    let on_b = storage.get_agent(8453, U256::from(1u64)).await.unwrap().unwrap();
    assert_eq!(on_a.owner, owner(0xa1));
    assert_eq!(on_b.owner, owner(0xb1));

    assert_eq!(storage.get_cursor(1).await.unwrap().unwrap().last_block, 150);
    assert_eq!(storage.get_cursor(8453).await.unwrap().unwrap().last_block, 1_000);

    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_chain.get(&1), Some(&1));
    assert_eq!(stats.by_chain.get(&8453), Some(&1));

    storage.close().await;
}

#[tokio::test]
async fn test_new_agents_receive_reputation() {
    let (storage, _temp_db) = storage().await;
    let index = Arc::new(SearchIndex::new());
    let chain = ScriptedChain::new(150);
    chain.register(1, owner(0xa1), "ipfs://one", 100, 0);

    let updater = Arc::new(
        ReputationUpdater::new(storage.clone(), index.clone(), Duration::from_secs(1)).with_source(
            1,
            Arc::new(FixedReputation(ReputationSummary {
                score: 92.0,
                count: 12,
            })),
        ),
    );

    let listener = listener(settings(1), chain, MapResolver::new(), &storage, &index)
        .with_reputation(updater);
    listener.catch_up().await.unwrap();

    let id = CompositeId::new(1, U256::from(1u64));
    let mut record = storage.get_agent_by_id(&id).await.unwrap().unwrap();
    for _ in 0..100 {
        if record.reputation_count > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        record = storage.get_agent_by_id(&id).await.unwrap().unwrap();
    }
    assert_eq!(record.reputation_count, 12);
    assert_eq!(record.reputation_score, 92.0);

    storage.close().await;
}

#[tokio::test]
async fn test_shutdown_waits_for_pending_reputation() {
    let (storage, temp_db) = storage().await;
    let chain = ScriptedChain::new(150);
    chain.register(1, owner(0xa1), "ipfs://one", 120, 0);

    let service = RegistryService::new(
        storage.clone(),
        Arc::new(SearchIndex::new()),
        &SearchConfig {
            cache_enabled: false,
            ..Default::default()
        },
    );
    let updater = Arc::new(
        ReputationUpdater::new(
            storage.clone(),
            Arc::clone(service.index()),
            Duration::from_secs(5),
        )
        .with_source(
            1,
            Arc::new(SlowReputation {
                summary: ReputationSummary {
                    score: 64.0,
                    count: 3,
                },
                delay: Duration::from_millis(200),
            }),
        ),
    );

    let source: Arc<dyn ChainSource> = chain;
    let indexer = Indexer::assemble(
        storage.clone(),
        service,
        vec![(settings(1), source)],
        MapResolver::new(),
        Some(updater),
    )
    .await
    .unwrap();

    // Stop as soon as the registration batch is checkpointed, while the
    // reputation lookup is still sleeping
    let watcher = storage.clone();
    indexer
        .run_until(async move {
            loop {
                if let Ok(Some(cursor)) = watcher.get_cursor(1).await {
                    if cursor.last_block >= 150 {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

    // The indexer closed its pool; read back through a fresh one
    let reopened = Storage::new_with_path(temp_db.path(), None, None)
        .await
        .unwrap();
    let record = reopened.get_agent(1, U256::from(1u64)).await.unwrap().unwrap();
    assert_eq!(record.reputation_count, 3);
    assert_eq!(record.reputation_score, 64.0);

    reopened.close().await;
}

#[tokio::test]
async fn test_run_polls_and_stops_on_cancel() {
    let (storage, _temp_db) = storage().await;
    let index = Arc::new(SearchIndex::new());
    let chain = ScriptedChain::new(150);

    let listener = Arc::new(listener(
        settings(1),
        chain.clone(),
        MapResolver::new(),
        &storage,
        &index,
    ));
    assert_eq!(listener.state(), ListenerState::Starting);

    let mut states = listener.subscribe();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let listener = Arc::clone(&listener);
        let cancel = cancel.clone();
        async move { listener.run(cancel).await }
    });

    states
        .wait_for(|state| *state == ListenerState::Polling)
        .await
        .unwrap();

    chain.register(4, owner(0xa4), "ipfs://four", 155, 0);
    chain.set_height(160);

    let id = CompositeId::new(1, U256::from(4u64));
    let mut found = false;
    for _ in 0..200 {
        if index.get(&id).await.is_some() {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(found, "polling should pick up the new registration");

    cancel.cancel();
    handle.await.unwrap();
    assert_eq!(listener.state(), ListenerState::Stopped);
    assert_eq!(storage.get_cursor(1).await.unwrap().unwrap().last_block, 160);

    storage.close().await;
}
