//! Agent record storage operations.

use super::{Storage, StorageError, UpsertOutcome};
use agentindex_core::{
    Address, AgentRecord, AgentStats, CompositeId, ReputationSummary, B256, U256,
};
use anyhow::{Context, Result};
use std::str::FromStr;

/// Raw `agents` row.
#[derive(Debug, sqlx::FromRow)]
struct AgentRow {
    id: String,
    owner: String,
    name: String,
    description: String,
    metadata_uri: String,
    services: String,
    image: Option<String>,
    active: bool,
    reputation_score: f64,
    reputation_count: i64,
    tx_hash: Vec<u8>,
    block_number: i64,
    registered_at: i64,
    updated_at: i64,
}

impl TryFrom<AgentRow> for AgentRecord {
    type Error = StorageError;

    fn try_from(row: AgentRow) -> std::result::Result<Self, Self::Error> {
        let corrupt = |reason: String| StorageError::CorruptRow {
            id: row.id.clone(),
            reason,
        };

        let id = CompositeId::from_str(&row.id).map_err(|e| corrupt(e.to_string()))?;
        let owner = Address::from_str(&row.owner).map_err(|e| corrupt(e.to_string()))?;
        let services: Vec<String> =
            serde_json::from_str(&row.services).map_err(|e| corrupt(e.to_string()))?;
        if row.tx_hash.len() != 32 {
            return Err(corrupt(format!(
                "tx_hash has {} bytes, expected 32",
                row.tx_hash.len()
            )));
        }

        Ok(AgentRecord {
            id,
            owner,
            name: row.name,
            description: row.description,
            metadata_uri: row.metadata_uri,
            services,
            image: row.image,
            active: row.active,
            reputation_score: row.reputation_score,
            reputation_count: row.reputation_count as u64,
            tx_hash: B256::from_slice(&row.tx_hash),
            block_number: row.block_number as u64,
            registered_at: row.registered_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_AGENT: &str = r#"
    SELECT id, owner, name, description, metadata_uri, services, image, active,
           reputation_score, reputation_count, tx_hash, block_number,
           registered_at, updated_at
    FROM agents
"#;

/// Lowercase hex form used for the `owner` column.
pub(crate) fn owner_key(owner: &Address) -> String {
    owner.to_string().to_lowercase()
}

impl Storage {
    /// Insert or overwrite an agent, keyed by composite id.
    ///
    /// On conflict every field is overwritten except `registered_at` and the
    /// reputation pair, which only [`Storage::update_reputation`] writes.
    /// When the incoming content matches the stored row nothing is written,
    /// so replaying the same event leaves the record bit-for-bit identical.
    pub async fn upsert_agent(&self, record: &AgentRecord) -> Result<UpsertOutcome> {
        let id = record.id.to_string();
        let existed = self.agent_exists(&id).await?;

        let services =
            serde_json::to_string(&record.services).context("Failed to encode services")?;

        let result = sqlx::query(
            r#"
            INSERT INTO agents (
                id, chain_id, token_id, owner,
                name, description, metadata_uri, services, image, active,
                reputation_score, reputation_count,
                tx_hash, block_number, registered_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner = excluded.owner,
                name = excluded.name,
                description = excluded.description,
                metadata_uri = excluded.metadata_uri,
                services = excluded.services,
                image = excluded.image,
                active = excluded.active,
                tx_hash = excluded.tx_hash,
                block_number = excluded.block_number,
                updated_at = MAX(excluded.updated_at, agents.registered_at)
            WHERE agents.owner IS NOT excluded.owner
               OR agents.name IS NOT excluded.name
               OR agents.description IS NOT excluded.description
               OR agents.metadata_uri IS NOT excluded.metadata_uri
               OR agents.services IS NOT excluded.services
               OR agents.image IS NOT excluded.image
               OR agents.active IS NOT excluded.active
               OR agents.tx_hash IS NOT excluded.tx_hash
               OR agents.block_number IS NOT excluded.block_number
            "#,
        )
        .bind(&id)
        .bind(record.chain_id() as i64)
        .bind(record.token_id().to_string())
        .bind(owner_key(&record.owner))
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.metadata_uri)
        .bind(services)
        .bind(record.image.as_deref())
        .bind(record.active)
        .bind(record.reputation_score)
        .bind(record.reputation_count as i64)
        .bind(record.tx_hash.as_slice())
        .bind(record.block_number as i64)
        .bind(record.registered_at)
        .bind(record.updated_at.max(record.registered_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert agent {}", id))?;

        Ok(match (existed, result.rows_affected() > 0) {
            (false, _) => UpsertOutcome::Created,
            (true, true) => UpsertOutcome::Updated,
            (true, false) => UpsertOutcome::Unchanged,
        })
    }

    /// Overwrite an agent's reputation score and sample count.
    ///
    /// Overwrite, never accumulate: calling this twice with the same summary
    /// leaves the record as after the first call.
    pub async fn update_reputation(
        &self,
        id: &CompositeId,
        summary: &ReputationSummary,
        now: i64,
    ) -> Result<UpsertOutcome> {
        let key = id.to_string();

        let result = sqlx::query(
            r#"
            UPDATE agents
            SET reputation_score = ?,
                reputation_count = ?,
                updated_at = MAX(?, registered_at)
            WHERE id = ?
              AND (reputation_score IS NOT ? OR reputation_count IS NOT ?)
            "#,
        )
        .bind(summary.score)
        .bind(summary.count as i64)
        .bind(now)
        .bind(&key)
        .bind(summary.score)
        .bind(summary.count as i64)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update reputation for {}", key))?;

        if result.rows_affected() > 0 {
            return Ok(UpsertOutcome::Updated);
        }

        if self.agent_exists(&key).await? {
            Ok(UpsertOutcome::Unchanged)
        } else {
            Err(StorageError::AgentNotFound(*id).into())
        }
    }

    /// Get an agent by chain id and token id.
    pub async fn get_agent(&self, chain_id: u64, token_id: U256) -> Result<Option<AgentRecord>> {
        self.get_agent_by_id(&CompositeId::new(chain_id, token_id))
            .await
    }

    /// Get an agent by composite id.
    pub async fn get_agent_by_id(&self, id: &CompositeId) -> Result<Option<AgentRecord>> {
        let key = id.to_string();
        let row: Option<AgentRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_AGENT))
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch agent {}", key))?;

        row.map(AgentRecord::try_from)
            .transpose()
            .map_err(Into::into)
    }

    /// All agents owned by an address, on any chain, ordered by composite id.
    pub async fn get_agents_by_owner(&self, owner: &Address) -> Result<Vec<AgentRecord>> {
        let rows: Vec<AgentRow> = sqlx::query_as(&format!("{} WHERE owner = ?", SELECT_AGENT))
            .bind(owner_key(owner))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch agents for owner {}", owner))?;

        Self::rows_to_records(rows)
    }

    /// Every agent in the store, ordered by composite id.
    ///
    /// Used to (re)build the search index.
    pub async fn all_agents(&self) -> Result<Vec<AgentRecord>> {
        let rows: Vec<AgentRow> = sqlx::query_as(SELECT_AGENT)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch agents")?;

        Self::rows_to_records(rows)
    }

    /// Aggregate counts: total, per chain, per service tag.
    ///
    /// Scans the table; this is a low-frequency administrative query.
    pub async fn stats(&self) -> Result<AgentStats> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT chain_id, services FROM agents")
            .fetch_all(&self.pool)
            .await
            .context("Failed to scan agents for stats")?;

        let mut stats = AgentStats::default();
        for (chain_id, services) in rows {
            stats.total += 1;
            *stats.by_chain.entry(chain_id as u64).or_default() += 1;

            let services: Vec<String> = serde_json::from_str(&services)
                .context("Failed to decode services column")?;
            for tag in services {
                *stats.by_service_tag.entry(tag).or_default() += 1;
            }
        }

        Ok(stats)
    }

    async fn agent_exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to check agent {}", id))?;

        Ok(found.is_some())
    }

    fn rows_to_records(rows: Vec<AgentRow>) -> Result<Vec<AgentRecord>> {
        let mut records = rows
            .into_iter()
            .map(AgentRecord::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.sort_by_key(|record| record.id);
        Ok(records)
    }
}
