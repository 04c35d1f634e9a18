//! Chain cursor storage operations.

use super::{ChainCursor, Storage, StorageError};
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Get the cursor for a chain, or `None` if the chain was never synced.
    pub async fn get_cursor(&self, chain_id: u64) -> Result<Option<ChainCursor>> {
        let row = sqlx::query(
            r#"
            SELECT chain_id, last_block, updated_at
            FROM chain_cursors
            WHERE chain_id = ?
            "#,
        )
        .bind(chain_id as i64)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch cursor for chain {}", chain_id))?;

        Ok(row.map(|row| Self::row_to_cursor(&row)))
    }

    /// Advance a chain's cursor.
    ///
    /// Setting the same value again is a no-op success. A value lower than the
    /// stored one is rejected with [`StorageError::CursorRegression`] and the
    /// stored value is left untouched.
    pub async fn set_cursor(&self, chain_id: u64, block_number: u64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        // Single statement so the monotonicity check and the write are atomic.
        let result = sqlx::query(
            r#"
            INSERT INTO chain_cursors (chain_id, last_block, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(chain_id) DO UPDATE SET
                last_block = excluded.last_block,
                updated_at = excluded.updated_at
            WHERE excluded.last_block >= chain_cursors.last_block
            "#,
        )
        .bind(chain_id as i64)
        .bind(block_number as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update cursor for chain {}", chain_id))?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let current = self
            .get_cursor(chain_id)
            .await?
            .map(|cursor| cursor.last_block)
            .unwrap_or_default();

        Err(StorageError::CursorRegression {
            chain_id,
            current,
            attempted: block_number,
        }
        .into())
    }

    /// All cursors, ordered by chain id.
    pub async fn list_cursors(&self) -> Result<Vec<ChainCursor>> {
        let rows = sqlx::query(
            r#"
            SELECT chain_id, last_block, updated_at
            FROM chain_cursors
            ORDER BY chain_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list chain cursors")?;

        Ok(rows.iter().map(Self::row_to_cursor).collect())
    }

    fn row_to_cursor(row: &sqlx::sqlite::SqliteRow) -> ChainCursor {
        ChainCursor {
            chain_id: row.get::<i64, _>("chain_id") as u64,
            last_block: row.get::<i64, _>("last_block") as u64,
            updated_at: row.get("updated_at"),
        }
    }
}
