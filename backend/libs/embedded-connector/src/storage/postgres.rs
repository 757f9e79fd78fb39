use super::{OffsetBackingStore, OffsetEntries};
use crate::error::OffsetResult;
use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

/// Durable offset store backed by a PostgreSQL table.
///
/// Each flush runs in one transaction of `INSERT ... ON CONFLICT DO UPDATE`
/// statements, so replaying a flush is harmless.
pub struct PostgresOffsetBackingStore {
    pool: PgPool,
}

impl PostgresOffsetBackingStore {
    /// Create a store using the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OffsetBackingStore for PostgresOffsetBackingStore {
    async fn start(&self) -> OffsetResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS connector_offsets (
                offset_key BYTEA PRIMARY KEY,
                offset_value BYTEA NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create connector_offsets table")?;

        Ok(())
    }

    async fn get(&self, keys: &[Vec<u8>]) -> OffsetResult<OffsetEntries> {
        if keys.is_empty() {
            return Ok(OffsetEntries::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT offset_key, offset_value
            FROM connector_offsets
            WHERE offset_key = ANY($1)
            "#,
        )
        .bind(keys.to_vec())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch offsets")?;

        rows.into_iter()
            .map(|row| -> OffsetResult<(Vec<u8>, Vec<u8>)> {
                Ok((row.try_get("offset_key")?, row.try_get("offset_value")?))
            })
            .collect()
    }

    async fn set(&self, entries: OffsetEntries) -> OffsetResult<()> {
        let count = entries.len();
        let mut tx = self.pool.begin().await?;

        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO connector_offsets (offset_key, offset_value, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (offset_key)
                DO UPDATE SET offset_value = EXCLUDED.offset_value, updated_at = NOW()
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert offset")?;
        }

        tx.commit().await?;

        debug!(entries = count, "Offsets written to PostgreSQL");
        Ok(())
    }
}
